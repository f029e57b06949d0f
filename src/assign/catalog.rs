//! Candidate voice configurations per instrument kind.
//!
//! The catalog depends only on a small discrete key (duty, family, whether
//! the instrument sustains, and the voice budget), so every entry is built
//! once up front and the optimizer's inner loop only reads slices.

use std::collections::HashMap;

use crate::assign::plan::VoiceSetAssignment;
use crate::preset::InstrumentPreset;
use crate::voice::{ChannelFamily, DutyMode, MAX_VOICES_PER_CHANNEL, PhysicalVoice, VoiceSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CatalogKey {
    duty: DutyMode,
    family: ChannelFamily,
    sustains: bool,
    budget: usize,
}

const DUTIES: [DutyMode; 6] = [
    DutyMode::Unspecified,
    DutyMode::Pulse12,
    DutyMode::Pulse25,
    DutyMode::Pulse50,
    DutyMode::NoiseNormal,
    DutyMode::NoiseLoop,
];

const FAMILIES: [ChannelFamily; 5] = [
    ChannelFamily::Pulse,
    ChannelFamily::Triangle,
    ChannelFamily::Noise,
    ChannelFamily::Sample,
    ChannelFamily::Sawtooth,
];

#[derive(Debug, Clone)]
pub struct ConfigurationCatalog {
    entries: HashMap<CatalogKey, Vec<VoiceSetAssignment>>,
}

impl ConfigurationCatalog {
    pub fn new(use_expansion: bool) -> Self {
        let mut entries = HashMap::new();
        for duty in DUTIES {
            for family in FAMILIES {
                for sustains in [false, true] {
                    for budget in 0..=MAX_VOICES_PER_CHANNEL {
                        let key = CatalogKey {
                            duty,
                            family,
                            sustains,
                            budget,
                        };
                        entries.insert(key, build(key, use_expansion));
                    }
                }
            }
        }
        ConfigurationCatalog { entries }
    }

    /// Configurations legal for an instrument, best-known first.
    pub fn configurations(
        &self,
        duty: DutyMode,
        family: ChannelFamily,
        sustains: bool,
        max_voices: usize,
    ) -> &[VoiceSetAssignment] {
        let key = CatalogKey {
            duty,
            family,
            sustains,
            budget: max_voices.min(MAX_VOICES_PER_CHANNEL),
        };
        self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn for_preset(&self, preset: &InstrumentPreset, max_voices: usize) -> &[VoiceSetAssignment] {
        self.configurations(preset.duty, preset.family, preset.sustains(), max_voices)
    }
}

fn build(key: CatalogKey, use_expansion: bool) -> Vec<VoiceSetAssignment> {
    use PhysicalVoice::{Noise, PulseA, PulseB, PulseC, PulseD, Sample, Sawtooth, Triangle};

    if key.budget == 0 {
        return Vec::new();
    }
    let with = |duty, voices: &[PhysicalVoice]| VoiceSetAssignment::new(duty, VoiceSet::of(voices));

    match key.family {
        ChannelFamily::Noise => return vec![with(key.duty, &[Noise])],
        ChannelFamily::Sample => return vec![with(key.duty, &[Sample])],
        _ => {}
    }

    let mut pulse_sets = Vec::new();
    let mut add = |voices: &[PhysicalVoice]| pulse_sets.push(VoiceSet::of(voices));
    add(&[PulseB]);
    add(&[PulseA]);
    if key.budget >= 2 {
        add(&[PulseA, PulseB]);
    }
    if use_expansion {
        add(&[PulseD]);
        add(&[PulseC]);
        if key.budget >= 2 {
            add(&[PulseC, PulseD]);
            add(&[PulseB, PulseD]);
            add(&[PulseB, PulseC]);
            add(&[PulseA, PulseD]);
            add(&[PulseA, PulseC]);
        }
        if key.budget >= 3 {
            add(&[PulseB, PulseC, PulseD]);
            add(&[PulseA, PulseC, PulseD]);
            add(&[PulseA, PulseB, PulseD]);
            add(&[PulseA, PulseB, PulseC]);
        }
        if key.budget >= 4 {
            add(&[PulseA, PulseB, PulseC, PulseD]);
        }
    }

    let mut configurations: Vec<_> = pulse_sets
        .into_iter()
        .map(|voices| VoiceSetAssignment::new(key.duty, voices))
        .collect();
    if use_expansion {
        configurations.push(with(DutyMode::Unspecified, &[Sawtooth]));
    }
    // the triangle has no volume control, so decaying instruments stay off it
    if key.sustains {
        configurations.push(with(DutyMode::Unspecified, &[Triangle]));
    }
    configurations
}
