//! Physical voices of the 2A03 + VRC6 chip pair, and the small value types
//! describing which of them a logical channel may draw from.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Number of independent voices across both chips.
pub const VOICE_COUNT: usize = 8;

/// Most voices a single logical channel can hold at once (the four pulses).
pub const MAX_VOICES_PER_CHANNEL: usize = 4;

// ── Physical Voice ──────────────────────────────────────────

/// One monophonic sound generator. Declaration order is the chip's channel
/// order and is relied on for deterministic iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhysicalVoice {
    #[serde(alias = "pulse1")]
    PulseA,
    #[serde(alias = "pulse2")]
    PulseB,
    Triangle,
    Noise,
    #[serde(alias = "dpcm")]
    Sample,
    #[serde(alias = "pulse3")]
    PulseC,
    #[serde(alias = "pulse4")]
    PulseD,
    Sawtooth,
}

impl PhysicalVoice {
    pub const ALL: [PhysicalVoice; VOICE_COUNT] = [
        PhysicalVoice::PulseA,
        PhysicalVoice::PulseB,
        PhysicalVoice::Triangle,
        PhysicalVoice::Noise,
        PhysicalVoice::Sample,
        PhysicalVoice::PulseC,
        PhysicalVoice::PulseD,
        PhysicalVoice::Sawtooth,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_pulse(self) -> bool {
        matches!(
            self,
            PhysicalVoice::PulseA | PhysicalVoice::PulseB | PhysicalVoice::PulseC | PhysicalVoice::PulseD
        )
    }

    /// Voices provided by the VRC6 expansion chip.
    pub fn is_expansion(self) -> bool {
        matches!(self, PhysicalVoice::PulseC | PhysicalVoice::PulseD | PhysicalVoice::Sawtooth)
    }

    /// Noise and Sample ignore pitch bend, tuning, and detune.
    pub fn is_pitched(self) -> bool {
        !matches!(self, PhysicalVoice::Noise | PhysicalVoice::Sample)
    }

    pub fn family(self) -> ChannelFamily {
        match self {
            PhysicalVoice::PulseA | PhysicalVoice::PulseB | PhysicalVoice::PulseC | PhysicalVoice::PulseD => {
                ChannelFamily::Pulse
            }
            PhysicalVoice::Triangle => ChannelFamily::Triangle,
            PhysicalVoice::Noise => ChannelFamily::Noise,
            PhysicalVoice::Sample => ChannelFamily::Sample,
            PhysicalVoice::Sawtooth => ChannelFamily::Sawtooth,
        }
    }

    /// MIDI keys this voice reproduces faithfully. The 2A03 pulses cannot
    /// reach the lowest octaves; the triangle sounds an octave up, so its
    /// range is shifted down.
    pub fn key_range(self) -> RangeInclusive<u8> {
        match self {
            PhysicalVoice::PulseA | PhysicalVoice::PulseB => 33..=119,
            PhysicalVoice::Triangle => 21..=107,
            PhysicalVoice::Noise => 0..=127,
            _ => 24..=119,
        }
    }

    pub fn in_range(self, key: u8) -> bool {
        self.key_range().contains(&key)
    }

    /// Loudness compensation applied when mapping MIDI volume to the 4-bit
    /// chip volume.
    pub fn volume_factor(self) -> f64 {
        match self {
            PhysicalVoice::Triangle | PhysicalVoice::Sample => 1.0,
            PhysicalVoice::Noise => 0.8,
            PhysicalVoice::Sawtooth => 0.5,
            _ => 0.6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PhysicalVoice::PulseA => "pulse-a",
            PhysicalVoice::PulseB => "pulse-b",
            PhysicalVoice::Triangle => "triangle",
            PhysicalVoice::Noise => "noise",
            PhysicalVoice::Sample => "sample",
            PhysicalVoice::PulseC => "pulse-c",
            PhysicalVoice::PulseD => "pulse-d",
            PhysicalVoice::Sawtooth => "sawtooth",
        }
    }
}

impl fmt::Display for PhysicalVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Channel Family ──────────────────────────────────────────

/// The kind of generator an instrument needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelFamily {
    Pulse,
    Triangle,
    Noise,
    Sample,
    Sawtooth,
}

impl ChannelFamily {
    /// Voices able to play this family, optionally without the expansion chip.
    pub fn voices(self, use_expansion: bool) -> VoiceSet {
        PhysicalVoice::ALL
            .into_iter()
            .filter(|voice| voice.family() == self && (use_expansion || !voice.is_expansion()))
            .collect()
    }
}

// ── Duty Mode ───────────────────────────────────────────────

/// Waveform shape requirement. Pulse ratios and noise modes share one
/// enumeration; `Unspecified` leaves the voice's current setting alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DutyMode {
    #[default]
    #[serde(alias = "any")]
    Unspecified,
    Pulse12,
    Pulse25,
    Pulse50,
    NoiseNormal,
    NoiseLoop,
}

impl DutyMode {
    pub const PULSE_RATIOS: [DutyMode; 3] = [DutyMode::Pulse12, DutyMode::Pulse25, DutyMode::Pulse50];

    pub fn is_pulse_ratio(self) -> bool {
        matches!(self, DutyMode::Pulse12 | DutyMode::Pulse25 | DutyMode::Pulse50)
    }

    /// Value written to the duty register of `voice`. The VRC6 pulses use a
    /// 3-bit duty field, so the same ratio encodes differently there.
    pub fn register_value(self, voice: PhysicalVoice) -> Option<u8> {
        match (self, voice.is_expansion()) {
            (DutyMode::Pulse12, false) => Some(0),
            (DutyMode::Pulse25, false) => Some(1),
            (DutyMode::Pulse50, false) => Some(2),
            (DutyMode::Pulse12, true) => Some(1),
            (DutyMode::Pulse25, true) => Some(3),
            (DutyMode::Pulse50, true) => Some(7),
            (DutyMode::NoiseNormal, _) => Some(0),
            (DutyMode::NoiseLoop, _) => Some(1),
            (DutyMode::Unspecified, _) => None,
        }
    }
}

// ── Voice Set ───────────────────────────────────────────────

/// A set of physical voices backed by one flag per voice. Equality and
/// hashing are structural, which is all plan memoization needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Vec<PhysicalVoice>", into = "Vec<PhysicalVoice>")]
pub struct VoiceSet([bool; VOICE_COUNT]);

impl VoiceSet {
    pub const EMPTY: VoiceSet = VoiceSet([false; VOICE_COUNT]);

    pub fn of(voices: &[PhysicalVoice]) -> Self {
        voices.iter().copied().collect()
    }

    pub fn insert(&mut self, voice: PhysicalVoice) -> bool {
        !std::mem::replace(&mut self.0[voice.index()], true)
    }

    pub fn remove(&mut self, voice: PhysicalVoice) -> bool {
        std::mem::replace(&mut self.0[voice.index()], false)
    }

    pub fn contains(&self, voice: PhysicalVoice) -> bool {
        self.0[voice.index()]
    }

    pub fn len(&self) -> usize {
        self.0.iter().filter(|&&present| present).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.0.iter().any(|&present| present)
    }

    pub fn is_subset(&self, other: &VoiceSet) -> bool {
        self.iter().all(|voice| other.contains(voice))
    }

    pub fn intersection(&self, other: &VoiceSet) -> VoiceSet {
        self.iter().filter(|&voice| other.contains(voice)).collect()
    }

    pub fn union(&self, other: &VoiceSet) -> VoiceSet {
        self.iter().chain(other.iter()).collect()
    }

    pub fn difference(&self, other: &VoiceSet) -> VoiceSet {
        self.iter().filter(|&voice| !other.contains(voice)).collect()
    }

    /// Voices in chip channel order.
    pub fn iter(&self) -> impl Iterator<Item = PhysicalVoice> + '_ {
        PhysicalVoice::ALL.into_iter().filter(|voice| self.contains(*voice))
    }

    pub fn has_pulse(&self) -> bool {
        self.iter().any(PhysicalVoice::is_pulse)
    }
}

impl FromIterator<PhysicalVoice> for VoiceSet {
    fn from_iter<I: IntoIterator<Item = PhysicalVoice>>(iter: I) -> Self {
        let mut set = VoiceSet::EMPTY;
        for voice in iter {
            set.insert(voice);
        }
        set
    }
}

impl From<Vec<PhysicalVoice>> for VoiceSet {
    fn from(voices: Vec<PhysicalVoice>) -> Self {
        voices.into_iter().collect()
    }
}

impl From<VoiceSet> for Vec<PhysicalVoice> {
    fn from(set: VoiceSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Display for VoiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, voice) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{voice}")?;
        }
        f.write_str("}")
    }
}

// ── Tests ───────────────────────────────────────────────────
