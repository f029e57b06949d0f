//! The built-in instrument knowledge base: General-MIDI programs and drum
//! kits mapped onto chip presets.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::preset::{Envelope, Instrument, InstrumentBase, InstrumentPreset, Order};
use crate::voice::{ChannelFamily, DutyMode};

const KEY_COUNT: usize = 128;

/// Map a GM program number to its category name, for diagnostics.
pub fn gm_category(program: u8) -> &'static str {
    match program {
        0..=7 => "piano",
        8..=15 => "chromatic-percussion",
        16..=23 => "organ",
        24..=31 => "guitar",
        32..=39 => "bass",
        40..=47 => "strings",
        48..=55 => "ensemble",
        56..=63 => "brass",
        64..=71 => "reed",
        72..=79 => "pipe",
        80..=87 => "synth-lead",
        88..=95 => "synth-pad",
        96..=103 => "synth-effects",
        104..=111 => "ethnic",
        112..=119 => "percussive",
        120..=127 => "sound-effects",
        _ => "unknown",
    }
}

// ── Drum Kit ────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct DrumKit {
    keys: Vec<Vec<Arc<InstrumentPreset>>>,
}

impl DrumKit {
    fn new() -> Self {
        DrumKit {
            keys: vec![Vec::new(); KEY_COUNT],
        }
    }

    fn set(&mut self, key: u8, presets: Vec<InstrumentPreset>) {
        self.keys[usize::from(key)] = presets.into_iter().map(Arc::new).collect();
    }

    /// Put a sample on `key`, replacing any previous sample but keeping the
    /// noise layer.
    fn bind_sample(&mut self, key: u8, instrument: &str, order: u8, rate: u8, envelope: &Arc<Envelope>) {
        let instrument = Arc::new(Instrument::sample(instrument, envelope.clone(), rate));
        let presets = &mut self.keys[usize::from(key)];
        presets.retain(|preset| preset.family != ChannelFamily::Sample);
        presets.push(Arc::new(InstrumentPreset::drum(
            ChannelFamily::Sample,
            instrument,
            DutyMode::Unspecified,
            Order::drum(order),
            key,
            0,
        )));
    }

    fn presets(&self, key: u8) -> &[Arc<InstrumentPreset>] {
        self.keys.get(usize::from(key)).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── Standard Base ───────────────────────────────────────────

/// General-MIDI level 1 programs and the GS drum kits.
#[derive(Debug, Clone)]
pub struct StandardBase {
    gm: Vec<Option<Arc<InstrumentPreset>>>,
    kits: BTreeMap<u8, DrumKit>,
}

struct Palette {
    one_shot: Arc<Envelope>,
    loop_: Arc<Instrument>,
    loop_vibrato: Arc<Instrument>,
    fast_decay: Arc<Instrument>,
    decay: Arc<Instrument>,
    long_decay_cut: Arc<Instrument>,
    piano_cut: Arc<Instrument>,
    attack: Arc<Instrument>,
    strings: Arc<Instrument>,
    pad: Arc<Instrument>,
    guitar_distortion: Arc<Instrument>,
    snare: Arc<Instrument>,
    open_hat: Arc<Instrument>,
    analog_open_hat: Arc<Instrument>,
    crash: Arc<Instrument>,
    clap: Arc<Instrument>,
    hard_snare: Arc<Instrument>,
    reverse_cymbal: Arc<Instrument>,
}

impl Palette {
    fn new() -> Self {
        let named = |name: &str, envelope: &Arc<Envelope>| Arc::new(Instrument::new(name, envelope.clone()));

        let flat = Arc::new(Envelope::new(vec![15, 0]).with_loop(0).with_release(0));
        let fast_decay = Arc::new(Envelope::new(vec![12, 9, 6, 3, 1, 0]));
        let decay = Arc::new(Envelope::ramp(15, 0, 1));
        let long_decay = Arc::new(Envelope::ramp(15, 0, 2));
        let long_decay_cut = Arc::new(Envelope::ramp(15, 0, 2).with_release(30));
        let piano_cut = Arc::new(Envelope::ramp(15, 0, 6).with_release(90));
        let attack = Arc::new(Envelope::new(vec![3, 7, 11, 15, 0]).with_release(3));
        let strings = Arc::new(Envelope::new(vec![3, 7, 11, 15, 5, 5, 5, 5, 5, 5, 5, 5, 0]).with_release(3));
        let open_hat = Arc::new(Envelope::new(vec![
            15, 14, 12, 11, 10, 11, 12, 13, 13, 12, 11, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0,
        ]));
        let clap = Arc::new(Envelope::new(vec![11, 7, 12, 8, 13, 8, 6, 4, 2, 0]));
        let analog_open_hat = Arc::new(Envelope::new(vec![12, 12, 12, 12, 12, 0]));
        let mut reverse = Envelope::ramp(1, 10, 2);
        reverse.volume.push(0);
        let reverse_cymbal = Arc::new(reverse.with_release(19));
        let one_shot = Arc::new(Envelope::new(vec![15]));

        Palette {
            loop_: named("Loop", &flat),
            loop_vibrato: named("Loop vibrato", &flat),
            fast_decay: named("Fast decay", &fast_decay),
            decay: named("Decay", &decay),
            long_decay_cut: named("Long decay cut", &long_decay_cut),
            piano_cut: named("Piano cut", &piano_cut),
            attack: named("Attack", &attack),
            strings: named("Strings", &strings),
            pad: named("Pad", &strings),
            guitar_distortion: named("Guitar distortion", &flat),
            snare: named("Snare", &fast_decay),
            open_hat: named("Open hi-hat", &open_hat),
            analog_open_hat: named("Analog open hi-hat", &analog_open_hat),
            crash: named("Crash", &long_decay),
            clap: named("Clap", &clap),
            hard_snare: named("Hard snare", &decay),
            reverse_cymbal: named("Reverse cymbal", &reverse_cymbal),
            one_shot,
        }
    }

    fn sample(&self, name: &str, rate: u8) -> Arc<Instrument> {
        Arc::new(Instrument::sample(name, self.one_shot.clone(), rate))
    }
}

impl StandardBase {
    pub fn new() -> Self {
        let palette = Palette::new();
        let gm = general_midi(&palette);
        let kits = drum_kits(&palette);
        StandardBase { gm, kits }
    }
}

impl Default for StandardBase {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentBase for StandardBase {
    fn gm_preset(&self, program: u8) -> Option<Arc<InstrumentPreset>> {
        self.gm.get(usize::from(program)).cloned().flatten()
    }

    fn drum_presets(&self, kit: u8, key: u8) -> Vec<Arc<InstrumentPreset>> {
        self.kits
            .get(&kit)
            .or_else(|| self.kits.get(&0))
            .map(|kit| kit.presets(key).to_vec())
            .unwrap_or_default()
    }
}

// ── Tables ──────────────────────────────────────────────────

fn general_midi(p: &Palette) -> Vec<Option<Arc<InstrumentPreset>>> {
    use ChannelFamily::{Noise, Pulse, Sample, Sawtooth, Triangle};
    use DutyMode::{NoiseLoop, NoiseNormal, Pulse12, Pulse25, Pulse50, Unspecified};

    let melodic = |family, instrument: &Arc<Instrument>, needs_release, duty| {
        Some(InstrumentPreset::melodic(family, instrument.clone(), needs_release, duty))
    };
    let sample = |name: &str| melodic(Sample, &p.sample(name, 15), false, Unspecified);

    let mut gm: Vec<Option<InstrumentPreset>> = vec![None; KEY_COUNT];
    for program in 0..KEY_COUNT {
        gm[program] = match program {
            // piano
            0..=5 => melodic(Pulse, &p.piano_cut, true, Pulse50),
            6 | 7 => melodic(Pulse, &p.piano_cut, true, Pulse12),
            // chromatic percussion
            10 | 13 => melodic(Pulse, &p.long_decay_cut, false, Pulse50),
            15 => melodic(Pulse, &p.piano_cut, false, Pulse12),
            8..=14 => melodic(Pulse, &p.piano_cut, false, Pulse50),
            // organ
            16..=23 => melodic(Pulse, &p.attack, true, Pulse25),
            // guitar
            24..=27 => melodic(Pulse, &p.piano_cut, true, Pulse25),
            28 => melodic(Pulse, &p.long_decay_cut, true, Pulse25),
            29..=31 => melodic(Pulse, &p.guitar_distortion, true, Unspecified),
            // bass
            32..=39 => melodic(Triangle, &p.loop_, true, Unspecified),
            // strings
            40..=44 => melodic(Pulse, &p.strings, true, Pulse50),
            45 => melodic(Pulse, &p.decay, false, Pulse50),
            46 => melodic(Pulse, &p.piano_cut, false, Pulse50),
            47 => sample("Timpani"),
            // ensemble
            48..=52 => melodic(Pulse, &p.strings, true, Pulse50),
            53 | 54 => melodic(Pulse, &p.loop_, true, Pulse50),
            55 => sample("Orchestra hit"),
            // brass
            56..=63 => melodic(Pulse, &p.loop_, true, Pulse12),
            // reed
            68..=70 => melodic(Pulse, &p.loop_vibrato, true, Pulse25),
            64..=71 => melodic(Pulse, &p.loop_, true, Pulse25),
            // pipe
            72..=79 => melodic(Pulse, &p.loop_vibrato, true, Pulse50),
            // synth lead
            81 => melodic(Sawtooth, &p.loop_, true, Unspecified),
            84 | 86 => melodic(Pulse, &p.loop_, true, Pulse25),
            87 => melodic(Pulse, &p.loop_, true, Pulse12),
            80..=87 => melodic(Pulse, &p.loop_, true, Pulse50),
            // synth pad
            89 | 95 => melodic(Triangle, &p.pad, true, Unspecified),
            90 => melodic(Pulse, &p.loop_, true, Pulse25),
            93 => melodic(Sawtooth, &p.pad, true, Unspecified),
            94 => melodic(Pulse, &p.pad, true, Pulse50),
            88..=95 => melodic(Pulse, &p.piano_cut, false, Pulse50),
            // synth effects
            97 => melodic(Pulse, &p.pad, true, Pulse25),
            99 => melodic(Pulse, &p.piano_cut, false, Pulse25),
            101 => melodic(Triangle, &p.pad, true, Unspecified),
            102 => melodic(Pulse, &p.strings, true, Pulse25),
            103 => melodic(Pulse, &p.piano_cut, false, Pulse12),
            96..=103 => melodic(Pulse, &p.piano_cut, false, Pulse50),
            // ethnic
            104 => melodic(Pulse, &p.piano_cut, false, Pulse25),
            105 => melodic(Pulse, &p.piano_cut, true, Pulse25),
            106 => melodic(Pulse, &p.long_decay_cut, false, Pulse12),
            107 => melodic(Pulse, &p.piano_cut, false, Pulse12),
            108 => melodic(Pulse, &p.long_decay_cut, false, Pulse50),
            109 => melodic(Pulse, &p.attack, true, Pulse50),
            110 => melodic(Pulse, &p.strings, true, Pulse50),
            111 => melodic(Pulse, &p.loop_, true, Pulse25),
            // percussive
            112 | 114 => melodic(Pulse, &p.long_decay_cut, false, Pulse50),
            113 => Some(InstrumentPreset::drum(Noise, p.fast_decay.clone(), NoiseLoop, Order::drum(11), 12, 0)),
            115 => sample("Woodblock"),
            116 => sample("Taiko"),
            117 => sample("Melodic tom"),
            118 => sample("Synth drum"),
            119 => Some(
                InstrumentPreset::drum(Noise, p.reverse_cymbal.clone(), NoiseNormal, Order::drum(1), 10, 0)
                    .with_needs_release(true),
            ),
            // sound effects have no chip equivalent, except the gunshot
            127 => Some(InstrumentPreset::drum(Noise, p.decay.clone(), NoiseNormal, Order::MELODIC, 1, 5)),
            _ => None,
        };
    }
    gm.into_iter().map(|preset| preset.map(Arc::new)).collect()
}

fn drum_kits(p: &Palette) -> BTreeMap<u8, DrumKit> {
    use ChannelFamily::Noise;
    use DutyMode::{NoiseLoop, NoiseNormal, Unspecified};

    let noise = |instrument: &Arc<Instrument>, duty, order, note, protected| {
        vec![InstrumentPreset::drum(Noise, instrument.clone(), duty, Order::drum(order), note, protected)]
    };
    let samples = &p.one_shot;

    let mut standard = DrumKit::new();
    standard.set(49, noise(&p.crash, NoiseNormal, 1, 9, 15));
    standard.set(57, noise(&p.crash, NoiseNormal, 2, 10, 15));
    standard.set(52, noise(&p.crash, NoiseNormal, 3, 6, 15));
    standard.set(55, noise(&p.crash, NoiseNormal, 4, 13, 15));
    standard.set(39, noise(&p.clap, Unspecified, 7, 8, 0));
    standard.set(46, noise(&p.open_hat, NoiseNormal, 8, 9, 0));
    for key in [51, 53, 59] {
        standard.set(key, noise(&p.fast_decay, NoiseLoop, 9, 9, 0));
    }
    for key in [42, 44] {
        standard.set(key, noise(&p.fast_decay, NoiseNormal, 10, 12, 0));
    }
    standard.set(80, noise(&p.fast_decay, NoiseLoop, 12, 15, 0));
    standard.set(81, noise(&p.decay, NoiseLoop, 12, 15, 0));
    for key in [38, 40] {
        standard.set(key, noise(&p.snare, NoiseNormal, 13, 12, 0));
    }
    for key in [35, 36] {
        standard.set(key, noise(&p.fast_decay, NoiseNormal, 14, 12, 0));
    }
    for (key, order, rate) in [
        (38, 1, 15),
        (40, 1, 15),
        (41, 2, 10),
        (43, 2, 11),
        (45, 2, 12),
        (47, 2, 13),
        (48, 2, 14),
        (50, 2, 15),
        (35, 3, 15),
        (36, 3, 15),
        (65, 4, 15),
        (66, 4, 14),
        (37, 5, 15),
    ] {
        standard.bind_sample(key, "Standard drums", order, rate, samples);
    }

    let mut power = standard.clone();
    for key in [38, 40] {
        power.set(key, noise(&p.hard_snare, NoiseNormal, 5, 6, 5));
    }
    for (key, note) in [(41, 2), (43, 3), (45, 4), (47, 5), (48, 6), (50, 7)] {
        power.set(key, noise(&p.decay, NoiseNormal, 6, note, 5));
    }

    let mut electronic = power.clone();
    for key in [35, 36] {
        electronic.bind_sample(key, "Hard drums", 3, 15, samples);
    }

    let mut analog = standard.clone();
    analog.set(46, noise(&p.analog_open_hat, NoiseNormal, 8, 12, 0));
    for (key, order) in [(38, 1), (40, 1), (35, 3), (36, 3)] {
        analog.bind_sample(key, "Analog drums", order, 15, samples);
    }

    let mut orchestra = standard.clone();
    for key in [38, 40] {
        orchestra.set(key, noise(&p.fast_decay, NoiseNormal, 5, 9, 0));
    }
    orchestra.set(59, noise(&p.crash, NoiseNormal, 1, 9, 15));
    for (key, order) in [(35, 3), (36, 3), (39, 5)] {
        orchestra.bind_sample(key, "Orchestra drums", order, 15, samples);
    }
    let timpani = p.sample("Timpani", 15);
    for key in 41..=53 {
        orchestra.set(
            key,
            vec![InstrumentPreset::drum(
                ChannelFamily::Sample,
                timpani.clone(),
                Unspecified,
                Order::drum(2),
                key,
                0,
            )],
        );
    }

    let mut kits = BTreeMap::new();
    kits.insert(0, standard);
    kits.insert(16, power);
    kits.insert(24, electronic);
    for kit in [25, 26, 27, 30] {
        kits.insert(kit, analog.clone());
    }
    kits.insert(48, orchestra);
    // sound effects kit is silent
    kits.insert(56, DrumKit::new());
    kits
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gm_piano_and_bass() {
        let base = StandardBase::new();
        let piano = base.gm_preset(0).expect("piano preset");
        assert_eq!(piano.family, ChannelFamily::Pulse);
        assert_eq!(piano.duty, DutyMode::Pulse50);
        assert!(!piano.sustains(), "piano decays");
        assert_eq!(piano.order, Order::MELODIC);

        let bass = base.gm_preset(33).expect("bass preset");
        assert_eq!(bass.family, ChannelFamily::Triangle);
        assert!(bass.sustains());
    }

    #[test]
    fn test_sound_effects_have_no_preset() {
        let base = StandardBase::new();
        for program in 120..=126 {
            assert!(base.gm_preset(program).is_none(), "program {program} should be unmapped");
        }
        assert_eq!(base.gm_preset(127).map(|p| p.family), Some(ChannelFamily::Noise));
    }

    #[test]
    fn test_every_melodic_program_except_effects_is_mapped() {
        let base = StandardBase::new();
        let mapped = (0..=127u8).filter(|&program| base.gm_preset(program).is_some()).count();
        assert_eq!(mapped, 121);
    }

    #[test]
    fn test_standard_snare_layers_noise_and_sample() {
        let base = StandardBase::new();
        let snare = base.drum_presets(0, 38);
        let families: Vec<_> = snare.iter().map(|p| p.family).collect();
        assert_eq!(families, vec![ChannelFamily::Noise, ChannelFamily::Sample]);
        assert_eq!(snare[1].order, Order::drum(1));
    }

    #[test]
    fn test_crash_outranks_hihat() {
        let base = StandardBase::new();
        let crash = &base.drum_presets(0, 49)[0];
        let hihat = &base.drum_presets(0, 42)[0];
        assert!(crash.order < hihat.order);
        assert_eq!(crash.protected_ticks, 15);
    }

    #[test]
    fn test_unknown_kit_falls_back_to_standard() {
        let base = StandardBase::new();
        assert_eq!(base.drum_presets(99, 49), base.drum_presets(0, 49));
        assert!(base.drum_presets(56, 49).is_empty(), "sfx kit is silent");
    }

    #[test]
    fn test_power_kit_replaces_snare_sample() {
        let base = StandardBase::new();
        let snare = base.drum_presets(16, 38);
        assert_eq!(snare.len(), 1);
        assert_eq!(snare[0].instrument.name, "Hard snare");
        let kick = base.drum_presets(24, 36);
        assert_eq!(kick.last().map(|p| p.name()), Some("Hard drums"));
    }

    #[test]
    fn test_gm_category() {
        assert_eq!(gm_category(0), "piano");
        assert_eq!(gm_category(33), "bass");
        assert_eq!(gm_category(127), "sound-effects");
    }
}
