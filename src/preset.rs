//! Chip instrument presets.
//!
//! A preset describes how one General-MIDI program or one drum key should
//! sound on the chip: which generator family it needs, its volume envelope,
//! its duty requirement, and how important it is when voices run out.
//! Presets are built once by an [`InstrumentBase`] and shared read-only
//! behind `Arc`.

use std::sync::Arc;

use crate::voice::{ChannelFamily, DutyMode, VoiceSet};

/// Chip frame rate; protected intervals are expressed in frames.
pub const FRAME_RATE: f64 = 60.0;

// ── Envelope ────────────────────────────────────────────────

/// A 4-bit volume sequence played once per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub volume: Vec<u8>,
    /// Step the sequence jumps back to after its end.
    pub loop_point: Option<usize>,
    /// Step where the sequence waits until the note is released.
    pub release_point: Option<usize>,
}

impl Envelope {
    pub fn new(volume: Vec<u8>) -> Self {
        Envelope {
            volume,
            loop_point: None,
            release_point: None,
        }
    }

    pub fn with_release(mut self, step: usize) -> Self {
        self.release_point = Some(step);
        self
    }

    pub fn with_loop(mut self, step: usize) -> Self {
        self.loop_point = Some(step);
        self
    }

    /// Repeat every value from `start` down (or up) to `last`, `period` frames each.
    pub fn ramp(start: i32, last: i32, period: usize) -> Self {
        let step = if last >= start { 1 } else { -1 };
        let mut volume = Vec::new();
        let mut level = start;
        loop {
            volume.extend(std::iter::repeat_n(level.clamp(0, 15) as u8, period));
            if level == last {
                break;
            }
            level += step;
        }
        Envelope::new(volume)
    }

    /// True when the level never drops before the release point: the note
    /// keeps sounding at full strength until it is released.
    pub fn holds_until_release(&self) -> bool {
        let Some(release) = self.release_point else {
            return false;
        };
        let end = release.min(self.volume.len());
        self.volume[..end].windows(2).all(|pair| pair[0] <= pair[1])
    }
}

// ── Instrument ──────────────────────────────────────────────

/// A named chip instrument as it would appear in the exported module.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub name: String,
    pub envelope: Arc<Envelope>,
    /// Playback rate index for sample instruments (0..=15).
    pub sample_rate: Option<u8>,
}

impl Instrument {
    pub fn new(name: &str, envelope: Arc<Envelope>) -> Self {
        Instrument {
            name: name.to_string(),
            envelope,
            sample_rate: None,
        }
    }

    pub fn sample(name: &str, envelope: Arc<Envelope>, rate: u8) -> Self {
        Instrument {
            name: name.to_string(),
            envelope,
            sample_rate: Some(rate.min(15)),
        }
    }
}

// ── Priority Order ──────────────────────────────────────────

/// Drum category importance. Lower values are more important: a crash
/// outranks a hi-hat, which outranks a kick. Melodic instruments all share
/// the lowest rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Order(u8);

impl Order {
    pub const MELODIC: Order = Order(u8::MAX);

    pub fn drum(rank: u8) -> Self {
        Order(rank.min(u8::MAX - 1))
    }

    pub fn rank(self) -> u8 {
        self.0
    }
}

// ── Preset ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentPreset {
    pub family: ChannelFamily,
    pub instrument: Arc<Instrument>,
    /// Whether the note keeps sounding until an explicit release.
    pub needs_release: bool,
    pub duty: DutyMode,
    pub order: Order,
    /// Drum and noise presets play a fixed chip note regardless of the key.
    pub fixed_note: Option<u8>,
    /// Frames after onset during which equal or less important notes may
    /// not steal the voice.
    pub protected_ticks: u32,
}

impl InstrumentPreset {
    pub fn melodic(family: ChannelFamily, instrument: Arc<Instrument>, needs_release: bool, duty: DutyMode) -> Self {
        InstrumentPreset {
            family,
            instrument,
            needs_release,
            duty,
            order: Order::MELODIC,
            fixed_note: None,
            protected_ticks: 0,
        }
    }

    pub fn drum(
        family: ChannelFamily,
        instrument: Arc<Instrument>,
        duty: DutyMode,
        order: Order,
        fixed_note: u8,
        protected_ticks: u32,
    ) -> Self {
        InstrumentPreset {
            family,
            instrument,
            needs_release: false,
            duty,
            order,
            fixed_note: Some(fixed_note),
            protected_ticks,
        }
    }

    pub fn with_needs_release(mut self, needs_release: bool) -> Self {
        self.needs_release = needs_release;
        self
    }

    /// Sustained presets hold their level until released. Only those may be
    /// given the triangle, which has no volume control and cannot fade.
    pub fn sustains(&self) -> bool {
        self.needs_release && self.instrument.envelope.holds_until_release()
    }

    /// Voices able to play this preset.
    pub fn voices(&self, use_expansion: bool) -> VoiceSet {
        self.family.voices(use_expansion)
    }

    pub fn protected_seconds(&self) -> f64 {
        f64::from(self.protected_ticks) / FRAME_RATE
    }

    pub fn name(&self) -> &str {
        &self.instrument.name
    }
}

// ── Knowledge Base ──────────────────────────────────────────

/// Lookup of chip presets for source instruments.
pub trait InstrumentBase {
    /// Preset for a melodic program, or `None` when the program has no
    /// sensible chip equivalent.
    fn gm_preset(&self, program: u8) -> Option<Arc<InstrumentPreset>>;

    /// Presets for one key of a drum kit. A key may sound on several voices
    /// at once (noise plus sample); an empty list means the key is silent.
    fn drum_presets(&self, kit: u8, key: u8) -> Vec<Arc<InstrumentPreset>>;
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn preset_with(envelope: Envelope, needs_release: bool) -> InstrumentPreset {
        let instrument = Arc::new(Instrument::new("test", Arc::new(envelope)));
        InstrumentPreset::melodic(ChannelFamily::Pulse, instrument, needs_release, DutyMode::Pulse50)
    }

    #[test]
    fn test_ramp_envelope() {
        let envelope = Envelope::ramp(3, 0, 2);
        assert_eq!(envelope.volume, vec![3, 3, 2, 2, 1, 1, 0, 0]);
        assert_eq!(Envelope::ramp(1, 3, 1).volume, vec![1, 2, 3]);
    }

    #[test]
    fn test_sustain_detection() {
        let flat = Envelope::new(vec![15, 0]).with_release(0);
        let attack = Envelope::new(vec![3, 7, 11, 15, 0]).with_release(3);
        let piano = Envelope::ramp(15, 0, 6).with_release(90);
        let one_shot = Envelope::new(vec![12, 9, 6, 3, 1, 0]);

        assert!(preset_with(flat.clone(), true).sustains());
        assert!(preset_with(attack, true).sustains());
        assert!(!preset_with(piano, true).sustains(), "decaying envelope cannot sustain");
        assert!(!preset_with(one_shot, true).sustains());
        assert!(!preset_with(flat, false).sustains(), "one-shot preset never sustains");
    }

    #[test]
    fn test_order_ranks() {
        let crash = Order::drum(1);
        let hihat = Order::drum(10);
        assert!(crash < hihat);
        assert!(hihat < Order::MELODIC);
        assert_eq!(Order::drum(u8::MAX), Order::drum(u8::MAX - 1));
        assert_ne!(Order::drum(u8::MAX), Order::MELODIC);
    }

    #[test]
    fn test_protected_seconds() {
        let instrument = Arc::new(Instrument::new("crash", Arc::new(Envelope::new(vec![15]))));
        let crash = InstrumentPreset::drum(ChannelFamily::Noise, instrument, DutyMode::NoiseNormal, Order::drum(1), 9, 15);
        assert!((crash.protected_seconds() - 0.25).abs() < 1e-12);
        assert_eq!(crash.fixed_note, Some(9));
        assert!(!crash.needs_release);
    }
}
