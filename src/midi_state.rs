//! Live per-channel MIDI controller state, replayed event by event.

use std::collections::BTreeMap;

use crate::event::{CHANNEL_COUNT, EventKind, MidiEvent};

/// The GM percussion channel.
pub const DRUM_CHANNEL: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldNote {
    /// When the note stops sounding even without a note-off.
    pub end_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Keys currently held down, ordered by key.
    pub notes: BTreeMap<u8, HeldNote>,
    pub program: u8,
    pub drums: bool,
    pub volume: f64,
    pub expression: f64,
    /// Bend as a fraction of `pitch_range`.
    pub pitch_bend: f64,
    pub pitch_range: u8,
    pub fine_tune: f64,
    pub coarse_tune: i8,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            notes: BTreeMap::new(),
            program: 0,
            drums: false,
            volume: 1.0,
            expression: 1.0,
            pitch_bend: 0.0,
            pitch_range: 2,
            fine_tune: 0.0,
            coarse_tune: 0,
        }
    }
}

impl ChannelState {
    /// Loudness of a note on this channel, on the MIDI velocity scale.
    pub fn note_volume(&self, velocity: u8) -> f64 {
        f64::from(velocity) * self.volume * self.expression
    }

    /// Sounding pitch of `key` in fractional semitones.
    pub fn pitched_key(&self, key: u8) -> f64 {
        f64::from(key)
            + self.pitch_bend * f64::from(self.pitch_range)
            + f64::from(self.coarse_tune)
            + self.fine_tune
    }

    pub fn sounding(&self) -> usize {
        self.notes.len()
    }

    fn reset_controllers(&mut self) {
        self.expression = 1.0;
        self.pitch_bend = 0.0;
    }
}

/// State of all sixteen channels.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiState {
    channels: [ChannelState; CHANNEL_COUNT],
}

impl Default for MidiState {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiState {
    pub fn new() -> Self {
        let mut channels: [ChannelState; CHANNEL_COUNT] = Default::default();
        channels[DRUM_CHANNEL].drums = true;
        MidiState { channels }
    }

    pub fn channel(&self, channel: usize) -> &ChannelState {
        &self.channels[channel]
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.iter()
    }

    pub fn apply(&mut self, event: &MidiEvent) {
        if event.kind == EventKind::SystemReset {
            *self = MidiState::new();
            return;
        }
        for channel in &mut self.channels {
            channel.notes.retain(|_, held| held.end_time > event.time);
        }
        let Some(state) = self.channels.get_mut(usize::from(event.channel)) else {
            return;
        };
        match event.kind {
            EventKind::NoteOn { key, end_time, .. } => {
                let end_time = end_time.unwrap_or(f64::INFINITY);
                state.notes.insert(key, HeldNote { end_time });
            }
            EventKind::NoteOff { key } | EventKind::NoteStop { key } => {
                state.notes.remove(&key);
            }
            EventKind::Program { program } => state.program = program,
            EventKind::Drums { enabled } => state.drums = enabled,
            EventKind::Volume { level } => state.volume = level.clamp(0.0, 1.0),
            EventKind::Expression { level } => state.expression = level.clamp(0.0, 1.0),
            EventKind::PitchBend { amount } => state.pitch_bend = amount.clamp(-1.0, 1.0),
            EventKind::PitchRange { semitones } => state.pitch_range = semitones,
            EventKind::FineTune { semitones } => state.fine_tune = semitones,
            EventKind::CoarseTune { semitones } => state.coarse_tune = semitones,
            EventKind::ResetControllers => state.reset_controllers(),
            EventKind::AllNotesOff | EventKind::SoundOff => state.notes.clear(),
            EventKind::SystemReset => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_nine_defaults_to_drums() {
        let state = MidiState::new();
        assert!(state.channel(DRUM_CHANNEL).drums);
        assert!(!state.channel(0).drums);
    }

    #[test]
    fn test_notes_and_controllers() {
        let mut state = MidiState::new();
        state.apply(&MidiEvent::note_on(0.0, 0, 60, 100, 1.0));
        state.apply(&MidiEvent::note_on(0.0, 0, 64, 80, 1.0));
        assert_eq!(state.channel(0).sounding(), 2);
        state.apply(&MidiEvent::note_off(0.5, 0, 60));
        assert_eq!(state.channel(0).notes.keys().copied().collect::<Vec<_>>(), vec![64]);

        state.apply(&MidiEvent::new(0.5, 0, EventKind::Volume { level: 0.5 }));
        state.apply(&MidiEvent::new(0.5, 0, EventKind::PitchBend { amount: 0.5 }));
        assert_eq!(state.channel(0).note_volume(100), 50.0);
        assert_eq!(state.channel(0).pitched_key(60), 61.0);

        state.apply(&MidiEvent::new(0.6, 0, EventKind::ResetControllers));
        assert_eq!(state.channel(0).pitched_key(60), 60.0);
        assert_eq!(state.channel(0).volume, 0.5, "volume survives a controller reset");
    }

    #[test]
    fn test_notes_expire_at_their_end_time() {
        let mut state = MidiState::new();
        state.apply(&MidiEvent::note_on(0.0, 0, 60, 100, 0.5));
        state.apply(&MidiEvent::note_on(0.25, 1, 48, 100, 2.0));
        assert_eq!(state.channel(0).sounding(), 1);

        state.apply(&MidiEvent::note_on(0.5, 0, 62, 100, 1.0));
        assert_eq!(state.channel(0).notes.keys().copied().collect::<Vec<_>>(), vec![62], "60 ended at 0.5");
        assert_eq!(state.channel(1).sounding(), 1);

        let open_ended = MidiEvent::new(
            1.0,
            2,
            EventKind::NoteOn {
                key: 40,
                velocity: 90,
                end_time: None,
            },
        );
        state.apply(&open_ended);
        state.apply(&MidiEvent::program(100.0, 3, 1));
        assert_eq!(state.channel(2).sounding(), 1, "unresolved notes hold until a note-off");
        assert_eq!(state.channel(0).sounding(), 0);
    }

    #[test]
    fn test_system_reset_restores_defaults() {
        let mut state = MidiState::new();
        state.apply(&MidiEvent::program(0.0, 3, 40));
        state.apply(&MidiEvent::new(0.0, 9, EventKind::Drums { enabled: false }));
        state.apply(&MidiEvent::new(1.0, 0, EventKind::SystemReset));
        assert_eq!(state, MidiState::new());
    }
}
