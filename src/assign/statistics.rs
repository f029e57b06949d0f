//! Per-section note statistics, gathered once while the section is replayed
//! and read by the plan scorer afterwards.

use std::collections::BTreeMap;

use crate::event::CHANNEL_COUNT;
use crate::midi_state::MidiState;
use crate::voice::{MAX_VOICES_PER_CHANNEL, PhysicalVoice, VOICE_COUNT, VoiceSet};

/// Buckets of the per-voice-count tables: 0 through 4 assigned voices.
pub const BUCKETS: usize = MAX_VOICES_PER_CHANNEL + 1;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelStatistics {
    /// Melodic notes started in the section.
    pub notes: u32,
    /// Notes outside each voice's playable range.
    pub out_of_range: [u32; VOICE_COUNT],
    pub volume_sum: f64,
    /// Chord size → number of notes started with that many keys sounding.
    pub chords: BTreeMap<usize, u32>,
    /// How many notes of each other channel were sounding when one of ours started.
    pub interrupting: [u32; CHANNEL_COUNT],
    /// Drum notes started in the section.
    pub drum_notes: u32,
    /// Voices the channel's drum presets occupy.
    pub drum_voices: VoiceSet,

    // Derived by `SectionStatistics::finalize`.
    /// Notes playable with k voices: every note whose chord fits in k.
    pub played_notes: [f64; BUCKETS],
    /// Chord-size weighted multiplier per voice count.
    pub chord_multiplier: [f64; BUCKETS],
    /// Collisions with each other channel, counted from both sides.
    pub interruptions: [f64; CHANNEL_COUNT],
}

impl ChannelStatistics {
    pub fn has_notes(&self) -> bool {
        self.notes > 0
    }

    pub fn is_drum(&self) -> bool {
        self.notes == 0 && self.drum_notes > 0
    }

    pub fn average_volume(&self) -> f64 {
        if self.notes == 0 {
            return 0.0;
        }
        self.volume_sum / f64::from(self.notes)
    }

    /// Fraction of the section's notes that `voices` voices can play.
    pub fn played_ratio(&self, voices: usize) -> f64 {
        if self.notes == 0 {
            return 0.0;
        }
        self.played_notes[voices.min(MAX_VOICES_PER_CHANNEL)] / f64::from(self.notes)
    }

    /// Out-of-range notes summed over `voices`.
    pub fn out_of_range_on(&self, voices: &VoiceSet) -> f64 {
        voices.iter().map(|voice| f64::from(self.out_of_range[voice.index()])).sum()
    }

    /// Largest chord seen, which bounds how many voices are worth granting.
    pub fn max_chord(&self) -> usize {
        self.chords.keys().next_back().copied().unwrap_or(0)
    }

    fn derive(&mut self) {
        for k in 0..BUCKETS {
            let mut count = 0u32;
            let mut weighted = 0.0;
            for size in 1..=k {
                let chords = self.chords.get(&size).copied().unwrap_or(0);
                count += chords;
                weighted += f64::from(chords) / (3.0 * size as f64 - 2.0);
            }
            self.played_notes[k] = f64::from(count);
            self.chord_multiplier[k] = if count == 0 { 0.0 } else { weighted / f64::from(count) };
        }
    }
}

/// Statistics of all sixteen channels for one section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionStatistics {
    channels: [ChannelStatistics; CHANNEL_COUNT],
}

impl SectionStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, channel: usize) -> &ChannelStatistics {
        &self.channels[channel]
    }

    pub fn has_notes(&self, channel: usize) -> bool {
        self.channels[channel].has_notes()
    }

    /// Whether any channel produced a note (melodic or drum).
    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|stats| stats.notes == 0 && stats.drum_notes == 0)
    }

    /// Record a melodic note. `state` must already hold the note.
    pub fn add_note(&mut self, channel: usize, key: u8, velocity: u8, state: &MidiState) {
        let channel_state = state.channel(channel);
        let stats = &mut self.channels[channel];

        stats.notes += 1;
        for voice in PhysicalVoice::ALL {
            if !voice.in_range(key) {
                stats.out_of_range[voice.index()] += 1;
            }
        }
        // a small floor keeps very quiet channels from scoring zero
        stats.volume_sum += channel_state.note_volume(velocity) + 0.01;
        *stats.chords.entry(channel_state.sounding().max(1)).or_insert(0) += 1;

        Self::count_interruptions(stats, channel, state);
    }

    /// Record a drum note that will sound on `voices`.
    pub fn add_drum_note(&mut self, channel: usize, voices: VoiceSet, state: &MidiState) {
        let stats = &mut self.channels[channel];
        stats.drum_notes += 1;
        stats.drum_voices = stats.drum_voices.union(&voices);
        Self::count_interruptions(stats, channel, state);
    }

    fn count_interruptions(stats: &mut ChannelStatistics, channel: usize, state: &MidiState) {
        for (other, other_state) in state.channels().enumerate() {
            if other != channel {
                stats.interrupting[other] += other_state.sounding() as u32;
            }
        }
    }

    /// Derive the per-voice-count tables and the symmetric interruption matrix.
    pub fn finalize(&mut self) {
        for stats in &mut self.channels {
            stats.derive();
        }
        for channel in 0..CHANNEL_COUNT {
            for other in 0..CHANNEL_COUNT {
                self.channels[channel].interruptions[other] = if channel == other {
                    0.0
                } else {
                    f64::from(self.channels[channel].interrupting[other])
                        + f64::from(self.channels[other].interrupting[channel])
                };
            }
        }
    }
}
