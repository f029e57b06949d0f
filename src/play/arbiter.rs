//! Real-time voice choice for each note, with priority-based stealing.
//!
//! Every candidate voice is scored twice: once for the new note and once
//! for whatever the voice is sounding now (a fixed baseline when idle).
//! The candidate whose difference is lexicographically greatest wins, and
//! only if that difference beats doing nothing; otherwise the note is
//! dropped.

use serde::{Deserialize, Serialize};

use crate::assign::{PlanSchedule, TriggerCandidate};
use crate::config::{ChannelSettings, ConverterConfig, ScoringWeights};
use crate::event::CHANNEL_COUNT;
use crate::midi_state::MidiState;
use crate::play::score::{ScoreLevel, ScoreVector};
use crate::play::state::{PlaybackState, SoundingVoice, VoiceState};
use crate::preset::InstrumentBase;
use crate::voice::{PhysicalVoice, VoiceSet};

/// A note-on as the arbiter sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteRequest {
    /// Event index, used to find the plan in effect.
    pub index: usize,
    pub time: f64,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub end_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The program or drum key has no chip preset.
    NoPreset,
    /// The channel holds no voice in the current plan.
    NoVoiceAssigned,
    /// Every candidate voice is busy with something more important.
    VoicesBusy,
    /// Stolen in its onset row, before the chip could sound it.
    Evicted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Play(Vec<TriggerCandidate>),
    Drop(DropReason),
}

pub struct NoteArbiter<'a> {
    base: &'a dyn InstrumentBase,
    schedule: &'a PlanSchedule,
    settings: [ChannelSettings; CHANNEL_COUNT],
    weights: ScoringWeights,
    use_expansion: bool,
}

impl<'a> NoteArbiter<'a> {
    pub fn new(base: &'a dyn InstrumentBase, config: &ConverterConfig, schedule: &'a PlanSchedule) -> Self {
        NoteArbiter {
            base,
            schedule,
            settings: std::array::from_fn(|channel| config.channel(channel)),
            weights: config.weights,
            use_expansion: config.use_expansion,
        }
    }

    /// Decide which voices play `note`. `midi` must already hold the note.
    pub fn decide(&self, note: &NoteRequest, midi: &MidiState, playback: &PlaybackState) -> Decision {
        let channel = midi.channel(usize::from(note.channel));
        let settings = &self.settings[usize::from(note.channel)];

        if channel.drums {
            return self.decide_drum(note, channel.program, settings, playback);
        }

        let Some(preset) = self.base.gm_preset(channel.program) else {
            return Decision::Drop(DropReason::NoPreset);
        };
        let assignment = self
            .schedule
            .active_at(note.index)
            .map(|indexed| *indexed.plan.get(usize::from(note.channel)))
            .unwrap_or_default();
        if !settings.enabled || assignment.is_empty() {
            return Decision::Drop(DropReason::NoVoiceAssigned);
        }

        match self.best(&assignment.triggers(&preset), note, settings, playback) {
            Some(trigger) => Decision::Play(vec![trigger]),
            None => Decision::Drop(DropReason::VoicesBusy),
        }
    }

    /// Drum notes bypass the plan: each preset of the key gets the best
    /// voice of its own family.
    fn decide_drum(&self, note: &NoteRequest, kit: u8, settings: &ChannelSettings, playback: &PlaybackState) -> Decision {
        let presets = self.base.drum_presets(kit, note.key);
        if presets.is_empty() {
            return Decision::Drop(DropReason::NoPreset);
        }
        if !settings.enabled {
            return Decision::Drop(DropReason::NoVoiceAssigned);
        }

        let mut taken = VoiceSet::EMPTY;
        let mut triggers = Vec::new();
        for preset in presets {
            let candidates: Vec<_> = preset
                .voices(self.use_expansion)
                .intersection(&settings.allowed_voices)
                .difference(&taken)
                .iter()
                .map(|voice| TriggerCandidate {
                    voice,
                    duty: preset.duty,
                    preset: preset.clone(),
                })
                .collect();
            if let Some(trigger) = self.best(&candidates, note, settings, playback) {
                taken.insert(trigger.voice);
                triggers.push(trigger);
            }
        }

        if triggers.is_empty() {
            Decision::Drop(DropReason::VoicesBusy)
        } else {
            Decision::Play(triggers)
        }
    }

    /// The candidate with the greatest score difference, if it beats zero.
    /// Earlier candidates win ties.
    fn best(
        &self,
        candidates: &[TriggerCandidate],
        note: &NoteRequest,
        settings: &ChannelSettings,
        playback: &PlaybackState,
    ) -> Option<TriggerCandidate> {
        let mut best: Option<(&TriggerCandidate, ScoreVector)> = None;
        for candidate in candidates {
            let diff = self
                .candidate_score(candidate, note, settings, playback)
                .difference(&self.incumbent_score(candidate, note, settings, playback));
            let improves = match &best {
                Some((_, best_diff)) => diff.is_better_than(best_diff),
                None => true,
            };
            if improves {
                best = Some((candidate, diff));
            }
        }

        best.filter(|(_, diff)| diff.is_better_than(&ScoreVector::ZERO))
            .map(|(candidate, _)| candidate.clone())
    }

    fn candidate_score(
        &self,
        candidate: &TriggerCandidate,
        note: &NoteRequest,
        settings: &ChannelSettings,
        playback: &PlaybackState,
    ) -> ScoreVector {
        let remaining = playback.remaining_rows(note.end_time, note.time);
        ScoreVector::ZERO
            .with(ScoreLevel::PlayableRange, playable(candidate, note.key))
            .with(ScoreLevel::Priority, -f64::from(candidate.preset.order.rank()))
            .with(ScoreLevel::RemainingDuration, remaining)
            .with(
                ScoreLevel::ToneOverlap,
                -self.tone_overlap(candidate.voice, note.key, remaining, note.time, playback),
            )
            .with(ScoreLevel::NoteHeight, height_sign(settings) * f64::from(note.key))
            .with(ScoreLevel::Velocity, f64::from(note.velocity))
    }

    fn incumbent_score(
        &self,
        candidate: &TriggerCandidate,
        note: &NoteRequest,
        settings: &ChannelSettings,
        playback: &PlaybackState,
    ) -> ScoreVector {
        let voice = candidate.voice;
        let Some(incumbent) = playback.voice(voice) else {
            return ScoreVector::ZERO.with(ScoreLevel::Playing, -2.0);
        };

        let protected = incumbent.is_protected(note.time) && incumbent.trigger.preset.order <= candidate.preset.order;
        let playing = if playback.is_released(voice, note.time) { -1.0 } else { 0.0 };
        let age = playback.row(note.time) - playback.row(incumbent.onset);
        let remaining = playback.remaining_rows(incumbent.end_time, note.time);

        ScoreVector::ZERO
            .with(ScoreLevel::Interrupts, if protected { 1.0 } else { 0.0 })
            .with(ScoreLevel::Playing, playing)
            .with(ScoreLevel::PlayableRange, playable(&incumbent.trigger, incumbent.key))
            .with(ScoreLevel::NoteAge, -(age as f64))
            .with(ScoreLevel::Priority, -f64::from(incumbent.trigger.preset.order.rank()))
            .with(ScoreLevel::RemainingDuration, remaining)
            .with(
                ScoreLevel::ToneOverlap,
                -self.tone_overlap(voice, incumbent.key, remaining, note.time, playback),
            )
            .with(ScoreLevel::NoteHeight, height_sign(settings) * f64::from(incumbent.key))
            .with(ScoreLevel::Velocity, f64::from(incumbent.velocity))
    }

    /// Weighted count of other pulse voices sustaining `key` for about as
    /// long as `remaining` rows.
    fn tone_overlap(&self, voice: PhysicalVoice, key: u8, remaining: f64, time: f64, playback: &PlaybackState) -> f64 {
        if !voice.is_pulse() {
            return 0.0;
        }
        let overlapping = playback
            .sounding()
            .filter(|(other, sounding)| {
                *other != voice && other.is_pulse() && overlaps(sounding, key, remaining, time, playback, self.weights)
            })
            .count();
        self.weights.tone_overlap * overlapping as f64
    }
}

fn overlaps(
    sounding: &SoundingVoice,
    key: u8,
    remaining: f64,
    time: f64,
    playback: &PlaybackState,
    weights: ScoringWeights,
) -> bool {
    sounding.state == VoiceState::Sustaining
        && sounding.key == key
        && (playback.remaining_rows(sounding.end_time, time) - remaining).abs() <= weights.tone_overlap_tolerance_rows
}

/// Drum presets play a fixed chip note, so their key is always in range.
fn playable(trigger: &TriggerCandidate, key: u8) -> f64 {
    if trigger.preset.fixed_note.is_some() || trigger.voice.in_range(key) {
        1.0
    } else {
        0.0
    }
}

fn height_sign(settings: &ChannelSettings) -> f64 {
    if settings.lower_keys_first { -1.0 } else { 1.0 }
}
