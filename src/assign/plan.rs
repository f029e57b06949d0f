//! Assignment plans: which physical voices each logical channel may draw
//! from, and the schedule of plans over a song.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::event::CHANNEL_COUNT;
use crate::midi_state::MidiState;
use crate::preset::InstrumentPreset;
use crate::voice::{ChannelFamily, DutyMode, PhysicalVoice, VoiceSet};

// ── Voice Set Assignment ────────────────────────────────────

/// The voices one logical channel may use, plus the duty its pulse voices
/// play with. The default value is "nothing assigned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceSetAssignment {
    pub duty: DutyMode,
    pub voices: VoiceSet,
}

impl VoiceSetAssignment {
    pub fn new(duty: DutyMode, voices: VoiceSet) -> Self {
        VoiceSetAssignment { duty, voices }
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// The family this assignment sounds as. Any pulse makes it a pulse
    /// assignment.
    pub fn family(&self) -> Option<ChannelFamily> {
        if self.voices.has_pulse() {
            return Some(ChannelFamily::Pulse);
        }
        self.voices.iter().next().map(PhysicalVoice::family)
    }

    /// Trigger candidates for a note of `preset` on this assignment, in
    /// voice order.
    pub fn triggers(&self, preset: &Arc<InstrumentPreset>) -> Vec<TriggerCandidate> {
        self.voices
            .iter()
            .map(|voice| TriggerCandidate {
                voice,
                duty: if voice.is_pulse() { self.duty } else { DutyMode::Unspecified },
                preset: preset.clone(),
            })
            .collect()
    }
}

/// A voice, duty, and preset offered to the arbiter for one note.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerCandidate {
    pub voice: PhysicalVoice,
    pub duty: DutyMode,
    pub preset: Arc<InstrumentPreset>,
}

// ── Assignment Plan ─────────────────────────────────────────

/// One assignment per logical channel. No voice is ever held by two
/// channels: `assign` takes voices away from whoever held them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentPlan {
    channels: [VoiceSetAssignment; CHANNEL_COUNT],
}

impl AssignmentPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel: usize) -> &VoiceSetAssignment {
        &self.channels[channel]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &VoiceSetAssignment)> {
        self.channels.iter().enumerate()
    }

    pub fn assign(&mut self, channel: usize, assignment: VoiceSetAssignment) {
        for (other, entry) in self.channels.iter_mut().enumerate() {
            if other != channel && !entry.voices.intersection(&assignment.voices).is_empty() {
                entry.voices = entry.voices.difference(&assignment.voices);
                if entry.voices.is_empty() {
                    *entry = VoiceSetAssignment::default();
                }
            }
        }
        self.channels[channel] = assignment;
    }

    pub fn unassign(&mut self, channel: usize, voice: PhysicalVoice) {
        let entry = &mut self.channels[channel];
        entry.voices.remove(voice);
        if entry.voices.is_empty() {
            *entry = VoiceSetAssignment::default();
        }
    }

    pub fn reset(&mut self, channel: usize) {
        self.channels[channel] = VoiceSetAssignment::default();
    }

    pub fn set_duty(&mut self, channel: usize, duty: DutyMode) {
        self.channels[channel].duty = duty;
    }

    /// The channel currently holding `voice`.
    pub fn owner(&self, voice: PhysicalVoice) -> Option<usize> {
        self.channels.iter().position(|entry| entry.voices.contains(voice))
    }

    pub fn assigned_voices(&self) -> VoiceSet {
        self.channels
            .iter()
            .fold(VoiceSet::EMPTY, |all, entry| all.union(&entry.voices))
    }

    /// Pulse voices playing with `duty` across all channels.
    pub fn count_pulse_duty(&self, duty: DutyMode) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.duty == duty && entry.family() == Some(ChannelFamily::Pulse))
            .map(|entry| entry.voices.len())
            .sum()
    }
}

// ── Schedule ────────────────────────────────────────────────

/// The instrument a channel had while its plan was computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub number: u8,
    pub drums: bool,
}

impl Program {
    pub fn of_all(state: &MidiState) -> [Program; CHANNEL_COUNT] {
        std::array::from_fn(|channel| {
            let channel = state.channel(channel);
            Program {
                number: channel.program,
                drums: channel.drums,
            }
        })
    }
}

/// A plan effective from `start_index` (an event index) until the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPlan {
    pub start_index: usize,
    pub plan: AssignmentPlan,
    pub programs: [Program; CHANNEL_COUNT],
    pub score: f64,
}

/// Plans of a whole song, ordered by start index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanSchedule {
    plans: Vec<IndexedPlan>,
}

impl PlanSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plan. Plans must arrive in start order; a plan starting
    /// where the previous one starts replaces it.
    pub fn push(&mut self, plan: IndexedPlan) {
        if let Some(last) = self.plans.last_mut() {
            if last.start_index == plan.start_index {
                *last = plan;
                return;
            }
        }
        self.plans.push(plan);
    }

    /// The plan in effect at event `index`.
    pub fn active_at(&self, index: usize) -> Option<&IndexedPlan> {
        let after = self.plans.partition_point(|plan| plan.start_index <= index);
        after.checked_sub(1).map(|position| &self.plans[position])
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn into_plans(self) -> Vec<IndexedPlan> {
        self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PhysicalVoice::*;

    fn pulses(voices: &[PhysicalVoice]) -> VoiceSetAssignment {
        VoiceSetAssignment::new(DutyMode::Pulse50, VoiceSet::of(voices))
    }

    #[test]
    fn test_assign_steals_voices() {
        let mut plan = AssignmentPlan::new();
        plan.assign(0, pulses(&[PulseA, PulseB]));
        plan.assign(1, pulses(&[PulseB, PulseC]));
        assert_eq!(plan.get(0).voices, VoiceSet::of(&[PulseA]));
        assert_eq!(plan.owner(PulseB), Some(1));

        plan.assign(2, pulses(&[PulseA]));
        assert_eq!(*plan.get(0), VoiceSetAssignment::default(), "emptied channel is reset");
        assert_eq!(plan.assigned_voices().len(), 3);
    }

    #[test]
    fn test_unassign_normalizes_empty_entry() {
        let mut plan = AssignmentPlan::new();
        plan.assign(3, VoiceSetAssignment::new(DutyMode::Pulse12, VoiceSet::of(&[PulseD])));
        plan.unassign(3, PulseD);
        assert_eq!(plan, AssignmentPlan::new(), "plans compare equal once emptied");
    }

    #[test]
    fn test_family_and_duty_count() {
        let mut plan = AssignmentPlan::new();
        plan.assign(0, pulses(&[PulseA, PulseB]));
        plan.assign(1, VoiceSetAssignment::new(DutyMode::Unspecified, VoiceSet::of(&[Sawtooth])));
        plan.assign(2, VoiceSetAssignment::new(DutyMode::Pulse12, VoiceSet::of(&[PulseC])));
        assert_eq!(plan.get(1).family(), Some(ChannelFamily::Sawtooth));
        assert_eq!(plan.get(5).family(), None);
        assert_eq!(plan.count_pulse_duty(DutyMode::Pulse50), 2);
        assert_eq!(plan.count_pulse_duty(DutyMode::Pulse12), 1);
        assert_eq!(plan.count_pulse_duty(DutyMode::Pulse25), 0);
    }

    #[test]
    fn test_schedule_lookup() {
        let indexed = |start_index| IndexedPlan {
            start_index,
            plan: AssignmentPlan::new(),
            programs: [Program::default(); CHANNEL_COUNT],
            score: start_index as f64,
        };
        let mut schedule = PlanSchedule::new();
        schedule.push(indexed(0));
        schedule.push(indexed(10));
        schedule.push(indexed(25));

        assert_eq!(schedule.active_at(0).map(|plan| plan.start_index), Some(0));
        assert_eq!(schedule.active_at(9).map(|plan| plan.start_index), Some(0));
        assert_eq!(schedule.active_at(10).map(|plan| plan.start_index), Some(10));
        assert_eq!(schedule.active_at(1000).map(|plan| plan.start_index), Some(25));
        assert!(PlanSchedule::new().active_at(3).is_none());

        let mut replaced = indexed(25);
        replaced.score = -1.0;
        schedule.push(replaced);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.active_at(30).map(|plan| plan.score), Some(-1.0));
    }
}
