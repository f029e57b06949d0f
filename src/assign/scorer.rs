//! Fidelity score of an assignment plan for one section.

use std::sync::Arc;

use crate::assign::plan::AssignmentPlan;
use crate::assign::statistics::SectionStatistics;
use crate::config::{ChannelSettings, ScoringWeights};
use crate::event::CHANNEL_COUNT;
use crate::preset::InstrumentPreset;
use crate::timbre;
use crate::voice::{DutyMode, VoiceSet};

/// Scores plans against fixed section statistics. Scoring is a pure
/// function of the plan.
pub struct PlanScorer<'a> {
    stats: &'a SectionStatistics,
    presets: &'a [Option<Arc<InstrumentPreset>>; CHANNEL_COUNT],
    settings: &'a [ChannelSettings; CHANNEL_COUNT],
    weights: ScoringWeights,
}

impl<'a> PlanScorer<'a> {
    pub fn new(
        stats: &'a SectionStatistics,
        presets: &'a [Option<Arc<InstrumentPreset>>; CHANNEL_COUNT],
        settings: &'a [ChannelSettings; CHANNEL_COUNT],
        weights: ScoringWeights,
    ) -> Self {
        PlanScorer {
            stats,
            presets,
            settings,
            weights,
        }
    }

    pub fn score(&self, plan: &AssignmentPlan) -> f64 {
        let mut total = 0.0;
        let mut multiplier = 1.0;

        for (channel, assignment) in plan.iter() {
            let stats = self.stats.channel(channel);
            if !stats.has_notes() {
                continue;
            }
            let voices = assignment.voices.len();
            if voices < self.settings[channel].min_voices {
                multiplier *= self.weights.min_voices_discount;
            }
            if voices == 0 {
                continue;
            }
            let (Some(preset), Some(family)) = (&self.presets[channel], assignment.family()) else {
                continue;
            };

            let played = stats.played_notes[voices.min(stats.played_notes.len() - 1)];
            let out_of_range = self.weights.out_of_range
                * stats.played_ratio(voices)
                * stats.out_of_range_on(&assignment.voices)
                / voices as f64;
            let interruption = self.interruption_penalty(plan, channel);
            let similarity = timbre::similarity((preset.family, preset.duty), (family, assignment.duty));
            let chord = stats.chord_multiplier[voices.min(stats.chord_multiplier.len() - 1)];

            total += (played - out_of_range - interruption) * stats.average_volume() * similarity * chord;
        }

        total * multiplier
    }

    /// Collisions with every channel sharing a voice with `channel`,
    /// scaled by how much of each side's music those voices carry.
    fn interruption_penalty(&self, plan: &AssignmentPlan, channel: usize) -> f64 {
        let stats = self.stats.channel(channel);
        let voices = plan.get(channel).voices;
        let ratio = stats.played_ratio(voices.len());

        let mut penalty = 0.0;
        for other in 0..CHANNEL_COUNT {
            let collisions = stats.interruptions[other];
            if other == channel || collisions == 0.0 {
                continue;
            }
            let occupied = self.occupied(plan, other);
            let shared = voices.intersection(&occupied).len();
            if shared == 0 {
                continue;
            }
            let other_stats = self.stats.channel(other);
            let other_ratio = if other_stats.has_notes() {
                other_stats.played_ratio(plan.get(other).voices.len())
            } else {
                1.0
            };
            penalty += collisions * ratio * other_ratio * shared as f64
                / (voices.len() as f64 * occupied.len() as f64);
        }
        penalty * self.weights.interruption
    }

    /// Voices a channel will sound on: its assignment, plus the fixed
    /// voices of its drum notes, which bypass the plan.
    fn occupied(&self, plan: &AssignmentPlan, channel: usize) -> VoiceSet {
        plan.get(channel).voices.union(&self.stats.channel(channel).drum_voices)
    }

    /// Bonus factor for spreading pulse voices over distinct duties.
    pub fn duty_diversity(plan: &AssignmentPlan) -> f64 {
        let mut counts = DutyMode::PULSE_RATIOS.map(|duty| plan.count_pulse_duty(duty));
        counts.sort_unstable();
        3.0 + 2.0 * counts[0] as f64 + counts[1] as f64
    }

    pub fn diversified_score(&self, plan: &AssignmentPlan) -> f64 {
        self.score(plan) * Self::duty_diversity(plan)
    }
}
