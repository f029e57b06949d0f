//! Section-by-section search for the best assignment plan.
//!
//! The search is a depth-bounded hill climb that alternates two kinds of
//! moves: giving a channel a catalog configuration (which takes its voices
//! from whoever held them) and taking a single voice away from a channel.
//! Each move's result is remembered in a visited set per move kind, so an
//! identical plan is never expanded twice. The frontier is an explicit
//! stack of frames instead of mutual recursion; the expansion order is the
//! same depth-first order.
//!
//! After the climb converges, a refinement pass tries every combination of
//! pulse duties on the chosen plan with the duty-diversity bonus applied.

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use crate::assign::catalog::ConfigurationCatalog;
use crate::assign::plan::{AssignmentPlan, IndexedPlan, Program, VoiceSetAssignment};
use crate::assign::scorer::PlanScorer;
use crate::assign::statistics::SectionStatistics;
use crate::config::{ChannelSettings, ConverterConfig};
use crate::event::CHANNEL_COUNT;
use crate::midi_state::MidiState;
use crate::preset::{InstrumentBase, InstrumentPreset};
use crate::voice::{ChannelFamily, DutyMode, PhysicalVoice, VoiceSet};

// ── Search Frontier ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Assign,
    Unassign,
}

impl Step {
    fn opposite(self) -> Step {
        match self {
            Step::Assign => Step::Unassign,
            Step::Unassign => Step::Assign,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Move {
    Assign(usize, VoiceSetAssignment),
    Unassign(usize, PhysicalVoice),
}

/// One level of the depth-first search: the moves left to try from `plan`.
struct Frame {
    plan: AssignmentPlan,
    /// Budget left for the children of this frame.
    depth: u32,
    step: Step,
    moves: Vec<Move>,
    next: usize,
}

#[derive(Debug, Clone, Copy)]
struct Scored {
    plan: AssignmentPlan,
    score: f64,
}

/// Plans reached by an assign move and by an unassign move.
#[derive(Default)]
struct Visited {
    assigned: HashSet<AssignmentPlan>,
    unassigned: HashSet<AssignmentPlan>,
}

impl Visited {
    fn insert(&mut self, step: Step, plan: AssignmentPlan) -> bool {
        match step {
            Step::Assign => self.assigned.insert(plan),
            Step::Unassign => self.unassigned.insert(plan),
        }
    }
}

/// Everything fixed for the duration of one section's search.
struct Section<'s> {
    scorer: PlanScorer<'s>,
    /// Legal configurations per channel; empty for channels that take no
    /// part in the search.
    candidates: [Vec<VoiceSetAssignment>; CHANNEL_COUNT],
}

impl Section<'_> {
    fn searchable(&self, channel: usize) -> bool {
        !self.candidates[channel].is_empty()
    }

    fn moves(&self, plan: &AssignmentPlan, step: Step) -> Vec<Move> {
        let mut moves = Vec::new();
        for channel in 0..CHANNEL_COUNT {
            match step {
                Step::Assign => moves.extend(
                    self.candidates[channel]
                        .iter()
                        .map(|&assignment| Move::Assign(channel, assignment)),
                ),
                Step::Unassign if self.searchable(channel) => moves.extend(
                    plan.get(channel)
                        .voices
                        .iter()
                        .map(|voice| Move::Unassign(channel, voice)),
                ),
                Step::Unassign => {}
            }
        }
        moves
    }

    /// Open a frame expanding `plan`, or `None` when the budget is spent.
    fn frame(&self, plan: AssignmentPlan, depth: u32, step: Step) -> Option<Frame> {
        let depth = depth.checked_sub(1)?;
        Some(Frame {
            plan,
            depth,
            step,
            moves: self.moves(&plan, step),
            next: 0,
        })
    }

    /// Depth-bounded alternating search from `start`, raising `best`
    /// whenever a strictly better plan is reached.
    fn climb(&self, start: AssignmentPlan, depth: u32, best: &mut Scored, visited: &mut Visited) {
        let mut stack: Vec<Frame> = self.frame(start, depth, Step::Assign).into_iter().collect();

        while let Some(frame) = stack.last_mut() {
            let Some(&next_move) = frame.moves.get(frame.next) else {
                // moves exhausted: continue from the same plan with the other move kind
                let Some(done) = stack.pop() else { break };
                stack.extend(self.frame(done.plan, done.depth, done.step.opposite()));
                continue;
            };
            frame.next += 1;

            let mut plan = frame.plan;
            match next_move {
                Move::Assign(channel, assignment) => plan.assign(channel, assignment),
                Move::Unassign(channel, voice) => plan.unassign(channel, voice),
            }
            if !visited.insert(frame.step, plan) {
                continue;
            }

            let score = self.scorer.score(&plan);
            if score > best.score {
                *best = Scored { plan, score };
            }
            let child = self.frame(plan, frame.depth, frame.step.opposite());
            stack.extend(child);
        }
    }

    /// Try every duty ratio on every pulse channel with a concrete duty.
    fn diversify(&self, plan: AssignmentPlan) -> Scored {
        let eligible: Vec<usize> = plan
            .iter()
            .filter(|(_, assignment)| {
                assignment.family() == Some(ChannelFamily::Pulse) && assignment.duty.is_pulse_ratio()
            })
            .map(|(channel, _)| channel)
            .collect();

        let mut best = Scored {
            plan,
            score: self.scorer.diversified_score(&plan),
        };
        let ratios = DutyMode::PULSE_RATIOS;
        let combinations = ratios.len().pow(eligible.len() as u32);
        for combination in 0..combinations {
            let mut candidate = plan;
            let mut digits = combination;
            for &channel in &eligible {
                candidate.set_duty(channel, ratios[digits % ratios.len()]);
                digits /= ratios.len();
            }
            let score = self.scorer.diversified_score(&candidate);
            if score > best.score {
                best = Scored { plan: candidate, score };
            }
        }
        best
    }
}

// ── Channel Assigner ────────────────────────────────────────

/// Collects one section's notes and turns them into an assignment plan
/// when the section closes.
pub struct ChannelAssigner<'a> {
    base: &'a dyn InstrumentBase,
    config: &'a ConverterConfig,
    catalog: ConfigurationCatalog,
    settings: [ChannelSettings; CHANNEL_COUNT],
    stats: SectionStatistics,
    start_index: usize,
    last: Option<IndexedPlan>,
}

impl<'a> ChannelAssigner<'a> {
    pub fn new(base: &'a dyn InstrumentBase, config: &'a ConverterConfig) -> Self {
        ChannelAssigner {
            base,
            config,
            catalog: ConfigurationCatalog::new(config.use_expansion),
            settings: std::array::from_fn(|channel| config.channel(channel)),
            stats: SectionStatistics::new(),
            start_index: 0,
            last: None,
        }
    }

    /// Record a note. `state` must already hold it.
    pub fn add_note(&mut self, channel: usize, key: u8, velocity: u8, state: &MidiState) {
        let channel_state = state.channel(channel);
        if channel_state.drums {
            let voices = self
                .base
                .drum_presets(channel_state.program, key)
                .iter()
                .fold(VoiceSet::EMPTY, |all, preset| {
                    all.union(&preset.voices(self.config.use_expansion))
                });
            self.stats.add_drum_note(channel, voices, state);
        } else {
            self.stats.add_note(channel, key, velocity, state);
        }
    }

    /// Whether `channel` produced melodic notes in the open section.
    pub fn has_notes(&self, channel: usize) -> bool {
        self.stats.has_notes(channel)
    }

    pub fn has_any_notes(&self) -> bool {
        (0..CHANNEL_COUNT).any(|channel| self.stats.has_notes(channel))
    }

    /// Optimize the open section, which ends before event `next_start`, and
    /// open the next one. `state` gives the programs the section played with.
    pub fn close_section(&mut self, next_start: usize, state: &MidiState) -> IndexedPlan {
        let programs = Program::of_all(state);
        let presets: [Option<Arc<InstrumentPreset>>; CHANNEL_COUNT] = std::array::from_fn(|channel| {
            let program = programs[channel];
            if program.drums {
                None
            } else {
                self.base.gm_preset(program.number)
            }
        });

        let mut stats = std::mem::take(&mut self.stats);
        stats.finalize();
        let depth = self
            .config
            .section_depth((0..CHANNEL_COUNT).filter(|&channel| stats.has_notes(channel)));
        let initial = self.initial_plan(&programs);

        let section = Section {
            scorer: PlanScorer::new(&stats, &presets, &self.settings, self.config.weights),
            candidates: std::array::from_fn(|channel| self.candidates(channel, &stats, &presets)),
        };
        let best = optimize(&section, initial, depth);

        debug!(
            "section from event {}: score {:.3}, {} voices assigned",
            self.start_index,
            best.score,
            best.plan.assigned_voices().len()
        );

        let indexed = IndexedPlan {
            start_index: self.start_index,
            plan: best.plan,
            programs,
            score: best.score,
        };
        self.last = Some(indexed.clone());
        self.start_index = next_start;
        indexed
    }

    /// The previous plan, minus channels whose instrument changed.
    fn initial_plan(&self, programs: &[Program; CHANNEL_COUNT]) -> AssignmentPlan {
        let Some(last) = &self.last else {
            return AssignmentPlan::new();
        };
        let mut plan = last.plan;
        for channel in 0..CHANNEL_COUNT {
            if programs[channel] != last.programs[channel] || !self.settings[channel].enabled {
                plan.reset(channel);
            }
        }
        plan
    }

    fn candidates(
        &self,
        channel: usize,
        stats: &SectionStatistics,
        presets: &[Option<Arc<InstrumentPreset>>; CHANNEL_COUNT],
    ) -> Vec<VoiceSetAssignment> {
        let settings = &self.settings[channel];
        let Some(preset) = &presets[channel] else {
            return Vec::new();
        };
        if !settings.enabled || !stats.has_notes(channel) {
            return Vec::new();
        }
        let budget = stats.channel(channel).max_chord().min(settings.max_voices);
        self.catalog
            .for_preset(preset, budget)
            .iter()
            .filter(|assignment| assignment.voices.is_subset(&settings.allowed_voices))
            .copied()
            .collect()
    }
}

/// Climb from `initial` until a full pass brings no improvement, then
/// diversify duties.
fn optimize(section: &Section<'_>, initial: AssignmentPlan, depth: u32) -> Scored {
    let mut best = Scored {
        plan: initial,
        score: section.scorer.score(&initial),
    };
    let empty = AssignmentPlan::new();
    let empty_score = section.scorer.score(&empty);
    if empty_score > best.score {
        best = Scored {
            plan: empty,
            score: empty_score,
        };
    }

    let mut visited = Visited::default();
    visited.insert(Step::Assign, best.plan);
    loop {
        let before = best.score;
        section.climb(best.plan, depth, &mut best, &mut visited);
        if best.score <= before {
            break;
        }
    }

    let searched = best.plan;
    let diversified = section.diversify(searched);
    Scored {
        plan: diversified.plan,
        score: section.scorer.score(&diversified.plan),
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    use super::*;
    use crate::base::StandardBase;
    use crate::event::MidiEvent;

    fn program(state: &mut MidiState, channel: u8, number: u8) {
        state.apply(&MidiEvent::program(0.0, channel, number));
    }

    fn play(assigner: &mut ChannelAssigner<'_>, state: &mut MidiState, channel: u8, key: u8) {
        state.apply(&MidiEvent::note_on(0.0, channel, key, 100, 1.0));
        assigner.add_note(usize::from(channel), key, 100, state);
    }

    fn release(state: &mut MidiState, channel: u8, key: u8) {
        state.apply(&MidiEvent::note_off(0.5, channel, key));
    }

    #[test]
    fn test_single_channel_gets_voices() {
        let base = StandardBase::new();
        let config = ConverterConfig::default();
        let mut assigner = ChannelAssigner::new(&base, &config);
        let mut state = MidiState::new();
        program(&mut state, 0, 80);
        for key in [60, 64, 67] {
            play(&mut assigner, &mut state, 0, key);
        }

        let indexed = assigner.close_section(10, &state);
        let assignment = indexed.plan.get(0);
        assert!(!assignment.is_empty(), "a channel with notes should get voices");
        assert_eq!(assignment.family(), Some(ChannelFamily::Pulse));
        assert!(assignment.voices.len() <= 3, "never more voices than the largest chord");
        assert!(indexed.score > 0.0);
        assert_eq!(indexed.start_index, 0);
        for channel in 1..CHANNEL_COUNT {
            assert!(indexed.plan.get(channel).is_empty(), "silent channel {channel} was assigned");
        }
    }

    #[test]
    fn test_next_section_starts_where_previous_closed() {
        let base = StandardBase::new();
        let config = ConverterConfig::default();
        let mut assigner = ChannelAssigner::new(&base, &config);
        let mut state = MidiState::new();
        play(&mut assigner, &mut state, 0, 60);
        assigner.close_section(4, &state);
        play(&mut assigner, &mut state, 0, 62);
        let second = assigner.close_section(9, &state);
        assert_eq!(second.start_index, 4);
        assert!(!second.plan.get(0).is_empty(), "unchanged program keeps its voices");
    }

    #[test]
    fn test_allowed_voices_respected() {
        let base = StandardBase::new();
        let config =
            ConverterConfig::from_json(r#"{"channels": [{"id": 0, "allowed_voices": ["pulse_c", "sawtooth"]}]}"#)
                .unwrap();
        let mut assigner = ChannelAssigner::new(&base, &config);
        let mut state = MidiState::new();
        program(&mut state, 0, 80);
        play(&mut assigner, &mut state, 0, 60);
        play(&mut assigner, &mut state, 0, 64);

        let indexed = assigner.close_section(3, &state);
        let allowed = VoiceSet::of(&[PhysicalVoice::PulseC, PhysicalVoice::Sawtooth]);
        assert!(indexed.plan.get(0).voices.is_subset(&allowed));
        assert!(!indexed.plan.get(0).is_empty());
    }

    #[test]
    fn test_disabled_and_drum_channels_never_assigned() {
        let base = StandardBase::new();
        let config = ConverterConfig::from_json(r#"{"disabled_channels": [1]}"#).unwrap();
        let mut assigner = ChannelAssigner::new(&base, &config);
        let mut state = MidiState::new();
        play(&mut assigner, &mut state, 1, 60);
        play(&mut assigner, &mut state, 9, 38);

        let indexed = assigner.close_section(2, &state);
        assert!(indexed.plan.get(1).is_empty());
        assert!(indexed.plan.get(9).is_empty());
        assert_eq!(indexed.score, 0.0);
    }

    #[test]
    fn test_duty_diversity_splits_identical_channels() {
        let base = StandardBase::new();
        let config = ConverterConfig::from_json(r#"{"use_expansion": false}"#).unwrap();
        let mut assigner = ChannelAssigner::new(&base, &config);
        let mut state = MidiState::new();
        // two single-line square leads
        program(&mut state, 0, 80);
        program(&mut state, 1, 80);
        play(&mut assigner, &mut state, 0, 60);
        release(&mut state, 0, 60);
        play(&mut assigner, &mut state, 1, 67);
        release(&mut state, 1, 67);

        let indexed = assigner.close_section(4, &state);
        let first = indexed.plan.get(0);
        let second = indexed.plan.get(1);
        assert_eq!(first.voices.len(), 1);
        assert_eq!(second.voices.len(), 1);
        assert_ne!(first.duty, second.duty, "identical leads should be pulled apart in duty");
    }

    #[test]
    fn test_search_is_deterministic() {
        let base = StandardBase::new();
        let config = ConverterConfig::default();
        let run = || {
            let mut assigner = ChannelAssigner::new(&base, &config);
            let mut state = MidiState::new();
            for (channel, number) in [(0, 0), (1, 33), (2, 56), (3, 81)] {
                program(&mut state, channel, number);
            }
            for (channel, key) in [(0, 60), (0, 64), (1, 36), (2, 72), (3, 55), (0, 67)] {
                play(&mut assigner, &mut state, channel, key);
            }
            assigner.close_section(6, &state)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_random_sections_never_share_voices() {
        let base = StandardBase::new();
        let mut config = ConverterConfig::default();
        config.search_depth = 2;
        let mut rng = Pcg32::seed_from_u64(0x5eed);

        for round in 0..1000 {
            let mut assigner = ChannelAssigner::new(&base, &config);
            let mut state = MidiState::new();
            for channel in 0..4u8 {
                program(&mut state, channel, rng.gen_range(0..128));
            }
            for _ in 0..rng.gen_range(1..12) {
                let channel = rng.gen_range(0..4u8);
                let key = rng.gen_range(30..100u8);
                if rng.gen_range(0..3) == 0 {
                    release(&mut state, channel, key);
                } else {
                    play(&mut assigner, &mut state, channel, key);
                }
            }

            let indexed = assigner.close_section(1, &state);
            let mut seen = VoiceSet::EMPTY;
            for (channel, assignment) in indexed.plan.iter() {
                for voice in assignment.voices.iter() {
                    assert!(seen.insert(voice), "round {round}: {voice} assigned twice (channel {channel})");
                }
            }
            assert!(indexed.score >= 0.0, "round {round}: worse than the empty plan ({})", indexed.score);
        }
    }
}
