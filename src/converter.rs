//! Song to chip-command conversion.
//!
//! Two passes over the events. The planning pass replays the song, gathers
//! section statistics and closes a section whenever a channel that has
//! played notes changes instrument; each closed section is optimized into
//! an assignment plan. The playback pass replays the song again and lets
//! the arbiter place every note on a physical voice under the plan in
//! effect, emitting one chip command per voice change.

use log::{info, trace};
use serde::{Deserialize, Serialize};

use crate::assign::{ChannelAssigner, IndexedPlan, PlanSchedule, TriggerCandidate};
use crate::base::gm_category;
use crate::config::{ChannelSettings, ConverterConfig};
use crate::error::ChipError;
use crate::event::{CHANNEL_COUNT, EventKind, MidiEvent, Song};
use crate::midi_state::MidiState;
use crate::play::arbiter::{Decision, DropReason, NoteArbiter, NoteRequest};
use crate::play::detune;
use crate::play::state::{PlaybackState, SoundingVoice, VoiceState};
use crate::preset::InstrumentBase;
use crate::voice::PhysicalVoice;

/// Lowest and highest note the chip script can address.
const CHIP_KEYS: std::ops::RangeInclusive<u8> = 24..=119;

// ── Output ──────────────────────────────────────────────────

/// One change on one physical voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChipCommand {
    pub time: f64,
    pub row: i64,
    pub voice: PhysicalVoice,
    pub action: VoiceAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceAction {
    Note {
        channel: u8,
        /// Chip note: MIDI numbering, triangle an octave up, drums fixed.
        key: u8,
        instrument: String,
        duty: Option<u8>,
        volume: Option<u8>,
        fine_pitch: Option<u8>,
        /// Playback rate index, sample voice only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sample_rate: Option<u8>,
    },
    Release,
    Stop,
    Volume {
        volume: u8,
    },
    FinePitch {
        fine_pitch: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedNote {
    pub index: usize,
    pub time: f64,
    pub channel: u8,
    pub key: u8,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub plans: Vec<IndexedPlan>,
    pub commands: Vec<ChipCommand>,
    pub dropped: Vec<DroppedNote>,
}

// ── Entry Point ─────────────────────────────────────────────

/// Convert a song into chip commands.
pub fn convert(song: &Song, config: &ConverterConfig, base: &dyn InstrumentBase) -> Result<Conversion, ChipError> {
    config.validate()?;
    song.validate()?;
    let mut song = song.clone();
    song.resolve_note_ends();

    let schedule = plan_sections(&song, config, base);

    let mut playback = Playback::new(config, base, &schedule);
    for (index, event) in song.events.iter().enumerate() {
        playback.handle(index, event);
    }
    let Playback { commands, dropped, .. } = playback;

    info!(
        "converted {} events: {} sections, {} commands, {} notes dropped",
        song.events.len(),
        schedule.len(),
        commands.len(),
        dropped.len()
    );

    Ok(Conversion {
        plans: schedule.into_plans(),
        commands,
        dropped,
    })
}

fn plan_sections(song: &Song, config: &ConverterConfig, base: &dyn InstrumentBase) -> PlanSchedule {
    let mut assigner = ChannelAssigner::new(base, config);
    let mut state = MidiState::new();
    let mut schedule = PlanSchedule::new();

    for (index, event) in song.events.iter().enumerate() {
        let closes = match event.kind {
            EventKind::SystemReset => assigner.has_any_notes(),
            _ => event.changes_instrument() && assigner.has_notes(usize::from(event.channel)),
        };
        if closes {
            schedule.push(assigner.close_section(index, &state));
        }

        state.apply(event);
        if let EventKind::NoteOn { key, velocity, .. } = event.kind {
            assigner.add_note(usize::from(event.channel), key, velocity, &state);
        }
    }
    schedule.push(assigner.close_section(song.events.len(), &state));
    schedule
}

// ── Playback Pass ───────────────────────────────────────────

struct Playback<'a> {
    config: &'a ConverterConfig,
    settings: [ChannelSettings; CHANNEL_COUNT],
    arbiter: NoteArbiter<'a>,
    midi: MidiState,
    voices: PlaybackState,
    commands: Vec<ChipCommand>,
    dropped: Vec<DroppedNote>,
}

impl<'a> Playback<'a> {
    fn new(config: &'a ConverterConfig, base: &'a dyn InstrumentBase, schedule: &'a PlanSchedule) -> Self {
        Playback {
            config,
            settings: std::array::from_fn(|channel| config.channel(channel)),
            arbiter: NoteArbiter::new(base, config, schedule),
            midi: MidiState::new(),
            voices: PlaybackState::new(config.rows_per_second),
            commands: Vec::new(),
            dropped: Vec::new(),
        }
    }

    fn handle(&mut self, index: usize, event: &MidiEvent) {
        self.midi.apply(event);
        let time = event.time;
        let channel = event.channel;

        match event.kind {
            EventKind::NoteOn { key, velocity, end_time } => {
                let request = NoteRequest {
                    index,
                    time,
                    channel,
                    key,
                    velocity,
                    end_time: end_time.unwrap_or(time),
                };
                self.note_on(&request);
            }
            EventKind::NoteOff { key } => {
                let released = self.voices.release(channel, key);
                self.emit_all(time, released, VoiceAction::Release);
            }
            EventKind::NoteStop { key } => {
                let stopped = self.voices.stop(channel, key);
                self.emit_all(time, stopped, VoiceAction::Stop);
            }
            EventKind::AllNotesOff => {
                let released = self.voices.release_channel(channel);
                self.emit_all(time, released, VoiceAction::Release);
            }
            EventKind::SoundOff => {
                let stopped = self.voices.stop_channel(channel);
                self.emit_all(time, stopped, VoiceAction::Stop);
            }
            EventKind::SystemReset => {
                let stopped = self.voices.stop_all();
                self.emit_all(time, stopped, VoiceAction::Stop);
            }
            EventKind::Volume { .. } | EventKind::Expression { .. } => self.refresh_volume(time, channel),
            EventKind::PitchBend { .. }
            | EventKind::PitchRange { .. }
            | EventKind::FineTune { .. }
            | EventKind::CoarseTune { .. } => self.retune(time, channel),
            EventKind::ResetControllers => {
                self.refresh_volume(time, channel);
                self.retune(time, channel);
            }
            EventKind::Program { .. } | EventKind::Drums { .. } => {}
        }
    }

    fn note_on(&mut self, note: &NoteRequest) {
        match self.arbiter.decide(note, &self.midi, &self.voices) {
            Decision::Play(triggers) => {
                for trigger in triggers {
                    self.start(note, trigger);
                }
            }
            Decision::Drop(reason) => self.drop_note(DroppedNote {
                index: note.index,
                time: note.time,
                channel: note.channel,
                key: note.key,
                reason,
            }),
        }
    }

    fn drop_note(&mut self, dropped: DroppedNote) {
        let channel = self.midi.channel(usize::from(dropped.channel));
        let instrument = if channel.drums { "drums" } else { gm_category(channel.program) };
        trace!(
            "dropped note {} on channel {} ({instrument}) at {:.3}s: {:?}",
            dropped.key, dropped.channel, dropped.time, dropped.reason
        );
        self.dropped.push(dropped);
    }

    fn start(&mut self, note: &NoteRequest, trigger: TriggerCandidate) {
        let voice = trigger.voice;
        let channel = usize::from(note.channel);
        let row = self.voices.row(note.time);

        // a note replaced in its own onset row never reaches the chip
        let evicted = self
            .voices
            .voice(voice)
            .filter(|incumbent| self.voices.row(incumbent.onset) == row)
            .map(|incumbent| DroppedNote {
                index: incumbent.index,
                time: incumbent.onset,
                channel: incumbent.channel,
                key: incumbent.key,
                reason: DropReason::Evicted,
            });
        if evicted.is_some() {
            self.withdraw(voice, row);
        }
        let pitched = trigger.preset.fixed_note.is_none() && voice.is_pitched();

        let mut frequency = None;
        let mut period_delta = 0;
        let mut fine_pitch = None;
        if pitched {
            let nominal = self.nominal_frequency(channel, note.key);
            let others: Vec<f64> = self
                .voices
                .sounding()
                .filter(|(other, _)| *other != voice)
                .filter_map(|(_, sounding)| sounding.frequency)
                .collect();
            period_delta = detune::resolve(
                voice,
                nominal,
                &others,
                self.config.max_detune_semitones,
                self.config.min_detune_hz,
            );
            frequency = final_frequency(voice, nominal, period_delta);
            fine_pitch = self.fine_pitch(voice, note.key, nominal, period_delta);
        }

        let key = chip_key(&trigger, voice, note.key);
        let volume = self.volume(voice, channel, note.velocity);
        let action = VoiceAction::Note {
            channel: note.channel,
            key,
            instrument: trigger.preset.name().to_string(),
            duty: trigger.duty.register_value(voice),
            volume,
            fine_pitch,
            sample_rate: if voice == PhysicalVoice::Sample {
                trigger.preset.instrument.sample_rate
            } else {
                None
            },
        };

        let protected_until = note.time + trigger.preset.protected_seconds();
        self.voices.accept(
            voice,
            SoundingVoice {
                trigger,
                index: note.index,
                channel: note.channel,
                key: note.key,
                velocity: note.velocity,
                onset: note.time,
                end_time: note.end_time,
                protected_until,
                frequency,
                period_delta,
                state: VoiceState::Sustaining,
            },
        );
        self.emit(note.time, voice, action);

        if let Some(evicted) = evicted {
            if !self.voices.holds(evicted.index) {
                self.drop_note(evicted);
            }
        }
    }

    /// Remove the voice's last note in `row` and whatever followed it.
    fn withdraw(&mut self, voice: PhysicalVoice, row: i64) {
        let Some(start) = self.commands.iter().rposition(|command| {
            command.voice == voice && command.row == row && matches!(command.action, VoiceAction::Note { .. })
        }) else {
            return;
        };
        let mut position = 0;
        self.commands.retain(|command| {
            let keep = position < start || command.voice != voice;
            position += 1;
            keep
        });
    }

    /// Re-send the volume of every voice the channel holds.
    fn refresh_volume(&mut self, time: f64, channel: u8) {
        let updates: Vec<(PhysicalVoice, u8)> = self
            .voices
            .sounding()
            .filter(|(_, sounding)| sounding.channel == channel)
            .filter_map(|(voice, sounding)| {
                self.volume(voice, usize::from(channel), sounding.velocity)
                    .map(|volume| (voice, volume))
            })
            .collect();
        for (voice, volume) in updates {
            self.emit(time, voice, VoiceAction::Volume { volume });
        }
    }

    /// Recompute pitch after a bend or tuning change, keeping each voice's
    /// detune offset.
    fn retune(&mut self, time: f64, channel: u8) {
        let held: Vec<(PhysicalVoice, u8, i32)> = self
            .voices
            .sounding()
            .filter(|(_, sounding)| sounding.channel == channel && sounding.frequency.is_some())
            .map(|(voice, sounding)| (voice, sounding.key, sounding.period_delta))
            .collect();

        for (voice, key, period_delta) in held {
            let nominal = self.nominal_frequency(usize::from(channel), key);
            let frequency = final_frequency(voice, nominal, period_delta);
            if let Some(sounding) = self.voices.voice_mut(voice) {
                sounding.frequency = frequency;
            }
            if let Some(fine_pitch) = self.fine_pitch(voice, key, nominal, period_delta) {
                self.emit(time, voice, VoiceAction::FinePitch { fine_pitch });
            }
        }
    }

    /// Sounding frequency of `key` on the channel, before detune.
    fn nominal_frequency(&self, channel: usize, key: u8) -> f64 {
        let pitched = self.midi.channel(channel).pitched_key(key) + self.settings[channel].detune_semitones;
        detune::key_frequency(pitched)
    }

    /// Offset of the final period from the key's equal-tempered period,
    /// centred on 128.
    fn fine_pitch(&self, voice: PhysicalVoice, key: u8, nominal: f64, period_delta: i32) -> Option<u8> {
        let base = detune::period(voice, detune::key_frequency(f64::from(key)))?;
        let actual = detune::period(voice, nominal)? + f64::from(period_delta);
        Some((128.0 + (base - actual).round()).clamp(0.0, 255.0) as u8)
    }

    /// 4-bit chip volume; the sample voice has none.
    fn volume(&self, voice: PhysicalVoice, channel: usize, velocity: u8) -> Option<u8> {
        if voice == PhysicalVoice::Sample {
            return None;
        }
        let loudness = self.midi.channel(channel).note_volume(velocity)
            * self.settings[channel].volume_multiplier
            * voice.volume_factor();
        Some((loudness / 8.0).ceil().clamp(0.0, 15.0) as u8)
    }

    fn emit(&mut self, time: f64, voice: PhysicalVoice, action: VoiceAction) {
        self.commands.push(ChipCommand {
            time,
            row: self.voices.row(time),
            voice,
            action,
        });
    }

    fn emit_all(&mut self, time: f64, voices: Vec<PhysicalVoice>, action: VoiceAction) {
        for voice in voices {
            self.emit(time, voice, action.clone());
        }
    }
}

fn final_frequency(voice: PhysicalVoice, nominal: f64, period_delta: i32) -> Option<f64> {
    let period = detune::period(voice, nominal)?;
    detune::period_frequency(voice, period + f64::from(period_delta))
}

fn chip_key(trigger: &TriggerCandidate, voice: PhysicalVoice, key: u8) -> u8 {
    if let Some(fixed) = trigger.preset.fixed_note {
        return fixed;
    }
    let key = if voice == PhysicalVoice::Triangle { key.saturating_add(12) } else { key };
    key.clamp(*CHIP_KEYS.start(), *CHIP_KEYS.end())
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::StandardBase;
    use crate::error::InputError;

    fn no_expansion() -> ConverterConfig {
        ConverterConfig {
            use_expansion: false,
            ..ConverterConfig::default()
        }
    }

    fn notes(commands: &[ChipCommand]) -> Vec<(PhysicalVoice, &VoiceAction)> {
        commands
            .iter()
            .filter(|command| matches!(command.action, VoiceAction::Note { .. }))
            .map(|command| (command.voice, &command.action))
            .collect()
    }

    fn melody() -> Song {
        let mut events = vec![MidiEvent::program(0.0, 0, 80)];
        for (i, key) in [60u8, 62, 64].into_iter().enumerate() {
            let start = i as f64 * 0.5;
            events.push(MidiEvent::new(
                start,
                0,
                EventKind::NoteOn {
                    key,
                    velocity: 100,
                    end_time: None,
                },
            ));
            events.push(MidiEvent::note_off(start + 0.4, 0, key));
        }
        Song::new(events)
    }

    #[test]
    fn test_melody_plays_on_one_pulse() {
        let conversion = convert(&melody(), &no_expansion(), &StandardBase::new()).unwrap();
        assert!(conversion.dropped.is_empty(), "dropped: {:?}", conversion.dropped);
        assert_eq!(conversion.plans.len(), 1);

        let played = notes(&conversion.commands);
        assert_eq!(played.len(), 3);
        for (voice, action) in &played {
            assert!(voice.is_pulse(), "square lead went to {voice}");
            match action {
                VoiceAction::Note {
                    duty, volume, fine_pitch, ..
                } => {
                    assert_eq!(*duty, Some(2), "50% duty on a 2A03 pulse");
                    assert_eq!(*volume, Some(8), "100 * 0.6 / 8 rounds up to 8");
                    assert_eq!(*fine_pitch, Some(128));
                }
                other => panic!("expected a note, got {other:?}"),
            }
        }

        let releases = conversion
            .commands
            .iter()
            .filter(|command| command.action == VoiceAction::Release)
            .count();
        assert_eq!(releases, 3);
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let base = StandardBase::new();
        let mut song = melody();
        song.events.push(MidiEvent::note_on(1.5, 9, 38, 90, 1.7));
        song.events.push(MidiEvent::note_on(1.5, 1, 67, 90, 2.0));
        let first = convert(&song, &ConverterConfig::default(), &base).unwrap();
        let second = convert(&song, &ConverterConfig::default(), &base).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_drums_use_fixed_notes_and_ignore_release() {
        let song = Song::new(vec![
            MidiEvent::note_on(0.0, 9, 42, 127, 0.1),
            MidiEvent::note_off(0.1, 9, 42),
        ]);
        let conversion = convert(&song, &no_expansion(), &StandardBase::new()).unwrap();
        assert_eq!(conversion.commands.len(), 1, "release on noise is ignored");
        let command = &conversion.commands[0];
        assert_eq!(command.voice, PhysicalVoice::Noise);
        match &command.action {
            VoiceAction::Note { key, duty, fine_pitch, .. } => {
                assert_eq!(*key, 12);
                assert_eq!(*duty, Some(0));
                assert_eq!(*fine_pitch, None);
            }
            other => panic!("expected a note, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_program_is_reported() {
        let song = Song::new(vec![
            MidiEvent::program(0.0, 2, 122),
            MidiEvent::note_on(0.0, 2, 60, 100, 1.0),
        ]);
        let conversion = convert(&song, &ConverterConfig::default(), &StandardBase::new()).unwrap();
        assert!(conversion.commands.is_empty());
        assert_eq!(
            conversion.dropped,
            vec![DroppedNote {
                index: 1,
                time: 0.0,
                channel: 2,
                key: 60,
                reason: DropReason::NoPreset,
            }]
        );
    }

    #[test]
    fn test_unison_on_two_channels_is_detuned() {
        let config = ConverterConfig::from_json(
            r#"{
                "use_expansion": false,
                "channels": [
                    {"id": 0, "allowed_voices": ["pulse_a", "pulse_b"]},
                    {"id": 1, "allowed_voices": ["pulse_a", "pulse_b"]}
                ]
            }"#,
        )
        .unwrap();
        let song = Song::new(vec![
            MidiEvent::program(0.0, 0, 80),
            MidiEvent::program(0.0, 1, 80),
            MidiEvent::note_on(0.0, 0, 69, 100, 1.0),
            MidiEvent::note_on(0.0, 1, 69, 100, 1.0),
        ]);
        let conversion = convert(&song, &config, &StandardBase::new()).unwrap();
        assert!(conversion.dropped.is_empty(), "dropped: {:?}", conversion.dropped);

        let mut pitches: Vec<_> = notes(&conversion.commands)
            .into_iter()
            .filter_map(|(_, action)| match action {
                VoiceAction::Note { fine_pitch, .. } => *fine_pitch,
                _ => None,
            })
            .collect();
        pitches.sort();
        assert_eq!(pitches, vec![127, 128], "the second voice moves one period step");
    }

    #[test]
    fn test_controllers_refresh_held_voices() {
        let song = Song::new(vec![
            MidiEvent::program(0.0, 0, 80),
            MidiEvent::note_on(0.0, 0, 60, 127, 2.0),
            MidiEvent::new(0.5, 0, EventKind::Volume { level: 0.5 }),
            MidiEvent::new(1.0, 0, EventKind::PitchBend { amount: 0.5 }),
        ]);
        let conversion = convert(&song, &no_expansion(), &StandardBase::new()).unwrap();
        let actions: Vec<_> = conversion.commands.iter().map(|command| &command.action).collect();
        assert_eq!(actions.len(), 3, "{actions:?}");
        assert_eq!(*actions[1], VoiceAction::Volume { volume: 5 }, "127 * 0.5 * 0.6 / 8 rounds up to 5");
        match actions[2] {
            VoiceAction::FinePitch { fine_pitch } => assert!(*fine_pitch > 128, "bending up shortens the period"),
            other => panic!("expected a pitch change, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_song_is_rejected() {
        let song = Song::new(vec![
            MidiEvent::note_on(1.0, 0, 60, 100, 2.0),
            MidiEvent::note_on(0.5, 0, 62, 100, 2.0),
        ]);
        let err = convert(&song, &ConverterConfig::default(), &StandardBase::new()).unwrap_err();
        assert!(matches!(err, ChipError::Input(InputError::TimeWentBackwards { index: 1, .. })));
    }

    #[test]
    fn test_program_change_opens_new_section() {
        let song = Song::new(vec![
            MidiEvent::program(0.0, 0, 80),
            MidiEvent::note_on(0.0, 0, 60, 100, 0.5),
            MidiEvent::program(1.0, 0, 33),
            MidiEvent::note_on(1.0, 0, 40, 100, 1.5),
        ]);
        let conversion = convert(&song, &no_expansion(), &StandardBase::new()).unwrap();
        let starts: Vec<_> = conversion.plans.iter().map(|plan| plan.start_index).collect();
        assert_eq!(starts, vec![0, 2]);
        assert!(conversion.dropped.is_empty(), "dropped: {:?}", conversion.dropped);
    }

    #[test]
    fn test_note_stolen_in_its_own_row_is_reported() {
        let config = ConverterConfig::from_json(
            r#"{"use_expansion": false, "channels": [{"id": 0, "allowed_voices": ["pulse_a", "pulse_b"]}]}"#,
        )
        .unwrap();
        for keys in [[60u8, 64, 67], [67, 64, 60]] {
            let mut events = vec![MidiEvent::program(0.0, 0, 29)];
            events.extend(keys.iter().map(|&key| MidiEvent::note_on(0.0, 0, key, 100, 1.0)));
            let conversion = convert(&Song::new(events), &config, &StandardBase::new()).unwrap();

            assert_eq!(conversion.dropped.len(), 1, "order {keys:?}: {:?}", conversion.dropped);
            assert_eq!(conversion.dropped[0].key, 60);
            let mut played: Vec<_> = notes(&conversion.commands)
                .into_iter()
                .filter_map(|(_, action)| match action {
                    VoiceAction::Note { key, .. } => Some(*key),
                    _ => None,
                })
                .collect();
            played.sort();
            assert_eq!(played, vec![64, 67], "order {keys:?}");
        }
    }

    #[test]
    fn test_sample_voice_carries_its_rate() {
        let song = Song::new(vec![MidiEvent::note_on(0.0, 9, 38, 100, 0.2)]);
        let conversion = convert(&song, &ConverterConfig::default(), &StandardBase::new()).unwrap();
        let rates: Vec<_> = notes(&conversion.commands)
            .into_iter()
            .map(|(voice, action)| match action {
                VoiceAction::Note { sample_rate, .. } => (voice, *sample_rate),
                _ => (voice, None),
            })
            .collect();
        assert_eq!(rates, vec![(PhysicalVoice::Noise, None), (PhysicalVoice::Sample, Some(15))]);
    }

    #[test]
    fn test_triangle_plays_an_octave_up() {
        let trigger = TriggerCandidate {
            voice: PhysicalVoice::Triangle,
            duty: crate::voice::DutyMode::Unspecified,
            preset: StandardBase::new().gm_preset(33).expect("bass"),
        };
        assert_eq!(chip_key(&trigger, PhysicalVoice::Triangle, 40), 52);
        assert_eq!(chip_key(&trigger, PhysicalVoice::Triangle, 115), 119);
    }
}
