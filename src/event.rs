//! The input performance: a time-ordered list of per-channel MIDI events.

use serde::{Deserialize, Serialize};

use crate::error::InputError;

pub const CHANNEL_COUNT: usize = 16;

/// A parsed song ready for conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub events: Vec<MidiEvent>,
}

/// A single channel event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiEvent {
    /// Seconds from the start of the song.
    pub time: f64,
    pub channel: u8,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    NoteOn {
        key: u8,
        velocity: u8,
        /// When the note stops sounding; filled by [`Song::resolve_note_ends`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<f64>,
    },
    /// Release: the note fades out through its envelope.
    NoteOff { key: u8 },
    /// Hard stop: the note is silenced immediately.
    NoteStop { key: u8 },
    Program { program: u8 },
    Drums { enabled: bool },
    /// Channel volume in `[0, 1]`.
    Volume { level: f64 },
    /// Channel expression in `[0, 1]`.
    Expression { level: f64 },
    /// Bend as a fraction of the pitch range, in `[-1, 1]`.
    PitchBend { amount: f64 },
    PitchRange { semitones: u8 },
    FineTune { semitones: f64 },
    CoarseTune { semitones: i8 },
    ResetControllers,
    AllNotesOff,
    SoundOff,
    SystemReset,
}

impl MidiEvent {
    pub fn new(time: f64, channel: u8, kind: EventKind) -> Self {
        MidiEvent { time, channel, kind }
    }

    pub fn note_on(time: f64, channel: u8, key: u8, velocity: u8, end_time: f64) -> Self {
        MidiEvent::new(
            time,
            channel,
            EventKind::NoteOn {
                key,
                velocity,
                end_time: Some(end_time),
            },
        )
    }

    pub fn note_off(time: f64, channel: u8, key: u8) -> Self {
        MidiEvent::new(time, channel, EventKind::NoteOff { key })
    }

    pub fn program(time: f64, channel: u8, program: u8) -> Self {
        MidiEvent::new(time, channel, EventKind::Program { program })
    }

    /// Events that close an assignment section when the channel has notes.
    pub fn changes_instrument(&self) -> bool {
        matches!(self.kind, EventKind::Program { .. } | EventKind::Drums { .. })
    }
}

impl Song {
    pub fn new(events: Vec<MidiEvent>) -> Self {
        Song { events }
    }

    pub fn duration(&self) -> f64 {
        self.events.last().map_or(0.0, |event| event.time)
    }

    /// Check channel, key and velocity bounds and time ordering.
    pub fn validate(&self) -> Result<(), InputError> {
        let mut previous = 0.0;
        for (index, event) in self.events.iter().enumerate() {
            if usize::from(event.channel) >= CHANNEL_COUNT {
                return Err(InputError::ChannelOutOfRange {
                    index,
                    channel: event.channel,
                });
            }
            if event.time < previous {
                return Err(InputError::TimeWentBackwards {
                    index,
                    time: event.time,
                    previous,
                });
            }
            previous = event.time;

            match event.kind {
                EventKind::NoteOn { key, velocity, end_time } => {
                    if key > 127 {
                        return Err(InputError::KeyOutOfRange { index, key });
                    }
                    if velocity == 0 || velocity > 127 {
                        return Err(InputError::VelocityOutOfRange { index, velocity });
                    }
                    if let Some(end) = end_time.filter(|&end| end < event.time) {
                        return Err(InputError::NoteEndsBeforeStart {
                            index,
                            start: event.time,
                            end,
                        });
                    }
                }
                EventKind::NoteOff { key } | EventKind::NoteStop { key } if key > 127 => {
                    return Err(InputError::KeyOutOfRange { index, key });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fill every missing note end from the first later event that ends the
    /// same (channel, key), or from the end of the song.
    pub fn resolve_note_ends(&mut self) {
        let song_end = self.duration();
        for index in 0..self.events.len() {
            let (channel, key) = match self.events[index].kind {
                EventKind::NoteOn { key, end_time: None, .. } => (self.events[index].channel, key),
                _ => continue,
            };
            let end = self.events[index + 1..]
                .iter()
                .filter(|later| later.channel == channel)
                .find(|later| match later.kind {
                    EventKind::NoteOff { key: off } | EventKind::NoteStop { key: off } => off == key,
                    EventKind::NoteOn { key: on, .. } => on == key,
                    EventKind::AllNotesOff | EventKind::SoundOff | EventKind::SystemReset => true,
                    _ => false,
                })
                .map_or(song_end, |later| later.time);
            if let EventKind::NoteOn { end_time, .. } = &mut self.events[index].kind {
                *end_time = Some(end);
            }
        }
    }
}
