//! What every physical voice is sounding right now.

use crate::assign::TriggerCandidate;
use crate::voice::{PhysicalVoice, VOICE_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Sustaining,
    Released,
}

/// The note held by one physical voice.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundingVoice {
    pub trigger: TriggerCandidate,
    /// Position of the triggering note-on in the song.
    pub index: usize,
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub onset: f64,
    pub end_time: f64,
    /// Until this time, only strictly more important notes may steal the voice.
    pub protected_until: f64,
    /// Resolved playback frequency; `None` for unpitched voices.
    pub frequency: Option<f64>,
    /// Period offset applied to keep clear of other voices.
    pub period_delta: i32,
    pub state: VoiceState,
}

impl SoundingVoice {
    pub fn is_protected(&self, time: f64) -> bool {
        time < self.protected_until
    }
}

/// Per-voice playback state, advanced in event order by the driver.
#[derive(Debug, Clone)]
pub struct PlaybackState {
    voices: [Option<SoundingVoice>; VOICE_COUNT],
    rows_per_second: f64,
}

impl PlaybackState {
    pub fn new(rows_per_second: f64) -> Self {
        PlaybackState {
            voices: Default::default(),
            rows_per_second,
        }
    }

    pub fn row(&self, time: f64) -> i64 {
        (time * self.rows_per_second).round() as i64
    }

    pub fn voice(&self, voice: PhysicalVoice) -> Option<&SoundingVoice> {
        self.voices[voice.index()].as_ref()
    }

    pub fn voice_mut(&mut self, voice: PhysicalVoice) -> Option<&mut SoundingVoice> {
        self.voices[voice.index()].as_mut()
    }

    /// Sounding voices in chip order.
    pub fn sounding(&self) -> impl Iterator<Item = (PhysicalVoice, &SoundingVoice)> {
        PhysicalVoice::ALL
            .into_iter()
            .filter_map(|voice| self.voice(voice).map(|sounding| (voice, sounding)))
    }

    /// Whether the voice's note no longer holds: released explicitly, or a
    /// one-shot noise/sample note whose onset row has passed.
    pub fn is_released(&self, voice: PhysicalVoice, time: f64) -> bool {
        match self.voice(voice) {
            None => true,
            Some(sounding) => {
                sounding.state == VoiceState::Released
                    || (!voice.is_pitched() && self.row(time) != self.row(sounding.onset))
            }
        }
    }

    /// Rows until the voice's note ends, never negative.
    pub fn remaining_rows(&self, end_time: f64, time: f64) -> f64 {
        (self.row(end_time) - self.row(time)).max(0) as f64
    }

    /// Whether any voice still sounds the note triggered by event `index`.
    pub fn holds(&self, index: usize) -> bool {
        self.sounding().any(|(_, sounding)| sounding.index == index)
    }

    pub fn accept(&mut self, voice: PhysicalVoice, sounding: SoundingVoice) {
        self.voices[voice.index()] = Some(sounding);
    }

    /// Mark the voices sounding (channel, key) released. Noise and sample
    /// voices play their one-shot to the end and are left alone.
    pub fn release(&mut self, channel: u8, key: u8) -> Vec<PhysicalVoice> {
        self.release_matching(|sounding| sounding.channel == channel && sounding.key == key)
    }

    pub fn release_channel(&mut self, channel: u8) -> Vec<PhysicalVoice> {
        self.release_matching(|sounding| sounding.channel == channel)
    }

    /// Silence the voices sounding (channel, key).
    pub fn stop(&mut self, channel: u8, key: u8) -> Vec<PhysicalVoice> {
        self.stop_matching(|sounding| sounding.channel == channel && sounding.key == key)
    }

    pub fn stop_channel(&mut self, channel: u8) -> Vec<PhysicalVoice> {
        self.stop_matching(|sounding| sounding.channel == channel)
    }

    pub fn stop_all(&mut self) -> Vec<PhysicalVoice> {
        self.stop_matching(|_| true)
    }

    fn release_matching(&mut self, matches: impl Fn(&SoundingVoice) -> bool) -> Vec<PhysicalVoice> {
        let mut released = Vec::new();
        for voice in PhysicalVoice::ALL {
            if !voice.is_pitched() {
                continue;
            }
            if let Some(sounding) = self.voices[voice.index()].as_mut() {
                if sounding.state == VoiceState::Sustaining && matches(sounding) {
                    sounding.state = VoiceState::Released;
                    released.push(voice);
                }
            }
        }
        released
    }

    fn stop_matching(&mut self, matches: impl Fn(&SoundingVoice) -> bool) -> Vec<PhysicalVoice> {
        let mut stopped = Vec::new();
        for voice in PhysicalVoice::ALL {
            let slot = &mut self.voices[voice.index()];
            if slot.as_ref().is_some_and(&matches) {
                *slot = None;
                stopped.push(voice);
            }
        }
        stopped
    }
}
