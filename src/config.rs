//! Converter settings, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid configuration. Key names
//! from the older settings-file layout (`use_vrc6`, `midi_channels`,
//! `min_nes_channels`, ...) are accepted as aliases.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::event::CHANNEL_COUNT;
use crate::voice::{MAX_VOICES_PER_CHANNEL, PhysicalVoice, VoiceSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Use the VRC6 expansion voices (two pulses and a sawtooth).
    #[serde(alias = "use_vrc6")]
    pub use_expansion: bool,
    /// Depth budget of the assignment search.
    pub search_depth: u32,
    /// Playback rows per second; one row is the time resolution of stealing.
    pub rows_per_second: f64,
    /// Largest pitch shift allowed when pulling apart colliding voices.
    pub max_detune_semitones: f64,
    /// Frequencies closer than this are considered colliding.
    pub min_detune_hz: f64,
    pub disabled_channels: Vec<u8>,
    pub weights: ScoringWeights,
    #[serde(alias = "midi_channels")]
    pub channels: Vec<ChannelConfig>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            use_expansion: true,
            search_depth: 8,
            rows_per_second: 60.0,
            max_detune_semitones: 0.125,
            min_detune_hz: 0.5,
            disabled_channels: Vec::new(),
            weights: ScoringWeights::default(),
            channels: Vec::new(),
        }
    }
}

/// Hand-tuned weights of the assignment and trigger scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Penalty per out-of-range note on an assigned voice.
    pub out_of_range: f64,
    /// Penalty per historical collision with a channel sharing a voice.
    pub interruption: f64,
    /// Plan score multiplier per channel below its minimum voice count.
    pub min_voices_discount: f64,
    /// Trigger penalty per other pulse voice doubling the same note.
    pub tone_overlap: f64,
    /// Remaining durations within this many rows count as "equally long".
    pub tone_overlap_tolerance_rows: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        ScoringWeights {
            out_of_range: 2.0,
            interruption: 4.0,
            min_voices_discount: 0.001,
            tone_overlap: 1.0,
            tone_overlap_tolerance_rows: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub id: u8,
    pub enabled: bool,
    #[serde(alias = "allowed_nes_channels")]
    pub allowed_voices: Option<VoiceSet>,
    #[serde(alias = "min_nes_channels")]
    pub min_voices: usize,
    #[serde(alias = "max_nes_channels")]
    pub max_voices: usize,
    /// Prefer lower notes when simultaneous notes compete for one voice.
    pub lower_keys_first: bool,
    pub detune_semitones: f64,
    pub volume_multiplier: f64,
    pub search_depth: Option<u32>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            id: 0,
            enabled: true,
            allowed_voices: None,
            min_voices: 0,
            max_voices: MAX_VOICES_PER_CHANNEL,
            lower_keys_first: false,
            detune_semitones: 0.0,
            volume_multiplier: 1.0,
            search_depth: None,
        }
    }
}

/// Effective settings of one logical channel, defaults applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub allowed_voices: VoiceSet,
    pub min_voices: usize,
    pub max_voices: usize,
    pub lower_keys_first: bool,
    pub detune_semitones: f64,
    pub volume_multiplier: f64,
    pub search_depth: Option<u32>,
}

impl ConverterConfig {
    pub fn from_json(source: &str) -> Result<Self, ConfigError> {
        let config: ConverterConfig = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for &channel in &self.disabled_channels {
            if usize::from(channel) >= CHANNEL_COUNT {
                return Err(ConfigError::InvalidChannel { channel });
            }
        }
        for channel in &self.channels {
            if usize::from(channel.id) >= CHANNEL_COUNT {
                return Err(ConfigError::InvalidChannel { channel: channel.id });
            }
            if channel.min_voices > channel.max_voices || channel.max_voices > MAX_VOICES_PER_CHANNEL {
                return Err(ConfigError::VoiceBounds {
                    channel: channel.id,
                    min: channel.min_voices,
                    max: channel.max_voices,
                });
            }
            if channel.volume_multiplier < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "volume_multiplier",
                    reason: format!("channel {} has a negative multiplier", channel.id),
                });
            }
        }
        if !self.rows_per_second.is_finite() || self.rows_per_second <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "rows_per_second",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_detune_semitones < 0.0 || self.min_detune_hz < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "detune",
                reason: "detune limits cannot be negative".to_string(),
            });
        }
        Ok(())
    }

    /// Voices available at all under this configuration.
    pub fn available_voices(&self) -> VoiceSet {
        PhysicalVoice::ALL
            .into_iter()
            .filter(|voice| self.use_expansion || !voice.is_expansion())
            .collect()
    }

    pub fn channel(&self, channel: usize) -> ChannelSettings {
        let defaults = ChannelConfig::default();
        let entry = self
            .channels
            .iter()
            .find(|entry| usize::from(entry.id) == channel)
            .unwrap_or(&defaults);
        let disabled = self.disabled_channels.iter().any(|&id| usize::from(id) == channel);
        let available = self.available_voices();

        ChannelSettings {
            enabled: entry.enabled && !disabled,
            allowed_voices: entry
                .allowed_voices
                .map_or(available, |allowed| allowed.intersection(&available)),
            min_voices: entry.min_voices,
            max_voices: entry.max_voices.min(MAX_VOICES_PER_CHANNEL),
            lower_keys_first: entry.lower_keys_first,
            detune_semitones: entry.detune_semitones,
            volume_multiplier: entry.volume_multiplier,
            search_depth: entry.search_depth,
        }
    }

    /// Search depth for a section: the deepest override among the channels
    /// taking part, or the global budget.
    pub fn section_depth(&self, channels: impl IntoIterator<Item = usize>) -> u32 {
        channels
            .into_iter()
            .filter_map(|channel| self.channel(channel).search_depth)
            .fold(self.search_depth, u32::max)
    }
}
