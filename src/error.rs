use std::fmt;
use std::ops::Range;

use ariadne::{Config, Label, Report, ReportKind, Source};

#[derive(Debug)]
pub enum ChipError {
    Config(ConfigError),
    Input(InputError),
}

#[derive(Debug)]
pub enum ConfigError {
    Parse { message: String, line: usize, column: usize },
    InvalidChannel { channel: u8 },
    VoiceBounds { channel: u8, min: usize, max: usize },
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    ChannelOutOfRange { index: usize, channel: u8 },
    KeyOutOfRange { index: usize, key: u8 },
    VelocityOutOfRange { index: usize, velocity: u8 },
    TimeWentBackwards { index: usize, time: f64, previous: f64 },
    NoteEndsBeforeStart { index: usize, start: f64, end: f64 },
}

impl fmt::Display for ChipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChipError::Config(e) => write!(f, "Config error: {e}"),
            ChipError::Input(e) => write!(f, "Input error: {e}"),
        }
    }
}

impl std::error::Error for ChipError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse { message, line, column } => {
                write!(f, "{message} at line {line}, column {column}")
            }
            ConfigError::InvalidChannel { channel } => {
                write!(f, "Channel id {channel} is out of range (expected 0..=15)")
            }
            ConfigError::VoiceBounds { channel, min, max } => {
                write!(f, "Channel {channel}: min_voices {min} exceeds max_voices {max} or the limit of 4")
            }
            ConfigError::InvalidValue { field, reason } => write!(f, "Invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::ChannelOutOfRange { index, channel } => {
                write!(f, "Event {index}: channel {channel} is out of range")
            }
            InputError::KeyOutOfRange { index, key } => write!(f, "Event {index}: key {key} is out of range"),
            InputError::VelocityOutOfRange { index, velocity } => {
                write!(f, "Event {index}: velocity {velocity} is out of range")
            }
            InputError::TimeWentBackwards { index, time, previous } => {
                write!(f, "Event {index}: time {time} is before the previous event at {previous}")
            }
            InputError::NoteEndsBeforeStart { index, start, end } => {
                write!(f, "Event {index}: note ends at {end} before it starts at {start}")
            }
        }
    }
}

impl std::error::Error for InputError {}

impl From<ConfigError> for ChipError {
    fn from(e: ConfigError) -> Self {
        ChipError::Config(e)
    }
}

impl From<InputError> for ChipError {
    fn from(e: InputError) -> Self {
        ChipError::Input(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json appends its own location; keep only the message
        let text = e.to_string();
        let message = match text.rfind(" at line ") {
            Some(cut) => text[..cut].to_string(),
            None => text,
        };
        ConfigError::Parse {
            message,
            line: e.line(),
            column: e.column(),
        }
    }
}

// ── Diagnostics ─────────────────────────────────────────────

impl ConfigError {
    /// Render this error as a plain-text diagnostic pointing into `source`.
    pub fn report(&self, source_name: &str, source: &str) -> String {
        let span = match self {
            ConfigError::Parse { line, column, .. } => span_at(source, *line, *column),
            _ => 0..0,
        };
        let mut builder = Report::build(ReportKind::Error, (source_name, span.clone()))
            .with_config(Config::default().with_color(false))
            .with_message(self.to_string());
        if matches!(self, ConfigError::Parse { .. }) {
            builder = builder.with_label(Label::new((source_name, span)).with_message("here"));
        }

        let mut out = Vec::new();
        match builder.finish().write((source_name, Source::from(source)), &mut out) {
            Ok(()) => String::from_utf8_lossy(&out).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

/// Span of the character at a 1-based line and column, in character
/// offsets (the unit ariadne counts in), clamped to the end of the source.
fn span_at(source: &str, line: usize, column: usize) -> Range<usize> {
    let line_start: usize = source
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(|text| text.chars().count())
        .sum();
    let total = source.chars().count();
    let start = (line_start + column.saturating_sub(1)).min(total);
    start..(start + 1).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_at_finds_line_and_column() {
        let source = "{\n  \"a\": x\n}";
        assert_eq!(span_at(source, 2, 8), 9..10);
        assert_eq!(&source[span_at(source, 2, 8)], "x");
        assert_eq!(span_at(source, 10, 1), source.len()..source.len());
        assert_eq!(span_at("é\nab", 2, 2), 3..4);
    }

    #[test]
    fn test_json_error_converts_with_location() {
        let err = serde_json::from_str::<serde_json::Value>("{\n  \"a\": x\n}").unwrap_err();
        match ConfigError::from(err) {
            ConfigError::Parse { message, line, .. } => {
                assert_eq!(line, 2);
                assert!(!message.contains("at line"), "location should be stripped: {message}");
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_report_mentions_message() {
        let source = "{\n  \"search_depth\": -1\n}";
        let err = ConfigError::Parse {
            message: "invalid value".to_string(),
            line: 2,
            column: 19,
        };
        let report = err.report("settings.json", source);
        assert!(report.contains("invalid value"), "report was: {report}");
        assert!(report.contains("settings.json"), "report was: {report}");
    }

    #[test]
    fn test_display_wraps_source() {
        let err: ChipError = InputError::KeyOutOfRange { index: 3, key: 200 }.into();
        assert_eq!(err.to_string(), "Input error: Event 3: key 200 is out of range");
    }
}
