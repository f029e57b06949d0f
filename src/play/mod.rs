//! Short-term voice arbitration during playback.

pub mod arbiter;
pub mod detune;
pub mod score;
pub mod state;

pub use arbiter::{Decision, DropReason, NoteArbiter, NoteRequest};
pub use score::{ScoreLevel, ScoreVector};
pub use state::{PlaybackState, SoundingVoice, VoiceState};
