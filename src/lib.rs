pub mod assign;
pub mod base;
pub mod config;
pub mod converter;
pub mod error;
pub mod event;
pub mod midi_state;
pub mod play;
pub mod preset;
pub mod timbre;
pub mod voice;

use crate::base::StandardBase;
use crate::config::ConverterConfig;
use crate::event::Song;
use wasm_bindgen::prelude::*;

pub use crate::converter::{ChipCommand, Conversion, DroppedNote, VoiceAction, convert};
pub use crate::error::ChipError;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the chipvoice-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: convert a JSON song into chip commands using the built-in
/// instrument tables. `config_json` may be empty for the defaults.
#[wasm_bindgen]
pub fn convert_song(song_json: &str, config_json: &str) -> Result<JsValue, JsValue> {
    let song: Song = serde_json::from_str(song_json).map_err(|e| JsValue::from_str(&format!("Song error: {e}")))?;
    let config = if config_json.trim().is_empty() {
        ConverterConfig::default()
    } else {
        ConverterConfig::from_json(config_json).map_err(|e| JsValue::from_str(&e.report("config.json", config_json)))?
    };
    let conversion = convert(&song, &config, &StandardBase::new()).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    serde_wasm_bindgen::to_value(&conversion).map_err(|e| JsValue::from_str(&format!("{e}")))
}
