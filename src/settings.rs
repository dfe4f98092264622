//! Application settings: model identifiers, audio rates, and tuning knobs.
//!
//! Settings load from `settings.json` under the platform config directory and
//! fall back to defaults when the file is missing or malformed. Unknown keys
//! are ignored and missing keys take their defaults, so old settings files
//! keep working across upgrades.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

const CONFIG_DIR_NAME: &str = "contract-assistant";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Model for text question answering.
    pub text_model: String,

    /// Model for the live bidirectional audio session.
    pub live_model: String,

    /// Model for one-shot speech synthesis.
    pub tts_model: String,

    /// Prebuilt voice used for synthesized speech.
    pub voice: String,

    /// Sampling temperature for text generation.
    pub temperature: f32,

    /// Token budget for the model's internal reasoning pass. Zero disables
    /// reasoning entirely.
    pub thinking_budget: u32,

    /// How many recent messages accompany each text request.
    pub history_limit: usize,

    /// Samples per captured microphone block.
    pub capture_frame_size: usize,

    /// Wire rate for microphone audio sent to the live endpoint (Hz).
    pub input_sample_rate: u32,

    /// Rate of the PCM audio the live endpoint sends back (Hz).
    pub output_sample_rate: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            text_model: "gemini-3-pro-preview".to_string(),
            live_model: "gemini-2.5-flash-native-audio-preview-12-2025".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            voice: "Zephyr".to_string(),
            temperature: 0.7,
            thinking_budget: 4000,
            history_limit: 10,
            capture_frame_size: 4096,
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
        }
    }
}

/// Config directory for this app (`~/.config/contract-assistant` on Linux).
pub fn config_dir() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .ok_or_else(|| "Could not determine config directory".to_string())
}

fn settings_path() -> Result<PathBuf, String> {
    Ok(config_dir()?.join(SETTINGS_FILE_NAME))
}

pub fn load_settings() -> AppSettings {
    let path = match settings_path() {
        Ok(p) => p,
        Err(e) => {
            warn!("Settings: {}", e);
            return AppSettings::default();
        }
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

/// The provider API key, from the environment (`.env` files are loaded at
/// startup by the shell).
pub fn api_key() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}
