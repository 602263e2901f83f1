//! TOML configuration file loading
//!
//! Supports `~/.config/sitevoice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Site name used in the system instructions
    #[serde(default)]
    pub site_name: Option<String>,

    /// Path to a JSON snapshot of site pages/posts/products
    #[serde(default)]
    pub site_content: Option<String>,

    /// Speech/completion proxy configuration
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Capture and silence detection
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Turn policy and prompt bounds
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Proxy backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the proxy (e.g. `https://example.com/wp-json/voice/v1`)
    pub url: Option<String>,

    /// Bearer token sent with every request
    pub api_key: Option<String>,

    /// STT model hint forwarded to the proxy
    pub stt_model: Option<String>,

    /// TTS voice identifier
    pub tts_voice: Option<String>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// RMS level below which a frame counts as silence
    pub silence_threshold: Option<f32>,

    /// Continuous silence (ms) that ends an utterance
    pub silence_ms: Option<u64>,

    /// Hard cap on one capture
    pub max_capture_secs: Option<u64>,

    /// Show interim captions while listening
    pub live_captions: Option<bool>,
}

/// Conversation policy configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    pub max_exchanges: Option<usize>,
    pub max_empty_attempts: Option<u32>,
    pub content_budget: Option<usize>,
    pub request_timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns `Error::Io` if the file can't be read or `Error::Toml` if it
/// doesn't parse
pub fn load_config_file_from(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/sitevoice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sitevoice").join("config.toml"))
}
