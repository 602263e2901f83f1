//! Configuration management for the voice conversation core

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::voice::SilenceConfig;
use crate::{Error, Result};

use file::ConfigFile;

/// Default proxy endpoint for local development
const DEFAULT_BACKEND_URL: &str = "http://localhost:8080/voice";

/// sitevoice configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Site name used in the system instructions
    pub site_name: String,

    /// JSON snapshot of site pages/posts/products
    pub site_content: Option<PathBuf>,

    /// Speech/completion proxy
    pub backend: BackendConfig,

    /// Capture and silence detection
    pub voice: VoiceConfig,

    /// Turn policy and prompt bounds
    pub conversation: ConversationConfig,
}

/// Proxy backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL; `/transcribe`, `/complete`, `/synthesize` are appended
    pub url: String,

    /// Bearer token (from `SITEVOICE_API_KEY` env)
    pub api_key: Option<String>,

    /// STT model hint (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS voice identifier
    pub tts_voice: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            api_key: None,
            stt_model: "whisper-1".to_string(),
            tts_voice: "alloy".to_string(),
        }
    }
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// RMS level in [0, 1] below which a frame is silence
    pub silence_threshold: f32,

    /// Continuous silence that ends an utterance
    pub silence_ms: u64,

    /// Hard cap on one capture
    pub max_capture_secs: u64,

    /// Run the incremental recognizer for interim captions
    pub live_captions: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            silence_ms: 2000,
            max_capture_secs: 30,
            live_captions: false,
        }
    }
}

/// Conversation policy configuration
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Exchanges (user + assistant pairs) kept in history
    pub max_exchanges: usize,

    /// Consecutive empty transcriptions before the conversation goes idle
    pub max_empty_attempts: u32,

    /// Characters kept from each page/post/product body
    pub content_budget: usize,

    /// Limit on each transcribe/complete/synthesize call
    pub request_timeout_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_exchanges: 5,
            max_empty_attempts: 3,
            content_budget: 500,
            request_timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_name: "this site".to_string(),
            site_content: None,
            backend: BackendConfig::default(),
            voice: VoiceConfig::default(),
            conversation: ConversationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// An explicit `path` must exist and parse; otherwise the standard config
    /// file is used when present.
    ///
    /// # Errors
    ///
    /// Returns error if the explicit file can't be loaded, or a resolved
    /// value is unparseable or out of range
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::load_config_file_from(path)?,
            None => file::load_config_file(),
        };
        let config = Self::resolve(fc, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a numeric env value doesn't parse
    pub fn resolve(fc: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let backend = BackendConfig {
            url: env("SITEVOICE_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or(defaults.backend.url),
            api_key: env("SITEVOICE_API_KEY").or(fc.backend.api_key),
            stt_model: env("SITEVOICE_STT_MODEL")
                .or(fc.backend.stt_model)
                .unwrap_or(defaults.backend.stt_model),
            tts_voice: env("SITEVOICE_TTS_VOICE")
                .or(fc.backend.tts_voice)
                .unwrap_or(defaults.backend.tts_voice),
        };

        let voice = VoiceConfig {
            silence_threshold: parse_env(&env, "SITEVOICE_SILENCE_THRESHOLD")?
                .or(fc.voice.silence_threshold)
                .unwrap_or(defaults.voice.silence_threshold),
            silence_ms: parse_env(&env, "SITEVOICE_SILENCE_MS")?
                .or(fc.voice.silence_ms)
                .unwrap_or(defaults.voice.silence_ms),
            max_capture_secs: fc
                .voice
                .max_capture_secs
                .unwrap_or(defaults.voice.max_capture_secs),
            live_captions: fc.voice.live_captions.unwrap_or(defaults.voice.live_captions),
        };

        let conversation = ConversationConfig {
            max_exchanges: parse_env(&env, "SITEVOICE_MAX_EXCHANGES")?
                .or(fc.conversation.max_exchanges)
                .unwrap_or(defaults.conversation.max_exchanges),
            max_empty_attempts: parse_env(&env, "SITEVOICE_MAX_EMPTY_ATTEMPTS")?
                .or(fc.conversation.max_empty_attempts)
                .unwrap_or(defaults.conversation.max_empty_attempts),
            content_budget: fc
                .conversation
                .content_budget
                .unwrap_or(defaults.conversation.content_budget),
            request_timeout_secs: parse_env(&env, "SITEVOICE_REQUEST_TIMEOUT")?
                .or(fc.conversation.request_timeout_secs)
                .unwrap_or(defaults.conversation.request_timeout_secs),
        };

        Ok(Self {
            site_name: env("SITEVOICE_SITE_NAME")
                .or(fc.site_name)
                .unwrap_or(defaults.site_name),
            site_content: env("SITEVOICE_SITE_CONTENT")
                .or(fc.site_content)
                .map(PathBuf::from),
            backend,
            voice,
            conversation,
        })
    }

    /// Check that resolved values are usable
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.voice.silence_threshold) {
            return Err(Error::Config(format!(
                "voice.silence_threshold must be within [0, 1], got {}",
                self.voice.silence_threshold
            )));
        }
        if self.voice.silence_ms == 0 {
            return Err(Error::Config("voice.silence_ms must be positive".to_string()));
        }
        if self.voice.max_capture_secs == 0 {
            return Err(Error::Config(
                "voice.max_capture_secs must be positive".to_string(),
            ));
        }
        if self.conversation.max_exchanges == 0 {
            return Err(Error::Config(
                "conversation.max_exchanges must be at least 1".to_string(),
            ));
        }
        if self.conversation.max_empty_attempts == 0 {
            return Err(Error::Config(
                "conversation.max_empty_attempts must be at least 1".to_string(),
            ));
        }
        if self.conversation.request_timeout_secs == 0 {
            return Err(Error::Config(
                "conversation.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.backend.url.is_empty() {
            return Err(Error::Config("backend.url is required".to_string()));
        }
        Ok(())
    }

    /// Silence detection settings for capture sessions
    #[must_use]
    pub const fn silence(&self) -> SilenceConfig {
        SilenceConfig {
            threshold: self.voice.silence_threshold,
            duration: Duration::from_millis(self.voice.silence_ms),
        }
    }

    /// Turn policy for the conversation engine
    #[must_use]
    pub const fn engine(&self) -> EngineConfig {
        EngineConfig {
            max_exchanges: self.conversation.max_exchanges,
            max_empty_attempts: self.conversation.max_empty_attempts,
            request_timeout: Duration::from_secs(self.conversation.request_timeout_secs),
        }
    }

    /// Hard cap on a single capture
    #[must_use]
    pub const fn max_capture(&self) -> Duration {
        Duration::from_secs(self.voice.max_capture_secs)
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} must be a number, got {raw:?}")))
}
