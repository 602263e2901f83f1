//! Error types for the voice conversation core

use thiserror::Error;

/// Result type alias for sitevoice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a voice conversation
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error (device missing, stream build failure)
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Recorder or stream failure during an active capture
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model completion error
    #[error("completion error: {0}")]
    Completion(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio playback error (decode or output failure)
    #[error("playback error: {0}")]
    Playback(String),

    /// A capability call did not finish in time
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// Which capability timed out
        operation: Operation,
        /// Configured limit in seconds
        secs: u64,
    },

    /// Operation not allowed in the current engine state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The engine was closed or its driver task has exited
    #[error("conversation closed")]
    Closed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// External capability a timeout applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Transcribe,
    Complete,
    Synthesize,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transcribe => write!(f, "transcription"),
            Self::Complete => write!(f, "completion"),
            Self::Synthesize => write!(f, "synthesis"),
        }
    }
}

/// Coarse classification used when surfacing errors to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Mic access refused; the user must grant permission
    PermissionDenied,
    /// Recorder/stream failure mid-session
    Capture,
    /// Speech-to-text service failure
    Transcribe,
    /// Language model failure
    Completion,
    /// Speech synthesis failure
    Synthesis,
    /// Local playback failure
    Playback,
    /// Anything else (config, state misuse, shutdown)
    Other,
}

impl Error {
    /// Classify this error into the taxonomy hosts surface to users
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Capture(_) | Self::Audio(_) => ErrorKind::Capture,
            Self::Stt(_)
            | Self::Timeout {
                operation: Operation::Transcribe,
                ..
            } => ErrorKind::Transcribe,
            Self::Completion(_)
            | Self::Timeout {
                operation: Operation::Complete,
                ..
            } => ErrorKind::Completion,
            Self::Tts(_)
            | Self::Timeout {
                operation: Operation::Synthesize,
                ..
            } => ErrorKind::Synthesis,
            Self::Playback(_) => ErrorKind::Playback,
            _ => ErrorKind::Other,
        }
    }
}
