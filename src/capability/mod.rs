//! External capabilities the conversation depends on
//!
//! The engine treats speech recognition, completion and synthesis as opaque
//! async request/response functions. `ProxyClient` implements all three
//! against a single HTTP backend.

mod proxy;

use std::sync::Arc;

use async_trait::async_trait;

pub use proxy::ProxyClient;

use crate::Result;
use crate::voice::AudioClip;

/// Speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a complete clip; `clip.mime` is the encoding hint
    ///
    /// Returns an empty string (not an error) when no speech was found.
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` if the service fails
    async fn transcribe(&self, clip: &AudioClip) -> Result<String>;
}

/// Language model completion
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete a rendered prompt into free text
    ///
    /// # Errors
    ///
    /// Returns `Error::Completion` if the service fails
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Text-to-speech
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text into an encoded clip
    ///
    /// # Errors
    ///
    /// Returns `Error::Tts` if the service fails
    async fn synthesize(&self, text: &str) -> Result<AudioClip>;
}

/// The three capabilities a conversation needs
#[derive(Clone)]
pub struct Capabilities {
    pub transcriber: Arc<dyn Transcriber>,
    pub completer: Arc<dyn Completer>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Capabilities {
    /// Use one backend for all three capabilities
    #[must_use]
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: Transcriber + Completer + Synthesizer + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            transcriber: Arc::clone(&backend) as Arc<dyn Transcriber>,
            completer: Arc::clone(&backend) as Arc<dyn Completer>,
            synthesizer: backend,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
