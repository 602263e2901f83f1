//! Speech playback
//!
//! Decodes a synthesized clip and plays it on a [`Speaker`]. Only one
//! playback may run at a time; decoded buffers and the output context are
//! dropped as soon as playback ends, fails, or is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::clip::AudioClip;
use super::device::Speaker;
use super::resources::{ResourceKind, ResourceTracker};
use crate::{Error, Result};

/// Plays synthesized replies
pub struct SpeechPlaybackSession {
    speaker: Arc<dyn Speaker>,
    resources: ResourceTracker,
    active: AtomicBool,
}

/// Clears the active flag when playback finishes or is dropped
struct ActiveFlag<'a>(&'a AtomicBool);

impl Drop for ActiveFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SpeechPlaybackSession {
    #[must_use]
    pub fn new(speaker: Arc<dyn Speaker>, resources: ResourceTracker) -> Self {
        Self {
            speaker,
            resources,
            active: AtomicBool::new(false),
        }
    }

    /// Play a clip to completion
    ///
    /// Dropping the returned future stops playback and releases the output.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if another playback is active, or
    /// `Error::Playback` if decoding or output fails
    pub async fn play(&self, clip: &AudioClip) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("playback already active".to_string()));
        }
        let _active = ActiveFlag(&self.active);
        let _context = self.resources.acquire(ResourceKind::AudioContext);

        let audio = clip.decode()?;
        tracing::debug!(
            bytes = clip.bytes.len(),
            sample_rate = audio.sample_rate,
            duration_ms = audio.duration().as_millis(),
            "playing reply"
        );

        self.speaker.play(audio).await.inspect_err(|e| {
            tracing::error!(error = %e, "playback failed");
        })
    }

    /// Whether a playback is in progress
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
