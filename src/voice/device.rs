//! Audio device seams
//!
//! The capture and playback sessions only talk to these traits. Device
//! callbacks are bridged onto channels here so the rest of the crate sees
//! plain async values.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::clip::DecodedAudio;
use crate::Result;

/// Frames queued between the device callback and the capture session
pub const FRAME_QUEUE: usize = 256;

/// A source of microphone audio
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Request access and open a live stream
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` when access is refused, or
    /// `Error::Audio` when no usable device exists
    async fn open(&self) -> Result<InputStream>;
}

/// An audio output device
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Play mono samples, resolving once output has drained
    ///
    /// Dropping the returned future must stop output and release the device.
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if output fails
    async fn play(&self, audio: DecodedAudio) -> Result<()>;
}

type Release = Box<dyn FnOnce() + Send>;

/// A live microphone stream
///
/// Owns the device track; closing (or dropping) the stream releases it.
pub struct InputStream {
    frames: mpsc::Receiver<Result<Vec<f32>>>,
    sample_rate: u32,
    release: Option<Release>,
}

impl InputStream {
    /// Wrap a frame channel and the callback that releases the device
    pub fn new(
        frames: mpsc::Receiver<Result<Vec<f32>>>,
        sample_rate: u32,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames,
            sample_rate,
            release: Some(Box::new(release)),
        }
    }

    /// Sample rate of delivered frames
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the device stops delivering audio.
    ///
    /// # Errors
    ///
    /// Returns the device error reported mid-stream
    pub async fn next_frame(&mut self) -> Option<Result<Vec<f32>>> {
        if self.release.is_none() {
            return None;
        }
        self.frames.recv().await
    }

    /// Whether the device track is still held
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.release.is_some()
    }

    /// Release the device track; safe to call more than once
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            self.frames.close();
            release();
            tracing::debug!("microphone track released");
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("sample_rate", &self.sample_rate)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
