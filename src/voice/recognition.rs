//! Streaming recognition for live captions
//!
//! A recognizer consumes frames during capture and reports interim text.
//! Failures here are never fatal: the capture session logs them and keeps
//! recording.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::clip::AudioClip;
use crate::Result;
use crate::capability::Transcriber;

/// Output of a streaming recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Tentative text for the utterance so far
    Interim(String),
    /// A committed segment
    Final(String),
    /// The recognizer gave up
    Failed(String),
}

/// A streaming recognition capability
#[async_trait]
pub trait LiveRecognizer: Send + Sync {
    /// Begin recognizing audio at the given sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot start
    async fn start(&self, sample_rate: u32) -> Result<RecognitionHandle>;
}

/// A running recognition; released on drop
pub struct RecognitionHandle {
    audio: Option<mpsc::UnboundedSender<Vec<f32>>>,
    events: mpsc::UnboundedReceiver<RecognitionEvent>,
    task: Option<JoinHandle<()>>,
}

impl RecognitionHandle {
    /// Wrap the channels of a recognizer and the task driving it
    #[must_use]
    pub const fn new(
        audio: mpsc::UnboundedSender<Vec<f32>>,
        events: mpsc::UnboundedReceiver<RecognitionEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            audio: Some(audio),
            events,
            task,
        }
    }

    /// Forward a captured frame; returns false once the recognizer is gone
    pub fn feed(&self, frame: &[f32]) -> bool {
        self.audio
            .as_ref()
            .is_some_and(|tx| tx.send(frame.to_vec()).is_ok())
    }

    /// Next pending event without waiting
    pub fn try_next_event(&mut self) -> Option<RecognitionEvent> {
        self.events.try_recv().ok()
    }

    /// Whether the handle still holds the recognizer
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.audio.is_some()
    }

    /// Stop recognition; safe to call more than once
    pub fn release(&mut self) {
        if self.audio.take().is_some() {
            if let Some(task) = self.task.take() {
                task.abort();
            }
            self.events.close();
            tracing::debug!("recognition released");
        }
    }
}

impl Drop for RecognitionHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RecognitionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecognitionHandle")
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Produces interim captions by re-transcribing the growing utterance
///
/// Every `interval` of new audio, the whole buffer so far is sent to the
/// wrapped transcriber and the result is reported as interim text.
pub struct IncrementalRecognizer {
    transcriber: Arc<dyn Transcriber>,
    interval: Duration,
}

impl IncrementalRecognizer {
    /// Default amount of new audio between interim transcriptions
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1500);

    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            transcriber,
            interval: Self::DEFAULT_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[async_trait]
impl LiveRecognizer for IncrementalRecognizer {
    async fn start(&self, sample_rate: u32) -> Result<RecognitionHandle> {
        let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<Vec<f32>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transcriber = Arc::clone(&self.transcriber);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let step = ((self.interval.as_secs_f64() * f64::from(sample_rate)) as usize).max(1);

        let task = tokio::spawn(async move {
            let mut buffer: Vec<f32> = Vec::new();
            let mut next_mark = step;

            while let Some(frame) = audio_rx.recv().await {
                buffer.extend_from_slice(&frame);
                if buffer.len() < next_mark {
                    continue;
                }
                next_mark = buffer.len() + step;

                let result = match AudioClip::from_samples(&buffer, sample_rate) {
                    Ok(clip) => transcriber.transcribe(&clip).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(text) if text.trim().is_empty() => {}
                    Ok(text) => {
                        if event_tx.send(RecognitionEvent::Interim(text)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = event_tx.send(RecognitionEvent::Failed(e.to_string()));
                        break;
                    }
                }
            }
        });

        tracing::debug!(sample_rate, step, "incremental recognizer started");
        Ok(RecognitionHandle::new(audio_tx, event_rx, Some(task)))
    }
}
