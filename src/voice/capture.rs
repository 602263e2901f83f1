//! Per-turn microphone capture
//!
//! `AudioCaptureSession` opens the microphone and hands out a
//! [`CaptureSession`] that owns every handle acquired for the turn: the
//! stream, the recorder buffer, the optional live recognizer and the silence
//! detector. All of them are released on stop, on error, and on drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::clip::AudioClip;
use super::device::{InputStream, Microphone};
use super::recognition::{LiveRecognizer, RecognitionEvent, RecognitionHandle};
use super::resources::{ResourceGuard, ResourceKind, ResourceTracker};
use super::silence::{SilenceConfig, SilenceDetector};
use super::transcript::{LiveTranscript, TranscriptView};
use crate::{Error, Result};

/// Default hard cap on one capture
pub const DEFAULT_MAX_CAPTURE: Duration = Duration::from_secs(30);

/// Why a capture ended on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Silence lasted the configured duration
    Silence,
    /// The capture hit its maximum length
    MaxDuration,
}

/// Opens capture sessions against a microphone
pub struct AudioCaptureSession {
    microphone: Arc<dyn Microphone>,
    recognizer: Option<Arc<dyn LiveRecognizer>>,
    silence: SilenceConfig,
    max_duration: Duration,
    resources: ResourceTracker,
}

impl AudioCaptureSession {
    /// Create a capture session factory
    #[must_use]
    pub fn new(
        microphone: Arc<dyn Microphone>,
        silence: SilenceConfig,
        resources: ResourceTracker,
    ) -> Self {
        Self {
            microphone,
            recognizer: None,
            silence,
            max_duration: DEFAULT_MAX_CAPTURE,
            resources,
        }
    }

    /// Run a streaming recognizer alongside capture for live captions
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn LiveRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Override the maximum capture length
    #[must_use]
    pub const fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Open the microphone and begin buffering
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if access is refused, or the device
    /// error if the microphone cannot be opened
    pub async fn start(&self) -> Result<CaptureSession> {
        let stream = self.microphone.open().await.inspect_err(|e| {
            tracing::warn!(error = %e, "microphone open failed");
        })?;
        let track = self.resources.acquire(ResourceKind::MicrophoneTrack);
        let started_at = Instant::now();

        let recognition = match &self.recognizer {
            Some(recognizer) => match recognizer.start(stream.sample_rate()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "live recognition unavailable, continuing without captions"
                    );
                    None
                }
            },
            None => None,
        };

        tracing::debug!(
            sample_rate = stream.sample_rate(),
            captions = recognition.is_some(),
            "capture started"
        );

        Ok(CaptureSession {
            sample_rate: stream.sample_rate(),
            stream: Some(stream),
            track: Some(track),
            recorder: Vec::new(),
            recognition,
            analysis: Some(SilenceDetector::attach(self.silence, started_at)),
            transcript: LiveTranscript::default(),
            started_at,
            max_duration: self.max_duration,
            stopped: false,
        })
    }

    /// Flush the recorder and release every handle
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the session was already stopped or the
    /// clip cannot be encoded
    pub fn stop(&self, session: &mut CaptureSession) -> Result<AudioClip> {
        session.finish()
    }

    /// Cancel a capture without producing a clip
    pub fn abort(&self, mut session: CaptureSession) {
        session.release_handles();
        tracing::debug!(
            elapsed_ms = session.started_at.elapsed().as_millis(),
            "capture aborted"
        );
    }
}

/// State owned by one active capture
pub struct CaptureSession {
    stream: Option<InputStream>,
    track: Option<ResourceGuard>,
    recorder: Vec<f32>,
    sample_rate: u32,
    recognition: Option<RecognitionHandle>,
    analysis: Option<SilenceDetector>,
    transcript: LiveTranscript,
    started_at: Instant,
    max_duration: Duration,
    stopped: bool,
}

impl CaptureSession {
    /// Pump frames until the utterance ends
    ///
    /// Captions are rendered to `view` as recognition events arrive.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capture` if the stream fails or ends unexpectedly
    pub async fn wait_for_stop(&mut self, view: &dyn TranscriptView) -> Result<StopReason> {
        let deadline = self.started_at + self.max_duration;

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::Capture("capture session already stopped".to_string()));
            };

            let frame = tokio::select! {
                frame = stream.next_frame() => frame,
                () = tokio::time::sleep_until(deadline) => {
                    tracing::debug!("maximum capture length reached");
                    return Ok(StopReason::MaxDuration);
                }
            };

            match frame {
                Some(Ok(samples)) => {
                    if self.on_frame(&samples, Instant::now(), view) {
                        return Ok(StopReason::Silence);
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(Error::Capture("microphone stream ended".to_string()));
                }
            }
        }
    }

    /// Record one frame; returns true when silence requests a stop
    fn on_frame(&mut self, samples: &[f32], now: Instant, view: &dyn TranscriptView) -> bool {
        self.recorder.extend_from_slice(samples);
        self.pump_recognition(samples, view);

        self.analysis
            .as_mut()
            .is_some_and(|detector| detector.on_tick(samples, now).stop_requested)
    }

    fn pump_recognition(&mut self, samples: &[f32], view: &dyn TranscriptView) {
        let Some(recognition) = self.recognition.as_mut() else {
            return;
        };

        let mut changed = false;
        let mut failed = !recognition.feed(samples);

        while let Some(event) = recognition.try_next_event() {
            match event {
                RecognitionEvent::Interim(text) => {
                    self.transcript.set_interim(&text);
                    changed = true;
                }
                RecognitionEvent::Final(text) => {
                    self.transcript.push_final(&text);
                    changed = true;
                }
                RecognitionEvent::Failed(reason) => {
                    tracing::warn!(reason, "live recognition failed, captions disabled");
                    failed = true;
                }
            }
        }

        if changed {
            self.transcript.render(view);
        }
        if failed {
            if let Some(mut handle) = self.recognition.take() {
                handle.release();
            }
        }
    }

    fn finish(&mut self) -> Result<AudioClip> {
        if self.stopped {
            return Err(Error::Capture("capture session already stopped".to_string()));
        }
        self.stopped = true;
        self.release_handles();

        let samples = std::mem::take(&mut self.recorder);
        tracing::debug!(
            samples = samples.len(),
            elapsed_ms = self.started_at.elapsed().as_millis(),
            "capture stopped"
        );
        AudioClip::from_samples(&samples, self.sample_rate)
    }

    fn release_handles(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close();
        }
        if let Some(mut recognition) = self.recognition.take() {
            recognition.release();
        }
        if let Some(detector) = self.analysis.take() {
            detector.detach();
        }
        self.track.take();
    }

    /// Whether the microphone is still held
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Samples recorded so far
    #[must_use]
    pub fn recorded_samples(&self) -> usize {
        self.recorder.len()
    }

    /// Capture sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// When capture began
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Caption text seen so far (display only)
    #[must_use]
    pub const fn live_transcript(&self) -> &LiveTranscript {
        &self.transcript
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release_handles();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("active", &self.is_active())
            .field("recorded_samples", &self.recorder.len())
            .field("sample_rate", &self.sample_rate)
            .field("captions", &self.recognition.is_some())
            .finish_non_exhaustive()
    }
}
