//! Voice processing module
//!
//! Handles microphone capture, silence detection, live captions and reply
//! playback. Speech recognition and synthesis themselves are external
//! capabilities (see `capability`).

mod capture;
mod clip;
mod device;
mod hardware;
mod playback;
mod recognition;
mod resources;
mod silence;
mod transcript;

pub use capture::{AudioCaptureSession, CaptureSession, DEFAULT_MAX_CAPTURE, StopReason};
pub use clip::{AudioClip, DecodedAudio, MP3_MIME, WAV_MIME, samples_to_wav};
pub use device::{FRAME_QUEUE, InputStream, Microphone, Speaker};
pub use hardware::{CpalMicrophone, CpalSpeaker, SAMPLE_RATE};
pub use playback::SpeechPlaybackSession;
pub use recognition::{IncrementalRecognizer, LiveRecognizer, RecognitionEvent, RecognitionHandle};
pub use resources::{ResourceGuard, ResourceKind, ResourceSnapshot, ResourceTracker};
pub use silence::{SilenceConfig, SilenceDetector, SilenceSignal, rms_level};
pub use transcript::{LiveTranscript, NoopTranscriptView, TranscriptView};
