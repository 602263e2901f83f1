//! `cpal` microphone and speaker backends
//!
//! cpal streams aren't `Send`, so each stream lives on its own thread and is
//! driven through channels. Dropping the Rust-side handle stops the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::clip::DecodedAudio;
use super::device::{FRAME_QUEUE, InputStream, Microphone, Speaker};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Default input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<InputStream> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32>>();
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("sitevoice-mic".to_string())
            .spawn(move || {
                let stream = match build_input_stream(frame_tx) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Hold the stream until released or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited before start".to_string()))??;

        tracing::debug!(sample_rate, "audio capture started");
        Ok(InputStream::new(frame_rx, sample_rate, move || {
            let _ = stop_tx.send(());
        }))
    }
}

#[allow(clippy::cast_precision_loss)]
fn build_input_stream(frame_tx: mpsc::Sender<Result<Vec<f32>>>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported = device
        .supported_input_configs()
        .map_err(|e| classify_open_error(&e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    let config: StreamConfig = match supported {
        Some(c) => c.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
        None => {
            // Fall back to the device default and downmix in the callback
            device
                .default_input_config()
                .map_err(|e| classify_open_error(&e.to_string()))?
                .config()
        }
    };

    let channels = usize::from(config.channels.max(1));
    let sample_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio capture initialized"
    );

    let error_tx = frame_tx.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame = if channels == 1 {
                    data.to_vec()
                } else {
                    data.chunks(channels)
                        .map(|c| c.iter().sum::<f32>() / c.len() as f32)
                        .collect()
                };
                if frame_tx.try_send(Ok(frame)).is_err() {
                    tracing::trace!("capture queue full, dropping frame");
                }
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                let _ = error_tx.try_send(Err(Error::Capture(err.to_string())));
            },
            None,
        )
        .map_err(|e| classify_open_error(&e.to_string()))?;

    stream
        .play()
        .map_err(|e| classify_open_error(&e.to_string()))?;

    Ok((stream, sample_rate))
}

/// Map a backend error message to a permission or device error
fn classify_open_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::Audio(message.to_string())
    }
}

/// Default output device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalSpeaker;

impl CpalSpeaker {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Sets the stop flag when the playing future is dropped
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Speaker for CpalSpeaker {
    async fn play(&self, audio: DecodedAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let _stop_on_drop = StopOnDrop(Arc::clone(&stop));
        let (done_tx, done_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("sitevoice-playback".to_string())
            .spawn(move || {
                let _ = done_tx.send(play_blocking(audio, &stop));
            })?;

        done_rx
            .await
            .map_err(|_| Error::Playback("playback thread exited".to_string()))?
    }
}

/// Play samples in a blocking manner
fn play_blocking(audio: DecodedAudio, stop: &AtomicBool) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

    let rate = SampleRate(audio.sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Playback(e.to_string()))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(cpal::SupportedStreamConfigRange::channels);

    let (config, samples) = match supported {
        Some(c) => (c.with_sample_rate(rate).config(), audio.samples),
        None => {
            let config: StreamConfig = device
                .default_output_config()
                .map_err(|e| Error::Playback(e.to_string()))?
                .config();
            let resampled =
                resample_linear(&audio.samples, audio.sample_rate, config.sample_rate.0);
            (config, resampled)
        }
    };

    let channels = usize::from(config.channels.max(1));
    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let stream = {
        let finished = Arc::clone(&finished);
        let failed = Arc::clone(&failed);
        let mut pos = 0usize;
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::SeqCst);
                            0.0
                        });
                        frame.fill(sample);
                        pos = (pos + 1).min(sample_count);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    failed.store(true, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Playback(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();

    while !finished.load(Ordering::SeqCst) {
        if stop.load(Ordering::SeqCst) {
            tracing::debug!("playback interrupted");
            return Ok(());
        }
        if failed.load(Ordering::SeqCst) {
            return Err(Error::Playback("output stream failed".to_string()));
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}

/// Linear interpolation resampler for rate mismatches with the output device
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || to == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from) / f64::from(to);
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src.floor() as usize;
            let frac = (src - src.floor()) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}
