//! End-of-utterance detection
//!
//! Tracks RMS energy frame by frame. A silence run starts on the first frame
//! below the threshold and is cancelled by any frame above it; once a run has
//! lasted the configured duration, a stop is requested exactly once.

use std::time::Duration;

use tokio::time::Instant;

/// Silence detection settings
#[derive(Debug, Clone, Copy)]
pub struct SilenceConfig {
    /// RMS level in [0, 1] below which a frame counts as silence
    pub threshold: f32,
    /// How long silence must persist before stopping capture
    pub duration: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: Duration::from_millis(2000),
        }
    }
}

/// Result of analyzing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceSignal {
    /// This frame was below the threshold
    pub is_silent: bool,
    /// Length of the current silence run
    pub elapsed_silence_ms: u64,
    /// The silence run just reached the configured duration
    pub stop_requested: bool,
}

/// Per-capture silence state
#[derive(Debug)]
pub struct SilenceDetector {
    config: SilenceConfig,
    last_above_threshold_at: Instant,
    silence_started_at: Option<Instant>,
    fired: bool,
}

impl SilenceDetector {
    /// Attach a fresh detector to a capture that started at `now`
    #[must_use]
    pub fn attach(config: SilenceConfig, now: Instant) -> Self {
        tracing::trace!(
            threshold = config.threshold,
            duration_ms = config.duration.as_millis(),
            "silence detector attached"
        );
        Self {
            config,
            last_above_threshold_at: now,
            silence_started_at: None,
            fired: false,
        }
    }

    /// Analyze the latest frame
    pub fn on_tick(&mut self, samples: &[f32], now: Instant) -> SilenceSignal {
        let level = rms_level(samples);

        if level >= self.config.threshold {
            if self.silence_started_at.take().is_some() {
                tracing::trace!(level, "silence run cancelled");
            }
            self.last_above_threshold_at = now;
            self.fired = false;
            return SilenceSignal {
                is_silent: false,
                elapsed_silence_ms: 0,
                stop_requested: false,
            };
        }

        let started = *self.silence_started_at.get_or_insert(now);
        let elapsed = now.saturating_duration_since(started);
        let stop_requested = !self.fired && elapsed >= self.config.duration;
        if stop_requested {
            self.fired = true;
            tracing::debug!(elapsed_ms = elapsed.as_millis(), "silence threshold reached");
        }

        SilenceSignal {
            is_silent: true,
            elapsed_silence_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            stop_requested,
        }
    }

    /// Time the input was last above the threshold
    #[must_use]
    pub const fn last_above_threshold_at(&self) -> Instant {
        self.last_above_threshold_at
    }

    /// Whether a silence timer is currently pending
    #[must_use]
    pub const fn is_timing(&self) -> bool {
        self.silence_started_at.is_some() && !self.fired
    }

    /// Detach from the capture, discarding state
    pub fn detach(self) {
        tracing::trace!("silence detector detached");
    }
}

/// RMS energy of a frame, clamped to [0, 1]
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt().clamp(0.0, 1.0)
}
