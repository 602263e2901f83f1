//! Accounting for hardware and request resources held by a conversation
//!
//! Every acquisition hands out a [`ResourceGuard`]; dropping the guard releases
//! the slot. The tracker also records the peak number of simultaneously hot
//! activities (capture, completion request, playback).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of resource being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// An open microphone track
    MicrophoneTrack,
    /// An active audio output context
    AudioContext,
    /// An in-flight completion request
    CompletionRequest,
}

#[derive(Debug, Default)]
struct Counters {
    mic_tracks: AtomicUsize,
    audio_contexts: AtomicUsize,
    completions: AtomicUsize,
    peak_hot: AtomicUsize,
}

impl Counters {
    const fn slot(&self, kind: ResourceKind) -> &AtomicUsize {
        match kind {
            ResourceKind::MicrophoneTrack => &self.mic_tracks,
            ResourceKind::AudioContext => &self.audio_contexts,
            ResourceKind::CompletionRequest => &self.completions,
        }
    }

    fn hot(&self) -> usize {
        [&self.mic_tracks, &self.audio_contexts, &self.completions]
            .iter()
            .filter(|c| c.load(Ordering::SeqCst) > 0)
            .count()
    }
}

/// Shared resource ledger for one engine
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    counters: Arc<Counters>,
}

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub mic_tracks: usize,
    pub audio_contexts: usize,
    pub completions: usize,
}

impl ResourceSnapshot {
    /// True when nothing is held
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.mic_tracks == 0 && self.audio_contexts == 0 && self.completions == 0
    }
}

impl ResourceTracker {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a slot of the given kind
    pub fn acquire(&self, kind: ResourceKind) -> ResourceGuard {
        self.counters.slot(kind).fetch_add(1, Ordering::SeqCst);
        let hot = self.counters.hot();
        self.counters.peak_hot.fetch_max(hot, Ordering::SeqCst);
        tracing::trace!(?kind, hot, "resource acquired");

        ResourceGuard {
            counters: Arc::clone(&self.counters),
            kind,
        }
    }

    /// Number of currently held slots of a kind
    #[must_use]
    pub fn open(&self, kind: ResourceKind) -> usize {
        self.counters.slot(kind).load(Ordering::SeqCst)
    }

    /// Snapshot all counters
    #[must_use]
    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            mic_tracks: self.open(ResourceKind::MicrophoneTrack),
            audio_contexts: self.open(ResourceKind::AudioContext),
            completions: self.open(ResourceKind::CompletionRequest),
        }
    }

    /// Highest number of distinct kinds that were held at the same time
    #[must_use]
    pub fn peak_concurrent(&self) -> usize {
        self.counters.peak_hot.load(Ordering::SeqCst)
    }
}

/// Releases its slot when dropped
#[derive(Debug)]
#[must_use = "dropping the guard releases the resource immediately"]
pub struct ResourceGuard {
    counters: Arc<Counters>,
    kind: ResourceKind,
}

impl ResourceGuard {
    /// Which resource this guard holds
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.counters.slot(self.kind).fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(kind = ?self.kind, "resource released");
    }
}
