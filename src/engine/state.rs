//! Turn state machine
//!
//! `transition` is the whole table; the engine never changes state any other
//! way.

/// Top-level conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Listening,
    Transcribing,
    Thinking,
    Speaking,
    Closing,
}

impl EngineState {
    /// Whether the host should offer the microphone
    #[must_use]
    pub const fn mic_enabled(self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Transcribing => "transcribing",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Closing => "closing",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened during a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// The microphone opened for a turn the user started
    UserStartsTurn,
    /// Silence, the length cap, or a manual stop ended capture
    CaptureStopped,
    /// Transcription produced text
    NonEmptyTranscript,
    /// Transcription produced nothing usable
    EmptyTranscript {
        /// The empty-attempt limit has been reached
        exhausted: bool,
    },
    /// Reply text was completed and synthesized
    ReplyReady,
    /// Playback drained
    PlaybackEnded,
    /// A capture, capability or playback error ended the turn
    Failed,
    /// Manual stop while the microphone was still opening
    Abandoned,
    /// The user closed the interface
    Close,
    /// Cleanup after `Close` finished
    Closed,
}

/// Next state for `event` in `state`, or `None` if the event is not valid there
#[must_use]
pub const fn transition(state: EngineState, event: TurnEvent) -> Option<EngineState> {
    use EngineState::{Closing, Idle, Listening, Speaking, Thinking, Transcribing};

    let next = match (state, event) {
        (Idle | Listening, TurnEvent::UserStartsTurn) => Listening,
        (Listening, TurnEvent::CaptureStopped) => Transcribing,
        (Transcribing, TurnEvent::NonEmptyTranscript) => Thinking,
        (Transcribing, TurnEvent::EmptyTranscript { exhausted: false }) => Listening,
        (Transcribing, TurnEvent::EmptyTranscript { exhausted: true }) => Idle,
        (Thinking, TurnEvent::ReplyReady) => Speaking,
        (Speaking, TurnEvent::PlaybackEnded) => Listening,
        (Idle | Listening | Transcribing | Thinking | Speaking, TurnEvent::Failed) => Idle,
        (Idle | Listening, TurnEvent::Abandoned) => Idle,
        (Closing, TurnEvent::Closed) => Idle,
        (_, TurnEvent::Close) => Closing,
        _ => return None,
    };
    Some(next)
}
