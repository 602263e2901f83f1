//! Callbacks into the embedding UI

use super::state::EngineState;
use crate::Error;
use crate::conversation::ConversationTurn;

/// What the engine tells its host about
///
/// Every method has a no-op default so hosts implement only what they render.
pub trait HostInterface: Send + Sync {
    /// Enable or disable the microphone button
    fn set_mic_enabled(&self, _enabled: bool) {}

    /// The engine entered a new state
    fn state_changed(&self, _state: EngineState) {}

    /// Surface a failed turn to the user
    fn show_error(&self, _error: &Error) {}

    /// Add a chat bubble for a newly appended turn
    fn append_bubble(&self, _turn: &ConversationTurn) {}

    /// Navigate to a URL the assistant asked for
    fn redirect(&self, _url: &str) {}
}

/// A host that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostInterface for NoopHost {}
