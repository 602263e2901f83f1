//! Live caption rendering
//!
//! Views are display sinks only. Nothing written here feeds back into the
//! conversation; the clip-level transcription stays authoritative.

use crate::conversation::ConversationTurn;

/// Receives caption updates while the user is speaking
pub trait TranscriptView: Send + Sync {
    /// Replace the displayed caption with committed and tentative text
    fn update(&self, final_text: &str, interim: &str);

    /// Show the latest exchange (at most the last two turns)
    fn show_recent(&self, _turns: &[ConversationTurn]) {}

    /// Clear the caption area
    fn clear(&self) {
        self.update("", "");
    }
}

/// A view that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTranscriptView;

impl TranscriptView for NoopTranscriptView {
    fn update(&self, _final_text: &str, _interim: &str) {}
}

/// Caption text accumulated during one capture
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveTranscript {
    final_text: String,
    interim: String,
}

impl LiveTranscript {
    /// Append a committed segment and drop the tentative text
    pub fn push_final(&mut self, segment: &str) {
        let segment = segment.trim();
        if !segment.is_empty() {
            if !self.final_text.is_empty() {
                self.final_text.push(' ');
            }
            self.final_text.push_str(segment);
        }
        self.interim.clear();
    }

    /// Replace the tentative text
    pub fn set_interim(&mut self, interim: &str) {
        self.interim = interim.trim().to_string();
    }

    #[must_use]
    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    #[must_use]
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Push the current text to a view
    pub fn render(&self, view: &dyn TranscriptView) {
        view.update(&self.final_text, &self.interim);
    }
}
