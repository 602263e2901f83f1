//! Bounded conversation history

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in the conversation
///
/// Fields are private so a turn cannot change after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Rolling window over the most recent exchanges
///
/// Holds at most `2 * max_exchanges` turns; the oldest turn is evicted when an
/// append would exceed that.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    /// Create an empty history keeping `max_exchanges` user/assistant pairs
    #[must_use]
    pub fn new(max_exchanges: usize) -> Self {
        let capacity = max_exchanges.saturating_mul(2);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a user turn
    pub fn append_user(&mut self, content: impl Into<String>) -> &ConversationTurn {
        self.push(ConversationTurn::new(Role::User, content))
    }

    /// Append an assistant turn
    pub fn append_assistant(&mut self, content: impl Into<String>) -> &ConversationTurn {
        self.push(ConversationTurn::new(Role::Assistant, content))
    }

    fn push(&mut self, turn: ConversationTurn) -> &ConversationTurn {
        self.turns.push_back(turn);
        while self.turns.len() > self.capacity.max(1) {
            self.turns.pop_front();
        }
        // push_back just ran, so the deque is non-empty
        &self.turns[self.turns.len() - 1]
    }

    /// All retained turns, oldest first
    pub fn turns(&self) -> impl ExactSizeIterator<Item = &ConversationTurn> + '_ {
        self.turns.iter()
    }

    /// The last `n` turns, oldest first
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
