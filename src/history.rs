//! Bounded conversation history
//!
//! Stores (user, assistant) turn pairs in a capacity-evicting buffer. Storing
//! pairs rather than parallel queues keeps the user/assistant counts equal by
//! construction.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One completed turn: a user message and the assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

/// Ordered, capacity-bounded store of conversation turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Append a completed turn, evicting the oldest beyond capacity.
    pub fn push(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(ConversationTurn {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// The most recent assistant reply, if any.
    pub fn last_assistant(&self) -> Option<&str> {
        self.turns.back().map(|t| t.assistant.as_str())
    }

    /// Render each turn as transcript text: `User: …\nCharacter:…\n`.
    ///
    /// The assistant line intentionally has no space after the colon; the
    /// model's replies typically start with their own leading space.
    pub fn rendered_turns(&self, user_name: &str, character_name: &str) -> Vec<String> {
        self.turns
            .iter()
            .map(|t| {
                format!(
                    "{}: {}\n{}:{}\n",
                    user_name, t.user, character_name, t.assistant
                )
            })
            .collect()
    }

    /// Render the full transcript as one string.
    pub fn rendered(&self, user_name: &str, character_name: &str) -> String {
        self.rendered_turns(user_name, character_name).concat()
    }
}
