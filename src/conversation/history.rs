use super::turn::{Speaker, Turn};
use crate::{ParleyError, Result};
use serde::Serialize;

/// Ordered record of a conversation
///
/// Turns are only added at the end, and the only removal besides `clear()`
/// is dropping a trailing user turn whose answer failed. Insertion order is
/// the dialogue context handed to the policy. The sequence counter keeps
/// increasing across removals so a turn's logical timestamp is never reused
/// within one session instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    #[serde(skip)]
    next_sequence: u64,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn and return it
    pub fn push_user(&mut self, content: impl Into<String>) -> &Turn {
        self.push(Speaker::User, content)
    }

    /// Append a system turn and return it
    pub fn push_system(&mut self, content: impl Into<String>) -> &Turn {
        self.push(Speaker::System, content)
    }

    fn push(&mut self, speaker: Speaker, content: impl Into<String>) -> &Turn {
        let turn = Turn::new(speaker, content, self.next_sequence);
        self.next_sequence += 1;
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Iterate over user turns only
    pub fn user_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.is_user())
    }

    /// All user content joined with spaces and lowercased
    pub fn user_text(&self) -> String {
        self.user_turns()
            .map(Turn::content)
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Remove the last turn if it is a user turn nobody answered
    ///
    /// Its sequence number is not reused.
    pub fn discard_unanswered(&mut self) -> Option<Turn> {
        match self.turns.last() {
            Some(turn) if turn.is_user() => self.turns.pop(),
            _ => None,
        }
    }

    /// Drop every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

}

/// Serialize a transcript snapshot as pretty JSON
pub fn transcript_json(turns: &[Turn]) -> Result<String> {
    serde_json::to_string_pretty(turns)
        .map_err(|e| ParleyError::IOError(format!("Failed to serialize transcript: {}", e)))
}
