//! Dialogue policy: decides the next system turn from the history
//!
//! The session only depends on the [`DialoguePolicy`] trait, so the default
//! rule table can be replaced by a classifier or a remote model without
//! touching the state machine.

pub mod rules;

pub use rules::{Rule, RuleEngine, RuleSet};

use crate::conversation::ConversationHistory;

/// What the policy wants said next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyResponse {
    /// Text to append as a system turn and speak
    pub content: String,
    /// Close the conversation once this response has been spoken
    pub end_session: bool,
}

impl PolicyResponse {
    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            end_session: false,
        }
    }

    pub fn farewell(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            end_session: true,
        }
    }
}

/// Maps accumulated history to the next response
///
/// Implementations must be deterministic and side-effect free. The session
/// evaluates them off its own thread under a timeout, so a slow policy
/// cannot stall event handling.
pub trait DialoguePolicy: Send + Sync {
    fn respond(&self, history: &ConversationHistory) -> PolicyResponse;
}

impl<F> DialoguePolicy for F
where
    F: Fn(&ConversationHistory) -> PolicyResponse + Send + Sync,
{
    fn respond(&self, history: &ConversationHistory) -> PolicyResponse {
        self(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_policy() {
        let echo = |history: &ConversationHistory| {
            PolicyResponse::reply(history.user_text())
        };

        let mut history = ConversationHistory::new();
        history.push_user("Ping");
        assert_eq!(echo.respond(&history), PolicyResponse::reply("ping"));
    }

    #[test]
    fn test_constructors() {
        assert!(!PolicyResponse::reply("ok").end_session);
        assert!(PolicyResponse::farewell("bye").end_session);
    }
}
