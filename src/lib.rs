//! Parley - a voice-driven conversational front-end
//!
//! Spoken input is recognized, answered by a swappable dialogue policy and
//! spoken back, one turn at a time. The [`session`] module holds the state
//! machine that keeps listening, thinking and speaking from overlapping;
//! [`speech`] defines the adapter contracts it drives.

pub mod config;
pub mod conversation;
pub mod error;
pub mod policy;
pub mod session;
pub mod speech;

// Re-export error types
pub use error::{ParleyError, Result};

pub use config::{ParleyConfig, SessionConfig};
pub use conversation::{ConversationHistory, Speaker, Turn};
pub use policy::{DialoguePolicy, PolicyResponse, RuleEngine};
pub use session::{
    ConversationSession, Epoch, SessionBuilder, SessionHandle, SessionNotification, SessionState,
};
