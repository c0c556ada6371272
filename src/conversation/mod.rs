//! Conversation turns and the append-only history the policy reads

pub mod history;
pub mod turn;

pub use history::{transcript_json, ConversationHistory};
pub use turn::{Speaker, Turn};
