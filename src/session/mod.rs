//! Conversation session: the state machine tying recognition, policy and
//! synthesis into one non-overlapping loop.
//!
//! # Usage
//!
//! ```rust,ignore
//! use parley::session::ConversationSession;
//! use parley::speech::{ConsoleRecognizer, ConsoleSynthesizer};
//!
//! let (session, handle) = ConversationSession::builder()
//!     .with_recognizer(ConsoleRecognizer::new())
//!     .with_synthesizer(ConsoleSynthesizer::default())
//!     .build()?;
//! let worker = session.start()?;
//!
//! handle.start_session()?;
//! while let Some(notification) = handle.recv_notification_timeout(timeout) {
//!     // render
//! }
//! ```

pub mod events;
pub mod handle;
pub mod machine;
pub mod state;

pub use events::{SessionEvent, SessionNotification};
pub use handle::SessionHandle;
pub use machine::{ConversationSession, SessionBuilder};
pub use state::{Epoch, SessionSnapshot, SessionState, SharedSessionState};
