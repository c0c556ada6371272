//! Session state, epochs and the read-only snapshot shared with presentation

use crate::conversation::Turn;
use crate::ParleyError;
use parking_lot::RwLock;
use std::sync::Arc;

/// Where the conversation loop currently is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No mic activity, no playback
    #[default]
    Idle,
    /// Microphone open, waiting for a final result
    Listening,
    /// Final transcript received, policy evaluating
    Processing,
    /// Synthesizer playing the response
    Speaking,
    /// An adapter or the policy failed; recovers to Idle on its own
    Error,
}

impl SessionState {
    /// Check if idle
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    /// Check if recovering from a failure
    pub fn is_error(&self) -> bool {
        matches!(self, SessionState::Error)
    }

    /// Listening, processing or speaking
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Listening | SessionState::Processing | SessionState::Speaking
        )
    }

    /// Whether `start_session()` is accepted in this state
    pub fn can_start(&self) -> bool {
        !self.is_busy()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Listening => write!(f, "Listening"),
            SessionState::Processing => write!(f, "Processing"),
            SessionState::Speaking => write!(f, "Speaking"),
            SessionState::Error => write!(f, "Error"),
        }
    }
}

/// Monotonic token identifying the current listening cycle
///
/// Bumped by every `start_session()` and `reset()`. Outbound operations are
/// tagged with the epoch current when they were issued; completions from an
/// older epoch are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch that supersedes this one
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }

    /// Raw counter value
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Epoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable copy of what presentation may render
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub epoch: Epoch,
    pub transcript: Vec<Turn>,
    pub last_error: Option<ParleyError>,
    /// The policy ended the conversation; the next start begins afresh
    pub conversation_closed: bool,
}

/// Thread-safe, read-mostly view of the session
///
/// Only the session writes; handles and presentation read.
#[derive(Clone, Default)]
pub struct SharedSessionState {
    inner: Arc<RwLock<SessionSnapshot>>,
}

impl SharedSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut SessionSnapshot)) {
        f(&mut *self.inner.write());
    }

    /// Get a snapshot of current state (no lock held after return)
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.read().state
    }

    pub fn epoch(&self) -> Epoch {
        self.inner.read().epoch
    }

    pub fn transcript(&self) -> Vec<Turn> {
        self.inner.read().transcript.clone()
    }

    pub fn last_error(&self) -> Option<ParleyError> {
        self.inner.read().last_error.clone()
    }

    pub fn is_conversation_closed(&self) -> bool {
        self.inner.read().conversation_closed
    }
}
