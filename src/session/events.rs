//! Typed ingress events and outbound presentation notifications

use super::state::{Epoch, SessionState};
use crate::conversation::Turn;
use crate::policy::PolicyResponse;
use crate::speech::RecognitionEvent;
use crate::{ParleyError, Result};

/// Everything the session reacts to, from callers and adapters alike
///
/// Adapter completions carry the epoch of the operation that produced them.
#[derive(Debug)]
pub enum SessionEvent {
    /// Open the microphone for a new turn
    StartSession,
    /// Stop capturing audio but keep waiting for the final result
    StopListening,
    /// Cancel everything, clear history, go Idle
    Reset,
    /// Stop the session worker
    Shutdown,
    /// Recognizer lifecycle callback
    Recognition {
        epoch: Epoch,
        event: RecognitionEvent,
    },
    /// Policy evaluation finished (or timed out)
    PolicyCompleted {
        epoch: Epoch,
        outcome: Result<PolicyResponse>,
    },
    /// Synthesizer finished playing (or failed)
    SynthesisCompleted { epoch: Epoch, outcome: Result<()> },
    /// End-of-conversation grace delay elapsed
    GraceElapsed { epoch: Epoch },
    /// Error recovery delay elapsed
    ErrorRecovered { epoch: Epoch },
}

impl SessionEvent {
    /// Epoch of the operation this event completes, if any
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            SessionEvent::StartSession
            | SessionEvent::StopListening
            | SessionEvent::Reset
            | SessionEvent::Shutdown => None,
            SessionEvent::Recognition { epoch, .. }
            | SessionEvent::PolicyCompleted { epoch, .. }
            | SessionEvent::SynthesisCompleted { epoch, .. }
            | SessionEvent::GraceElapsed { epoch }
            | SessionEvent::ErrorRecovered { epoch } => Some(*epoch),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::StartSession => "start_session",
            SessionEvent::StopListening => "stop_listening",
            SessionEvent::Reset => "reset",
            SessionEvent::Shutdown => "shutdown",
            SessionEvent::Recognition { event, .. } => event.kind(),
            SessionEvent::PolicyCompleted { .. } => "policy_completed",
            SessionEvent::SynthesisCompleted { .. } => "synthesis_completed",
            SessionEvent::GraceElapsed { .. } => "grace_elapsed",
            SessionEvent::ErrorRecovered { .. } => "error_recovered",
        }
    }
}

/// One-way notifications for presentation
///
/// Presentation should render from `SharedSessionState`; these only say
/// that something changed. They are dropped when the receiver lags.
#[derive(Clone, Debug)]
pub enum SessionNotification {
    StateChanged { state: SessionState, epoch: Epoch },
    /// Full transcript after every history mutation
    TranscriptUpdated(Vec<Turn>),
    /// In-progress recognition text (never part of history)
    PartialTranscript(String),
    RecognitionStarted,
    RecognitionEnded,
    Error(ParleyError),
    /// The policy closed the conversation and the grace delay elapsed
    ConversationEnded,
    Shutdown,
}
