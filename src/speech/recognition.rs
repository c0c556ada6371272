//! Speech recognition adapter contract
//!
//! A recognizer is started with a [`RecognitionSink`] bound to the session
//! epoch current at start time. Everything the recognizer reports flows back
//! through that sink, so results from a cancelled capture carry a stale epoch
//! and are discarded by the session.

use crate::session::{Epoch, SessionEvent};
use crate::Result;
use crossbeam_channel::Sender;
use tracing::debug;

/// A transcript produced by the recognizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_final: bool,
}

/// Why a recognizer gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Speech was heard but nothing could be transcribed
    NoMatch,
    /// No speech before the capture timed out
    SpeechTimeout,
    /// Capture device failed mid-listen
    Audio,
    /// Remote recognizer unreachable
    Network,
    /// Input stream ended
    InputClosed,
    Other(String),
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionErrorKind::NoMatch => write!(f, "no match"),
            RecognitionErrorKind::SpeechTimeout => write!(f, "speech timeout"),
            RecognitionErrorKind::Audio => write!(f, "audio capture error"),
            RecognitionErrorKind::Network => write!(f, "network error"),
            RecognitionErrorKind::InputClosed => write!(f, "input closed"),
            RecognitionErrorKind::Other(detail) => write!(f, "{}", detail),
        }
    }
}

/// Lifecycle events a recognizer reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Start,
    Transcript(RecognitionResult),
    End,
    Error(RecognitionErrorKind),
}

impl RecognitionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RecognitionEvent::Start => "recognition_start",
            RecognitionEvent::Transcript(result) if result.is_final => "final_result",
            RecognitionEvent::Transcript(_) => "partial_result",
            RecognitionEvent::End => "recognition_end",
            RecognitionEvent::Error(_) => "recognition_error",
        }
    }
}

/// Callback surface handed to a recognizer for one capture
#[derive(Debug, Clone)]
pub struct RecognitionSink {
    epoch: Epoch,
    tx: Sender<SessionEvent>,
}

impl RecognitionSink {
    pub(crate) fn new(epoch: Epoch, tx: Sender<SessionEvent>) -> Self {
        Self { epoch, tx }
    }

    /// Epoch this capture belongs to
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn on_start(&self) {
        self.emit(RecognitionEvent::Start);
    }

    pub fn on_partial_result(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Transcript(RecognitionResult {
            text: text.into(),
            is_final: false,
        }));
    }

    pub fn on_final_result(&self, text: impl Into<String>) {
        self.emit(RecognitionEvent::Transcript(RecognitionResult {
            text: text.into(),
            is_final: true,
        }));
    }

    pub fn on_end(&self) {
        self.emit(RecognitionEvent::End);
    }

    pub fn on_error(&self, kind: RecognitionErrorKind) {
        self.emit(RecognitionEvent::Error(kind));
    }

    fn emit(&self, event: RecognitionEvent) {
        let epoch = self.epoch;
        if self.tx.send(SessionEvent::Recognition { epoch, event }).is_err() {
            debug!("Session gone, dropping recognition event for epoch {}", epoch);
        }
    }
}

/// Microphone capture plus speech-to-text
pub trait RecognitionAdapter: Send {
    /// Open the microphone and start listening
    ///
    /// Errors here mean capture never started; the session reports them as
    /// `MicrophoneUnavailable`.
    fn start(&mut self, locale: &str, sink: RecognitionSink) -> Result<()>;

    /// Stop capturing, letting a pending final result through
    fn stop(&mut self);

    /// Abort capture and drop any pending result
    fn cancel(&mut self);
}
