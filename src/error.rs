//! Error types for the Parley session core

use thiserror::Error;

/// Parley errors
///
/// The first five variants are session-level failures. Each one moves the
/// conversation session into `Error`, from which it recovers on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParleyError {
    /// Microphone permission denied or capture device busy
    #[error("Microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// Recognition adapter reported an error mid-listen
    #[error("Recognition failed: {0}")]
    RecognitionFailed(String),

    /// Synthesis adapter failed to play an utterance
    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    /// Dialogue policy did not answer within its bound
    #[error("Policy timed out after {0} ms")]
    PolicyTimeout(u64),

    /// Dialogue policy panicked or could not be evaluated
    #[error("Policy failed: {0}")]
    PolicyFailed(String),

    /// Channel communication error
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// File system I/O error
    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for ParleyError {
    fn from(e: std::io::Error) -> Self {
        ParleyError::IOError(e.to_string())
    }
}

impl ParleyError {
    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the session usable through a fresh
    /// `start_session()` or `reset()`.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Permission may be granted or the device freed later
            ParleyError::MicrophoneUnavailable(_) => true,
            ParleyError::RecognitionFailed(_) => true,
            ParleyError::SynthesisFailed(_) => true,
            ParleyError::PolicyTimeout(_) => true,
            ParleyError::PolicyFailed(_) => true,
            // Channel errors mean the session worker is gone
            ParleyError::ChannelError(_) => false,
            ParleyError::ConfigError(_) => false,
            ParleyError::IOError(_) => false,
        }
    }

    /// Short machine-readable name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ParleyError::MicrophoneUnavailable(_) => "microphone_unavailable",
            ParleyError::RecognitionFailed(_) => "recognition_failed",
            ParleyError::SynthesisFailed(_) => "synthesis_failed",
            ParleyError::PolicyTimeout(_) => "policy_timeout",
            ParleyError::PolicyFailed(_) => "policy_failed",
            ParleyError::ChannelError(_) => "channel",
            ParleyError::ConfigError(_) => "config",
            ParleyError::IOError(_) => "io",
        }
    }

    /// Get a user-friendly description of the error
    pub fn user_message(&self) -> String {
        match self {
            ParleyError::MicrophoneUnavailable(_) => {
                "Microphone is not available. Please check permissions.".to_string()
            }
            ParleyError::RecognitionFailed(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            ParleyError::SynthesisFailed(_) => {
                "Could not speak the response. It is shown in the transcript.".to_string()
            }
            ParleyError::PolicyTimeout(_) => {
                "Took too long to come up with an answer. Please try again.".to_string()
            }
            ParleyError::PolicyFailed(_) => {
                "Could not come up with an answer. Please try again.".to_string()
            }
            ParleyError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            ParleyError::ConfigError(_) => "Configuration error. Please check settings.".to_string(),
            ParleyError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, ParleyError>;
