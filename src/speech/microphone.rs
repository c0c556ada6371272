//! Microphone access contract
//!
//! Platforms gate audio capture behind a permission prompt. The session only
//! needs a yes/no before it asks the recognizer to start.

use crate::{ParleyError, Result};

pub trait MicrophoneAccess: Send + Sync {
    /// Return `MicrophoneUnavailable` if capture is not permitted right now
    fn request_access(&self) -> Result<()>;
}

/// Access that is always granted (desktop, tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedMicrophone;

impl MicrophoneAccess for GrantedMicrophone {
    fn request_access(&self) -> Result<()> {
        Ok(())
    }
}

/// Access that is always refused with the given reason
#[derive(Debug, Clone)]
pub struct DeniedMicrophone(pub String);

impl MicrophoneAccess for DeniedMicrophone {
    fn request_access(&self) -> Result<()> {
        Err(ParleyError::MicrophoneUnavailable(self.0.clone()))
    }
}
