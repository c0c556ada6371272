//! Configuration for the session core and the `parley` binary
//!
//! Values come from defaults, optionally overridden by a TOML file, then by
//! command-line flags.

use crate::{ParleyError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing and sizing knobs for one conversation session
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Locale passed to the recognizer
    pub locale: String,
    /// How long to stay in Speaking after a closing response finished
    pub end_session_grace_ms: u64,
    /// How long Error lasts before recovering to Idle
    pub error_recovery_ms: u64,
    /// Upper bound on one policy evaluation
    pub policy_timeout_ms: u64,
    /// Capacity of the presentation notification channel
    pub notification_buffer_size: usize,
    /// How long shutdown waits for in-flight tasks
    pub shutdown_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            end_session_grace_ms: 1000,
            error_recovery_ms: 500,
            policy_timeout_ms: 5000,
            notification_buffer_size: 100,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recognition locale
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the end-of-conversation grace delay
    pub fn with_end_session_grace(mut self, delay: Duration) -> Self {
        self.end_session_grace_ms = delay.as_millis() as u64;
        self
    }

    /// Set the error recovery delay
    pub fn with_error_recovery(mut self, delay: Duration) -> Self {
        self.error_recovery_ms = delay.as_millis() as u64;
        self
    }

    /// Set the policy timeout
    pub fn with_policy_timeout(mut self, timeout: Duration) -> Self {
        self.policy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the notification channel capacity
    pub fn with_notification_buffer_size(mut self, size: usize) -> Self {
        self.notification_buffer_size = size;
        self
    }

    pub fn end_session_grace(&self) -> Duration {
        Duration::from_millis(self.end_session_grace_ms)
    }

    pub fn error_recovery(&self) -> Duration {
        Duration::from_millis(self.error_recovery_ms)
    }

    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.locale.trim().is_empty() {
            return Err(ParleyError::ConfigError("locale must not be empty".into()));
        }
        if self.policy_timeout_ms == 0 {
            return Err(ParleyError::ConfigError(
                "policy_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.notification_buffer_size == 0 {
            return Err(ParleyError::ConfigError(
                "notification_buffer_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file
///
/// ```toml
/// rules = "drone-rules.toml"
///
/// [session]
/// locale = "en-GB"
/// end_session_grace_ms = 1500
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub session: SessionConfig,
    /// Rule table for the default policy; built-in table when absent
    pub rules: Option<PathBuf>,
}

impl ParleyConfig {
    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ParleyConfig = toml::from_str(content)
            .map_err(|e| ParleyError::ConfigError(format!("Invalid config: {}", e)))?;
        config.session.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// A relative `rules` path is resolved against the config file's
    /// directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParleyError::IOError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml(&content)?;
        if let (Some(rules), Some(dir)) = (config.rules.as_ref(), path.parent()) {
            if rules.is_relative() {
                config.rules = Some(dir.join(rules));
            }
        }
        Ok(config)
    }
}
