//! Core configuration: session timeouts, auto-lock and sync tuning.
//!
//! Loaded from TOML. Every section and field has a default, so a partial
//! file only overrides what it names.

use crate::sync::config::MAX_BATCH_UPDATES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use crate::sync::config::SyncConfig;

/// Errors loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Session timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub absolute_timeout_secs: u64,
    pub inactivity_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            absolute_timeout_secs: 15 * 60,
            inactivity_timeout_secs: 5 * 60,
            poll_interval_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn absolute_timeout(&self) -> Duration {
        Duration::from_secs(self.absolute_timeout_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Auto-lock and unlock throttling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub auto_lock_enabled: bool,
    pub auto_lock_timeout_minutes: u32,
    pub idle_poll_interval_secs: u64,
    /// Consecutive declined unlocks before back-off kicks in
    pub max_unlock_attempts: u32,
    pub base_backoff_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            auto_lock_enabled: true,
            auto_lock_timeout_minutes: 5,
            idle_poll_interval_secs: 30,
            max_unlock_attempts: 5,
            base_backoff_secs: 60,
        }
    }
}

impl LockConfig {
    pub fn auto_lock_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.auto_lock_timeout_minutes) * 60)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_interval_secs)
    }
}

/// Top-level configuration for the vault core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub session: SessionConfig,
    pub lock: LockConfig,
    pub sync: SyncConfig,
}

impl CoreConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject unusable values and clamp the batch size to the protocol ceiling.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.session.absolute_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.absolute_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.inactivity_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.inactivity_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.session.poll_interval_secs == 0 || self.lock.idle_poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll intervals must be greater than zero".to_string(),
            ));
        }
        if self.lock.auto_lock_enabled && self.lock.auto_lock_timeout_minutes == 0 {
            return Err(ConfigError::Invalid(
                "lock.auto_lock_timeout_minutes must be greater than zero".to_string(),
            ));
        }

        if self.sync.max_batch_updates > MAX_BATCH_UPDATES {
            tracing::warn!(
                requested = self.sync.max_batch_updates,
                "Clamping sync batch size to protocol ceiling of {}",
                MAX_BATCH_UPDATES
            );
            self.sync.max_batch_updates = MAX_BATCH_UPDATES;
        }
        if self.sync.max_batch_updates == 0 {
            return Err(ConfigError::Invalid(
                "sync.max_batch_updates must be greater than zero".to_string(),
            ));
        }

        Ok(self)
    }
}
