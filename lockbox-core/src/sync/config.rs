//! Sync tuning knobs.

use serde::{Deserialize, Serialize};

/// Protocol ceiling on updates per batched remote transaction.
pub const MAX_BATCH_UPDATES: usize = 10;

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Updates per batch. Values above [`MAX_BATCH_UPDATES`] are clamped.
    pub max_batch_updates: usize,
    /// Attempts per unit when the remote reports a conflict
    pub conflict_retry_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_updates: MAX_BATCH_UPDATES,
            conflict_retry_attempts: 3,
        }
    }
}

impl SyncConfig {
    /// Effective batch size, always within `1..=MAX_BATCH_UPDATES`.
    pub fn batch_size(&self) -> usize {
        self.max_batch_updates.clamp(1, MAX_BATCH_UPDATES)
    }

    /// Effective attempt count, at least one.
    pub fn attempts(&self) -> u32 {
        self.conflict_retry_attempts.max(1)
    }
}
