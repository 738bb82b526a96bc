//! Batched commit of local changes to the remote vault.
//!
//! - Queued changes live in a [`PendingChangeLedger`] until committed
//! - [`SyncEngine`] validates, partitions and dispatches them, retrying on
//!   stale-state conflicts
//! - The remote is reached through the [`RemoteVaultClient`] trait
//! - Sealing happens under the session key right before each call

pub mod change_tracker;
pub mod client;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod memory;
pub mod models;

pub use change_tracker::{PendingChangeLedger, ValidationReport, VisibleRecord};
pub use client::{RemoteError, RemoteVaultClient};
pub use config::{SyncConfig, MAX_BATCH_UPDATES};
pub use conflict::{is_conflict, RetryOutcome, RetryPolicy};
pub use engine::SyncEngine;
pub use memory::{FaultTarget, MemoryVaultClient, RemoteCall};
pub use models::{
    ChangeId, ChangeKind, ChunkRef, CommitOutcome, CommitStatus, EntryKind, PendingChange,
    PendingStats, RecordId, RecordKey, RecordPayload, SealedRecord, SyncProgress, SyncReport,
    VaultRecord,
};

use crate::crypto::CryptoError;
use crate::lock::LockError;
use crate::session::SessionError;
use thiserror::Error;

/// Errors that end a sync operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Queued changes are incomplete; nothing was sent
    #[error("Pending changes are invalid: {}", .0.join("; "))]
    StructuralInvalid(Vec<String>),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Lock layer refused to re-authenticate (locked or backed off)
    #[error(transparent)]
    Lock(LockError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("Remote state still conflicting after {attempts} attempts: {last}")]
    ConflictExhausted { attempts: u32, last: RemoteError },

    #[error("Sealed record is {size} bytes, limit {limit}")]
    RecordTooLarge { size: usize, limit: usize },
}

impl From<LockError> for SyncError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Session(err) => SyncError::Session(err),
            other => SyncError::Lock(other),
        }
    }
}
