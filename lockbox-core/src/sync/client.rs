//! Remote vault client interface.
//!
//! The remote is an opaque ledger-backed store of sealed records. Its wire
//! protocol lives outside this crate; collaborators implement
//! [`RemoteVaultClient`] over whatever transport they use.

use crate::sync::conflict;
use crate::sync::models::{BatchUpdateItem, ChunkRef, RecordKey, RecordListing, SealedRecord};
use async_trait::async_trait;
use thiserror::Error;

/// Errors reported by the remote vault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Remote expected-state check failed
    #[error("Remote state conflict: {0}")]
    Conflict(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Quota exceeded: {0}")]
    Quota(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record not found: {0}")]
    NotFound(RecordKey),

    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Whether this error means the client's view of remote state was stale
    pub fn is_conflict(&self) -> bool {
        conflict::is_conflict(self)
    }
}

/// Ledger-backed storage of sealed records
#[async_trait]
pub trait RemoteVaultClient: Send + Sync {
    /// List every record, with per-record read failures reported separately
    async fn list_records(&self) -> Result<RecordListing, RemoteError>;

    /// Store a new record, optionally preferring a chunk. Returns its key.
    async fn store_record(
        &self,
        chunk_hint: Option<ChunkRef>,
        sealed: &SealedRecord,
    ) -> Result<RecordKey, RemoteError>;

    async fn update_record(&self, key: RecordKey, sealed: &SealedRecord) -> Result<(), RemoteError>;

    /// Apply all updates in one atomic transaction
    async fn batch_update_records(&self, items: &[BatchUpdateItem]) -> Result<(), RemoteError>;

    async fn delete_record(&self, key: RecordKey) -> Result<(), RemoteError>;

    /// Whether a vault has been created for this identity
    async fn exists(&self) -> Result<bool, RemoteError>;
}
