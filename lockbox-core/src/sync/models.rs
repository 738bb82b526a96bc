//! Sync data models: record identities, queued changes and commit outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use zeroize::Zeroize;

/// Largest sealed record the remote accepts (one storage chunk).
pub const MAX_SEALED_RECORD_SIZE: usize = 10_240;

/// Bytes added by sealing: nonce(12) + auth_tag(16).
pub const SEAL_OVERHEAD: usize = 28;

/// Index of the storage chunk that holds a record on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkRef(pub u16);

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// Remote-assigned record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record#{}", self.0)
    }
}

/// Where a record lives: chunk plus id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub chunk: ChunkRef,
    pub record_id: RecordId,
}

impl RecordKey {
    pub fn new(chunk: ChunkRef, record_id: RecordId) -> Self {
        Self { chunk, record_id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chunk, self.record_id)
    }
}

/// Kind of vault entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Login,
    CreditCard,
    SecureNote,
    Identity,
    ApiKey,
    SshKey,
    CryptoWallet,
}

/// Decrypted record contents. Wiped on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayload {
    pub kind: EntryKind,
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub favorite: bool,
}

impl RecordPayload {
    pub fn new(kind: EntryKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            fields: BTreeMap::new(),
            notes: None,
            favorite: false,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.favorite = favorite;
        self
    }
}

impl Drop for RecordPayload {
    fn drop(&mut self) {
        self.title.zeroize();
        for value in self.fields.values_mut() {
            value.zeroize();
        }
        self.notes.zeroize();
    }
}

impl fmt::Debug for RecordPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPayload")
            .field("kind", &self.kind)
            .field("fields", &self.fields.len())
            .field("favorite", &self.favorite)
            .finish_non_exhaustive()
    }
}

/// Encrypted record as stored remotely.
///
/// `ciphertext` is `nonce(12) || ciphertext || auth_tag(16)` under the
/// session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedRecord {
    pub kind: EntryKind,
    pub ciphertext: Vec<u8>,
}

impl SealedRecord {
    pub fn size(&self) -> usize {
        self.ciphertext.len()
    }
}

/// A sealed record together with its remote location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub key: RecordKey,
    pub sealed: SealedRecord,
}

/// A decrypted record with its remote location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultRecord {
    pub key: RecordKey,
    pub payload: RecordPayload,
}

/// A record the remote listed but that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub key: Option<RecordKey>,
    pub reason: String,
}

/// Result of listing the remote vault.
#[derive(Debug, Clone, Default)]
pub struct RecordListing {
    pub records: Vec<RemoteRecord>,
    pub per_record_errors: Vec<RecordError>,
}

/// One element of a batched update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchUpdateItem {
    pub key: RecordKey,
    pub sealed: SealedRecord,
}

/// Stable identifier of a queued change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeId(pub Uuid);

impl ChangeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Change type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// A not-yet-committed mutation.
///
/// Changes are replaced, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChange {
    Create {
        change_id: ChangeId,
        record: RecordPayload,
        queued_at: DateTime<Utc>,
    },
    Update {
        change_id: ChangeId,
        key: RecordKey,
        record: RecordPayload,
        /// Snapshot of the record before the first queued edit.
        original: Option<RecordPayload>,
        queued_at: DateTime<Utc>,
    },
    Delete {
        change_id: ChangeId,
        key: RecordKey,
        original: Option<RecordPayload>,
        queued_at: DateTime<Utc>,
    },
}

impl PendingChange {
    pub fn change_id(&self) -> ChangeId {
        match self {
            Self::Create { change_id, .. }
            | Self::Update { change_id, .. }
            | Self::Delete { change_id, .. } => *change_id,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Create { .. } => ChangeKind::Create,
            Self::Update { .. } => ChangeKind::Update,
            Self::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Remote identity targeted by the change. Creates have none yet.
    pub fn key(&self) -> Option<RecordKey> {
        match self {
            Self::Create { .. } => None,
            Self::Update { key, .. } | Self::Delete { key, .. } => Some(*key),
        }
    }

    /// Rollback snapshot, if one was captured.
    pub fn original(&self) -> Option<&RecordPayload> {
        match self {
            Self::Create { .. } => None,
            Self::Update { original, .. } | Self::Delete { original, .. } => original.as_ref(),
        }
    }

    /// The intended record contents. `None` for deletes.
    pub fn record(&self) -> Option<&RecordPayload> {
        match self {
            Self::Create { record, .. } | Self::Update { record, .. } => Some(record),
            Self::Delete { .. } => None,
        }
    }
}

/// Per-change commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Success,
    Failed,
    Conflicted,
}

/// Result of committing one queued change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub change_id: ChangeId,
    pub status: CommitStatus,
    pub detail: Option<String>,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    pub success_count: usize,
    pub failure_count: usize,
    pub conflict_count: usize,
    pub outcomes: Vec<CommitOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub(crate) fn empty() -> Self {
        Self {
            success: true,
            success_count: 0,
            failure_count: 0,
            conflict_count: 0,
            outcomes: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    /// Whether some but not all changes were committed
    pub fn is_partial(&self) -> bool {
        self.success_count > 0 && self.failure_count + self.conflict_count > 0
    }
}

/// Queue counts by change type, for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingStats {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub total: usize,
}

/// Progress events emitted during a sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    Started {
        total: usize,
    },
    UnitCommitted {
        kind: ChangeKind,
        change_ids: Vec<ChangeId>,
        status: CommitStatus,
    },
    UnitRetrying {
        kind: ChangeKind,
        attempt: u32,
    },
    Finished(SyncReport),
}
