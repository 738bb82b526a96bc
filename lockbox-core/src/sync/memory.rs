//! In-process remote vault.
//!
//! Holds sealed records in memory with the same chunk layout rules as the
//! ledger-backed remote, and lets callers script failures per operation.
//! Used by the sync tests and by collaborators developing offline.

use crate::sync::client::{RemoteError, RemoteVaultClient};
use crate::sync::models::{
    BatchUpdateItem, ChunkRef, RecordError, RecordId, RecordKey, RecordListing, RemoteRecord,
    SealedRecord, MAX_SEALED_RECORD_SIZE,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maximum records held by one chunk
pub const MAX_RECORDS_PER_CHUNK: usize = 100;

/// Maximum sealed bytes held by one chunk
pub const MAX_CHUNK_BYTES: usize = 10_240;

/// Operation a scripted fault applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultTarget {
    List,
    Store,
    Update(RecordKey),
    Delete(RecordKey),
    /// Any batch call, regardless of contents
    Batch,
    Exists,
}

/// Remote call as observed by the fake, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    List,
    Store { chunk_hint: Option<ChunkRef> },
    Update(RecordKey),
    Batch(Vec<RecordKey>),
    Delete(RecordKey),
    Exists,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<RecordKey, SealedRecord>,
    next_id: u64,
    exists: bool,
    faults: HashMap<FaultTarget, VecDeque<RemoteError>>,
    unreadable: HashSet<RecordKey>,
    calls: Vec<RemoteCall>,
}

impl MemoryState {
    fn take_fault(&mut self, target: FaultTarget) -> Option<RemoteError> {
        let queue = self.faults.get_mut(&target)?;
        let fault = queue.pop_front();
        if queue.is_empty() {
            self.faults.remove(&target);
        }
        fault
    }

    fn chunk_usage(&self, chunk: ChunkRef) -> (usize, usize) {
        self.records
            .iter()
            .filter(|(key, _)| key.chunk == chunk)
            .fold((0, 0), |(count, bytes), (_, sealed)| {
                (count + 1, bytes + sealed.size())
            })
    }

    fn has_room(&self, chunk: ChunkRef, size: usize) -> bool {
        let (count, bytes) = self.chunk_usage(chunk);
        count < MAX_RECORDS_PER_CHUNK && bytes + size <= MAX_CHUNK_BYTES
    }

    fn place(&self, chunk_hint: Option<ChunkRef>, size: usize) -> ChunkRef {
        if let Some(chunk) = chunk_hint.filter(|chunk| self.has_room(*chunk, size)) {
            return chunk;
        }

        let chunks: Vec<ChunkRef> = {
            let mut chunks: Vec<ChunkRef> = self.records.keys().map(|key| key.chunk).collect();
            chunks.dedup();
            chunks
        };
        chunks
            .iter()
            .copied()
            .find(|chunk| self.has_room(*chunk, size))
            .unwrap_or_else(|| chunks.last().map_or(ChunkRef(0), |last| ChunkRef(last.0 + 1)))
    }
}

/// Remote vault kept entirely in memory
#[derive(Debug)]
pub struct MemoryVaultClient {
    state: Mutex<MemoryState>,
}

impl MemoryVaultClient {
    /// An existing, empty vault
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                exists: true,
                ..MemoryState::default()
            }),
        }
    }

    /// No vault created for this identity yet
    pub fn without_vault() -> Self {
        let client = Self::new();
        client.set_exists(false);
        client
    }

    pub fn set_exists(&self, exists: bool) {
        self.lock().exists = exists;
    }

    /// Fail the next call matching `target` with `error`.
    /// Repeated calls queue further failures for the same target.
    pub fn inject_fault(&self, target: FaultTarget, error: RemoteError) {
        self.lock()
            .faults
            .entry(target)
            .or_default()
            .push_back(error);
    }

    /// Report `key` as unreadable in listings
    pub fn mark_unreadable(&self, key: RecordKey) {
        self.lock().unreadable.insert(key);
    }

    pub fn get(&self, key: RecordKey) -> Option<SealedRecord> {
        self.lock().records.get(&key).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryVaultClient {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size(sealed: &SealedRecord) -> Result<(), RemoteError> {
    if sealed.size() > MAX_SEALED_RECORD_SIZE {
        return Err(RemoteError::Quota(format!(
            "record is {} bytes, limit {}",
            sealed.size(),
            MAX_SEALED_RECORD_SIZE
        )));
    }
    Ok(())
}

#[async_trait]
impl RemoteVaultClient for MemoryVaultClient {
    async fn list_records(&self) -> Result<RecordListing, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::List);
        if let Some(err) = state.take_fault(FaultTarget::List) {
            return Err(err);
        }

        let mut listing = RecordListing::default();
        for (key, sealed) in &state.records {
            if state.unreadable.contains(key) {
                listing.per_record_errors.push(RecordError {
                    key: Some(*key),
                    reason: "record could not be read".to_string(),
                });
            } else {
                listing.records.push(RemoteRecord {
                    key: *key,
                    sealed: sealed.clone(),
                });
            }
        }
        Ok(listing)
    }

    async fn store_record(
        &self,
        chunk_hint: Option<ChunkRef>,
        sealed: &SealedRecord,
    ) -> Result<RecordKey, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Store { chunk_hint });
        if let Some(err) = state.take_fault(FaultTarget::Store) {
            return Err(err);
        }
        check_size(sealed)?;

        let chunk = state.place(chunk_hint, sealed.size());
        let key = RecordKey::new(chunk, RecordId(state.next_id));
        state.next_id += 1;
        state.records.insert(key, sealed.clone());
        Ok(key)
    }

    async fn update_record(&self, key: RecordKey, sealed: &SealedRecord) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Update(key));
        if let Some(err) = state.take_fault(FaultTarget::Update(key)) {
            return Err(err);
        }
        check_size(sealed)?;

        match state.records.get_mut(&key) {
            Some(existing) => {
                *existing = sealed.clone();
                Ok(())
            }
            None => Err(RemoteError::NotFound(key)),
        }
    }

    async fn batch_update_records(&self, items: &[BatchUpdateItem]) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state
            .calls
            .push(RemoteCall::Batch(items.iter().map(|item| item.key).collect()));
        if let Some(err) = state.take_fault(FaultTarget::Batch) {
            return Err(err);
        }

        // All-or-nothing: the first failing item aborts the whole batch
        for item in items {
            if let Some(err) = state.take_fault(FaultTarget::Update(item.key)) {
                return Err(err);
            }
            check_size(&item.sealed)?;
            if !state.records.contains_key(&item.key) {
                return Err(RemoteError::NotFound(item.key));
            }
        }

        for item in items {
            state.records.insert(item.key, item.sealed.clone());
        }
        Ok(())
    }

    async fn delete_record(&self, key: RecordKey) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Delete(key));
        if let Some(err) = state.take_fault(FaultTarget::Delete(key)) {
            return Err(err);
        }

        state.unreadable.remove(&key);
        state
            .records
            .remove(&key)
            .map(|_| ())
            .ok_or(RemoteError::NotFound(key))
    }

    async fn exists(&self) -> Result<bool, RemoteError> {
        let mut state = self.lock();
        state.calls.push(RemoteCall::Exists);
        if let Some(err) = state.take_fault(FaultTarget::Exists) {
            return Err(err);
        }
        Ok(state.exists)
    }
}
