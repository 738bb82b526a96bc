//! Pending change ledger: queued local mutations awaiting commit.
//!
//! Changes are kept in insertion order and keyed by [`ChangeId`]. At most
//! one change exists per remote record; queuing another change for the same
//! record replaces the earlier one in place while keeping the rollback
//! snapshot captured by the first.

use crate::sync::models::{
    ChangeId, ChangeKind, PendingChange, PendingStats, RecordKey, RecordPayload, VaultRecord,
    MAX_SEALED_RECORD_SIZE, SEAL_OVERHEAD,
};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Result of structural validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// A record as the UI should show it: remote state with pending intent applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRecord {
    /// `None` for records created locally and not yet committed
    pub key: Option<RecordKey>,
    pub payload: RecordPayload,
    pub pending: Option<(ChangeId, ChangeKind)>,
}

/// Ordered, keyed collection of uncommitted changes
#[derive(Debug, Default)]
pub struct PendingChangeLedger {
    order: Vec<ChangeId>,
    changes: HashMap<ChangeId, PendingChange>,
    by_key: HashMap<RecordKey, ChangeId>,
}

impl PendingChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue creation of a new record
    pub fn add_create(&mut self, record: RecordPayload) -> ChangeId {
        let change_id = ChangeId::new();
        self.append(PendingChange::Create {
            change_id,
            record,
            queued_at: Utc::now(),
        });
        change_id
    }

    /// Queue an update. Supersedes any change already queued for `key`.
    pub fn add_update(
        &mut self,
        key: RecordKey,
        record: RecordPayload,
        original: Option<RecordPayload>,
    ) -> ChangeId {
        let change_id = ChangeId::new();
        let original = self.first_original(key).or(original);
        self.upsert(
            key,
            PendingChange::Update {
                change_id,
                key,
                record,
                original,
                queued_at: Utc::now(),
            },
        );
        change_id
    }

    /// Queue a delete. Supersedes any change already queued for `key`.
    pub fn add_delete(&mut self, key: RecordKey, original: Option<RecordPayload>) -> ChangeId {
        let change_id = ChangeId::new();
        let original = self.first_original(key).or(original);
        self.upsert(
            key,
            PendingChange::Delete {
                change_id,
                key,
                original,
                queued_at: Utc::now(),
            },
        );
        change_id
    }

    /// Replace the contents of a queued create. Returns the new change id,
    /// or `None` if `change_id` is not a queued create.
    pub fn replace_create(&mut self, change_id: ChangeId, record: RecordPayload) -> Option<ChangeId> {
        if !matches!(self.changes.get(&change_id), Some(PendingChange::Create { .. })) {
            return None;
        }

        let replacement = ChangeId::new();
        self.changes.remove(&change_id);
        self.changes.insert(
            replacement,
            PendingChange::Create {
                change_id: replacement,
                record,
                queued_at: Utc::now(),
            },
        );
        if let Some(slot) = self.order.iter_mut().find(|id| **id == change_id) {
            *slot = replacement;
        }
        Some(replacement)
    }

    /// All changes in insertion order
    pub fn get_all(&self) -> Vec<PendingChange> {
        self.order
            .iter()
            .filter_map(|id| self.changes.get(id))
            .cloned()
            .collect()
    }

    pub fn get(&self, change_id: ChangeId) -> Option<&PendingChange> {
        self.changes.get(&change_id)
    }

    /// Change currently queued for a remote record
    pub fn get_for_key(&self, key: RecordKey) -> Option<&PendingChange> {
        self.by_key.get(&key).and_then(|id| self.changes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Drop every queued change. Returns how many were dropped.
    pub fn clear_all(&mut self) -> usize {
        let count = self.order.len();
        self.order.clear();
        self.changes.clear();
        self.by_key.clear();
        count
    }

    /// Remove the given changes, ignoring ids that are not queued.
    pub fn remove_by_ids(&mut self, ids: &[ChangeId]) -> usize {
        let ids: HashSet<ChangeId> = ids.iter().copied().collect();
        let before = self.order.len();
        self.order.retain(|id| !ids.contains(id));
        self.changes.retain(|id, _| !ids.contains(id));
        self.by_key.retain(|_, id| !ids.contains(id));
        before - self.order.len()
    }

    /// Structural completeness check. Business rules are left to the remote.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        for change in self.order.iter().filter_map(|id| self.changes.get(id)) {
            let change_id = change.change_id();
            if let Some(record) = change.record() {
                if record.title.trim().is_empty() {
                    errors.push(format!("{}: title is required", change_id));
                }
                if record.fields.keys().any(|name| name.trim().is_empty()) {
                    errors.push(format!("{}: field names must not be empty", change_id));
                }
                match serde_json::to_vec(record) {
                    Ok(json) if json.len() + SEAL_OVERHEAD > MAX_SEALED_RECORD_SIZE => {
                        errors.push(format!(
                            "{}: record too large ({} bytes sealed, limit {})",
                            change_id,
                            json.len() + SEAL_OVERHEAD,
                            MAX_SEALED_RECORD_SIZE
                        ));
                    }
                    Ok(_) => {}
                    Err(e) => errors.push(format!("{}: record not serializable: {}", change_id, e)),
                }
            }
            if let (Some(key), Some(record)) = (change.key(), change.record()) {
                if let Some(original) = change.original() {
                    if original.kind != record.kind {
                        errors.push(format!("{} ({}): entry kind cannot change", change_id, key));
                    }
                }
            }
        }

        ValidationReport {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Counts by change type, for display
    pub fn stats(&self) -> PendingStats {
        let mut stats = PendingStats::default();
        for change in self.changes.values() {
            match change.kind() {
                ChangeKind::Create => stats.creates += 1,
                ChangeKind::Update => stats.updates += 1,
                ChangeKind::Delete => stats.deletes += 1,
            }
        }
        stats.total = self.changes.len();
        stats
    }

    /// Apply pending intent to a record list: updates replace contents,
    /// deletes hide records and creates are appended.
    pub fn overlay(&self, records: &[VaultRecord]) -> Vec<VisibleRecord> {
        let mut visible: Vec<VisibleRecord> = records
            .iter()
            .filter_map(|record| match self.get_for_key(record.key) {
                Some(PendingChange::Delete { .. }) => None,
                Some(PendingChange::Update {
                    change_id,
                    record: pending,
                    ..
                }) => Some(VisibleRecord {
                    key: Some(record.key),
                    payload: pending.clone(),
                    pending: Some((*change_id, ChangeKind::Update)),
                }),
                _ => Some(VisibleRecord {
                    key: Some(record.key),
                    payload: record.payload.clone(),
                    pending: None,
                }),
            })
            .collect();

        for change in self.order.iter().filter_map(|id| self.changes.get(id)) {
            if let PendingChange::Create {
                change_id, record, ..
            } = change
            {
                visible.push(VisibleRecord {
                    key: None,
                    payload: record.clone(),
                    pending: Some((*change_id, ChangeKind::Create)),
                });
            }
        }
        visible
    }

    fn first_original(&self, key: RecordKey) -> Option<RecordPayload> {
        self.get_for_key(key).and_then(|change| change.original().cloned())
    }

    fn append(&mut self, change: PendingChange) {
        let change_id = change.change_id();
        if let Some(key) = change.key() {
            self.by_key.insert(key, change_id);
        }
        self.order.push(change_id);
        self.changes.insert(change_id, change);
    }

    fn upsert(&mut self, key: RecordKey, change: PendingChange) {
        let Some(previous) = self.by_key.get(&key).copied() else {
            self.append(change);
            return;
        };

        let change_id = change.change_id();
        debug!(%key, superseded = %previous, kind = ?change.kind(), "Superseding queued change");
        self.changes.remove(&previous);
        self.changes.insert(change_id, change);
        self.by_key.insert(key, change_id);
        if let Some(slot) = self.order.iter_mut().find(|id| **id == previous) {
            *slot = change_id;
        }
    }
}
