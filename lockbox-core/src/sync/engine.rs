//! Sync engine: validate, partition, dispatch and classify queued changes.

use crate::lock::{LockController, LockError};
use crate::session::{SessionError, SessionManager};
use crate::sync::change_tracker::{PendingChangeLedger, VisibleRecord};
use crate::sync::client::{RemoteError, RemoteVaultClient};
use crate::sync::config::SyncConfig;
use crate::sync::conflict::{RetryOutcome, RetryPolicy};
use crate::sync::models::{
    BatchUpdateItem, ChangeId, ChangeKind, ChunkRef, CommitOutcome, CommitStatus, PendingChange,
    PendingStats, RecordError, RecordKey, RecordPayload, SealedRecord, SyncProgress, SyncReport,
    VaultRecord, MAX_SEALED_RECORD_SIZE,
};
use crate::sync::SyncError;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

struct PendingUpdate {
    change_id: ChangeId,
    key: RecordKey,
    record: RecordPayload,
}

/// One remote call's worth of work
enum CommitUnit {
    Updates(Vec<PendingUpdate>),
    Delete {
        change_id: ChangeId,
        key: RecordKey,
    },
    Create {
        change_id: ChangeId,
        record: RecordPayload,
        chunk_hint: Option<ChunkRef>,
    },
}

impl CommitUnit {
    fn kind(&self) -> ChangeKind {
        match self {
            CommitUnit::Updates(_) => ChangeKind::Update,
            CommitUnit::Delete { .. } => ChangeKind::Delete,
            CommitUnit::Create { .. } => ChangeKind::Create,
        }
    }

    fn change_ids(&self) -> Vec<ChangeId> {
        match self {
            CommitUnit::Updates(updates) => updates.iter().map(|u| u.change_id).collect(),
            CommitUnit::Delete { change_id, .. } | CommitUnit::Create { change_id, .. } => {
                vec![*change_id]
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Commits queued changes to the remote vault and keeps a decrypted view
/// of the authoritative record set.
pub struct SyncEngine {
    remote: Arc<dyn RemoteVaultClient>,
    controller: Arc<LockController>,
    session: Arc<SessionManager>,
    config: SyncConfig,
    ledger: Mutex<PendingChangeLedger>,
    records: Mutex<Vec<VaultRecord>>,
    /// Held for the whole of a pass so passes never interleave
    pass: tokio::sync::Mutex<()>,
    progress: Option<UnboundedSender<SyncProgress>>,
}

impl SyncEngine {
    /// Re-authentication goes through `controller`, so a sync pass never
    /// unlocks a locked app.
    pub fn new(
        remote: Arc<dyn RemoteVaultClient>,
        controller: Arc<LockController>,
        config: SyncConfig,
    ) -> Self {
        let session = controller.session().clone();
        Self {
            remote,
            controller,
            session,
            config,
            ledger: Mutex::new(PendingChangeLedger::new()),
            records: Mutex::new(Vec::new()),
            pass: tokio::sync::Mutex::new(()),
            progress: None,
        }
    }

    /// Report pass progress on `tx`. Send failures are ignored.
    pub fn with_progress(mut self, tx: UnboundedSender<SyncProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- Queue ----

    pub fn queue_create(&self, record: RecordPayload) -> ChangeId {
        lock(&self.ledger).add_create(record)
    }

    /// Queue an update, snapshotting the current record for rollback
    pub fn queue_update(&self, key: RecordKey, record: RecordPayload) -> ChangeId {
        let original = self.cached(key);
        lock(&self.ledger).add_update(key, record, original)
    }

    pub fn queue_delete(&self, key: RecordKey) -> ChangeId {
        let original = self.cached(key);
        lock(&self.ledger).add_delete(key, original)
    }

    /// Replace a queued create's contents
    pub fn requeue_create(&self, change_id: ChangeId, record: RecordPayload) -> Option<ChangeId> {
        lock(&self.ledger).replace_create(change_id, record)
    }

    /// Drop every queued change without sending anything
    pub fn discard_pending_changes(&self) -> usize {
        let discarded = lock(&self.ledger).clear_all();
        if discarded > 0 {
            info!(discarded, "Discarded pending changes");
        }
        discarded
    }

    pub fn pending_stats(&self) -> PendingStats {
        lock(&self.ledger).stats()
    }

    pub fn pending_changes(&self) -> Vec<PendingChange> {
        lock(&self.ledger).get_all()
    }

    // ---- Read ----

    /// Last refreshed record set
    pub fn records(&self) -> Vec<VaultRecord> {
        lock(&self.records).clone()
    }

    /// Record set with pending intent applied
    pub fn visible_records(&self) -> Vec<VisibleRecord> {
        let records = self.records();
        lock(&self.ledger).overlay(&records)
    }

    pub async fn vault_exists(&self) -> Result<bool, SyncError> {
        Ok(self.remote.exists().await?)
    }

    /// Re-read and decrypt every record. Records that cannot be read or
    /// decrypted are left out of the cache and returned as errors.
    pub async fn refresh_records(&self) -> Result<Vec<RecordError>, SyncError> {
        self.session.check_liveness()?;
        let listing = self.remote.list_records().await?;

        let mut errors = listing.per_record_errors;
        let mut records = Vec::with_capacity(listing.records.len());
        for remote in listing.records {
            match self.session.decrypt_record(&remote.sealed) {
                Ok(payload) => records.push(VaultRecord {
                    key: remote.key,
                    payload,
                }),
                Err(SessionError::Crypto(reason)) => errors.push(RecordError {
                    key: Some(remote.key),
                    reason,
                }),
                Err(err) => return Err(err.into()),
            }
        }

        if !errors.is_empty() {
            warn!(unreadable = errors.len(), "Some records could not be read");
        }
        debug!(records = records.len(), "Refreshed record set");
        *lock(&self.records) = records;
        Ok(errors)
    }

    // ---- Direct writes ----

    /// Store a new record immediately
    pub async fn store_record(
        &self,
        record: RecordPayload,
        chunk_hint: Option<ChunkRef>,
    ) -> Result<RecordKey, SyncError> {
        let unit = CommitUnit::Create {
            change_id: ChangeId::new(),
            record,
            chunk_hint,
        };
        let key = settle(self.run_unit(&unit).await)?
            .ok_or_else(|| RemoteError::Other("store returned no key".to_string()))?;

        if let CommitUnit::Create { record, .. } = unit {
            lock(&self.records).push(VaultRecord {
                key,
                payload: record,
            });
        }
        Ok(key)
    }

    /// Update a record immediately, retrying on conflict
    pub async fn update_record(&self, key: RecordKey, record: RecordPayload) -> Result<(), SyncError> {
        let unit = CommitUnit::Updates(vec![PendingUpdate {
            change_id: ChangeId::new(),
            key,
            record,
        }]);
        settle(self.run_unit(&unit).await)?;

        if let CommitUnit::Updates(mut updates) = unit {
            if let Some(update) = updates.pop() {
                let mut records = lock(&self.records);
                match records.iter_mut().find(|r| r.key == key) {
                    Some(cached) => cached.payload = update.record,
                    None => records.push(VaultRecord {
                        key,
                        payload: update.record,
                    }),
                }
            }
        }
        Ok(())
    }

    /// Delete a record immediately, retrying on conflict
    pub async fn delete_record(&self, key: RecordKey) -> Result<(), SyncError> {
        let unit = CommitUnit::Delete {
            change_id: ChangeId::new(),
            key,
        };
        settle(self.run_unit(&unit).await)?;
        lock(&self.records).retain(|r| r.key != key);
        Ok(())
    }

    // ---- Sync pass ----

    /// Commit every queued change.
    ///
    /// Updates go out in batches, then deletes, then creates, one call per
    /// unit. Committed changes leave the ledger; failed and conflicted
    /// ones stay for the next pass. The record set is refreshed afterwards
    /// either way.
    pub async fn sync_pending_changes(&self) -> Result<SyncReport, SyncError> {
        let _pass = self.pass.lock().await;

        let changes = {
            let ledger = lock(&self.ledger);
            if ledger.is_empty() {
                debug!("No pending changes to sync");
                return Ok(SyncReport::empty());
            }
            let report = ledger.validate();
            if !report.valid {
                warn!(errors = report.errors.len(), "Pending changes failed validation");
                return Err(SyncError::StructuralInvalid(report.errors));
            }
            ledger.get_all()
        };

        self.ensure_session().await?;

        let total = changes.len();
        let units = self.partition(changes);
        info!(total, units = units.len(), "Starting sync pass");
        self.emit(SyncProgress::Started { total });

        let mut outcomes = Vec::with_capacity(total);
        for unit in &units {
            let kind = unit.kind();
            let (status, detail) = match self.run_unit(unit).await {
                RetryOutcome::Committed(_) => (CommitStatus::Success, None),
                RetryOutcome::ConflictExhausted { attempts, last } => {
                    warn!(?kind, attempts, error = %last, "Conflict persisted after retries");
                    (CommitStatus::Conflicted, Some(last.to_string()))
                }
                RetryOutcome::Failed(err) => {
                    warn!(?kind, error = %err, "Commit failed");
                    (CommitStatus::Failed, Some(err.to_string()))
                }
            };

            let change_ids = unit.change_ids();
            outcomes.extend(change_ids.iter().map(|change_id| CommitOutcome {
                change_id: *change_id,
                status,
                detail: detail.clone(),
            }));
            self.emit(SyncProgress::UnitCommitted {
                kind,
                change_ids,
                status,
            });
        }

        let succeeded: Vec<ChangeId> = outcomes
            .iter()
            .filter(|o| o.status == CommitStatus::Success)
            .map(|o| o.change_id)
            .collect();
        lock(&self.ledger).remove_by_ids(&succeeded);

        if let Err(err) = self.refresh_records().await {
            warn!(error = %err, "Refresh after sync failed");
        }

        let count = |status: CommitStatus| {
            outcomes.iter().filter(|o| o.status == status).count()
        };
        let success_count = count(CommitStatus::Success);
        let failure_count = count(CommitStatus::Failed);
        let conflict_count = count(CommitStatus::Conflicted);
        let report = SyncReport {
            success: failure_count == 0 && conflict_count == 0,
            success_count,
            failure_count,
            conflict_count,
            outcomes,
            completed_at: Utc::now(),
        };

        if report.success {
            info!(committed = success_count, "Sync pass complete");
        } else {
            warn!(
                committed = success_count,
                failed = failure_count,
                conflicted = conflict_count,
                "Sync pass incomplete, remaining changes kept"
            );
        }
        self.emit(SyncProgress::Finished(report.clone()));
        Ok(report)
    }

    async fn ensure_session(&self) -> Result<(), SyncError> {
        if self.controller.is_locked() {
            return Err(SyncError::Lock(LockError::Locked));
        }

        match self.session.check_liveness() {
            Ok(()) => Ok(()),
            Err(SessionError::Expired | SessionError::NoSession) => {
                info!("Session not live, re-authenticating before sync");
                self.controller.unlock_with_primary_method().await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn partition(&self, changes: Vec<PendingChange>) -> Vec<CommitUnit> {
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        let mut creates = Vec::new();

        for change in changes {
            match change {
                PendingChange::Update {
                    change_id,
                    key,
                    record,
                    ..
                } => updates.push(PendingUpdate {
                    change_id,
                    key,
                    record,
                }),
                PendingChange::Delete { change_id, key, .. } => {
                    deletes.push(CommitUnit::Delete { change_id, key })
                }
                PendingChange::Create {
                    change_id, record, ..
                } => creates.push(CommitUnit::Create {
                    change_id,
                    record,
                    chunk_hint: None,
                }),
            }
        }

        let batch_size = self.config.batch_size();
        let mut units = Vec::new();
        let mut updates = updates.into_iter().peekable();
        while updates.peek().is_some() {
            units.push(CommitUnit::Updates(updates.by_ref().take(batch_size).collect()));
        }
        units.extend(deletes);
        units.extend(creates);
        units
    }

    async fn run_unit(&self, unit: &CommitUnit) -> RetryOutcome<Option<RecordKey>> {
        let kind = unit.kind();
        RetryPolicy::new(self.config.attempts())
            .run(
                move || self.dispatch(unit),
                move |attempt| self.before_retry(kind, attempt),
            )
            .await
    }

    async fn before_retry(&self, kind: ChangeKind, attempt: u32) {
        self.emit(SyncProgress::UnitRetrying { kind, attempt });
        if let Err(err) = self.refresh_records().await {
            debug!(error = %err, "Refresh before retry failed");
        }
    }

    /// Seal and send one unit. Liveness is checked before each step.
    async fn dispatch(&self, unit: &CommitUnit) -> Result<Option<RecordKey>, SyncError> {
        self.session.check_liveness()?;
        match unit {
            CommitUnit::Updates(updates) => {
                let items = updates
                    .iter()
                    .map(|update| {
                        Ok(BatchUpdateItem {
                            key: update.key,
                            sealed: self.seal(&update.record)?,
                        })
                    })
                    .collect::<Result<Vec<_>, SyncError>>()?;

                self.session.check_liveness()?;
                match items.as_slice() {
                    [item] => self.remote.update_record(item.key, &item.sealed).await?,
                    _ => self.remote.batch_update_records(&items).await?,
                }
                Ok(None)
            }
            CommitUnit::Delete { key, .. } => {
                self.remote.delete_record(*key).await?;
                Ok(None)
            }
            CommitUnit::Create {
                record, chunk_hint, ..
            } => {
                let sealed = self.seal(record)?;
                self.session.check_liveness()?;
                Ok(Some(self.remote.store_record(*chunk_hint, &sealed).await?))
            }
        }
    }

    fn seal(&self, record: &RecordPayload) -> Result<SealedRecord, SyncError> {
        let sealed = self.session.encrypt_record(record)?;
        if sealed.size() > MAX_SEALED_RECORD_SIZE {
            return Err(SyncError::RecordTooLarge {
                size: sealed.size(),
                limit: MAX_SEALED_RECORD_SIZE,
            });
        }
        Ok(sealed)
    }

    fn cached(&self, key: RecordKey) -> Option<RecordPayload> {
        lock(&self.records)
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.payload.clone())
    }

    fn emit(&self, event: SyncProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }
}

fn settle<T>(outcome: RetryOutcome<T>) -> Result<T, SyncError> {
    match outcome {
        RetryOutcome::Committed(value) => Ok(value),
        RetryOutcome::ConflictExhausted { attempts, last } => {
            Err(SyncError::ConflictExhausted { attempts, last })
        }
        RetryOutcome::Failed(err) => Err(err),
    }
}
