//! Conflict detection and bounded retry.
//!
//! A conflict means the remote's expected-state check failed, usually
//! because the local view of the record set is stale. The retry policy
//! refreshes local state between attempts; any other error ends the
//! attempt immediately.

use crate::sync::client::RemoteError;
use crate::sync::SyncError;
use std::future::Future;
use tracing::debug;

/// Message fragments that identify a conflict in an opaque remote error
const CONFLICT_SIGNATURES: &[&str] = &["stale", "conflict", "expected state", "version mismatch"];

/// Classify a remote error as a conflict.
///
/// Typed [`RemoteError::Conflict`] always qualifies. Opaque
/// [`RemoteError::Other`] errors qualify when their message carries a
/// known conflict signature.
pub fn is_conflict(err: &RemoteError) -> bool {
    match err {
        RemoteError::Conflict(_) => true,
        RemoteError::Other(message) => {
            let message = message.to_lowercase();
            CONFLICT_SIGNATURES
                .iter()
                .any(|signature| message.contains(signature))
        }
        _ => false,
    }
}

/// Result of running an operation under the retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Committed(T),
    ConflictExhausted { attempts: u32, last: RemoteError },
    Failed(SyncError),
}

/// Bounded retry on conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Run `op`, calling `refresh(attempt)` after each conflicted attempt
    /// except the last.
    pub async fn run<T, Op, OpFut, Refresh, RefreshFut>(
        &self,
        mut op: Op,
        mut refresh: Refresh,
    ) -> RetryOutcome<T>
    where
        Op: FnMut() -> OpFut,
        OpFut: Future<Output = Result<T, SyncError>>,
        Refresh: FnMut(u32) -> RefreshFut,
        RefreshFut: Future<Output = ()>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return RetryOutcome::Committed(value),
                Err(SyncError::Remote(err)) if is_conflict(&err) => {
                    if attempt >= self.attempts {
                        return RetryOutcome::ConflictExhausted {
                            attempts: attempt,
                            last: err,
                        };
                    }
                    debug!(attempt, error = %err, "Conflict detected, refreshing before retry");
                    refresh(attempt).await;
                    attempt += 1;
                }
                Err(err) => return RetryOutcome::Failed(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn typed_conflict_detected() {
        assert!(is_conflict(&RemoteError::Conflict("x".into())));
    }

    #[test]
    fn opaque_signatures_detected() {
        for message in [
            "Stale account data",
            "write conflict on chunk 3",
            "Expected state did not match",
            "Version mismatch: 4 != 5",
        ] {
            assert!(
                is_conflict(&RemoteError::Other(message.into())),
                "{} should be a conflict",
                message
            );
        }
    }

    #[test]
    fn other_errors_are_not_conflicts() {
        assert!(!is_conflict(&RemoteError::Other("insufficient funds".into())));
        assert!(!is_conflict(&RemoteError::Network("stale socket".into())));
        assert!(!is_conflict(&RemoteError::Quota("chunk full".into())));
    }

    #[tokio::test]
    async fn conflict_then_success_refreshes_once() {
        let (calls, refreshes) = (&AtomicU32::new(0), &AtomicU32::new(0));

        let outcome = RetryPolicy::new(3)
            .run(
                move || async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(SyncError::Remote(RemoteError::Conflict("stale".into())))
                    } else {
                        Ok(7)
                    }
                },
                move |_| async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(outcome, RetryOutcome::Committed(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn persistent_conflict_exhausts() {
        let (calls, refreshes) = (&AtomicU32::new(0), &AtomicU32::new(0));

        let outcome: RetryOutcome<()> = RetryPolicy::new(3)
            .run(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Remote(RemoteError::Conflict("stale".into())))
                },
                move |_| async move {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert!(matches!(
            outcome,
            RetryOutcome::ConflictExhausted { attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn hard_failure_is_not_retried() {
        let calls = &AtomicU32::new(0);

        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::Remote(RemoteError::Network("down".into())))
                },
                move |_| async move {},
            )
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Failed(SyncError::Remote(RemoteError::Network("down".into())))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
