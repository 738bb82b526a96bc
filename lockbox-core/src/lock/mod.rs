//! User-facing lock state layered over the session.
//!
//! The controller owns the `Locked`/`Unlocked` state, the auto-lock idle
//! monitor and the optional local-assertion enrollment. Any path into
//! `Locked` clears the session key.

pub mod assertion;
pub mod backoff;
pub mod idle;

pub use assertion::{AssertionResult, CredentialHandle, LocalAssertionProvider};
pub use backoff::{BackoffPolicy, UnlockBackoff};
pub use idle::{AutoLockSettings, IdleTracker};

use crate::config::LockConfig;
use crate::session::{SessionError, SessionManager, SessionStatus};
use crate::sync::models::{RecordPayload, SealedRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, trace, warn};

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Vault is locked")]
    Locked,

    #[error("No local assertion credential is enrolled")]
    NotEnrolled,

    #[error("Local assertion was declined")]
    AssertionDeclined,

    #[error("Local assertion is not available on this device")]
    AssertionUnavailable,

    #[error("Local assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Too many failed unlock attempts, retry in {retry_after:?}")]
    LockedOut { retry_after: Duration },

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
}

/// Coarse user-interaction signals that count as activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Click,
    Scroll,
    Touch,
}

/// Proof that the vault was unlocked when it was issued.
///
/// Every operation still re-checks session liveness, so a capability held
/// across a lock fails instead of using stale key material.
#[derive(Clone)]
pub struct VaultAccess {
    session: Arc<SessionManager>,
}

impl VaultAccess {
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn check_liveness(&self) -> Result<(), SessionError> {
        self.session.check_liveness()
    }

    pub fn encrypt_record(&self, payload: &RecordPayload) -> Result<SealedRecord, SessionError> {
        self.session.encrypt_record(payload)
    }

    pub fn decrypt_record(&self, sealed: &SealedRecord) -> Result<RecordPayload, SessionError> {
        self.session.decrypt_record(sealed)
    }
}

impl std::fmt::Debug for VaultAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultAccess").finish_non_exhaustive()
    }
}

struct LockInner {
    state: LockState,
    idle: IdleTracker,
    vault_known: bool,
    credential: Option<CredentialHandle>,
    backoff: UnlockBackoff,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts nested unlock attempts so session churn during an unlock is not
/// mistaken for session death.
struct UnlockInProgress<'a>(&'a AtomicUsize);

impl<'a> UnlockInProgress<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for UnlockInProgress<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Lock controller with auto-lock and local-assertion unlock
pub struct LockController {
    me: Weak<LockController>,
    session: Arc<SessionManager>,
    assertion: Option<Arc<dyn LocalAssertionProvider>>,
    config: LockConfig,
    inner: Mutex<LockInner>,
    unlocking: AtomicUsize,
    state_tx: watch::Sender<LockState>,
    idle_monitor: Mutex<Option<JoinHandle<()>>>,
    session_watch: Mutex<Option<JoinHandle<()>>>,
}

impl LockController {
    /// Create a controller in the `Unlocked` state with no vault observed yet
    pub fn new(
        session: Arc<SessionManager>,
        assertion: Option<Arc<dyn LocalAssertionProvider>>,
        config: LockConfig,
    ) -> Arc<Self> {
        let settings = AutoLockSettings {
            enabled: config.auto_lock_enabled,
            timeout_minutes: config.auto_lock_timeout_minutes.max(1),
        };
        let policy = BackoffPolicy {
            max_attempts: config.max_unlock_attempts,
            base: Duration::from_secs(config.base_backoff_secs),
        };
        let (state_tx, _) = watch::channel(LockState::Unlocked);

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            session,
            assertion,
            config,
            inner: Mutex::new(LockInner {
                state: LockState::Unlocked,
                idle: IdleTracker::new(settings),
                vault_known: false,
                credential: None,
                backoff: UnlockBackoff::new(policy),
            }),
            unlocking: AtomicUsize::new(0),
            state_tx,
            idle_monitor: Mutex::new(None),
            session_watch: Mutex::new(None),
        })
    }

    /// Force `Locked` and clear the session key.
    pub fn lock_app(&self) {
        self.stop_idle_monitor();
        self.session.clear_session();

        let was_unlocked = {
            let mut inner = lock(&self.inner);
            let was_unlocked = inner.state == LockState::Unlocked;
            inner.state = LockState::Locked;
            was_unlocked
        };
        self.state_tx.send_replace(LockState::Locked);

        if was_unlocked {
            info!("Vault locked");
        }
    }

    /// Unlock through the signing ceremony
    pub async fn unlock_with_primary_method(&self) -> Result<VaultAccess, LockError> {
        self.check_backoff()?;
        let _unlocking = UnlockInProgress::enter(&self.unlocking);

        match self.session.initialize_session().await {
            Ok(()) => {
                {
                    let mut inner = lock(&self.inner);
                    inner.state = LockState::Unlocked;
                    inner.idle.record_activity();
                    inner.backoff.reset();
                }
                self.state_tx.send_replace(LockState::Unlocked);
                self.start_idle_monitor();
                info!("Vault unlocked");
                Ok(self.access())
            }
            Err(err) => {
                if matches!(err, SessionError::Declined | SessionError::Signing(_)) {
                    self.record_failed_attempt();
                }
                warn!(error = %err, "Unlock failed");
                Err(LockError::Session(err))
            }
        }
    }

    /// Verify locally, then run the signing ceremony.
    pub async fn unlock_with_local_assertion(&self) -> Result<VaultAccess, LockError> {
        self.check_backoff()?;
        let credential = lock(&self.inner)
            .credential
            .clone()
            .ok_or(LockError::NotEnrolled)?;
        let provider = self
            .assertion
            .as_ref()
            .ok_or(LockError::AssertionUnavailable)?;

        let _unlocking = UnlockInProgress::enter(&self.unlocking);
        let result = provider.assert(&credential).await;
        if let AssertionResult::Failed(ref reason) = result {
            warn!(reason = %reason, "{} failed", provider.method_name());
            self.record_failed_attempt();
        }
        result.into_result()?;

        debug!("{} verified, continuing with signing ceremony", provider.method_name());
        self.unlock_with_primary_method().await
    }

    /// Enroll a local-assertion credential. Requires an unlocked vault.
    pub async fn enroll_local_assertion(&self) -> Result<CredentialHandle, LockError> {
        self.require_unlocked()?;
        let provider = self
            .assertion
            .as_ref()
            .ok_or(LockError::AssertionUnavailable)?;

        let handle = provider.enroll().await?;
        lock(&self.inner).credential = Some(handle.clone());
        info!("{} enrolled", provider.method_name());
        Ok(handle)
    }

    /// Drop the enrollment record. Returns whether one existed.
    pub fn revoke_local_assertion(&self) -> bool {
        let revoked = lock(&self.inner).credential.take().is_some();
        if revoked {
            info!("Local assertion enrollment revoked");
        }
        revoked
    }

    pub fn has_local_assertion_enrolled(&self) -> bool {
        lock(&self.inner).credential.is_some()
    }

    /// Update auto-lock preferences. A zero timeout is treated as one minute.
    pub fn set_auto_lock(&self, enabled: bool, timeout_minutes: u32) {
        lock(&self.inner).idle.set_settings(AutoLockSettings {
            enabled,
            timeout_minutes: timeout_minutes.max(1),
        });
        debug!(enabled, timeout_minutes, "Auto-lock settings updated");

        if enabled {
            self.start_idle_monitor();
        } else {
            self.stop_idle_monitor();
        }
    }

    pub fn auto_lock_settings(&self) -> AutoLockSettings {
        lock(&self.inner).idle.settings()
    }

    pub fn is_locked(&self) -> bool {
        self.state() == LockState::Locked
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn state(&self) -> LockState {
        lock(&self.inner).state
    }

    /// Watch lock state transitions
    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.state_tx.subscribe()
    }

    /// Time until the idle monitor would lock, if auto-lock applies
    pub fn time_until_lock(&self) -> Option<Duration> {
        let inner = lock(&self.inner);
        if inner.state == LockState::Locked {
            return None;
        }
        inner.idle.time_until_lock()
    }

    /// Refresh the idle clock and the session inactivity timer
    pub fn record_activity(&self, signal: ActivitySignal) {
        {
            let mut inner = lock(&self.inner);
            if inner.state == LockState::Locked {
                return;
            }
            inner.idle.record_activity();
        }
        trace!(?signal, "User activity");

        if self.session.status() == SessionStatus::Active {
            if let Err(err) = self.session.touch() {
                debug!(error = %err, "Session touch failed");
            }
        }
    }

    /// Report whether a vault exists for the current identity.
    ///
    /// Once a vault is known, idle tracking engages and session death
    /// becomes a lock event. A known vault without a live session locks.
    pub fn observe_vault(&self, exists: bool) {
        lock(&self.inner).vault_known = exists;

        if !exists {
            self.stop_idle_monitor();
            self.stop_session_watch();
            return;
        }

        self.start_session_watch();
        if self.session.is_active() {
            self.start_idle_monitor();
        } else if !self.is_locked() && self.unlocking.load(Ordering::SeqCst) == 0 {
            info!("Vault present without a live session, locking");
            self.lock_app();
        }
    }

    /// Capability for record access, bootstrapping a session if the app is
    /// unlocked but none exists yet.
    pub async fn ensure_unlocked(&self) -> Result<VaultAccess, LockError> {
        if self.is_locked() {
            return Err(LockError::Locked);
        }

        match self.session.check_liveness() {
            Ok(()) => Ok(self.access()),
            Err(SessionError::NoSession) => self.unlock_with_primary_method().await,
            Err(err) => {
                self.lock_app();
                Err(LockError::Session(err))
            }
        }
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.stop_idle_monitor();
        self.stop_session_watch();
        debug!("Lock controller shut down");
    }

    fn access(&self) -> VaultAccess {
        VaultAccess {
            session: self.session.clone(),
        }
    }

    fn require_unlocked(&self) -> Result<(), LockError> {
        if self.is_locked() {
            return Err(LockError::Locked);
        }
        self.session.check_liveness()?;
        Ok(())
    }

    fn check_backoff(&self) -> Result<(), LockError> {
        match lock(&self.inner).backoff.remaining(Instant::now()) {
            Some(retry_after) => Err(LockError::LockedOut { retry_after }),
            None => Ok(()),
        }
    }

    fn record_failed_attempt(&self) {
        let failures = {
            let mut inner = lock(&self.inner);
            inner.backoff.record_failure(Instant::now());
            inner.backoff.failures()
        };
        if failures >= self.config.max_unlock_attempts && self.config.max_unlock_attempts > 0 {
            warn!(failures, "Unlock back-off engaged");
        }
    }

    fn on_session_ended(&self) {
        if self.unlocking.load(Ordering::SeqCst) > 0 {
            debug!("Session ended during unlock, not locking");
            return;
        }

        let should_lock = {
            let inner = lock(&self.inner);
            inner.vault_known && inner.state == LockState::Unlocked
        };
        if should_lock {
            info!("Session ended, locking vault");
            self.lock_app();
        }
    }

    /// Returns whether the monitor should keep running
    fn check_idle(&self) -> bool {
        let should_lock = {
            let inner = lock(&self.inner);
            if inner.state == LockState::Locked || !inner.idle.settings().enabled {
                return false;
            }
            inner.idle.should_lock()
        };

        if !self.session.is_active() {
            return false;
        }

        if should_lock {
            warn!("Auto-locking vault due to inactivity");
            self.lock_app();
            return false;
        }
        true
    }

    fn start_idle_monitor(&self) {
        let engaged = {
            let inner = lock(&self.inner);
            inner.vault_known && inner.state == LockState::Unlocked && inner.idle.settings().enabled
        };
        if !engaged || !self.session.is_active() {
            return;
        }

        let controller = self.me.clone();
        let period = self.config.idle_poll_interval();
        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.tick().await; // Skip first tick

            loop {
                timer.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if !controller.check_idle() {
                    break;
                }
            }
        });

        if let Some(previous) = lock(&self.idle_monitor).replace(handle) {
            previous.abort();
        }
    }

    fn stop_idle_monitor(&self) {
        if let Some(handle) = lock(&self.idle_monitor).take() {
            handle.abort();
        }
    }

    fn start_session_watch(&self) {
        let mut slot = lock(&self.session_watch);
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let mut status = self.session.subscribe();
        let controller = self.me.clone();
        *slot = Some(tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if current == SessionStatus::NoSession {
                    controller.on_session_ended();
                }
            }
        }));
    }

    fn stop_session_watch(&self) {
        if let Some(handle) = lock(&self.session_watch).take() {
            handle.abort();
        }
    }
}

impl Drop for LockController {
    fn drop(&mut self) {
        for slot in [&mut self.idle_monitor, &mut self.session_watch] {
            let slot = slot.get_mut().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for LockController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockController")
            .field("state", &self.state())
            .field("enrolled", &self.has_local_assertion_enrolled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::test_support::{init_tracing, ScriptedAssertion, ScriptedSigner, SignerStep};
    use tokio::time::{advance, sleep};

    struct Harness {
        signer: Arc<ScriptedSigner>,
        assertion: Arc<ScriptedAssertion>,
        session: Arc<SessionManager>,
        controller: Arc<LockController>,
    }

    fn harness(session_config: SessionConfig, lock_config: LockConfig) -> Harness {
        init_tracing();
        let signer = ScriptedSigner::new();
        let assertion = ScriptedAssertion::new();
        let session = SessionManager::new(signer.clone(), session_config);
        let controller = LockController::new(session.clone(), Some(assertion.clone()), lock_config);
        Harness {
            signer,
            assertion,
            session,
            controller,
        }
    }

    fn long_session() -> SessionConfig {
        SessionConfig {
            absolute_timeout_secs: 4 * 3600,
            inactivity_timeout_secs: 3600,
            poll_interval_secs: 30,
        }
    }

    fn one_minute_lock() -> LockConfig {
        LockConfig {
            auto_lock_timeout_minutes: 1,
            ..LockConfig::default()
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn unlocked_with_vault(h: &Harness) {
        h.controller.unlock_with_primary_method().await.unwrap();
        h.controller.observe_vault(true);
    }

    #[tokio::test]
    async fn starts_unlocked_without_vault() {
        let h = harness(long_session(), LockConfig::default());
        assert_eq!(h.controller.state(), LockState::Unlocked);
        assert!(!h.controller.has_local_assertion_enrolled());
    }

    #[tokio::test]
    async fn observing_vault_without_session_locks() {
        let h = harness(long_session(), LockConfig::default());
        h.controller.observe_vault(true);
        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());
    }

    #[tokio::test]
    async fn primary_unlock_and_lock() {
        let h = harness(long_session(), LockConfig::default());
        h.controller.observe_vault(true);
        assert!(h.controller.is_locked());

        let access = h.controller.unlock_with_primary_method().await.unwrap();
        assert!(!h.controller.is_locked());
        assert!(h.session.is_active());
        assert!(access.check_liveness().is_ok());

        h.controller.lock_app();
        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());
        assert_eq!(access.check_liveness(), Err(SessionError::NoSession));
    }

    #[tokio::test]
    async fn declined_unlock_stays_locked() {
        let h = harness(long_session(), LockConfig::default());
        h.controller.observe_vault(true);
        h.signer.push(SignerStep::Decline);

        let err = h.controller.unlock_with_primary_method().await.unwrap_err();
        assert_eq!(err, LockError::Session(SessionError::Declined));
        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());
    }

    #[tokio::test]
    async fn local_assertion_requires_enrollment() {
        let h = harness(long_session(), LockConfig::default());
        h.controller.observe_vault(true);

        let err = h.controller.unlock_with_local_assertion().await.unwrap_err();
        assert_eq!(err, LockError::NotEnrolled);
        assert_eq!(h.assertion.asserts(), 0);
        assert_eq!(h.signer.calls(), 0);
    }

    #[tokio::test]
    async fn enrollment_requires_unlocked_vault() {
        let h = harness(long_session(), LockConfig::default());
        h.controller.observe_vault(true);
        assert_eq!(
            h.controller.enroll_local_assertion().await.unwrap_err(),
            LockError::Locked
        );
    }

    #[tokio::test]
    async fn local_assertion_gates_primary_unlock() {
        let h = harness(long_session(), LockConfig::default());
        unlocked_with_vault(&h).await;
        h.controller.enroll_local_assertion().await.unwrap();
        assert!(h.controller.has_local_assertion_enrolled());

        h.controller.lock_app();
        h.controller.unlock_with_local_assertion().await.unwrap();

        assert!(!h.controller.is_locked());
        assert_eq!(h.assertion.asserts(), 1);
        // the key still comes from a fresh signing ceremony
        assert_eq!(h.signer.calls(), 2);
    }

    #[tokio::test]
    async fn cancelled_assertion_never_signs() {
        let h = harness(long_session(), LockConfig::default());
        unlocked_with_vault(&h).await;
        h.controller.enroll_local_assertion().await.unwrap();
        h.controller.lock_app();

        h.assertion.push(AssertionResult::Cancelled);
        let err = h.controller.unlock_with_local_assertion().await.unwrap_err();

        assert_eq!(err, LockError::AssertionDeclined);
        assert_eq!(h.signer.calls(), 1);
        assert!(h.controller.is_locked());
    }

    #[tokio::test]
    async fn revoke_removes_enrollment() {
        let h = harness(long_session(), LockConfig::default());
        unlocked_with_vault(&h).await;
        h.controller.enroll_local_assertion().await.unwrap();

        assert!(h.controller.revoke_local_assertion());
        assert!(!h.controller.revoke_local_assertion());
        h.controller.lock_app();
        assert_eq!(
            h.controller.unlock_with_local_assertion().await.unwrap_err(),
            LockError::NotEnrolled
        );
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() {
        let signer = ScriptedSigner::new();
        let session = SessionManager::new(signer, long_session());
        let controller = LockController::new(session, None, LockConfig::default());
        controller.unlock_with_primary_method().await.unwrap();

        assert_eq!(
            controller.enroll_local_assertion().await.unwrap_err(),
            LockError::AssertionUnavailable
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_monitor_auto_locks() {
        let h = harness(long_session(), one_minute_lock());
        unlocked_with_vault(&h).await;

        sleep(Duration::from_secs(95)).await;
        settle().await;

        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_auto_lock() {
        let h = harness(long_session(), one_minute_lock());
        unlocked_with_vault(&h).await;

        sleep(Duration::from_secs(50)).await;
        h.controller.record_activity(ActivitySignal::KeyPress);
        sleep(Duration::from_secs(50)).await;
        settle().await;
        assert!(!h.controller.is_locked());

        sleep(Duration::from_secs(100)).await;
        settle().await;
        assert!(h.controller.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_touches_session() {
        let session_config = SessionConfig {
            absolute_timeout_secs: 3600,
            inactivity_timeout_secs: 60,
            poll_interval_secs: 30,
        };
        let lock_config = LockConfig {
            auto_lock_enabled: false,
            ..LockConfig::default()
        };
        let h = harness(session_config, lock_config);
        unlocked_with_vault(&h).await;

        advance(Duration::from_secs(45)).await;
        h.controller.record_activity(ActivitySignal::PointerMove);
        advance(Duration::from_secs(45)).await;

        assert!(h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_auto_lock_never_fires() {
        let h = harness(long_session(), one_minute_lock());
        unlocked_with_vault(&h).await;
        h.controller.set_auto_lock(false, 1);
        assert!(h.controller.time_until_lock().is_none());

        sleep(Duration::from_secs(600)).await;
        settle().await;
        assert!(!h.controller.is_locked());

        h.controller.set_auto_lock(true, 2);
        assert_eq!(h.controller.auto_lock_settings().timeout_minutes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn session_expiry_locks_app() {
        let session_config = SessionConfig {
            absolute_timeout_secs: 120,
            inactivity_timeout_secs: 3600,
            poll_interval_secs: 30,
        };
        let lock_config = LockConfig {
            auto_lock_enabled: false,
            ..LockConfig::default()
        };
        let h = harness(session_config, lock_config);
        unlocked_with_vault(&h).await;

        // poll ticks every 30s, first one past the 120s mark is at 150s
        sleep(Duration::from_secs(155)).await;
        settle().await;

        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());
    }

    #[tokio::test]
    async fn external_clear_locks_app() {
        let h = harness(long_session(), LockConfig::default());
        unlocked_with_vault(&h).await;

        h.session.clear_session();
        settle().await;

        assert!(h.controller.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn reauth_during_unlock_is_not_a_lock_event() {
        let session_config = SessionConfig {
            absolute_timeout_secs: 3600,
            inactivity_timeout_secs: 60,
            poll_interval_secs: 600,
        };
        let lock_config = LockConfig {
            auto_lock_enabled: false,
            ..LockConfig::default()
        };
        let h = harness(session_config, lock_config);
        unlocked_with_vault(&h).await;

        // Expired but not yet cleared: the unlock itself tears the old key down
        advance(Duration::from_secs(61)).await;
        assert!(!h.session.is_active());
        h.controller.unlock_with_primary_method().await.unwrap();
        settle().await;

        assert!(!h.controller.is_locked());
        assert!(h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_unlocked_paths() {
        let session_config = SessionConfig {
            absolute_timeout_secs: 3600,
            inactivity_timeout_secs: 60,
            poll_interval_secs: 600,
        };
        let h = harness(session_config, LockConfig::default());

        // Unlocked with no session yet: bootstraps one
        h.controller.ensure_unlocked().await.unwrap();
        assert_eq!(h.signer.calls(), 1);
        h.controller.observe_vault(true);

        advance(Duration::from_secs(61)).await;
        let err = h.controller.ensure_unlocked().await.unwrap_err();
        assert_eq!(err, LockError::Session(SessionError::Expired));
        assert!(h.controller.is_locked());

        assert_eq!(
            h.controller.ensure_unlocked().await.unwrap_err(),
            LockError::Locked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_declines_trigger_backoff() {
        let lock_config = LockConfig {
            max_unlock_attempts: 2,
            base_backoff_secs: 60,
            ..LockConfig::default()
        };
        let h = harness(long_session(), lock_config);
        h.controller.observe_vault(true);
        h.signer.push(SignerStep::Decline);
        h.signer.push(SignerStep::Decline);

        for _ in 0..2 {
            assert!(h.controller.unlock_with_primary_method().await.is_err());
        }

        let err = h.controller.unlock_with_primary_method().await.unwrap_err();
        assert_eq!(
            err,
            LockError::LockedOut {
                retry_after: Duration::from_secs(60)
            }
        );
        assert_eq!(h.signer.calls(), 2);

        advance(Duration::from_secs(61)).await;
        h.controller.unlock_with_primary_method().await.unwrap();
        assert!(!h.controller.is_locked());
    }

    #[tokio::test]
    async fn every_lock_path_clears_secret() {
        let h = harness(long_session(), LockConfig::default());

        unlocked_with_vault(&h).await;
        h.controller.lock_app();
        assert!(!h.session.is_active());

        h.controller.unlock_with_primary_method().await.unwrap();
        h.session.clear_session();
        settle().await;
        assert!(h.controller.is_locked());
        assert!(!h.session.is_active());

        h.controller.unlock_with_primary_method().await.unwrap();
        h.controller.observe_vault(false);
        h.controller.observe_vault(true);
        assert!(!h.controller.is_locked());
        h.controller.lock_app();
        assert!(!h.session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_monitors() {
        let h = harness(long_session(), one_minute_lock());
        unlocked_with_vault(&h).await;

        h.controller.shutdown();
        sleep(Duration::from_secs(300)).await;
        settle().await;

        assert!(!h.controller.is_locked());
    }
}
