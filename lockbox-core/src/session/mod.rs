//! Session lifecycle management.
//!
//! A session key is derived from a signing ceremony with the user's
//! identity provider and held in a [`SecretStore`] until one of two
//! independent timeouts fires:
//!
//! - absolute: measured from the moment the session was established
//! - inactivity: measured from the most recent [`SessionManager::touch`]
//!
//! [`SessionManager::check_liveness`] is the enforcement point and must be
//! called right before any sensitive operation. The background poll only
//! clears expired sessions early.

pub mod identity;

pub use identity::{verify_challenge, Ed25519Identity, IdentityProvider};

use crate::config::SessionConfig;
use crate::crypto::{
    derive_session_key, open_record, seal_record, CryptoError, SecretStore, SessionChallenge,
};
use crate::sync::models::{RecordPayload, SealedRecord};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Signing request was declined")]
    Declined,

    #[error("Session expired, re-authentication required")]
    Expired,

    #[error("No active session")]
    NoSession,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Session crypto error: {0}")]
    Crypto(String),
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        SessionError::Crypto(err.to_string())
    }
}

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    NoSession,
    Initializing,
    Active,
}

#[derive(Debug, Clone, Copy)]
struct SessionClock {
    started_at: Instant,
    last_activity_at: Instant,
}

impl SessionClock {
    fn started(now: Instant) -> Self {
        Self {
            started_at: now,
            last_activity_at: now,
        }
    }

    fn is_timed_out(&self, now: Instant, config: &SessionConfig) -> bool {
        now.saturating_duration_since(self.started_at) > config.absolute_timeout()
            || now.saturating_duration_since(self.last_activity_at) > config.inactivity_timeout()
    }

    fn remaining(&self, now: Instant, config: &SessionConfig) -> Duration {
        let absolute_left = config
            .absolute_timeout()
            .saturating_sub(now.saturating_duration_since(self.started_at));
        let inactivity_left = config
            .inactivity_timeout()
            .saturating_sub(now.saturating_duration_since(self.last_activity_at));
        absolute_left.min(inactivity_left)
    }
}

/// Secret and clock live and die together under one lock.
#[derive(Default)]
struct SessionState {
    store: SecretStore,
    clock: Option<SessionClock>,
    /// Bumped on every clear so an in-flight ceremony can tell it was cancelled.
    epoch: u64,
}

type InitOutcome = Option<Result<(), SessionError>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the session key, its clock and the background expiry poll.
pub struct SessionManager {
    me: Weak<SessionManager>,
    identity: Arc<dyn IdentityProvider>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    status: watch::Sender<SessionStatus>,
    inflight: Mutex<Option<watch::Receiver<InitOutcome>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

enum InitRole {
    Leader(watch::Sender<InitOutcome>),
    Follower(watch::Receiver<InitOutcome>),
}

/// Resolves waiters even if the leading caller is dropped mid-ceremony.
struct InflightLeader<'a> {
    manager: &'a SessionManager,
    tx: watch::Sender<InitOutcome>,
    done: bool,
}

impl InflightLeader<'_> {
    fn finish(mut self, outcome: Result<(), SessionError>) {
        self.done = true;
        self.resolve(outcome);
    }

    fn resolve(&self, outcome: Result<(), SessionError>) {
        let mut slot = lock(&self.manager.inflight);
        *slot = None;
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for InflightLeader<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!("Session initialization abandoned before completion");
            self.manager.publish_if(SessionStatus::Initializing, SessionStatus::NoSession);
            self.resolve(Err(SessionError::Declined));
        }
    }
}

impl SessionManager {
    /// Create a manager with no session
    pub fn new(identity: Arc<dyn IdentityProvider>, config: SessionConfig) -> Arc<Self> {
        let (status, _) = watch::channel(SessionStatus::NoSession);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            identity,
            config,
            state: Mutex::new(SessionState::default()),
            status,
            inflight: Mutex::new(None),
            poller: Mutex::new(None),
        })
    }

    /// Establish a session, or succeed immediately if one is active.
    ///
    /// Concurrent callers share a single signing ceremony and all observe
    /// its outcome.
    pub async fn initialize_session(&self) -> Result<(), SessionError> {
        if self.is_active() {
            return Ok(());
        }

        let role = {
            let mut slot = lock(&self.inflight);
            if let Some(rx) = slot.as_ref() {
                InitRole::Follower(rx.clone())
            } else if self.is_active() {
                return Ok(());
            } else {
                let (tx, rx) = watch::channel(None);
                *slot = Some(rx);
                InitRole::Leader(tx)
            }
        };

        match role {
            InitRole::Follower(rx) => Self::await_inflight(rx).await,
            InitRole::Leader(tx) => {
                let leader = InflightLeader {
                    manager: self,
                    tx,
                    done: false,
                };
                let outcome = self.establish().await;
                leader.finish(outcome.clone());
                outcome
            }
        }
    }

    async fn await_inflight(mut rx: watch::Receiver<InitOutcome>) -> Result<(), SessionError> {
        debug!("Joining in-flight session initialization");
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().clone();
                return last.unwrap_or(Err(SessionError::Declined));
            }
        }
    }

    async fn establish(&self) -> Result<(), SessionError> {
        if self.has_secret() {
            self.end_session(true);
        }
        let epoch = lock(&self.state).epoch;
        self.publish(SessionStatus::Initializing);

        let result = self.run_ceremony(epoch).await;
        if let Err(ref e) = result {
            debug!(error = %e, "Session initialization failed");
            self.publish_if(SessionStatus::Initializing, SessionStatus::NoSession);
        }
        result
    }

    async fn run_ceremony(&self, epoch: u64) -> Result<(), SessionError> {
        let identity = self.identity.public_identity();
        let challenge = SessionChallenge::new(&identity);
        let message = challenge.message();
        let signature = Zeroizing::new(self.identity.sign_challenge(&message).await?);
        if !verify_challenge(&identity, &message, &signature) {
            warn!("Signature does not match the public identity");
            return Err(SessionError::Signing(
                "signature does not verify against the public identity".to_string(),
            ));
        }
        let key = derive_session_key(&identity, &signature)?;

        {
            let mut state = lock(&self.state);
            if state.epoch != epoch {
                warn!("Session cleared during signing, discarding derived key");
                return Err(SessionError::NoSession);
            }
            state.store.set(Some(key));
            state.clock = Some(SessionClock::started(Instant::now()));
        }

        self.publish(SessionStatus::Active);
        self.start_poll();
        info!("Session established");
        Ok(())
    }

    /// Record user activity. Resets only the inactivity timeout.
    pub fn touch(&self) -> Result<(), SessionError> {
        let now = Instant::now();
        let expired = {
            let mut state = lock(&self.state);
            let Some(clock) = state.clock.as_mut() else {
                return Err(SessionError::NoSession);
            };
            if clock.is_timed_out(now, &self.config) {
                true
            } else {
                clock.last_activity_at = now;
                false
            }
        };

        if expired {
            self.end_session(true);
            return Err(SessionError::Expired);
        }
        Ok(())
    }

    /// Whether either timeout has elapsed. `false` when there is no session.
    pub fn is_timed_out(&self) -> bool {
        let state = lock(&self.state);
        state
            .clock
            .map_or(false, |clock| clock.is_timed_out(Instant::now(), &self.config))
    }

    /// Budget left before the nearer of the two timeouts
    pub fn time_remaining(&self) -> Option<Duration> {
        let state = lock(&self.state);
        state
            .clock
            .map(|clock| clock.remaining(Instant::now(), &self.config))
    }

    /// Synchronous liveness check. Clears the session if it has expired.
    pub fn check_liveness(&self) -> Result<(), SessionError> {
        let expired = {
            let state = lock(&self.state);
            match state.clock {
                None => return Err(SessionError::NoSession),
                Some(clock) => clock.is_timed_out(Instant::now(), &self.config),
            }
        };

        if expired {
            self.end_session(true);
            return Err(SessionError::Expired);
        }
        Ok(())
    }

    /// Drop the session and zero its key. Idempotent.
    pub fn clear_session(&self) {
        self.end_session(false);
    }

    /// A key is held and neither timeout has elapsed
    pub fn is_active(&self) -> bool {
        let state = lock(&self.state);
        state.store.is_set()
            && state
                .clock
                .map_or(false, |clock| !clock.is_timed_out(Instant::now(), &self.config))
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn public_identity(&self) -> Vec<u8> {
        self.identity.public_identity()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encrypt a record under the session key
    pub fn encrypt_record(&self, payload: &RecordPayload) -> Result<SealedRecord, SessionError> {
        self.check_liveness()?;
        let state = lock(&self.state);
        state
            .store
            .with_secret(|key| seal_record(key, payload))
            .ok_or(SessionError::NoSession)?
            .map_err(SessionError::from)
    }

    /// Decrypt a record with the session key
    pub fn decrypt_record(&self, sealed: &SealedRecord) -> Result<RecordPayload, SessionError> {
        self.check_liveness()?;
        let state = lock(&self.state);
        state
            .store
            .with_secret(|key| open_record(key, sealed))
            .ok_or(SessionError::NoSession)?
            .map_err(SessionError::from)
    }

    fn has_secret(&self) -> bool {
        lock(&self.state).store.is_set()
    }

    fn end_session(&self, expired: bool) {
        let had_session = {
            let mut state = lock(&self.state);
            let had_session = state.clock.take().is_some();
            state.store.clear();
            state.epoch = state.epoch.wrapping_add(1);
            had_session
        };

        self.stop_poll();
        self.publish(SessionStatus::NoSession);

        if had_session {
            if expired {
                warn!("Session expired, key material cleared");
            } else {
                info!("Session cleared");
            }
        }
    }

    fn publish(&self, next: SessionStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn publish_if(&self, expected: SessionStatus, next: SessionStatus) {
        self.status.send_if_modified(|current| {
            if *current == expected {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    fn start_poll(&self) {
        let manager = self.me.clone();
        let period = self.config.poll_interval();

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.tick().await; // Skip first tick

            loop {
                timer.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                match manager.check_liveness() {
                    Ok(()) => {}
                    Err(SessionError::Expired) => {
                        debug!("Background poll cleared expired session");
                        break;
                    }
                    Err(_) => break,
                }
            }
        });

        if let Some(previous) = lock(&self.poller).replace(handle) {
            previous.abort();
        }
    }

    fn stop_poll(&self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = poller.take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("status", &self.status())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
