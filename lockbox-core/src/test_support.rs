//! Fakes for the consumed interfaces, shared by the unit tests.

use crate::lock::{AssertionResult, CredentialHandle, LocalAssertionProvider, LockError};
use crate::session::{Ed25519Identity, IdentityProvider, SessionError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted response to one signing request
#[derive(Debug, Clone)]
pub(crate) enum SignerStep {
    Sign,
    Decline,
    Fail(String),
    /// Return a well-formed signature that does not verify
    Forge,
}

/// Identity provider that counts requests and can be held at a gate.
pub(crate) struct ScriptedSigner {
    inner: Ed25519Identity,
    calls: AtomicUsize,
    script: Mutex<VecDeque<SignerStep>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedSigner {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Each signature waits for one permit on the returned semaphore.
    pub(crate) fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self::build(Some(gate.clone()))), gate)
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            inner: Ed25519Identity::from_bytes(&[0x42; 32]),
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            gate,
        }
    }

    /// Queue the outcome of a future request. Unscripted requests sign.
    pub(crate) fn push(&self, step: SignerStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedSigner {
    fn public_identity(&self) -> Vec<u8> {
        self.inner.public_identity()
    }

    async fn sign_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SessionError::Declined)?
                .forget();
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(SignerStep::Sign);
        match step {
            SignerStep::Sign => self.inner.sign_challenge(challenge).await,
            SignerStep::Decline => Err(SessionError::Declined),
            SignerStep::Fail(reason) => Err(SessionError::Signing(reason)),
            SignerStep::Forge => Ok(vec![0x5A; 64]),
        }
    }
}

/// Local assertion provider with scripted results
pub(crate) struct ScriptedAssertion {
    results: Mutex<VecDeque<AssertionResult>>,
    asserts: AtomicUsize,
}

impl ScriptedAssertion {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            asserts: AtomicUsize::new(0),
        })
    }

    /// Queue the result of a future prompt. Unscripted prompts verify.
    pub(crate) fn push(&self, result: AssertionResult) {
        self.results.lock().unwrap().push_back(result);
    }

    pub(crate) fn asserts(&self) -> usize {
        self.asserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalAssertionProvider for ScriptedAssertion {
    fn method_name(&self) -> &str {
        "Test assertion"
    }

    async fn enroll(&self) -> Result<CredentialHandle, LockError> {
        Ok(CredentialHandle::new(b"test-credential".to_vec(), "test device"))
    }

    async fn assert(&self, _credential: &CredentialHandle) -> AssertionResult {
        self.asserts.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AssertionResult::Verified)
    }
}
