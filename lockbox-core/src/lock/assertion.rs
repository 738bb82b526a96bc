//! Local assertion support (platform biometrics, device PIN).
//!
//! A local assertion only gates the primary signing ceremony. It never
//! yields key material on its own.

use crate::lock::LockError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a local assertion prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionResult {
    /// User successfully verified
    Verified,
    /// User cancelled the prompt
    Cancelled,
    /// Assertion hardware not available
    NotAvailable,
    /// No credential enrolled on the device
    NotEnrolled,
    /// Assertion failed
    Failed(String),
}

impl AssertionResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, AssertionResult::Verified)
    }

    /// Map a non-verified result to the matching lock error
    pub fn into_result(self) -> Result<(), LockError> {
        match self {
            AssertionResult::Verified => Ok(()),
            AssertionResult::Cancelled => Err(LockError::AssertionDeclined),
            AssertionResult::NotAvailable => Err(LockError::AssertionUnavailable),
            AssertionResult::NotEnrolled => Err(LockError::NotEnrolled),
            AssertionResult::Failed(reason) => Err(LockError::AssertionFailed(reason)),
        }
    }
}

/// Opaque reference to an enrolled local credential
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle {
    pub credential_id: Vec<u8>,
    pub label: String,
    pub enrolled_at: DateTime<Utc>,
}

impl CredentialHandle {
    pub fn new(credential_id: Vec<u8>, label: impl Into<String>) -> Self {
        Self {
            credential_id,
            label: label.into(),
            enrolled_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("credential_id", &hex::encode(&self.credential_id))
            .field("label", &self.label)
            .field("enrolled_at", &self.enrolled_at)
            .finish()
    }
}

/// Device-local user verification
#[async_trait]
pub trait LocalAssertionProvider: Send + Sync {
    /// Human-readable name of the method, e.g. "Touch ID"
    fn method_name(&self) -> &str {
        "Local assertion"
    }

    /// Register a new credential on the device
    async fn enroll(&self) -> Result<CredentialHandle, LockError>;

    /// Prompt the user to verify against an enrolled credential
    async fn assert(&self, credential: &CredentialHandle) -> AssertionResult;
}
