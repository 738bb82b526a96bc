//! Lockbox Core Library
//!
//! Client core for an encrypted, ledger-backed record vault: session key
//! lifecycle, application lock, and batched commit of local changes to the
//! remote vault.

pub mod config;
pub mod crypto;
pub mod lock;
pub mod session;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, CoreConfig, LockConfig, SessionConfig};
pub use crypto::{CryptoError, SecretStore};
pub use lock::{
    ActivitySignal, AssertionResult, AutoLockSettings, CredentialHandle, LocalAssertionProvider,
    LockController, LockError, LockState, VaultAccess,
};
pub use session::{Ed25519Identity, IdentityProvider, SessionError, SessionManager, SessionStatus};
pub use sync::{
    PendingChangeLedger, RecordKey, RecordPayload, RemoteError, RemoteVaultClient, SyncConfig,
    SyncEngine, SyncError, SyncProgress, SyncReport,
};

use thiserror::Error;

/// Result type for lockbox operations
pub type Result<T> = std::result::Result<T, LockboxError>;

/// General error type for lockbox operations
#[derive(Error, Debug)]
pub enum LockboxError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}
