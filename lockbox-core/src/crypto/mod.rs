//! Cryptographic primitives for the session layer.
//!
//! This module provides:
//! - The zeroizing secret slot that holds the session key
//! - HKDF-SHA256 derivation of the session key from a signed challenge
//! - AES-256-GCM sealing and opening of vault records

pub mod cipher;
pub mod kdf;
pub mod zero;

pub use cipher::{open_record, seal_record};
pub use kdf::{derive_session_key, SessionChallenge};
pub use zero::{SecretStore, SessionKeyMaterial, SESSION_KEY_LEN};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
