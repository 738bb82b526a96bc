//! Session key derivation.
//!
//! A fresh challenge is signed by the identity provider on every unlock.
//! The session key is then expanded from `(identity, signature)` with
//! HKDF-SHA256:
//!
//! ```text
//! key = HKDF-SHA256(salt = identity, ikm = signature, info = "lockbox-session-key-v1")
//! ```

use crate::crypto::zero::{SessionKeyMaterial, SESSION_KEY_LEN};
use crate::crypto::{CryptoError, Result};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

const CHALLENGE_DOMAIN: &str = "lockbox-session-v1";
const SESSION_KEY_INFO: &[u8] = b"lockbox-session-key-v1";

/// Length of the random part of a challenge
pub const CHALLENGE_NONCE_LEN: usize = 32;

/// A per-attempt challenge bound to the signer's public identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    identity: Vec<u8>,
    nonce: [u8; CHALLENGE_NONCE_LEN],
}

impl SessionChallenge {
    /// Generate a new random challenge for `identity`
    pub fn new(identity: &[u8]) -> Self {
        let mut nonce = [0u8; CHALLENGE_NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self {
            identity: identity.to_vec(),
            nonce,
        }
    }

    /// Build a challenge from known parts (used to replay a ceremony in tests)
    pub fn from_parts(identity: &[u8], nonce: [u8; CHALLENGE_NONCE_LEN]) -> Self {
        Self {
            identity: identity.to_vec(),
            nonce,
        }
    }

    /// The bytes handed to the signer.
    ///
    /// ```text
    /// lockbox-session-v1\n{hex(identity)}\n{hex(nonce)}
    /// ```
    pub fn message(&self) -> Vec<u8> {
        format!(
            "{}\n{}\n{}",
            CHALLENGE_DOMAIN,
            hex::encode(&self.identity),
            hex::encode(self.nonce)
        )
        .into_bytes()
    }

    pub fn identity(&self) -> &[u8] {
        &self.identity
    }
}

/// Derive the 32-byte session key from an identity and its signature.
///
/// Deterministic: the same `(identity, signature)` always yields the same key.
pub fn derive_session_key(identity: &[u8], signature: &[u8]) -> Result<SessionKeyMaterial> {
    if identity.is_empty() {
        return Err(CryptoError::KdfFailed("Empty public identity".to_string()));
    }
    if signature.is_empty() {
        return Err(CryptoError::KdfFailed("Empty signature".to_string()));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(identity), signature);
    let mut key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    hkdf.expand(SESSION_KEY_INFO, &mut key[..])
        .map_err(|e| CryptoError::KdfFailed(format!("HKDF expand failed: {}", e)))?;

    Ok(key)
}
