//! Signing providers used by the session ceremony.

use crate::session::SessionError;
use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// External key-custody device that proves control of an identity.
///
/// `sign_challenge` may suspend on user interaction. A refusal is reported
/// as [`SessionError::Declined`], never as a panic.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Public identity bytes the challenge is bound to
    fn public_identity(&self) -> Vec<u8>;

    /// Sign the challenge message
    async fn sign_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>, SessionError>;
}

/// Software signer backed by an Ed25519 key.
///
/// Ed25519 signatures are deterministic, so the same challenge always
/// derives the same session key.
pub struct Ed25519Identity {
    signing_key: SigningKey,
}

impl Ed25519Identity {
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(secret))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

#[async_trait]
impl IdentityProvider for Ed25519Identity {
    fn public_identity(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    async fn sign_challenge(&self, challenge: &[u8]) -> Result<Vec<u8>, SessionError> {
        let signature = self.signing_key.sign(challenge);
        Ok(signature.to_bytes().to_vec())
    }
}

/// Verify a challenge signature against an Ed25519 public identity.
pub fn verify_challenge(identity: &[u8], challenge: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(identity) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(challenge, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signatures_verify_against_identity() {
        let identity = Ed25519Identity::generate();
        let sig = identity.sign_challenge(b"challenge").await.unwrap();

        assert!(verify_challenge(&identity.public_identity(), b"challenge", &sig));
        assert!(!verify_challenge(&identity.public_identity(), b"other", &sig));
    }

    #[tokio::test]
    async fn signatures_are_deterministic() {
        let identity = Ed25519Identity::from_bytes(&[3u8; 32]);
        let a = identity.sign_challenge(b"same").await.unwrap();
        let b = identity.sign_challenge(b"same").await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn verify_rejects_malformed_inputs() {
        assert!(!verify_challenge(b"short", b"msg", &[0u8; 64]));
        let identity = Ed25519Identity::generate();
        assert!(!verify_challenge(&identity.public_identity(), b"msg", &[0u8; 10]));
    }
}
