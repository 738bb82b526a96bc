//! AES-256-GCM sealing of vault records under the session key.
//!
//! Wire format of a sealed blob:
//! `nonce(12) || ciphertext || auth_tag(16)`

use crate::crypto::zero::SESSION_KEY_LEN;
use crate::crypto::{CryptoError, Result};
use crate::sync::models::{RecordPayload, SealedRecord};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypt raw bytes. Returns `nonce || ciphertext || tag`.
pub fn encrypt_blob(key: &[u8; SESSION_KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(CryptoError::EncryptionFailed(
            "Cannot encrypt empty payload".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext_with_tag = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext_with_tag.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext_with_tag);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt_blob`]. The plaintext is wiped on drop.
pub fn decrypt_blob(key: &[u8; SESSION_KEY_LEN], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    // nonce + at least one byte + tag
    if blob.len() < NONCE_LEN + 1 + TAG_LEN {
        return Err(CryptoError::DecryptionFailed("Blob too short".to_string()));
    }

    let (nonce_bytes, ciphertext_with_tag) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext_with_tag)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Serialize and encrypt a record payload.
pub fn seal_record(key: &[u8; SESSION_KEY_LEN], payload: &RecordPayload) -> Result<SealedRecord> {
    let json = Zeroizing::new(
        serde_json::to_vec(payload)
            .map_err(|e| CryptoError::EncryptionFailed(format!("Serialize record: {}", e)))?,
    );
    let ciphertext = encrypt_blob(key, &json)?;

    Ok(SealedRecord {
        kind: payload.kind,
        ciphertext,
    })
}

/// Decrypt and deserialize a sealed record.
pub fn open_record(key: &[u8; SESSION_KEY_LEN], sealed: &SealedRecord) -> Result<RecordPayload> {
    let json = decrypt_blob(key, &sealed.ciphertext)?;
    let payload: RecordPayload = serde_json::from_slice(&json)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Deserialize record: {}", e)))?;

    if payload.kind != sealed.kind {
        return Err(CryptoError::DecryptionFailed(
            "Record kind does not match sealed header".to_string(),
        ));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::EntryKind;

    const KEY: [u8; SESSION_KEY_LEN] = [42u8; SESSION_KEY_LEN];

    #[test]
    fn test_blob_layout() {
        let blob = encrypt_blob(&KEY, b"hello").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + 5 + TAG_LEN);
    }

    #[test]
    fn test_unique_nonces() {
        let a = encrypt_blob(&KEY, b"same").unwrap();
        let b = encrypt_blob(&KEY, b"same").unwrap();
        assert_ne!(&a[..NONCE_LEN], &b[..NONCE_LEN]);
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        assert!(encrypt_blob(&KEY, b"").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = encrypt_blob(&KEY, b"secret").unwrap();
        let other = [7u8; SESSION_KEY_LEN];
        assert_eq!(
            decrypt_blob(&other, &blob).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn test_tampered_blob_fails() {
        let mut blob = encrypt_blob(&KEY, b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(decrypt_blob(&KEY, &blob).is_err());
    }

    #[test]
    fn test_short_blob_rejected() {
        assert!(matches!(
            decrypt_blob(&KEY, &[0u8; 20]),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_seal_and_open_record() {
        let payload = RecordPayload::new(EntryKind::Login, "GitHub")
            .with_field("username", "dev@example.com")
            .with_field("password", "s3cret");

        let sealed = seal_record(&KEY, &payload).unwrap();
        assert_eq!(sealed.kind, EntryKind::Login);
        assert!(!sealed
            .ciphertext
            .windows(6)
            .any(|w| w == b"s3cret"));

        let opened = open_record(&KEY, &sealed).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let payload = RecordPayload::new(EntryKind::SecureNote, "note");
        let mut sealed = seal_record(&KEY, &payload).unwrap();
        sealed.kind = EntryKind::ApiKey;
        assert!(open_record(&KEY, &sealed).is_err());
    }
}
