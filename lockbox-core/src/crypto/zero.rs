//! Zeroizing storage for the session secret.
//!
//! The store owns exactly one fixed-size slot. Replacing or clearing the
//! secret overwrites that slot in place, so no stale copy of an old key is
//! left behind waiting for the allocator.

use zeroize::{Zeroize, Zeroizing};

/// Length in bytes of the derived session key.
pub const SESSION_KEY_LEN: usize = 32;

/// Key bytes in transit to the store. Wiped when dropped.
pub type SessionKeyMaterial = Zeroizing<[u8; SESSION_KEY_LEN]>;

/// Container for a single session secret.
///
/// Only the owning `SessionManager` reads the slot, and only for the
/// duration of one cryptographic operation via [`SecretStore::with_secret`].
pub struct SecretStore {
    slot: [u8; SESSION_KEY_LEN],
    live: bool,
}

impl SecretStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            slot: [0u8; SESSION_KEY_LEN],
            live: false,
        }
    }

    /// Replace the held secret, or clear it when `secret` is `None`.
    ///
    /// The previous contents are zeroed before the new bytes are written.
    pub fn set(&mut self, secret: Option<SessionKeyMaterial>) {
        self.slot.zeroize();
        self.live = false;

        if let Some(secret) = secret {
            self.slot.copy_from_slice(&secret[..]);
            self.live = true;
        }
    }

    /// Borrow the secret for one operation. Returns `None` when empty.
    pub(crate) fn with_secret<R>(&self, f: impl FnOnce(&[u8; SESSION_KEY_LEN]) -> R) -> Option<R> {
        if self.live {
            Some(f(&self.slot))
        } else {
            None
        }
    }

    /// Zero the slot and release the secret. Idempotent.
    pub fn clear(&mut self) {
        self.set(None);
    }

    /// Whether a secret is currently held
    pub fn is_set(&self) -> bool {
        self.live
    }

    #[cfg(test)]
    pub(crate) fn raw_slot(&self) -> [u8; SESSION_KEY_LEN] {
        self.slot
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecretStore {
    fn drop(&mut self) {
        self.slot.zeroize();
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}
