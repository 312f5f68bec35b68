//! Vault lock state and the resident key cell.
//!
//! The session is owned by the [`Vault`](crate::Vault) and shared with the
//! auto-lock watcher through `Arc<RwLock<VaultSession>>`. Entry operations
//! hold a read guard for as long as they use the key, so a `lock()` (which
//! needs the write guard) waits for them to finish.

use crate::crypto::VaultKey;
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lifecycle state of the vault
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    /// No master record exists yet.
    Uninitialized,
    /// Master record exists, no key resident.
    Locked,
    /// Key resident in memory.
    Unlocked,
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VaultState::Uninitialized => "uninitialized",
            VaultState::Locked => "locked",
            VaultState::Unlocked => "unlocked",
        };
        f.write_str(s)
    }
}

/// Process-local holder of the derived key.
///
/// `epoch` increases on every install or clear, which lets background tasks
/// tell whether the session they were started for is still the current one.
#[derive(Default)]
pub struct VaultSession {
    key: Option<VaultKey>,
    epoch: u64,
}

impl VaultSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The resident key, or [`VaultError::VaultLocked`].
    pub fn key(&self) -> Result<&VaultKey> {
        self.key.as_ref().ok_or(VaultError::VaultLocked)
    }

    /// Make `key` resident, replacing (and wiping) any previous key.
    pub fn install(&mut self, key: VaultKey) -> u64 {
        self.key = Some(key);
        self.epoch += 1;
        debug!(epoch = self.epoch, "Vault key installed");
        self.epoch
    }

    /// Drop the resident key. Returns whether a key was present.
    pub fn clear(&mut self) -> bool {
        match self.key.take() {
            Some(_) => {
                self.epoch += 1;
                debug!(epoch = self.epoch, "Vault key discarded");
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("unlocked", &self.is_unlocked())
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    #[test]
    fn test_new_session_is_locked() {
        let session = VaultSession::new();
        assert!(!session.is_unlocked());
        assert!(matches!(session.key(), Err(VaultError::VaultLocked)));
    }

    #[test]
    fn test_install_and_clear_bump_epoch() {
        let mut session = VaultSession::new();
        let epoch = session.install(VaultKey::from_bytes([1; KEY_LEN]));
        assert_eq!(epoch, 1);
        assert!(session.is_unlocked());
        assert!(session.key().is_ok());

        assert!(session.clear());
        assert_eq!(session.epoch(), 2);
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut session = VaultSession::new();
        assert!(!session.clear());
        assert!(!session.clear());
        assert_eq!(session.epoch(), 0);
    }

    #[test]
    fn test_debug_does_not_print_key() {
        let mut session = VaultSession::new();
        session.install(VaultKey::from_bytes([0x5A; KEY_LEN]));
        let rendered = format!("{:?}", session);
        assert!(rendered.contains("unlocked: true"));
        assert!(!rendered.contains("90"));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(VaultState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(VaultState::Locked.to_string(), "locked");
        assert_eq!(VaultState::Unlocked.to_string(), "unlocked");
    }
}
