//! Resident vault key and its verifier.
//!
//! Master Password → Argon2id → Vault Key → SHA-256 (domain separated) → Verifier
//!
//! Only the verifier is persisted. The key lives in process memory while the
//! vault is unlocked and is wiped on drop.

use crate::crypto::{kdf::derive_master_key, KdfParams, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;

const VERIFIER_DOMAIN: &[u8] = b"propvault/verifier/v1";

/// The symmetric key derived from the master password.
///
/// Never persisted and never serialized.
#[derive(ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_LEN],
}

impl VaultKey {
    /// Create a vault key from raw bytes
    pub fn from_bytes(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Derive the key for `password` under `params`.
    pub fn derive(password: &[u8], params: &KdfParams) -> Result<Self> {
        let derived = derive_master_key(password, params)?;
        Ok(Self::from_bytes(*derived))
    }

    /// Get a reference to the key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    /// Verifier persisted alongside the salt.
    pub fn verifier(&self) -> Verifier {
        compute_verifier(self)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(<redacted>)")
    }
}

/// Hash of the derived key, used to check a master password without
/// storing it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Verifier(pub [u8; 32]);

impl Verifier {
    /// Constant-time comparison against `key`'s verifier.
    pub fn matches(&self, key: &VaultKey) -> bool {
        let candidate = compute_verifier(key);
        self.0.ct_eq(&candidate.0).into()
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Verifier(..)")
    }
}

/// Compute the domain-separated verifier for a key.
pub fn compute_verifier(key: &VaultKey) -> Verifier {
    let mut hasher = Sha256::new();
    hasher.update(VERIFIER_DOMAIN);
    hasher.update(key.as_bytes());
    Verifier(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::MIN_MEM_COST;

    fn cheap() -> KdfParams {
        KdfParams::with_cost(MIN_MEM_COST, 1, 1)
    }

    #[test]
    fn test_verifier_matches_same_password() {
        let params = cheap();
        let key = VaultKey::derive(b"Correct-Horse-1!", &params).unwrap();
        let verifier = key.verifier();

        let again = VaultKey::derive(b"Correct-Horse-1!", &params).unwrap();
        assert!(verifier.matches(&again));
    }

    #[test]
    fn test_verifier_rejects_wrong_password() {
        let params = cheap();
        let verifier = VaultKey::derive(b"Correct-Horse-1!", &params)
            .unwrap()
            .verifier();

        let wrong = VaultKey::derive(b"wrong-password", &params).unwrap();
        assert!(!verifier.matches(&wrong));
    }

    #[test]
    fn test_verifier_is_not_the_key() {
        let key = VaultKey::from_bytes([7u8; KEY_LEN]);
        assert_ne!(&key.verifier().0, key.as_bytes());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = VaultKey::from_bytes([0xAB; KEY_LEN]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains("171"));
        assert!(rendered.contains("redacted"));
    }
}
