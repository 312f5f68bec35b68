//! Cryptographic primitives for the vault.
//!
//! This module provides:
//! - Argon2id master-key derivation
//! - Master-key verifier computation and constant-time checking
//! - AES-256-GCM field envelopes

pub mod cipher;
pub mod kdf;
pub mod keyring;

pub use cipher::{decrypt_field, encrypt_field, Envelope, IV_LEN, TAG_LEN};
pub use kdf::{derive_master_key, KdfParams, SALT_LEN};
pub use keyring::{compute_verifier, VaultKey, Verifier, KEY_LEN};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KdfFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Authentication failed - data may have been tampered with")]
    AuthenticationFailed,

    #[error("Invalid IV length: expected {expected}, got {got}")]
    InvalidIvLength { expected: usize, got: usize },
}

impl CryptoError {
    /// True when the error means a ciphertext could not be opened.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed(_)
                | CryptoError::AuthenticationFailed
                | CryptoError::InvalidIvLength { .. }
        )
    }
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
