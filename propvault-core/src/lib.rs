//! Property vault core library
//!
//! Client-side encrypted storage for property access codes, service-account
//! credentials and internal-system passwords, gated by a master password.
//! Provides key derivation and the lock state machine, the per-field entry
//! codec, and the append-only access audit log.

pub mod audit;
pub mod autolock;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod identity;
pub mod retry;
pub mod session;
pub mod store;
pub mod vault;

pub use audit::{AccessAction, AccessLogEntry, AccessLogFilter};
pub use config::VaultConfig;
pub use crypto::{CryptoError, Envelope, KdfParams, VaultKey};
pub use entry::{
    DecryptedEntry, EntryMetadata, EntrySummary, EntryType, EntryUpdate, FieldChange, NewEntry,
    PasswordEntry,
};
pub use identity::{IdentityProvider, StaticIdentity};
pub use retry::RetryPolicy;
pub use session::VaultState;
pub use store::{MasterRecord, SqliteStore, StoreError, VaultStore};
pub use vault::Vault;

use thiserror::Error;
use uuid::Uuid;

/// Result type for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// General error type for vault operations
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault is already initialized")]
    AlreadyInitialized,

    #[error("Vault has not been set up yet")]
    NotInitialized,

    #[error("Invalid master password")]
    InvalidMasterPassword,

    #[error("Vault is locked")]
    VaultLocked,

    #[error("Decryption failed - entry cannot be opened with the current key")]
    DecryptionFailed,

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("Audit log write failed: {0}")]
    AuditLogWriteFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        if err.is_decryption_failure() {
            VaultError::DecryptionFailed
        } else {
            VaultError::Crypto(err)
        }
    }
}

impl VaultError {
    /// Errors the UI should answer with a fresh unlock prompt.
    pub fn needs_unlock(&self) -> bool {
        matches!(self, VaultError::VaultLocked | VaultError::DecryptionFailed)
    }
}
