//! Persistence boundary.
//!
//! The vault only ever hands ciphertext to a [`VaultStore`]. The SQLite
//! implementation lives in [`sqlite`]; the schema in [`schema`].

pub mod schema;
pub mod sqlite;

pub use schema::{Database, CURRENT_SCHEMA_VERSION};
pub use sqlite::SqliteStore;

use crate::audit::{AccessLogEntry, AccessLogFilter};
use crate::crypto::{KdfParams, Verifier};
use crate::entry::PasswordEntry;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::ErrorCode;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Storage-layer errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Conflicting concurrent change: {0}")]
    Conflict(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Current time at the microsecond precision the store keeps, so a value
/// read back compares equal to the one written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// The single master record of a vault installation.
#[derive(Debug, Clone)]
pub struct MasterRecord {
    pub kdf: KdfParams,
    pub verifier: Verifier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence collaborator for the vault core.
///
/// Implementations must be safe to share between tasks. Entry rows carry
/// envelopes only; access log rows can be appended and queried, never
/// changed.
pub trait VaultStore: Send + Sync {
    /// Load the master record, if the vault has been set up.
    fn load_master_record(&self) -> Result<Option<MasterRecord>, StoreError>;

    /// Create the master record. Fails with [`StoreError::AlreadyExists`]
    /// if one is present; an existing record is never overwritten.
    fn create_master_record(&self, record: &MasterRecord) -> Result<(), StoreError>;

    fn insert_entry(&self, entry: &PasswordEntry) -> Result<(), StoreError>;

    /// Replace a stored entry. Returns false if no row has that id.
    fn update_entry(&self, entry: &PasswordEntry) -> Result<bool, StoreError>;

    fn get_entry(&self, id: Uuid) -> Result<Option<PasswordEntry>, StoreError>;

    fn list_entries(&self) -> Result<Vec<PasswordEntry>, StoreError>;

    /// Hard delete. Returns false if no row has that id.
    fn delete_entry(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Replace the master record and every entry in one transaction.
    ///
    /// `entries` must cover every stored entry; otherwise nothing is written
    /// and [`StoreError::Conflict`] is returned.
    fn rekey(&self, record: &MasterRecord, entries: &[PasswordEntry]) -> Result<(), StoreError>;

    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<(), StoreError>;

    /// Matching rows, newest first.
    fn query_access_logs(&self, filter: &AccessLogFilter)
        -> Result<Vec<AccessLogEntry>, StoreError>;
}

impl<T: VaultStore + ?Sized> VaultStore for Arc<T> {
    fn load_master_record(&self) -> Result<Option<MasterRecord>, StoreError> {
        (**self).load_master_record()
    }

    fn create_master_record(&self, record: &MasterRecord) -> Result<(), StoreError> {
        (**self).create_master_record(record)
    }

    fn insert_entry(&self, entry: &PasswordEntry) -> Result<(), StoreError> {
        (**self).insert_entry(entry)
    }

    fn update_entry(&self, entry: &PasswordEntry) -> Result<bool, StoreError> {
        (**self).update_entry(entry)
    }

    fn get_entry(&self, id: Uuid) -> Result<Option<PasswordEntry>, StoreError> {
        (**self).get_entry(id)
    }

    fn list_entries(&self) -> Result<Vec<PasswordEntry>, StoreError> {
        (**self).list_entries()
    }

    fn delete_entry(&self, id: Uuid) -> Result<bool, StoreError> {
        (**self).delete_entry(id)
    }

    fn rekey(&self, record: &MasterRecord, entries: &[PasswordEntry]) -> Result<(), StoreError> {
        (**self).rekey(record, entries)
    }

    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        (**self).append_access_log(entry)
    }

    fn query_access_logs(
        &self,
        filter: &AccessLogFilter,
    ) -> Result<Vec<AccessLogEntry>, StoreError> {
        (**self).query_access_logs(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_has_microsecond_precision() {
        let t = now();
        assert_eq!(t.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(t.trunc_subsecs(6), t);
    }
}
