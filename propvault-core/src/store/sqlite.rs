//! SQLite-backed [`VaultStore`].

use crate::audit::{AccessAction, AccessLogEntry, AccessLogFilter};
use crate::crypto::{Envelope, KdfParams, Verifier};
use crate::entry::{EntryMetadata, EntryType, PasswordEntry};
use crate::store::{Database, MasterRecord, StoreError, VaultStore};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{ffi, params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

const ENTRY_COLUMNS: &str = "entry_id, name, category, entry_type, property_id,
    password_ciphertext, password_iv, username_ciphertext, username_iv,
    notes_ciphertext, notes_iv, created_at, updated_at";

/// Vault storage in a single SQLite database file.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Database::open(path.as_ref())?;
        db.initialize_schema()?;
        info!("Vault database opened: {:?}", path.as_ref());
        Ok(Self { db: Mutex::new(db) })
    }

    /// Fresh in-memory store, used by tests and ephemeral sessions.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::in_memory()?;
        db.initialize_schema()?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db
            .lock()
            .map_err(|_| StoreError::LockPoisoned("Failed to lock database".to_string()))
    }
}

impl VaultStore for SqliteStore {
    fn load_master_record(&self) -> Result<Option<MasterRecord>, StoreError> {
        let db = self.db()?;
        let row = db
            .conn()
            .query_row(
                "SELECT kdf_params, verifier, created_at, updated_at
                 FROM vault_master WHERE id = 1",
                [],
                |row| {
                    let kdf_blob: Vec<u8> = row.get(0)?;
                    let verifier_blob: Vec<u8> = row.get(1)?;
                    let created_at: i64 = row.get(2)?;
                    let updated_at: i64 = row.get(3)?;
                    Ok((kdf_blob, verifier_blob, created_at, updated_at))
                },
            )
            .optional()?;

        let Some((kdf_blob, verifier_blob, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let kdf: KdfParams = bincode::deserialize(&kdf_blob)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let verifier: [u8; 32] = verifier_blob
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt("Verifier has wrong length".to_string()))?;

        Ok(Some(MasterRecord {
            kdf,
            verifier: Verifier(verifier),
            created_at: from_micros(created_at)?,
            updated_at: from_micros(updated_at)?,
        }))
    }

    fn create_master_record(&self, record: &MasterRecord) -> Result<(), StoreError> {
        let kdf_blob = bincode::serialize(&record.kdf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let db = self.db()?;
        db.conn()
            .execute(
                "INSERT INTO vault_master (id, kdf_params, verifier, created_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![
                    kdf_blob,
                    record.verifier.0.as_slice(),
                    record.created_at.timestamp_micros(),
                    record.updated_at.timestamp_micros(),
                ],
            )
            .map_err(constraint_as_exists)?;
        Ok(())
    }

    fn insert_entry(&self, entry: &PasswordEntry) -> Result<(), StoreError> {
        let db = self.db()?;
        db.conn()
            .execute(
                &format!(
                    "INSERT INTO entries ({}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    ENTRY_COLUMNS
                ),
                params![
                    entry.id.to_string(),
                    entry.metadata.name,
                    entry.metadata.category,
                    entry.metadata.entry_type.as_str(),
                    entry.metadata.property_id,
                    entry.password.ciphertext,
                    entry.password.iv.as_slice(),
                    entry.username.as_ref().map(|e| &e.ciphertext),
                    entry.username.as_ref().map(|e| e.iv.as_slice()),
                    entry.notes.as_ref().map(|e| &e.ciphertext),
                    entry.notes.as_ref().map(|e| e.iv.as_slice()),
                    entry.created_at.timestamp_micros(),
                    entry.updated_at.timestamp_micros(),
                ],
            )
            .map_err(constraint_as_exists)?;
        Ok(())
    }

    fn update_entry(&self, entry: &PasswordEntry) -> Result<bool, StoreError> {
        let db = self.db()?;
        let changed = write_entry_update(db.conn(), entry)?;
        Ok(changed > 0)
    }

    fn get_entry(&self, id: Uuid) -> Result<Option<PasswordEntry>, StoreError> {
        let db = self.db()?;
        let row = db
            .conn()
            .query_row(
                &format!("SELECT {} FROM entries WHERE entry_id = ?1", ENTRY_COLUMNS),
                [id.to_string()],
                EntryRow::read,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn list_entries(&self) -> Result<Vec<PasswordEntry>, StoreError> {
        let db = self.db()?;
        let mut stmt = db.conn().prepare(&format!(
            "SELECT {} FROM entries ORDER BY name COLLATE NOCASE, entry_id",
            ENTRY_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], EntryRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    fn delete_entry(&self, id: Uuid) -> Result<bool, StoreError> {
        let db = self.db()?;
        let rows_affected = db
            .conn()
            .execute("DELETE FROM entries WHERE entry_id = ?1", [id.to_string()])?;
        Ok(rows_affected > 0)
    }

    fn rekey(&self, record: &MasterRecord, entries: &[PasswordEntry]) -> Result<(), StoreError> {
        let kdf_blob = bincode::serialize(&record.kdf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut db = self.db()?;
        let tx = db.conn_mut().transaction()?;

        let stored: i64 = tx.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        if stored as usize != entries.len() {
            return Err(StoreError::Conflict(format!(
                "expected {} entries, found {}",
                entries.len(),
                stored
            )));
        }

        let changed = tx.execute(
            "UPDATE vault_master SET kdf_params = ?1, verifier = ?2, updated_at = ?3
             WHERE id = 1",
            params![
                kdf_blob,
                record.verifier.0.as_slice(),
                record.updated_at.timestamp_micros(),
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::Conflict("master record missing".to_string()));
        }

        for entry in entries {
            if write_entry_update(&tx, entry)? != 1 {
                return Err(StoreError::Conflict(format!("entry {} missing", entry.id)));
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn append_access_log(&self, entry: &AccessLogEntry) -> Result<(), StoreError> {
        let db = self.db()?;
        db.conn().execute(
            "INSERT INTO access_log (log_id, entry_id, action, actor_id, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.to_string(),
                entry.entry_id.to_string(),
                entry.action.as_str(),
                entry.actor_id,
                entry.timestamp.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    fn query_access_logs(
        &self,
        filter: &AccessLogFilter,
    ) -> Result<Vec<AccessLogEntry>, StoreError> {
        let mut sql = String::from(
            "SELECT log_id, entry_id, action, actor_id, occurred_at FROM access_log WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(entry_id) = filter.entry_id {
            sql.push_str(" AND entry_id = ?");
            values.push(Value::Text(entry_id.to_string()));
        }
        if let Some(actor_id) = &filter.actor_id {
            sql.push_str(" AND actor_id = ?");
            values.push(Value::Text(actor_id.clone()));
        }
        if let Some(action) = filter.action {
            sql.push_str(" AND action = ?");
            values.push(Value::Text(action.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND occurred_at >= ?");
            values.push(Value::Integer(since.timestamp_micros()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND occurred_at < ?");
            values.push(Value::Integer(until.timestamp_micros()));
        }
        sql.push_str(" ORDER BY occurred_at DESC, seq DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit.min(i64::MAX as usize) as i64));
        }

        let db = self.db()?;
        let mut stmt = db.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let log_id: String = row.get(0)?;
                let entry_id: String = row.get(1)?;
                let action: String = row.get(2)?;
                let actor_id: String = row.get(3)?;
                let occurred_at: i64 = row.get(4)?;
                Ok((log_id, entry_id, action, actor_id, occurred_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(log_id, entry_id, action, actor_id, occurred_at)| {
                Ok(AccessLogEntry {
                    id: parse_uuid(&log_id)?,
                    entry_id: parse_uuid(&entry_id)?,
                    action: action
                        .parse::<AccessAction>()
                        .map_err(|_| StoreError::Corrupt(format!("Unknown action: {}", action)))?,
                    actor_id,
                    timestamp: from_micros(occurred_at)?,
                })
            })
            .collect()
    }
}

fn write_entry_update(conn: &Connection, entry: &PasswordEntry) -> Result<usize, StoreError> {
    let changed = conn.execute(
        "UPDATE entries SET
            name = ?2, category = ?3, entry_type = ?4, property_id = ?5,
            password_ciphertext = ?6, password_iv = ?7,
            username_ciphertext = ?8, username_iv = ?9,
            notes_ciphertext = ?10, notes_iv = ?11,
            updated_at = ?12
         WHERE entry_id = ?1",
        params![
            entry.id.to_string(),
            entry.metadata.name,
            entry.metadata.category,
            entry.metadata.entry_type.as_str(),
            entry.metadata.property_id,
            entry.password.ciphertext,
            entry.password.iv.as_slice(),
            entry.username.as_ref().map(|e| &e.ciphertext),
            entry.username.as_ref().map(|e| e.iv.as_slice()),
            entry.notes.as_ref().map(|e| &e.ciphertext),
            entry.notes.as_ref().map(|e| e.iv.as_slice()),
            entry.updated_at.timestamp_micros(),
        ],
    )?;
    Ok(changed)
}

/// Raw column values of an `entries` row.
struct EntryRow {
    entry_id: String,
    name: String,
    category: String,
    entry_type: String,
    property_id: Option<String>,
    password: (Vec<u8>, Vec<u8>),
    username: (Option<Vec<u8>>, Option<Vec<u8>>),
    notes: (Option<Vec<u8>>, Option<Vec<u8>>),
    created_at: i64,
    updated_at: i64,
}

impl EntryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entry_id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            entry_type: row.get(3)?,
            property_id: row.get(4)?,
            password: (row.get(5)?, row.get(6)?),
            username: (row.get(7)?, row.get(8)?),
            notes: (row.get(9)?, row.get(10)?),
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_entry(self) -> Result<PasswordEntry, StoreError> {
        let entry_type: EntryType = self
            .entry_type
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("Unknown entry type: {}", self.entry_type)))?;
        let (password_ct, password_iv) = self.password;

        Ok(PasswordEntry {
            id: parse_uuid(&self.entry_id)?,
            metadata: EntryMetadata {
                name: self.name,
                category: self.category,
                entry_type,
                property_id: self.property_id,
            },
            password: envelope(password_ct, &password_iv)?,
            username: optional_envelope(self.username)?,
            notes: optional_envelope(self.notes)?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

fn envelope(ciphertext: Vec<u8>, iv: &[u8]) -> Result<Envelope, StoreError> {
    Envelope::from_parts(ciphertext, iv).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn optional_envelope(
    columns: (Option<Vec<u8>>, Option<Vec<u8>>),
) -> Result<Option<Envelope>, StoreError> {
    match columns {
        (Some(ciphertext), Some(iv)) => envelope(ciphertext, &iv).map(Some),
        (None, None) => Ok(None),
        _ => Err(StoreError::Corrupt(
            "Ciphertext and IV must be stored together".to_string(),
        )),
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt(format!("Invalid id: {}", value)))
}

fn from_micros(value: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid timestamp: {}", value)))
}

/// Key collisions become [`StoreError::AlreadyExists`]; CHECK and NOT NULL
/// failures stay plain SQLite errors.
fn constraint_as_exists(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::AlreadyExists
        }
        _ => StoreError::Sqlite(err),
    }
}
