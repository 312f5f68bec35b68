//! Database schema and connection management.

use crate::store::StoreError;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Current schema version. Incremented when the schema changes.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Main database connection and schema manager
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    /// Create a new in-memory database for testing
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_millis(250))?;
        Ok(Self { conn })
    }

    /// Initialize the database schema
    pub fn initialize_schema(&self) -> Result<(), StoreError> {
        self.create_vault_master_table()?;
        self.create_entries_table()?;
        self.create_access_log_table()?;
        self.create_indexes()?;
        self.create_triggers()?;
        self.validate_schema_version()?;
        Ok(())
    }

    fn create_vault_master_table(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS vault_master (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                kdf_params BLOB NOT NULL,
                verifier BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_entries_table(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                entry_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                entry_type TEXT NOT NULL
                    CHECK (entry_type IN ('property_code', 'service_account', 'internal_system')),
                property_id TEXT,
                password_ciphertext BLOB NOT NULL,
                password_iv BLOB NOT NULL,
                username_ciphertext BLOB,
                username_iv BLOB,
                notes_ciphertext BLOB,
                notes_iv BLOB,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK ((username_ciphertext IS NULL) = (username_iv IS NULL)),
                CHECK ((notes_ciphertext IS NULL) = (notes_iv IS NULL))
            )",
            [],
        )?;
        Ok(())
    }

    fn create_access_log_table(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS access_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                log_id TEXT NOT NULL UNIQUE,
                entry_id TEXT NOT NULL,
                action TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                occurred_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<(), StoreError> {
        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_entries_property_id ON entries(property_id)",
            "CREATE INDEX IF NOT EXISTS idx_entries_name ON entries(name)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_entry_id ON access_log(entry_id)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_actor_id ON access_log(actor_id)",
            "CREATE INDEX IF NOT EXISTS idx_access_log_occurred_at ON access_log(occurred_at)",
        ];
        for sql in &indexes {
            self.conn.execute(sql, [])?;
        }
        Ok(())
    }

    fn create_triggers(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS access_log_no_update
             BEFORE UPDATE ON access_log
             BEGIN
                 SELECT RAISE(ABORT, 'access_log is append-only');
             END;

             CREATE TRIGGER IF NOT EXISTS access_log_no_delete
             BEFORE DELETE ON access_log
             BEGIN
                 SELECT RAISE(ABORT, 'access_log is append-only');
             END;

             CREATE TRIGGER IF NOT EXISTS vault_master_no_delete
             BEFORE DELETE ON vault_master
             BEGIN
                 SELECT RAISE(ABORT, 'vault_master cannot be deleted');
             END;",
        )?;
        Ok(())
    }

    /// Stamp a fresh database with the current version, or check that an
    /// existing one is not newer than this build understands.
    pub fn validate_schema_version(&self) -> Result<(), StoreError> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if version == 0 {
            self.conn
                .pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
            return Ok(());
        }

        Err(StoreError::SchemaMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found: version,
        })
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(db: &Database, kind: &str) -> Vec<String> {
        db.conn
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();

        let tables = names(&db, "table");
        assert!(tables.contains(&"vault_master".to_string()));
        assert!(tables.contains(&"entries".to_string()));
        assert!(tables.contains(&"access_log".to_string()));

        let indexes = names(&db, "index");
        assert!(indexes.contains(&"idx_access_log_entry_id".to_string()));
        assert!(indexes.contains(&"idx_entries_property_id".to_string()));

        let triggers = names(&db, "trigger");
        assert!(triggers.contains(&"access_log_no_update".to_string()));
        assert!(triggers.contains(&"access_log_no_delete".to_string()));
        assert!(triggers.contains(&"vault_master_no_delete".to_string()));
    }

    #[test]
    fn test_schema_initialization_is_idempotent() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.initialize_schema().unwrap();
    }

    #[test]
    fn test_schema_version_is_stamped() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        let version: i32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let db = Database::in_memory().unwrap();
        db.conn().pragma_update(None, "user_version", 99).unwrap();
        assert!(matches!(
            db.initialize_schema(),
            Err(StoreError::SchemaMismatch { expected: 1, found: 99 })
        ));
    }

    #[test]
    fn test_access_log_rejects_mutation() {
        let db = Database::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db.conn()
            .execute(
                "INSERT INTO access_log (log_id, entry_id, action, actor_id, occurred_at)
                 VALUES ('l1', 'e1', 'view', 'alice', 1)",
                [],
            )
            .unwrap();

        assert!(db
            .conn()
            .execute("UPDATE access_log SET actor_id = 'mallory'", [])
            .is_err());
        assert!(db.conn().execute("DELETE FROM access_log", []).is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM access_log", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
