//! Vault management - coordinates the key, the entry codec, storage and the
//! access log.


use crate::{
    audit::{AccessAction, AccessLogEntry, AccessLogFilter, AuditLog},
    autolock::{self, IdleTimer, SharedIdleTimer},
    codec::{apply_update, decrypt_entry, encrypt_entry, reencrypt_entry},
    config::VaultConfig,
    crypto::{CryptoError, KdfParams, VaultKey},
    entry::{DecryptedEntry, EntrySummary, EntryUpdate, NewEntry, PasswordEntry},
    identity::IdentityProvider,
    session::{VaultSession, VaultState},
    store::{self, MasterRecord, SqliteStore, StoreError, VaultStore},
    Result, VaultError,
};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

/// The vault: one master record, its entries and their access log.
///
/// All operations are async. The derived key lives in a session shared
/// with the idle watcher; entry operations hold the session's read guard
/// for their whole duration, so [`Vault::lock`] waits for them.
pub struct Vault<S> {
    store: Arc<S>,
    identity: Arc<dyn IdentityProvider>,
    session: Arc<RwLock<VaultSession>>,
    idle: SharedIdleTimer,
    watcher: Mutex<Option<JoinHandle<()>>>,
    audit: AuditLog<S>,
    config: VaultConfig,
}

impl Vault<SqliteStore> {
    /// Open (creating if needed) the SQLite vault at `config.database_path`.
    pub fn open(config: VaultConfig, identity: impl IdentityProvider + 'static) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let store = SqliteStore::open(&config.database_path)?;
        Ok(Self::new(store, identity, config))
    }

    /// A throwaway vault backed by in-memory SQLite.
    pub fn in_memory(config: VaultConfig, identity: impl IdentityProvider + 'static) -> Result<Self> {
        let store = SqliteStore::in_memory()?;
        Ok(Self::new(store, identity, config))
    }
}

impl<S: VaultStore> Vault<S> {
    pub fn new(store: S, identity: impl IdentityProvider + 'static, config: VaultConfig) -> Self {
        let store = Arc::new(store);
        let idle = Arc::new(Mutex::new(IdleTimer::new(config.session.idle_timeout())));
        Self {
            audit: AuditLog::new(Arc::clone(&store), config.retry.clone()),
            store,
            identity: Arc::new(identity),
            session: Arc::new(RwLock::new(VaultSession::new())),
            idle,
            watcher: Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> Result<VaultState> {
        if self.session.read().await.is_unlocked() {
            return Ok(VaultState::Unlocked);
        }
        match self.load_master_record().await? {
            Some(_) => Ok(VaultState::Locked),
            None => Ok(VaultState::Uninitialized),
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_unlocked()
    }

    /// Create the master record and leave the vault unlocked.
    pub async fn setup_master_password(&self, password: &str) -> Result<()> {
        require_password(password)?;
        if self.load_master_record().await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        let params = self.config.kdf.params();
        let key = derive_key(password, params.clone()).await?;
        let now = store::now();
        let record = MasterRecord {
            kdf: params,
            verifier: key.verifier(),
            created_at: now,
            updated_at: now,
        };

        self.config
            .retry
            .run("create_master_record", || self.store.create_master_record(&record))
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => VaultError::AlreadyInitialized,
                other => VaultError::Storage(other),
            })?;

        let epoch = self.session.write().await.install(key);
        self.touch();
        self.restart_watcher(epoch);
        info!("Vault created and unlocked");
        Ok(())
    }

    /// Verify `password` and make the derived key resident.
    ///
    /// A wrong password leaves the session exactly as it was, including an
    /// already unlocked one.
    pub async fn unlock(&self, password: &str) -> Result<()> {
        // Held across load and verify so a master password change cannot
        // commit between reading the record and installing its key.
        let mut session = self.session.write().await;
        let record = self
            .load_master_record()
            .await?
            .ok_or(VaultError::NotInitialized)?;

        let key = derive_key(password, record.kdf.clone()).await?;
        if !record.verifier.matches(&key) {
            warn!("Failed unlock attempt");
            return Err(VaultError::InvalidMasterPassword);
        }

        let epoch = session.install(key);
        drop(session);
        self.touch();
        self.restart_watcher(epoch);
        info!("Vault unlocked");
        Ok(())
    }

    /// Discard the resident key. Waits for in-flight entry operations;
    /// no-op when already locked.
    pub async fn lock(&self) {
        let cleared = self.session.write().await.clear();
        self.stop_watcher();
        if cleared {
            info!("Vault locked");
        }
    }

    pub async fn add_entry(&self, entry: NewEntry) -> Result<Uuid> {
        let session = self.session.read().await;
        let key = session.key()?;
        self.touch();

        let encrypted = encrypt_entry(&entry, key)?;
        self.config
            .retry
            .run("insert_entry", || self.store.insert_entry(&encrypted))
            .await?;

        self.audit
            .record_or_warn(encrypted.id, AccessAction::Create, &self.actor())
            .await;
        info!(entry_id = %encrypted.id, "Entry added");
        Ok(encrypted.id)
    }

    /// Apply `update` to entry `id`. Only changed secret fields are
    /// re-encrypted.
    pub async fn edit_entry(&self, id: Uuid, update: EntryUpdate) -> Result<EntrySummary> {
        let session = self.session.read().await;
        let key = session.key()?;
        self.touch();

        if update.is_empty() {
            return Err(VaultError::InvalidInput("Nothing to update".to_string()));
        }

        let current = self.fetch_entry(id).await?;
        let next = apply_update(&current, update, key)?;
        let updated = self
            .config
            .retry
            .run("update_entry", || self.store.update_entry(&next))
            .await?;
        if !updated {
            return Err(VaultError::EntryNotFound(id));
        }

        self.audit
            .record_or_warn(id, AccessAction::Update, &self.actor())
            .await;
        info!(entry_id = %id, "Entry updated");
        Ok(next.summary())
    }

    /// Hard delete.
    pub async fn delete_entry(&self, id: Uuid) -> Result<()> {
        let session = self.session.read().await;
        session.key()?;
        self.touch();

        let deleted = self
            .config
            .retry
            .run("delete_entry", || self.store.delete_entry(id))
            .await?;
        if !deleted {
            return Err(VaultError::EntryNotFound(id));
        }

        self.audit
            .record_or_warn(id, AccessAction::Delete, &self.actor())
            .await;
        info!(entry_id = %id, "Entry deleted");
        Ok(())
    }

    /// Decrypt one entry. Each successful call appends one `view` row.
    pub async fn view_entry(&self, id: Uuid) -> Result<DecryptedEntry> {
        let session = self.session.read().await;
        let key = session.key()?;
        self.touch();

        let entry = self.fetch_entry(id).await?;
        let decrypted = decrypt_entry(&entry, key)?;

        self.audit
            .record_or_warn(id, AccessAction::View, &self.actor())
            .await;
        Ok(decrypted)
    }

    /// Decrypt several entries under one read guard.
    ///
    /// Per-entry failures (missing, undecryptable) are reported next to the
    /// id; only a locked vault fails the whole call.
    pub async fn view_entries(&self, ids: &[Uuid]) -> Result<Vec<(Uuid, Result<DecryptedEntry>)>> {
        let session = self.session.read().await;
        let key = session.key()?;
        self.touch();

        let actor = self.actor();
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let result = match self.fetch_entry(id).await {
                Ok(entry) => decrypt_entry(&entry, key),
                Err(e) => Err(e),
            };
            if result.is_ok() {
                self.audit.record_or_warn(id, AccessAction::View, &actor).await;
            }
            results.push((id, result));
        }
        Ok(results)
    }

    /// Metadata of every entry. Nothing is decrypted and nothing is audited.
    pub async fn list_entries(&self) -> Result<Vec<EntrySummary>> {
        let session = self.session.read().await;
        session.key()?;
        self.touch();

        let entries = self
            .config
            .retry
            .run("list_entries", || self.store.list_entries())
            .await?;
        Ok(entries.iter().map(PasswordEntry::summary).collect())
    }

    /// Re-key the vault under a new master password.
    ///
    /// Every entry is re-encrypted in memory first; the new master record
    /// and all entries are then written in one transaction. On any failure
    /// storage and session keep the old key.
    pub async fn change_master_password(&self, current: &str, new: &str) -> Result<()> {
        require_password(new)?;

        let mut session = self.session.write().await;
        session.key()?;
        self.touch();

        let record = self
            .load_master_record()
            .await?
            .ok_or(VaultError::NotInitialized)?;
        let old_key = derive_key(current, record.kdf.clone()).await?;
        if !record.verifier.matches(&old_key) {
            warn!("Master password change rejected: current password mismatch");
            return Err(VaultError::InvalidMasterPassword);
        }

        let params = self.config.kdf.params();
        let new_key = derive_key(new, params.clone()).await?;

        let entries = self
            .config
            .retry
            .run("list_entries", || self.store.list_entries())
            .await?;
        let reencrypted = entries
            .iter()
            .map(|entry| reencrypt_entry(entry, &old_key, &new_key))
            .collect::<Result<Vec<_>>>()?;

        let next_record = MasterRecord {
            kdf: params,
            verifier: new_key.verifier(),
            created_at: record.created_at,
            updated_at: store::now(),
        };
        self.config
            .retry
            .run("rekey", || self.store.rekey(&next_record, &reencrypted))
            .await?;

        let epoch = session.install(new_key);
        drop(session);
        self.restart_watcher(epoch);

        let actor = self.actor();
        for entry in &reencrypted {
            self.audit
                .record_or_warn(entry.id, AccessAction::Reencrypt, &actor)
                .await;
        }
        info!(entries = reencrypted.len(), "Master password changed");
        Ok(())
    }

    /// Access log rows, newest first.
    pub async fn list_access_logs(&self, filter: &AccessLogFilter) -> Result<Vec<AccessLogEntry>> {
        self.audit.list(filter).await
    }

    /// Access log rows as JSON lines, newest first.
    pub async fn export_access_logs(&self, filter: &AccessLogFilter) -> Result<String> {
        self.audit.export_json_lines(filter).await
    }

    /// Access log rows that could not be written since this vault was opened.
    pub fn audit_failures(&self) -> u64 {
        self.audit.failures()
    }

    fn actor(&self) -> String {
        self.identity.actor_id()
    }

    fn touch(&self) {
        autolock::touch(&self.idle);
    }

    async fn load_master_record(&self) -> Result<Option<MasterRecord>> {
        let record = self
            .config
            .retry
            .run("load_master_record", || self.store.load_master_record())
            .await?;
        Ok(record)
    }

    async fn fetch_entry(&self, id: Uuid) -> Result<PasswordEntry> {
        self.config
            .retry
            .run("get_entry", || self.store.get_entry(id))
            .await?
            .ok_or(VaultError::EntryNotFound(id))
    }

    fn restart_watcher(&self, epoch: u64) {
        let handle = autolock::spawn_watcher(&self.session, Arc::clone(&self.idle), epoch);
        let mut watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(old) = std::mem::replace(&mut *watcher, handle) {
            old.abort();
        }
    }

    fn stop_watcher(&self) {
        let mut watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }
}

impl<S> Drop for Vault<S> {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
    }
}

fn require_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(VaultError::InvalidInput(
            "Master password must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run Argon2id on the blocking pool.
async fn derive_key(password: &str, params: KdfParams) -> Result<VaultKey> {
    let password = Zeroizing::new(password.as_bytes().to_vec());
    let key = tokio::task::spawn_blocking(move || VaultKey::derive(&password, &params))
        .await
        .map_err(|e| VaultError::Crypto(CryptoError::KdfFailed(format!("KDF task failed: {}", e))))??;
    Ok(key)
}
