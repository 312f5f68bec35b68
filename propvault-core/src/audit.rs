//! Append-only access audit log.
//!
//! Every successful entry operation leaves one row naming the entry, the
//! action, the actor and the time. Rows are written through the
//! [`VaultStore`] and can only be appended or queried.

use crate::retry::RetryPolicy;
use crate::store::{self, VaultStore};
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What was done to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessAction {
    View,
    Create,
    Update,
    Delete,
    /// Entry re-encrypted under a new master key
    Reencrypt,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::View => "view",
            AccessAction::Create => "create",
            AccessAction::Update => "update",
            AccessAction::Delete => "delete",
            AccessAction::Reencrypt => "reencrypt",
        }
    }
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessAction {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(AccessAction::View),
            "create" => Ok(AccessAction::Create),
            "update" => Ok(AccessAction::Update),
            "delete" => Ok(AccessAction::Delete),
            "reencrypt" => Ok(AccessAction::Reencrypt),
            other => Err(VaultError::InvalidInput(format!(
                "Unknown access action: {}",
                other
            ))),
        }
    }
}

/// One audit row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: Uuid,
    pub entry_id: Uuid,
    pub action: AccessAction,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessLogEntry {
    pub fn new(entry_id: Uuid, action: AccessAction, actor_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entry_id,
            action,
            actor_id: actor_id.into(),
            timestamp: store::now(),
        }
    }
}

/// Query over the access log. Empty filter matches every row.
///
/// `since` is inclusive, `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessLogFilter {
    pub entry_id: Option<Uuid>,
    pub actor_id: Option<String>,
    pub action: Option<AccessAction>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AccessLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry_id: Uuid) -> Self {
        self.entry_id = Some(entry_id);
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn action(mut self, action: AccessAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` passes every condition except `limit`.
    pub fn matches(&self, entry: &AccessLogEntry) -> bool {
        self.entry_id.map_or(true, |id| entry.entry_id == id)
            && self
                .actor_id
                .as_deref()
                .map_or(true, |actor| entry.actor_id == actor)
            && self.action.map_or(true, |action| entry.action == action)
            && self.since.map_or(true, |since| entry.timestamp >= since)
            && self.until.map_or(true, |until| entry.timestamp < until)
    }
}

/// Writer and reader for the access log.
pub struct AuditLog<S> {
    store: Arc<S>,
    retry: RetryPolicy,
    failures: AtomicU64,
}

impl<S: VaultStore> AuditLog<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            failures: AtomicU64::new(0),
        }
    }

    /// Append one row. Transient storage failures are retried.
    pub async fn record_access(
        &self,
        entry_id: Uuid,
        action: AccessAction,
        actor_id: &str,
    ) -> Result<AccessLogEntry> {
        let entry = AccessLogEntry::new(entry_id, action, actor_id);
        self.retry
            .run("append_access_log", || self.store.append_access_log(&entry))
            .await
            .map_err(|e| VaultError::AuditLogWriteFailed(e.to_string()))?;
        Ok(entry)
    }

    /// Append one row without failing the caller.
    ///
    /// A failed write is logged and counted; the audited operation has
    /// already happened and stands.
    pub async fn record_or_warn(&self, entry_id: Uuid, action: AccessAction, actor_id: &str) {
        if let Err(err) = self.record_access(entry_id, action, actor_id).await {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                entry_id = %entry_id,
                action = action.as_str(),
                error = %err,
                "Access was not recorded"
            );
        }
    }

    /// Matching rows, newest first.
    pub async fn list(&self, filter: &AccessLogFilter) -> Result<Vec<AccessLogEntry>> {
        let rows = self
            .retry
            .run("query_access_logs", || self.store.query_access_logs(filter))
            .await?;
        Ok(rows)
    }

    /// Matching rows as JSON lines, newest first.
    pub async fn export_json_lines(&self, filter: &AccessLogFilter) -> Result<String> {
        let rows = self.list(filter).await?;
        let mut out = String::new();
        for row in &rows {
            let line = serde_json::to_string(row).map_err(|e| {
                VaultError::Storage(crate::StoreError::Serialization(format!(
                    "Failed to serialize access log entry: {}",
                    e
                )))
            })?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    /// Number of rows that could not be written since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::Duration;

    fn audit_log() -> AuditLog<SqliteStore> {
        AuditLog::new(Arc::new(SqliteStore::in_memory().unwrap()), RetryPolicy::none())
    }

    #[test]
    fn test_action_names() {
        for action in [
            AccessAction::View,
            AccessAction::Create,
            AccessAction::Update,
            AccessAction::Delete,
            AccessAction::Reencrypt,
        ] {
            assert_eq!(action.as_str().parse::<AccessAction>().unwrap(), action);
        }
        assert!("read".parse::<AccessAction>().is_err());
    }

    #[test]
    fn test_filter_matches() {
        let id = Uuid::new_v4();
        let row = AccessLogEntry::new(id, AccessAction::View, "alice");

        assert!(AccessLogFilter::new().matches(&row));
        assert!(AccessLogFilter::new().entry(id).actor("alice").matches(&row));
        assert!(!AccessLogFilter::new().entry(Uuid::new_v4()).matches(&row));
        assert!(!AccessLogFilter::new().action(AccessAction::Delete).matches(&row));
        assert!(AccessLogFilter::new().since(row.timestamp).matches(&row));
        assert!(!AccessLogFilter::new().until(row.timestamp).matches(&row));
        assert!(AccessLogFilter::new()
            .until(row.timestamp + Duration::seconds(1))
            .matches(&row));
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let log = audit_log();
        let id = Uuid::new_v4();

        log.record_access(id, AccessAction::Create, "alice").await.unwrap();
        log.record_access(id, AccessAction::View, "bob").await.unwrap();

        let rows = log.list(&AccessLogFilter::new().entry(id)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, AccessAction::View);
        assert_eq!(rows[0].actor_id, "bob");
        assert_eq!(log.failures(), 0);
    }

    #[tokio::test]
    async fn test_export_json_lines() {
        let log = audit_log();
        let id = Uuid::new_v4();
        log.record_access(id, AccessAction::View, "alice").await.unwrap();

        let json = log.export_json_lines(&AccessLogFilter::new()).await.unwrap();
        let lines: Vec<_> = json.lines().collect();
        assert_eq!(lines.len(), 1);

        let parsed: AccessLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.entry_id, id);
        assert_eq!(parsed.action, AccessAction::View);
        assert!(lines[0].contains("\"action\":\"view\""));
    }
}
