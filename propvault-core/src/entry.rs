//! Vault entry types.
//!
//! [`NewEntry`] and [`EntryUpdate`] carry plaintext secrets from the UI and
//! are validated at construction. [`PasswordEntry`] is the persisted shape
//! and only ever holds envelopes. [`DecryptedEntry`] is what `view_entry`
//! hands back.

use crate::crypto::Envelope;
use crate::{Result, VaultError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Kind of secret stored in an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    PropertyCode,
    ServiceAccount,
    InternalSystem,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::PropertyCode => "property_code",
            EntryType::ServiceAccount => "service_account",
            EntryType::InternalSystem => "internal_system",
        }
    }

    /// Service accounts are useless without a login name.
    pub fn requires_username(&self) -> bool {
        matches!(self, EntryType::ServiceAccount)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "property_code" => Ok(EntryType::PropertyCode),
            "service_account" => Ok(EntryType::ServiceAccount),
            "internal_system" => Ok(EntryType::InternalSystem),
            other => Err(VaultError::InvalidInput(format!(
                "Unknown entry type: {}",
                other
            ))),
        }
    }
}

/// Plaintext metadata shared by every entry. Stored unencrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    pub category: String,
    pub entry_type: EntryType,
    pub property_id: Option<String>,
}

/// The secret sub-fields of an entry.
pub struct SecretFields {
    pub password: Zeroizing<String>,
    pub username: Option<Zeroizing<String>>,
    pub notes: Option<Zeroizing<String>>,
}

impl fmt::Debug for SecretFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretFields")
            .field("password", &"<redacted>")
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("notes", &self.notes.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A validated request to add an entry.
#[derive(Debug)]
pub struct NewEntry {
    pub(crate) metadata: EntryMetadata,
    pub(crate) secrets: SecretFields,
}

impl NewEntry {
    /// Start building an entry; only the password is mandatory.
    pub fn builder(
        name: impl Into<String>,
        entry_type: EntryType,
        password: impl Into<String>,
    ) -> NewEntryBuilder {
        NewEntryBuilder {
            name: name.into(),
            entry_type,
            password: Zeroizing::new(password.into()),
            category: String::new(),
            property_id: None,
            username: None,
            notes: None,
        }
    }

    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }
}

/// Builder for [`NewEntry`].
pub struct NewEntryBuilder {
    name: String,
    entry_type: EntryType,
    password: Zeroizing<String>,
    category: String,
    property_id: Option<String>,
    username: Option<Zeroizing<String>>,
    notes: Option<Zeroizing<String>>,
}

impl NewEntryBuilder {
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn property_id(mut self, property_id: impl Into<String>) -> Self {
        self.property_id = Some(property_id.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(Zeroizing::new(username.into()));
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(Zeroizing::new(notes.into()));
        self
    }

    /// Validate and produce the entry.
    pub fn build(self) -> Result<NewEntry> {
        let name = required_text("name", self.name)?;
        if self.password.is_empty() {
            return Err(VaultError::InvalidInput("Password must not be empty".to_string()));
        }

        let username = non_empty_secret(self.username);
        if self.entry_type.requires_username() && username.is_none() {
            return Err(VaultError::InvalidInput(format!(
                "A {} entry needs a username",
                self.entry_type
            )));
        }

        Ok(NewEntry {
            metadata: EntryMetadata {
                name,
                category: self.category.trim().to_string(),
                entry_type: self.entry_type,
                property_id: non_empty_text(self.property_id),
            },
            secrets: SecretFields {
                password: self.password,
                username,
                notes: non_empty_secret(self.notes),
            },
        })
    }
}

/// Change to an optional field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldChange<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T> FieldChange<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldChange::Keep)
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldChange::Keep => "keep",
            FieldChange::Set(_) => "set",
            FieldChange::Clear => "clear",
        }
    }
}

/// A partial edit of an existing entry.
///
/// Only secret fields that are actually changed get re-encrypted.
#[derive(Default)]
pub struct EntryUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub entry_type: Option<EntryType>,
    pub property_id: FieldChange<String>,
    pub password: Option<Zeroizing<String>>,
    pub username: FieldChange<Zeroizing<String>>,
    pub notes: FieldChange<Zeroizing<String>>,
}

impl fmt::Debug for EntryUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryUpdate")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("entry_type", &self.entry_type)
            .field("property_id", &self.property_id)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username.describe())
            .field("notes", &self.notes.describe())
            .finish()
    }
}

impl EntryUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = Some(entry_type);
        self
    }

    pub fn property_id(mut self, property_id: FieldChange<String>) -> Self {
        self.property_id = property_id;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = FieldChange::Set(Zeroizing::new(username.into()));
        self
    }

    pub fn clear_username(mut self) -> Self {
        self.username = FieldChange::Clear;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = FieldChange::Set(Zeroizing::new(notes.into()));
        self
    }

    pub fn clear_notes(mut self) -> Self {
        self.notes = FieldChange::Clear;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.entry_type.is_none()
            && self.property_id.is_keep()
            && self.password.is_none()
            && self.username.is_keep()
            && self.notes.is_keep()
    }

    /// Whether any secret field changes.
    pub fn touches_secrets(&self) -> bool {
        self.password.is_some() || !self.username.is_keep() || !self.notes.is_keep()
    }
}

/// An entry as persisted: plaintext metadata plus envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordEntry {
    pub id: Uuid,
    pub metadata: EntryMetadata,
    pub password: Envelope,
    pub username: Option<Envelope>,
    pub notes: Option<Envelope>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PasswordEntry {
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            id: self.id,
            metadata: self.metadata.clone(),
            has_username: self.username.is_some(),
            has_notes: self.notes.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of an entry (no secrets, not even encrypted ones).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: Uuid,
    pub metadata: EntryMetadata,
    pub has_username: bool,
    pub has_notes: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fully decrypted entry.
#[derive(Debug)]
pub struct DecryptedEntry {
    pub id: Uuid,
    pub metadata: EntryMetadata,
    pub secrets: SecretFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DecryptedEntry {
    pub fn password(&self) -> &str {
        &self.secrets.password
    }

    pub fn username(&self) -> Option<&str> {
        self.secrets.username.as_ref().map(|u| u.as_str())
    }

    pub fn notes(&self) -> Option<&str> {
        self.secrets.notes.as_ref().map(|n| n.as_str())
    }
}

fn required_text(field: &str, value: String) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn non_empty_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn non_empty_secret(value: Option<Zeroizing<String>>) -> Option<Zeroizing<String>> {
    value.filter(|v| !v.is_empty())
}

pub(crate) fn validate_metadata(metadata: &EntryMetadata, has_username: bool) -> Result<()> {
    if metadata.name.trim().is_empty() {
        return Err(VaultError::InvalidInput("name must not be empty".to_string()));
    }
    if metadata.entry_type.requires_username() && !has_username {
        return Err(VaultError::InvalidInput(format!(
            "A {} entry needs a username",
            metadata.entry_type
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trips_through_str() {
        for ty in [
            EntryType::PropertyCode,
            EntryType::ServiceAccount,
            EntryType::InternalSystem,
        ] {
            assert_eq!(ty.as_str().parse::<EntryType>().unwrap(), ty);
        }
        assert!("wifi".parse::<EntryType>().is_err());
    }

    #[test]
    fn test_entry_type_serde_is_snake_case() {
        let json = serde_json::to_string(&EntryType::ServiceAccount).unwrap();
        assert_eq!(json, "\"service_account\"");
    }

    #[test]
    fn test_builder_normalizes_optional_fields() {
        let entry = NewEntry::builder("  Gate Code ", EntryType::PropertyCode, "4477#")
            .category(" access ")
            .property_id("   ")
            .username("")
            .notes("side gate")
            .build()
            .unwrap();

        assert_eq!(entry.metadata.name, "Gate Code");
        assert_eq!(entry.metadata.category, "access");
        assert!(entry.metadata.property_id.is_none());
        assert!(entry.secrets.username.is_none());
        assert_eq!(entry.secrets.notes.as_deref().map(|n| n.as_str()), Some("side gate"));
    }

    #[test]
    fn test_builder_rejects_missing_required_fields() {
        assert!(NewEntry::builder(" ", EntryType::PropertyCode, "1234")
            .build()
            .is_err());
        assert!(NewEntry::builder("Gate", EntryType::PropertyCode, "")
            .build()
            .is_err());
    }

    #[test]
    fn test_service_account_requires_username() {
        let err = NewEntry::builder("Pool Vendor", EntryType::ServiceAccount, "pw")
            .build()
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));

        assert!(NewEntry::builder("Pool Vendor", EntryType::ServiceAccount, "pw")
            .username("pool@vendor.test")
            .build()
            .is_ok());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let entry = NewEntry::builder("Alarm", EntryType::InternalSystem, "s3cr3t")
            .notes("panel in garage")
            .build()
            .unwrap();
        let rendered = format!("{:?}", entry);
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("garage"));
    }

    #[test]
    fn test_update_tracks_secret_changes() {
        assert!(EntryUpdate::new().is_empty());
        assert!(!EntryUpdate::new().name("x").touches_secrets());
        assert!(EntryUpdate::new().password("x").touches_secrets());
        assert!(EntryUpdate::new().clear_notes().touches_secrets());
    }

    #[test]
    fn test_field_change_defaults_to_keep() {
        assert_eq!(FieldChange::<String>::default(), FieldChange::Keep);
        let update = EntryUpdate::default();
        assert!(update.property_id.is_keep());
        assert!(update.username.is_keep());
        assert!(update.notes.is_keep());
    }
}
