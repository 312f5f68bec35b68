//! Entry-level encryption: applies the field codec across the password,
//! username and notes of an entry.

use crate::crypto::{decrypt_field, encrypt_field, Envelope, VaultKey};
use crate::entry::{
    non_empty_secret, validate_metadata, DecryptedEntry, EntryUpdate, FieldChange, NewEntry,
    PasswordEntry, SecretFields,
};
use crate::store;
use crate::{Result, VaultError};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Encrypt a new entry under `key`, assigning it an id and timestamps.
pub fn encrypt_entry(entry: &NewEntry, key: &VaultKey) -> Result<PasswordEntry> {
    let now = store::now();
    Ok(PasswordEntry {
        id: Uuid::new_v4(),
        metadata: entry.metadata.clone(),
        password: encrypt_field(key, &entry.secrets.password)?,
        username: encrypt_optional(key, entry.secrets.username.as_ref())?,
        notes: encrypt_optional(key, entry.secrets.notes.as_ref())?,
        created_at: now,
        updated_at: now,
    })
}

/// Decrypt every secret field of `entry`.
///
/// Any field failing authentication fails the whole entry with
/// [`VaultError::DecryptionFailed`]; nothing partially decrypted escapes.
pub fn decrypt_entry(entry: &PasswordEntry, key: &VaultKey) -> Result<DecryptedEntry> {
    let secrets = SecretFields {
        password: open(key, &entry.password)?,
        username: entry
            .username
            .as_ref()
            .map(|env| open(key, env))
            .transpose()?,
        notes: entry.notes.as_ref().map(|env| open(key, env)).transpose()?,
    };

    Ok(DecryptedEntry {
        id: entry.id,
        metadata: entry.metadata.clone(),
        secrets,
        created_at: entry.created_at,
        updated_at: entry.updated_at,
    })
}

/// Apply `update` to a stored entry. Changed secret fields are encrypted
/// with fresh IVs; untouched envelopes are carried over as-is.
pub fn apply_update(
    entry: &PasswordEntry,
    update: EntryUpdate,
    key: &VaultKey,
) -> Result<PasswordEntry> {
    let mut next = entry.clone();

    if let Some(name) = update.name {
        next.metadata.name = name.trim().to_string();
    }
    if let Some(category) = update.category {
        next.metadata.category = category.trim().to_string();
    }
    if let Some(entry_type) = update.entry_type {
        next.metadata.entry_type = entry_type;
    }
    match update.property_id {
        FieldChange::Keep => {}
        FieldChange::Set(id) if !id.trim().is_empty() => {
            next.metadata.property_id = Some(id.trim().to_string())
        }
        FieldChange::Set(_) | FieldChange::Clear => next.metadata.property_id = None,
    }

    if let Some(password) = update.password {
        if password.is_empty() {
            return Err(VaultError::InvalidInput(
                "Password must not be empty".to_string(),
            ));
        }
        next.password = encrypt_field(key, &password)?;
    }
    next.username = apply_secret_change(key, next.username, update.username)?;
    next.notes = apply_secret_change(key, next.notes, update.notes)?;

    validate_metadata(&next.metadata, next.username.is_some())?;
    next.updated_at = store::now();
    Ok(next)
}

/// Decrypt with `old` and encrypt with `new`, keeping id and metadata.
pub fn reencrypt_entry(
    entry: &PasswordEntry,
    old: &VaultKey,
    new: &VaultKey,
) -> Result<PasswordEntry> {
    let plain = decrypt_entry(entry, old)?;
    Ok(PasswordEntry {
        id: entry.id,
        metadata: entry.metadata.clone(),
        password: encrypt_field(new, &plain.secrets.password)?,
        username: encrypt_optional(new, plain.secrets.username.as_ref())?,
        notes: encrypt_optional(new, plain.secrets.notes.as_ref())?,
        created_at: entry.created_at,
        updated_at: entry.updated_at,
    })
}

fn apply_secret_change(
    key: &VaultKey,
    current: Option<Envelope>,
    change: FieldChange<Zeroizing<String>>,
) -> Result<Option<Envelope>> {
    match change {
        FieldChange::Keep => Ok(current),
        FieldChange::Clear => Ok(None),
        FieldChange::Set(value) => encrypt_optional(key, non_empty_secret(Some(value)).as_ref()),
    }
}

fn encrypt_optional(key: &VaultKey, value: Option<&Zeroizing<String>>) -> Result<Option<Envelope>> {
    value
        .map(|v| encrypt_field(key, v))
        .transpose()
        .map_err(VaultError::from)
}

fn open(key: &VaultKey, envelope: &Envelope) -> Result<Zeroizing<String>> {
    decrypt_field(key, envelope).map_err(VaultError::from)
}
