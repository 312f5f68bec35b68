//! AES-256-GCM envelopes for individual secret fields.
//!
//! Uses AES-256-GCM with:
//! - 256-bit key
//! - 96-bit (12 byte) IV, freshly random for every encryption
//! - 128-bit authentication tag, appended to the ciphertext
//!
//! The persisted shape `{ciphertext, iv}` must stay stable, otherwise
//! previously written entries can no longer be opened.

use crate::crypto::{CryptoError, Result, VaultKey};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// IV length in bytes.
pub const IV_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// One encrypted field: ciphertext (tag included) and its IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ciphertext with the 16-byte GCM tag at the end
    pub ciphertext: Vec<u8>,

    /// Unique IV for this encryption (12 bytes)
    pub iv: [u8; IV_LEN],
}

impl Envelope {
    pub fn new(ciphertext: Vec<u8>, iv: [u8; IV_LEN]) -> Self {
        Self { ciphertext, iv }
    }

    /// Rebuild an envelope from stored columns, checking the IV width.
    pub fn from_parts(ciphertext: Vec<u8>, iv: &[u8]) -> Result<Self> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_LEN,
            got: iv.len(),
        })?;
        Ok(Self { ciphertext, iv })
    }
}

/// Encrypt one field with the resident key.
///
/// Every call draws a new random IV, so encrypting the same plaintext
/// twice never yields the same envelope.
pub fn encrypt_field(key: &VaultKey, plaintext: &str) -> Result<Envelope> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(format!("{}", e)))?;

    Ok(Envelope {
        ciphertext,
        iv: nonce.into(),
    })
}

/// Decrypt one field.
///
/// Fails with [`CryptoError::AuthenticationFailed`] for a wrong key or
/// tampered data; never returns unauthenticated bytes.
pub fn decrypt_field(key: &VaultKey, envelope: &Envelope) -> Result<Zeroizing<String>> {
    if envelope.ciphertext.len() < TAG_LEN {
        return Err(CryptoError::DecryptionFailed(
            "Ciphertext too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let nonce = Nonce::from(envelope.iv);

    let plaintext = Zeroizing::new(
        cipher
            .decrypt(&nonce, envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::AuthenticationFailed)?,
    );

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))?;
    Ok(Zeroizing::new(text.to_owned()))
}
