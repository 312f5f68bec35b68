//! Argon2id key derivation for the master password.
//!
//! Default parameters:
//! - Memory cost: 64 MiB (65,536 KiB)
//! - Time cost: 3 iterations
//! - Parallelism: 4 lanes
//! - Output length: 32 bytes (256 bits)
//! - Salt length: 16 bytes

use crate::crypto::{CryptoError, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// Lowest accepted memory cost in KiB.
pub const MIN_MEM_COST: u32 = 8 * 1024;

/// Parameters for Argon2id key derivation.
///
/// Persisted with the master record so that a later change of the
/// configured cost never breaks unlocking an existing vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Salt for key derivation (16 bytes)
    pub salt: [u8; SALT_LEN],

    /// Memory cost in KiB
    pub mem_cost: u32,

    /// Time cost (number of iterations)
    pub time_cost: u32,

    /// Parallelism (number of lanes)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::with_cost(64 * 1024, 3, 4)
    }
}

impl KdfParams {
    /// Create new parameters with the default cost and a random salt
    pub fn new() -> Self {
        Self::default()
    }

    /// Create parameters with an explicit cost and a fresh random salt
    pub fn with_cost(mem_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            salt: rand::random(),
            mem_cost,
            time_cost,
            parallelism,
        }
    }

    /// Same cost, new random salt.
    pub fn resalted(&self) -> Self {
        Self::with_cost(self.mem_cost, self.time_cost, self.parallelism)
    }

    /// Verify that parameters are within acceptable ranges
    pub fn validate(&self) -> Result<()> {
        if self.mem_cost < MIN_MEM_COST {
            return Err(CryptoError::KdfFailed(format!(
                "Memory cost too low (minimum: {} KiB)",
                MIN_MEM_COST
            )));
        }
        if self.time_cost < 1 {
            return Err(CryptoError::KdfFailed(
                "Time cost too low (minimum: 1)".to_string(),
            ));
        }
        if self.parallelism < 1 {
            return Err(CryptoError::KdfFailed(
                "Parallelism too low (minimum: 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Derive a 32-byte master key from a password using Argon2id.
///
/// The output is wrapped in [`Zeroizing`] so intermediate copies are wiped
/// as soon as the caller moves the bytes into a [`VaultKey`](super::VaultKey).
pub fn derive_master_key(password: &[u8], params: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    params.validate()?;

    let params_obj = Params::new(
        params.mem_cost,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::KdfFailed(format!("Invalid parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params_obj);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, &params.salt, &mut key[..])
        .map_err(|e| CryptoError::KdfFailed(format!("Hashing failed: {}", e)))?;

    Ok(key)
}
