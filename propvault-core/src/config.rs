//! Vault configuration.
//!
//! Every field has a default, so an empty or partial TOML file is valid:
//!
//! ```toml
//! database_path = "/srv/propvault/vault.db"
//!
//! [kdf]
//! mem_cost = 65536
//! time_cost = 3
//! parallelism = 4
//!
//! [session]
//! idle_timeout_secs = 900
//!
//! [retry]
//! max_attempts = 4
//! base_delay_ms = 50
//! max_delay_ms = 2000
//! ```

use crate::crypto::KdfParams;
use crate::retry::RetryPolicy;
use crate::{Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub database_path: PathBuf,
    pub kdf: KdfConfig,
    pub session: SessionConfig,
    pub retry: RetryPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            kdf: KdfConfig::default(),
            session: SessionConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl VaultConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.kdf
            .params()
            .validate()
            .map_err(|e| VaultError::Config(e.to_string()))?;
        if self.retry.max_attempts == 0 {
            return Err(VaultError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Argon2id cost for newly created master records. Existing vaults keep
/// the parameters they were created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub mem_cost: u32,
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        let params = KdfParams::default();
        Self {
            mem_cost: params.mem_cost,
            time_cost: params.time_cost,
            parallelism: params.parallelism,
        }
    }
}

impl KdfConfig {
    /// Fresh parameters with a new random salt.
    pub fn params(&self) -> KdfParams {
        KdfParams::with_cost(self.mem_cost, self.time_cost, self.parallelism)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds without a vault operation before auto-lock. `0` disables.
    pub idle_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 15 * 60,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Platform data directory for the vault:
///
/// - Windows: `%LOCALAPPDATA%\PropVault`
/// - macOS: `~/Library/Application Support/PropVault`
/// - Linux: `~/.local/share/PropVault`
pub fn data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .or_else(|| dirs::home_dir().map(|h| h.join(".data")))
        .unwrap_or_else(|| PathBuf::from("."));

    base.join("PropVault")
}

pub fn default_database_path() -> PathBuf {
    data_dir().join("vault.db")
}

/// Default location of `propvault.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("PropVault"))
        .unwrap_or_else(data_dir)
        .join("propvault.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = VaultConfig::from_toml("").unwrap();
        assert_eq!(config, VaultConfig::default());
        assert_eq!(
            config.session.idle_timeout(),
            Some(Duration::from_secs(900))
        );
        assert_eq!(config.kdf.mem_cost, 64 * 1024);
    }

    #[test]
    fn test_partial_toml() {
        let config = VaultConfig::from_toml(
            r#"
            database_path = "/tmp/pv.db"

            [session]
            idle_timeout_secs = 0

            [retry]
            max_attempts = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/pv.db"));
        assert_eq!(config.session.idle_timeout(), None);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.base_delay_ms, RetryPolicy::default().base_delay_ms);
        assert_eq!(config.kdf, KdfConfig::default());
    }

    #[test]
    fn test_weak_kdf_rejected() {
        let result = VaultConfig::from_toml("[kdf]\nmem_cost = 1024\n");
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = VaultConfig::from_toml("[session\nidle_timeout_secs = 1");
        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("propvault_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[kdf]\ntime_cost = 5\n").unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.kdf.time_cost, 5);

        let _ = std::fs::remove_file(&path);
        assert!(matches!(VaultConfig::load(&path), Err(VaultError::Io(_))));
    }

    #[test]
    fn test_default_paths_end_with_vault_names() {
        assert!(default_database_path().ends_with("PropVault/vault.db"));
        assert!(default_config_path().ends_with("propvault.toml"));
    }
}
