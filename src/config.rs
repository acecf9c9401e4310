//! Configuration for the vault.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `fleetvault.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `FLEETVAULT_DATABASE__PATH` - SQLite database file
//! - `FLEETVAULT_FILES__KEY_FILE` - Encryption key file
//! - `FLEETVAULT_FILES__AUDIT_LOG` - Flat encrypted audit log file
//! - `FLEETVAULT_FILES__BACKUP_DIR` - Backup archive directory
//! - `FLEETVAULT_LOGGING__LEVEL` - Log level (trace, debug, info, warn, error)
//!
//! The loaded [`VaultConfig`] is a plain value passed to the components that
//! need it. There is deliberately no global singleton, so test harnesses can
//! run several isolated vaults side by side.

use std::path::{Path, PathBuf};

use config::Config;
use serde::Deserialize;

use crate::errors::{VaultError, VaultResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// On-disk artifact locations
    pub files: FilesConfig,
    /// Login throttling policy
    pub security: SecurityConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fleetvault.db"),
        }
    }
}

/// Locations of the key file, flat audit log and backup directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Binary file holding the symmetric encryption key
    pub key_file: PathBuf,
    /// Append-only flat file of encrypted audit lines
    pub audit_log: PathBuf,
    /// Directory where backup archives are written
    pub backup_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from("fleetvault.key"),
            audit_log: PathBuf::from("fleetvault.log"),
            backup_dir: PathBuf::from("backups"),
        }
    }
}

/// Login throttling policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Consecutive failures per username before the username is blocked
    pub max_failed_logins: u32,
    /// Rolling window in seconds after which the failure counter resets
    pub lockout_secs: i64,
    /// Authentication tries allowed within one login session
    pub max_session_tries: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_failed_logins: 3,
            lockout_secs: 300,
            max_session_tries: 3,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable the operator console subscriber
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from `fleetvault.toml` and the environment.
    pub fn load() -> VaultResult<Self> {
        let settings = Config::builder()
            .add_source(config::File::with_name("fleetvault").required(false))
            .add_source(
                config::Environment::with_prefix("FLEETVAULT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| VaultError::Config(format!("failed to build configuration: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| VaultError::Config(format!("failed to parse configuration: {e}")))
    }

    /// Configuration with every artifact rooted under `dir`. Used by tests
    /// and by operators who want a self-contained data directory.
    pub fn rooted_at(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            database: DatabaseConfig {
                path: dir.join("fleetvault.db"),
            },
            files: FilesConfig {
                key_file: dir.join("fleetvault.key"),
                audit_log: dir.join("fleetvault.log"),
                backup_dir: dir.join("backups"),
            },
            ..Self::default()
        }
    }
}

/// Install the operator console subscriber. Safe to call more than once.
pub fn init_logging(cfg: &LoggingConfig) {
    if !cfg.enabled {
        return;
    }

    let level: tracing::Level = cfg.level.parse().unwrap_or(tracing::Level::INFO);
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = VaultConfig::default();
        assert_eq!(cfg.database.path, PathBuf::from("fleetvault.db"));
        assert_eq!(cfg.security.max_failed_logins, 3);
        assert_eq!(cfg.security.lockout_secs, 300);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn rooted_config_keeps_everything_under_one_dir() {
        let cfg = VaultConfig::rooted_at("/tmp/vault-test");
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/vault-test/fleetvault.db"));
        assert_eq!(cfg.files.key_file, PathBuf::from("/tmp/vault-test/fleetvault.key"));
        assert_eq!(cfg.files.backup_dir, PathBuf::from("/tmp/vault-test/backups"));
    }
}
