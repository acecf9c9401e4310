//! Error taxonomy for the vault core.
//!
//! Uniqueness conflicts and missing records get their own variants so the
//! console layer can render precise messages instead of a generic failure.

/// Errors surfaced by the vault core.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A record with the same unique key already exists (duplicate
    /// username, duplicate serial number).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The named record, archive, or credential does not exist. Only used
    /// where proceeding without it would be destructive; plain lookup
    /// misses return `Ok(None)` instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// The active session lacks the role required for the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Encryption or password hashing failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// A ciphertext token failed authentication or was malformed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Backup archive creation or extraction failed.
    #[error("backup error: {0}")]
    Backup(String),

    /// Filesystem failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VaultResult<T> = Result<T, VaultError>;
