//! Persistence layer for accounts, customer records and equipment units.
//!
//! Sensitive fields are encrypted before they hit the database and decrypted
//! on the way out; columns used for filtering (numeric ids, flags, search
//! indexes) stay in clear so queries work without decryption. Usernames are
//! located through a deterministic one-way lookup hash, never through the
//! encrypted stored copy.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{query, SqlitePool};
use tracing::error;

use crate::audit::AuditLog;
use crate::config::VaultConfig;
use crate::encryption::Cipher;
use crate::errors::{VaultError, VaultResult};

pub mod accounts;
pub mod customers;
pub mod equipment;

pub use accounts::{Account, AccountUpdate};
pub use customers::{Customer, CustomerSummary, CustomerUpdate, NewCustomer};
pub use equipment::{Equipment, EquipmentSummary, EquipmentUpdate, NewEquipment, OperationalUpdate};

/// Handle to the structured store.
///
/// Cheap to clone; all clones share one single-connection pool. The store is
/// not safe for concurrent multi-process writers; one process at a time
/// touches the files, enforced operationally.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    cipher: Cipher,
    audit: AuditLog,
}

impl Store {
    /// Open (creating if missing) the database named in `config` and wire it
    /// to the given cipher. Also constructs the [`AuditLog`] sharing the same
    /// pool, returned alongside.
    pub async fn connect(config: &VaultConfig, cipher: Cipher) -> VaultResult<(Arc<Self>, AuditLog)> {
        // Rollback journal instead of WAL: committed data must live in the
        // main database file so file-level backups are complete.
        let options = SqliteConnectOptions::new()
            .filename(&config.database.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);

        // Single connection: the core is single-operator and this keeps the
        // read-max-then-insert audit numbering serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("failed to open database: {e}");
                VaultError::Database(format!("failed to open database: {e}"))
            })?;

        let audit = AuditLog::new(
            pool.clone(),
            cipher.clone(),
            config.database.path.clone(),
            config.files.audit_log.clone(),
        );
        let store = Arc::new(Self {
            pool,
            cipher,
            audit: audit.clone(),
        });

        Ok((store, audit))
    }

    /// Create the schema if it does not exist yet. Idempotent.
    pub async fn initialize(&self) -> VaultResult<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username_hash TEXT UNIQUE NOT NULL,
                username TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                role TEXT NOT NULL,
                registration_date TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS customers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                customer_id TEXT UNIQUE NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                birthday TEXT NOT NULL,
                gender TEXT NOT NULL,
                street_name TEXT NOT NULL,
                house_number TEXT NOT NULL,
                zip_code TEXT NOT NULL,
                city TEXT NOT NULL,
                email TEXT NOT NULL,
                mobile_phone TEXT NOT NULL,
                driving_license TEXT NOT NULL,
                registration_date TEXT NOT NULL,
                search_index TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS equipment (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                brand TEXT NOT NULL,
                model TEXT NOT NULL,
                serial_number TEXT UNIQUE NOT NULL,
                top_speed INTEGER NOT NULL,
                battery_capacity INTEGER NOT NULL,
                state_of_charge INTEGER NOT NULL,
                target_range_min INTEGER NOT NULL,
                target_range_max INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                out_of_service INTEGER DEFAULT 0,
                mileage REAL DEFAULT 0.0,
                last_maintenance_date TEXT,
                in_service_date TEXT NOT NULL,
                search_index TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                log_number INTEGER NOT NULL,
                date_time TEXT NOT NULL,
                username TEXT NOT NULL,
                description TEXT NOT NULL,
                additional_info TEXT,
                suspicious INTEGER DEFAULT 0
            )",
        ];

        for sql in statements {
            query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| VaultError::Database(format!("schema creation failed: {e}")))?;
        }

        Ok(())
    }

    /// Drain the connection pool. Required before a restore replaces the
    /// database file underneath us.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }
}

/// Deterministic one-way lookup key for a username: hex SHA-256 of the
/// lower-cased value. Lets the store test existence and fetch by username
/// without ever persisting the username in searchable plaintext, and makes
/// uniqueness case-insensitive.
pub fn username_lookup_hash(username: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.to_lowercase().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Map a sqlx error to the vault taxonomy, surfacing unique-constraint
/// violations as a distinct "already exists" condition.
pub(crate) fn map_db_error(e: sqlx::Error, unique_what: &str) -> VaultError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return VaultError::AlreadyExists(unique_what.to_string());
        }
    }
    error!("database operation failed: {e}");
    VaultError::Database(format!("database error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hash_is_case_insensitive() {
        assert_eq!(username_lookup_hash("Admin"), username_lookup_hash("admin"));
        assert_eq!(username_lookup_hash("ADMIN"), username_lookup_hash("admin"));
        assert_ne!(username_lookup_hash("admin"), username_lookup_hash("admin2"));
    }

    #[test]
    fn lookup_hash_is_hex_sha256() {
        let h = username_lookup_hash("someone");
        assert_eq!(h.len(), 64);
        assert!(h.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
