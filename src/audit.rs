//! Tamper-evident audit log.
//!
//! Every event is written twice: one row in the structured store with each
//! field encrypted individually, and one encrypted line appended to a flat
//! file. The two writes are deliberately independent; a failure of one
//! never suppresses the other, and a crash between them leaves divergent
//! trails, which is tolerated redundancy, not corruption.
//!
//! `record` is infallible from the caller's perspective: a logging failure
//! must never block the operation being logged, so internal errors are
//! reported to the operator console and swallowed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{query, query_as, ConnectOptions, Connection, SqliteConnection, SqlitePool};
use tracing::{error, warn};

use crate::encryption::Cipher;
use crate::errors::{VaultError, VaultResult};

/// Actor recorded for events not attributable to a logged-in account.
pub const SYSTEM_ACTOR: &str = "system";

/// Actor recorded for failed logins against unknown usernames.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// A decrypted audit log entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing, gapless within one store instance
    pub log_number: i64,
    /// RFC 3339 timestamp of the event
    pub date_time: String,
    /// Acting username, or a `system`/`unknown` sentinel
    pub username: String,
    /// What happened
    pub description: String,
    /// Free-text context
    pub additional_info: String,
    /// Whether the event warrants security review
    pub suspicious: bool,
}

/// Handle to the dual-persisted audit trail.
#[derive(Clone)]
pub struct AuditLog {
    pool: SqlitePool,
    cipher: Cipher,
    db_path: PathBuf,
    log_file: PathBuf,
}

impl AuditLog {
    pub fn new(
        pool: SqlitePool,
        cipher: Cipher,
        db_path: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            cipher,
            db_path: db_path.into(),
            log_file: log_file.into(),
        }
    }

    /// Append one event. Never fails from the caller's perspective. The two
    /// writes are attempted independently: a failing structured insert does
    /// not suppress the flat-file line, and vice versa.
    pub async fn record(&self, actor: &str, description: &str, additional_info: &str, suspicious: bool) {
        let date_time = Utc::now().to_rfc3339();

        let log_number = match self
            .record_structured(&date_time, actor, description, additional_info, suspicious)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                error!("structured audit write failed: {e}");
                // The flat line still captures the event, unnumbered.
                0
            }
        };

        if let Err(e) = self.append_flat_line(
            log_number,
            &date_time,
            actor,
            description,
            additional_info,
            suspicious,
        ) {
            error!("flat audit write failed: {e}");
        }
    }

    /// Insert the encrypted row. Uses the shared pool while it is open; a
    /// closed pool (the store is shut down for a restore) gets a one-shot
    /// connection instead, so restore events stay on the structured trail.
    async fn record_structured(
        &self,
        date_time: &str,
        actor: &str,
        description: &str,
        additional_info: &str,
        suspicious: bool,
    ) -> VaultResult<i64> {
        if self.pool.is_closed() {
            let mut conn = SqliteConnectOptions::new()
                .filename(&self.db_path)
                .journal_mode(SqliteJournalMode::Delete)
                .connect()
                .await
                .map_err(|e| VaultError::Database(format!("audit connection failed: {e}")))?;
            let inserted = self
                .insert_row(&mut conn, date_time, actor, description, additional_info, suspicious)
                .await;
            conn.close().await.ok();
            inserted
        } else {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| VaultError::Database(format!("audit connection failed: {e}")))?;
            self.insert_row(&mut conn, date_time, actor, description, additional_info, suspicious)
                .await
        }
    }

    async fn insert_row(
        &self,
        conn: &mut SqliteConnection,
        date_time: &str,
        actor: &str,
        description: &str,
        additional_info: &str,
        suspicious: bool,
    ) -> VaultResult<i64> {
        // Read-max-then-insert on a single connection keeps this gapless for
        // the single-operator caller; a concurrent-writer extension would
        // need an atomic sequence here.
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(log_number) FROM audit_log")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| VaultError::Database(format!("audit number lookup failed: {e}")))?;
        let log_number = max.unwrap_or(0) + 1;

        query(
            "INSERT INTO audit_log (log_number, date_time, username, description, \
                                    additional_info, suspicious) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(log_number)
        .bind(self.cipher.encrypt(date_time)?)
        .bind(self.cipher.encrypt(actor)?)
        .bind(self.cipher.encrypt(description)?)
        .bind(self.cipher.encrypt(additional_info)?)
        .bind(i64::from(suspicious))
        .execute(&mut *conn)
        .await
        .map_err(|e| VaultError::Database(format!("audit insert failed: {e}")))?;

        Ok(log_number)
    }

    fn append_flat_line(
        &self,
        log_number: i64,
        date_time: &str,
        actor: &str,
        description: &str,
        additional_info: &str,
        suspicious: bool,
    ) -> VaultResult<()> {
        let entry = AuditEntry {
            log_number,
            date_time: date_time.to_string(),
            username: actor.to_string(),
            description: description.to_string(),
            additional_info: additional_info.to_string(),
            suspicious,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| VaultError::Encryption(format!("audit serialization failed: {e}")))?;
        let encrypted_line = self.cipher.encrypt(&line)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)?;
        writeln!(file, "{encrypted_line}")?;

        Ok(())
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: i64) -> VaultResult<Vec<AuditEntry>> {
        self.fetch(limit, false).await
    }

    /// Most recent suspicious entries, newest first.
    pub async fn recent_suspicious(&self, limit: i64) -> VaultResult<Vec<AuditEntry>> {
        self.fetch(limit, true).await
    }

    async fn fetch(&self, limit: i64, only_suspicious: bool) -> VaultResult<Vec<AuditEntry>> {
        let sql = if only_suspicious {
            "SELECT log_number, date_time, username, description, additional_info, suspicious \
             FROM audit_log WHERE suspicious = 1 ORDER BY log_number DESC LIMIT ?"
        } else {
            "SELECT log_number, date_time, username, description, additional_info, suspicious \
             FROM audit_log ORDER BY log_number DESC LIMIT ?"
        };

        let rows: Vec<(i64, String, String, String, String, i64)> = query_as(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| VaultError::Database(format!("audit fetch failed: {e}")))?;

        Ok(rows
            .into_iter()
            .map(|(log_number, date_time, username, description, additional_info, suspicious)| {
                AuditEntry {
                    log_number,
                    date_time: self.cipher.decrypt_lossy(&date_time),
                    username: self.cipher.decrypt_lossy(&username),
                    description: self.cipher.decrypt_lossy(&description),
                    additional_info: self.cipher.decrypt_lossy(&additional_info),
                    suspicious: suspicious != 0,
                }
            })
            .collect())
    }

    /// Post-login hook: surface a warning if suspicious entries exist.
    /// Returns the number of recent suspicious entries, without blocking use.
    pub async fn post_login_alert(&self) -> usize {
        match self.recent_suspicious(10).await {
            Ok(entries) if !entries.is_empty() => {
                warn!(
                    count = entries.len(),
                    "suspicious activity recorded; review the audit log"
                );
                entries.len()
            }
            Ok(_) => 0,
            Err(e) => {
                error!("suspicious-activity check failed: {e}");
                0
            }
        }
    }

    /// Path of the flat encrypted log file.
    pub fn log_file(&self) -> &std::path::Path {
        &self.log_file
    }
}
