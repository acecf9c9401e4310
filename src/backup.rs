//! Backup and restore of the full persisted state.
//!
//! A backup is a gzip-compressed tar archive bundling the structured store
//! file, the flat audit log and a small metadata document. Restoring
//! replaces the live files, so the caller must close the store first and
//! terminate the active session afterwards.
//!
//! Administrators without direct-restore rights go through one-time restore
//! codes. Codes live in memory only and vanish on restart; this is an
//! intentional ephemeral-credential boundary.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::AuditLog;
use crate::config::VaultConfig;
use crate::errors::{VaultError, VaultResult};

/// Name of the database copy inside an archive.
const ARCHIVE_DB_NAME: &str = "database.db";
/// Name of the flat log copy inside an archive.
const ARCHIVE_LOG_NAME: &str = "audit.log";
/// Name of the metadata document inside an archive.
const ARCHIVE_META_NAME: &str = "backup_info.json";

/// Current archive format version.
const FORMAT_VERSION: u32 = 1;

/// Metadata document embedded in every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub created_at: String,
    pub format_version: u32,
    pub description: String,
}

/// Listing entry for an existing archive.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// An unused one-time restore credential.
#[derive(Debug, Clone)]
pub struct RestoreCode {
    pub admin_username: String,
    pub backup_name: String,
    pub issued_at: DateTime<Utc>,
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 16;

fn generate_restore_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Snapshot and restore engine. Owns the in-memory restore-code table.
pub struct BackupEngine {
    db_path: PathBuf,
    log_path: PathBuf,
    backup_dir: PathBuf,
    codes: HashMap<String, RestoreCode>,
}

impl BackupEngine {
    /// Build the engine from configuration, creating the backup directory
    /// if needed.
    pub fn new(config: &VaultConfig) -> VaultResult<Self> {
        let backup_dir = config.files.backup_dir.clone();
        if !backup_dir.exists() {
            fs::create_dir_all(&backup_dir)?;
        }
        Ok(Self {
            db_path: config.database.path.clone(),
            log_path: config.files.audit_log.clone(),
            backup_dir,
            codes: HashMap::new(),
        })
    }

    /// Bundle the current store file and flat log into a timestamped
    /// archive. Never mutates live state. Returns the archive name.
    pub async fn create_backup(&self, audit: &AuditLog) -> VaultResult<String> {
        let name = self.fresh_archive_name();
        let path = self.backup_dir.join(&name);

        self.write_archive(&path)
            .map_err(|e| VaultError::Backup(format!("failed to create {name}: {e}")))?;

        info!(archive = %name, "backup created");
        audit
            .record(
                crate::audit::SYSTEM_ACTOR,
                "System backup created",
                &format!("Backup file: {name}"),
                false,
            )
            .await;

        Ok(name)
    }

    fn write_archive(&self, path: &Path) -> VaultResult<()> {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        // Either file may be absent, e.g. when snapshotting before a restore
        // that follows data loss. Whatever exists gets archived.
        if self.db_path.exists() {
            builder.append_path_with_name(&self.db_path, ARCHIVE_DB_NAME)?;
        }
        if self.log_path.exists() {
            builder.append_path_with_name(&self.log_path, ARCHIVE_LOG_NAME)?;
        }

        let metadata = BackupMetadata {
            created_at: Utc::now().to_rfc3339(),
            format_version: FORMAT_VERSION,
            description: "Fleet vault full-state backup".to_string(),
        };
        let payload = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| VaultError::Backup(format!("metadata serialization failed: {e}")))?;

        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, ARCHIVE_META_NAME, payload.as_slice())?;

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }

    /// `backup_YYYYMMDD_HHMMSS.tar.gz`, suffixed when two snapshots land in
    /// the same second.
    fn fresh_archive_name(&self) -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let base = format!("backup_{stamp}");
        let mut name = format!("{base}.tar.gz");
        let mut n = 1;
        while self.backup_dir.join(&name).exists() {
            name = format!("{base}_{n}.tar.gz");
            n += 1;
        }
        name
    }

    /// Existing archives, newest first.
    pub fn list_backups(&self) -> VaultResult<Vec<BackupInfo>> {
        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !(name.starts_with("backup_") && name.ends_with(".tar.gz")) {
                continue;
            }
            let meta = entry.metadata()?;
            let created: DateTime<Utc> = meta.modified()?.into();
            backups.push(BackupInfo {
                name,
                size: meta.len(),
                created,
            });
        }
        backups.sort_by(|a, b| b.created.cmp(&a.created).then(b.name.cmp(&a.name)));
        Ok(backups)
    }

    /// Replace the live store file and flat log with the archive contents.
    ///
    /// A missing archive is a hard error; proceeding would silently destroy
    /// data. A safety snapshot of the current state is taken first. The
    /// caller must have closed the store and must force-logout the session
    /// afterwards, since the account database has just been replaced.
    pub async fn restore_backup(&self, name: &str, audit: &AuditLog) -> VaultResult<()> {
        let archive_path = self.backup_dir.join(name);
        if !archive_path.exists() {
            return Err(VaultError::NotFound(format!("backup archive {name}")));
        }

        let safety = self.create_backup(audit).await?;

        self.extract_archive(&archive_path)
            .map_err(|e| VaultError::Backup(format!("failed to restore {name}: {e}")))?;

        warn!(archive = %name, safety = %safety, "live state replaced from backup");
        audit
            .record(
                crate::audit::SYSTEM_ACTOR,
                "System restored from backup",
                &format!("Backup file: {name}, Pre-restore snapshot: {safety}"),
                false,
            )
            .await;

        Ok(())
    }

    fn extract_archive(&self, archive_path: &Path) -> VaultResult<()> {
        let file = File::open(archive_path)?;
        let decoder = GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_path = entry.path()?.to_path_buf();
            match entry_path.to_str() {
                Some(ARCHIVE_DB_NAME) => {
                    entry.unpack(&self.db_path)?;
                }
                Some(ARCHIVE_LOG_NAME) => {
                    entry.unpack(&self.log_path)?;
                }
                _ => {} // metadata and anything unexpected stay in the archive
            }
        }
        Ok(())
    }

    /// Issue a one-time restore code binding `admin_username` to one
    /// archive. Super-administrator only; enforced by the caller's guard.
    pub async fn issue_code(
        &mut self,
        admin_username: &str,
        backup_name: &str,
        audit: &AuditLog,
    ) -> String {
        let code = generate_restore_code();
        self.codes.insert(
            code.clone(),
            RestoreCode {
                admin_username: admin_username.to_lowercase(),
                backup_name: backup_name.to_string(),
                issued_at: Utc::now(),
            },
        );

        audit
            .record(
                crate::audit::SYSTEM_ACTOR,
                "Restore code generated",
                &format!("Admin: {admin_username}, Backup: {backup_name}"),
                false,
            )
            .await;

        code
    }

    /// Consume a restore code and perform the bound restore.
    ///
    /// The code is deleted on ANY use attempt, successful or not: a code
    /// presented by the wrong administrator is burned, not returned. The two
    /// failure reasons are distinguishable only by the returned message.
    pub async fn use_code(
        &mut self,
        code: &str,
        admin_username: &str,
        audit: &AuditLog,
    ) -> (bool, String) {
        let Some(entry) = self.codes.remove(code) else {
            audit
                .record(
                    admin_username,
                    "Restore code rejected",
                    "Unknown or already-used code presented",
                    true,
                )
                .await;
            return (false, "Invalid or expired restore code".to_string());
        };

        if entry.admin_username != admin_username.to_lowercase() {
            audit
                .record(
                    admin_username,
                    "Restore code rejected",
                    &format!(
                        "Code issued to another administrator; code consumed. Backup: {}",
                        entry.backup_name
                    ),
                    true,
                )
                .await;
            return (
                false,
                "Restore code not issued for this administrator".to_string(),
            );
        }

        let outcome = self.restore_backup(&entry.backup_name, audit).await;
        let success = outcome.is_ok();

        audit
            .record(
                admin_username,
                "Backup restored using restore code",
                &format!("Backup: {}, Success: {success}", entry.backup_name),
                false,
            )
            .await;

        if success {
            (true, "Restore completed successfully".to_string())
        } else {
            (false, "Restore failed".to_string())
        }
    }

    /// Delete an unused code. Returns whether it existed.
    pub async fn revoke_code(&mut self, code: &str, audit: &AuditLog) -> bool {
        match self.codes.remove(code) {
            Some(entry) => {
                audit
                    .record(
                        crate::audit::SYSTEM_ACTOR,
                        "Restore code revoked",
                        &format!("Admin: {}, Backup: {}", entry.admin_username, entry.backup_name),
                        false,
                    )
                    .await;
                true
            }
            None => false,
        }
    }

    /// Active (unused, unrevoked) codes with their bindings.
    pub fn active_codes(&self) -> Vec<(String, RestoreCode)> {
        self.codes
            .iter()
            .map(|(code, entry)| (code.clone(), entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_codes_are_sixteen_chars_from_alphabet() {
        for _ in 0..20 {
            let code = generate_restore_code();
            assert_eq!(code.len(), CODE_LENGTH);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn metadata_round_trips_through_json() {
        let meta = BackupMetadata {
            created_at: "2026-01-01T00:00:00Z".to_string(),
            format_version: FORMAT_VERSION,
            description: "test".to_string(),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: BackupMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.format_version, 1);
        assert_eq!(back.description, "test");
    }
}
