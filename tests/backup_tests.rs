//! Backup, restore and one-time restore-code scenarios.

use std::sync::Arc;

use fleetvault::audit::AuditLog;
use fleetvault::auth::{LoginOutcome, Role, Session};
use fleetvault::backup::BackupEngine;
use fleetvault::bootstrap::{self, SUPER_ADMIN_PASSWORD, SUPER_ADMIN_USERNAME};
use fleetvault::config::VaultConfig;
use fleetvault::encryption::Cipher;
use fleetvault::errors::VaultError;
use fleetvault::store::{NewCustomer, Store};
use tempfile::TempDir;

async fn setup() -> (TempDir, VaultConfig, Arc<Store>, AuditLog) {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = VaultConfig::rooted_at(dir.path());
    let cipher = Cipher::load_or_generate(&cfg.files.key_file).expect("cipher init");
    let (store, audit) = Store::connect(&cfg, cipher).await.expect("store connect");
    bootstrap::initialize(&store).await.expect("bootstrap");
    (dir, cfg, store, audit)
}

async fn reconnect(cfg: &VaultConfig) -> (Arc<Store>, AuditLog) {
    let cipher = Cipher::load_or_generate(&cfg.files.key_file).expect("cipher reload");
    Store::connect(cfg, cipher).await.expect("store reconnect")
}

fn customer_with_email(email: &str) -> NewCustomer {
    NewCustomer {
        first_name: "Sanne".to_string(),
        last_name: "Bakker".to_string(),
        birthday: "1988-11-03".to_string(),
        gender: "female".to_string(),
        street_name: "Westersingel".to_string(),
        house_number: "7b".to_string(),
        zip_code: "3014GN".to_string(),
        city: "Rotterdam".to_string(),
        email: email.to_string(),
        mobile_phone: "+31687654321".to_string(),
        driving_license: "BK7654321".to_string(),
    }
}

#[tokio::test]
async fn backup_archive_is_created_and_listed() {
    let (_dir, cfg, store, audit) = setup().await;
    store
        .create_customer(customer_with_email("sanne@example.com"))
        .await
        .unwrap();

    let engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    assert!(name.starts_with("backup_") && name.ends_with(".tar.gz"));
    assert!(cfg.files.backup_dir.join(&name).exists());

    let listed = engine.list_backups().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, name);
    assert!(listed[0].size > 0);

    // Snapshotting never disturbs the live store.
    assert_eq!(store.search_customers("sanne@").await.unwrap().len(), 1);
}

#[tokio::test]
async fn restore_round_trips_the_full_state() {
    let (_dir, cfg, store, audit) = setup().await;

    let kept_id = store
        .create_customer(customer_with_email("kept@example.com"))
        .await
        .unwrap();

    let engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();

    // Diverge from the snapshot: drop the kept record, add another.
    let row_id = store.search_customers(&kept_id).await.unwrap()[0].id;
    store.delete_customer(row_id).await.unwrap();
    store
        .create_customer(customer_with_email("later@example.com"))
        .await
        .unwrap();

    store.close().await;
    engine.restore_backup(&name, &audit).await.unwrap();

    // Even losing the live file entirely is recoverable from the archive.
    std::fs::remove_file(&cfg.database.path).unwrap();
    engine.restore_backup(&name, &audit).await.unwrap();

    let (store, audit) = reconnect(&cfg).await;
    assert!(!bootstrap::initialize(&store).await.unwrap(), "restored state keeps its accounts");

    let hits = store.search_customers("kept@example").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].customer_id, kept_id);
    let full = store.get_customer(hits[0].id).await.unwrap().unwrap();
    assert_eq!(full.email, "kept@example.com");
    assert_eq!(full.city, "Rotterdam");

    assert!(store.search_customers("later@example").await.unwrap().is_empty());

    // The restored account database still authenticates the operator.
    let mut session = Session::new();
    assert_eq!(
        session
            .login(&store, &audit, SUPER_ADMIN_USERNAME, SUPER_ADMIN_PASSWORD)
            .await,
        LoginOutcome::Success(Role::SuperAdmin)
    );
}

#[tokio::test]
async fn restore_takes_a_safety_snapshot_first() {
    let (_dir, cfg, store, audit) = setup().await;

    let engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();

    store.close().await;
    engine.restore_backup(&name, &audit).await.unwrap();

    // The original archive plus the pre-restore snapshot.
    assert_eq!(engine.list_backups().unwrap().len(), 2);
}

#[tokio::test]
async fn restore_is_audited_even_with_the_store_closed() {
    let (_dir, cfg, store, audit) = setup().await;

    let mut engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    let code = engine.issue_code("ops_admin", &name, &audit).await;

    // The protocol closes the pool before any restore replaces the files.
    store.close().await;
    let (ok, message) = engine.use_code(&code, "ops_admin", &audit).await;
    assert!(ok, "{message}");

    let (_store, audit) = reconnect(&cfg).await;
    let entries = audit.recent(1000).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.description == "System restored from backup"));
    assert!(entries
        .iter()
        .any(|e| e.description == "Backup restored using restore code"));

    // Archived trail (the bootstrap event) plus the two restore events,
    // renumbered without gaps.
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].log_number, 3);

    // The flat file was replaced by the archive copy and then extended with
    // the same restore events.
    let flat = std::fs::read_to_string(audit.log_file()).unwrap();
    assert_eq!(flat.lines().count(), entries.len());
}

#[tokio::test]
async fn restoring_a_missing_archive_is_a_hard_error() {
    let (_dir, cfg, store, audit) = setup().await;

    let engine = BackupEngine::new(&cfg).unwrap();
    let err = engine
        .restore_backup("backup_19700101_000000.tar.gz", &audit)
        .await
        .unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)), "got {err:?}");

    // Nothing was touched; the live store keeps working.
    store
        .create_customer(customer_with_email("still.alive@example.com"))
        .await
        .unwrap();
}

#[tokio::test]
async fn restore_code_grants_exactly_one_restore() {
    let (_dir, cfg, store, audit) = setup().await;
    store
        .create_customer(customer_with_email("snapshot@example.com"))
        .await
        .unwrap();

    let mut engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    let code = engine.issue_code("ops_admin", &name, &audit).await;
    assert_eq!(code.len(), 16);
    assert_eq!(engine.active_codes().len(), 1);

    store.close().await;
    let (ok, message) = engine.use_code(&code, "ops_admin", &audit).await;
    assert!(ok, "{message}");
    assert_eq!(message, "Restore completed successfully");
    assert!(engine.active_codes().is_empty());

    // Spent codes never work twice.
    let (ok, message) = engine.use_code(&code, "ops_admin", &audit).await;
    assert!(!ok);
    assert_eq!(message, "Invalid or expired restore code");

    let (store, _audit) = reconnect(&cfg).await;
    assert_eq!(store.search_customers("snapshot@").await.unwrap().len(), 1);
}

#[tokio::test]
async fn restore_code_is_burned_by_the_wrong_administrator() {
    let (_dir, cfg, _store, audit) = setup().await;

    let mut engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    let code = engine.issue_code("ops_admin", &name, &audit).await;

    let (ok, message) = engine.use_code(&code, "other_admin", &audit).await;
    assert!(!ok);
    assert_eq!(message, "Restore code not issued for this administrator");
    assert!(engine.active_codes().is_empty(), "the attempt consumed the code");

    // Even the rightful holder is locked out afterwards.
    let (ok, message) = engine.use_code(&code, "ops_admin", &audit).await;
    assert!(!ok);
    assert_eq!(message, "Invalid or expired restore code");

    let suspicious = audit.recent_suspicious(100).await.unwrap();
    assert_eq!(suspicious.len(), 2);
    assert!(suspicious.iter().all(|e| e.description == "Restore code rejected"));
}

#[tokio::test]
async fn revoked_codes_stop_working() {
    let (_dir, cfg, _store, audit) = setup().await;

    let mut engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    let code = engine.issue_code("ops_admin", &name, &audit).await;

    assert!(engine.revoke_code(&code, &audit).await);
    assert!(!engine.revoke_code(&code, &audit).await);

    let (ok, message) = engine.use_code(&code, "ops_admin", &audit).await;
    assert!(!ok);
    assert_eq!(message, "Invalid or expired restore code");
}

#[tokio::test]
async fn code_bindings_are_case_insensitive_on_username() {
    let (_dir, cfg, store, audit) = setup().await;

    let mut engine = BackupEngine::new(&cfg).unwrap();
    let name = engine.create_backup(&audit).await.unwrap();
    let code = engine.issue_code("Ops_Admin", &name, &audit).await;

    store.close().await;
    let (ok, _) = engine.use_code(&code, "OPS_ADMIN", &audit).await;
    assert!(ok);
}
