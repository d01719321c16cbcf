//! Bulk migration of pre-existing plaintext rows.

mod support;

use common::{Record, SqlValue};
use support::InMemoryExecutor;
use tde::config::EncryptionConfig;
use tde::keys::KeyManager;
use tde::settings::TdeSettings;
use tde::{MigrationManager, RecordCodec};

fn manager_in(dir: &tempfile::TempDir) -> MigrationManager<InMemoryExecutor> {
    let settings = TdeSettings {
        master_key_file: dir.path().join(".tde_master_key"),
        base_iterations: 1_000,
        ..TdeSettings::default()
    };
    let keys = KeyManager::new(&settings, EncryptionConfig::builtin()).unwrap();
    MigrationManager::new(RecordCodec::new(keys), InMemoryExecutor::new())
}

fn plaintext_patient(name: &str, phone: &str) -> Record {
    let mut r = Record::new();
    r.push("first_name", name.into());
    r.push("phone", phone.into());
    r
}

fn seed_patients(mgr: &MigrationManager<InMemoryExecutor>) {
    mgr.executor().seed(
        "patients",
        vec![
            plaintext_patient("Ann", "+1-555-0100"),
            plaintext_patient("Boris", "+1-555-0101"),
            plaintext_patient("Clara", ""),
        ],
    );
}

#[tokio::test]
async fn migrate_encrypts_plaintext_rows_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    seed_patients(&mgr);

    let report = mgr.migrate_table("patients").await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.migrated, 2);
    assert_eq!(report.skipped, 1); // empty phone: nothing to encrypt
    assert_eq!(report.failed, 0);

    for row in mgr.executor().rows("patients") {
        let has_phone = row
            .get("phone")
            .and_then(SqlValue::as_str)
            .is_some_and(|p| !p.is_empty());
        let has_envelope = matches!(
            row.get("phone_encrypted"),
            Some(SqlValue::Blob(b)) if !b.is_empty()
        );
        assert_eq!(has_phone, has_envelope);
    }
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    seed_patients(&mgr);

    mgr.migrate_table("patients").await.unwrap();
    let ciphertexts: Vec<_> = mgr
        .executor()
        .rows("patients")
        .into_iter()
        .map(|r| r.get("phone_encrypted").cloned())
        .collect();

    let second = mgr.migrate_table("patients").await.unwrap();
    assert_eq!(second.migrated, 0);
    assert_eq!(second.skipped, 3);

    let after: Vec<_> = mgr
        .executor()
        .rows("patients")
        .into_iter()
        .map(|r| r.get("phone_encrypted").cloned())
        .collect();
    assert_eq!(ciphertexts, after);
}

#[tokio::test]
async fn coverage_counts_enveloped_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    seed_patients(&mgr);

    let before = mgr.verify_coverage("patients").await.unwrap();
    assert_eq!(before.total_rows, 3);
    assert_eq!(before.encrypted_rows, 0);
    assert_eq!(before.percent, 0.0);

    mgr.migrate_table("patients").await.unwrap();

    let after = mgr.verify_coverage("patients").await.unwrap();
    assert_eq!(after.encrypted_rows, 2);
    assert!((after.percent - 2.0 / 3.0 * 100.0).abs() < 1e-9);

    // A second pass changes nothing.
    mgr.migrate_table("patients").await.unwrap();
    let again = mgr.verify_coverage("patients").await.unwrap();
    assert_eq!(again.encrypted_rows, after.encrypted_rows);
}

#[tokio::test]
async fn migrated_values_decrypt_to_the_original_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    seed_patients(&mgr);
    mgr.migrate_table("patients").await.unwrap();

    let row = mgr.executor().rows("patients").remove(0);
    let plaintext = mgr
        .codec()
        .decrypt_field(
            "patients",
            "phone",
            row.get("phone_encrypted").and_then(SqlValue::as_nonempty_blob),
            row.get("phone_iv").and_then(SqlValue::as_nonempty_blob),
        )
        .await
        .unwrap();
    assert_eq!(plaintext, "+1-555-0100");
}

#[tokio::test]
async fn unknown_table_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    assert!(mgr.migrate_table("appointments").await.is_err());
    assert!(mgr.verify_coverage("appointments").await.is_err());
}

#[tokio::test]
async fn migrate_all_covers_every_configured_table() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager_in(&dir);
    seed_patients(&mgr);

    let reports = mgr.migrate_all().await.unwrap();
    assert_eq!(reports.len(), 4);
    let patients = reports.iter().find(|r| r.table == "patients").unwrap();
    assert_eq!(patients.migrated, 2);
}
