// ABOUTME: End-to-end smoke test for a full pgwarden lifecycle against on-disk state.
// ABOUTME: Certificates, backup lineage, restore into recovery, dumps, WAL and state sync, across a store reopen.

use std::fs;

use chrono::Duration;
use pgwarden_core::{BootMode, RecoveryAction, marker_present, select_recovery_mode};
use pgwarden_ops::testing::TestHarness;
use pgwarden_ops::{
    BackupLineage, BackupOptions, CertificateManager, Confirmation, DumpManager, InstallOutcome,
    StateSync, WalArchiver,
};
use pgwarden_store::{RecordStore, open_document, open_sqlite};

#[test]
fn smoke_test_full_lifecycle() {
    // 1. Harness rooted in a temp dir, state on disk
    let dir = tempfile::TempDir::new().unwrap();
    let harness = TestHarness::new(dir.path()).unwrap();
    let ctx = harness.context();
    let state_file = harness.settings.state_file.clone();
    let mut store = open_sqlite(&state_file).unwrap();

    // 2. Boot: issue and install certificates
    let certs = CertificateManager::new(&ctx);
    let cert = certs.resolve_certificate(&mut store).unwrap();
    assert_eq!(
        certs.install_certificate(&cert).unwrap(),
        InstallOutcome::Installed
    );
    let plan = select_recovery_mode(marker_present(&harness.settings.data_dir), None, false);
    assert_eq!(plan.mode, BootMode::Fresh);

    // 3. A full backup, then an incremental one
    let lineage = BackupLineage::new(&ctx);
    let full = lineage
        .create_backup(&mut store, BackupOptions::default())
        .unwrap();
    harness.clock.advance(Duration::hours(6));
    let incremental = lineage
        .create_backup(
            &mut store,
            BackupOptions {
                incremental: true,
                fast: false,
            },
        )
        .unwrap();
    assert_eq!(incremental.parent_id, Some(full.id));

    // 4. WAL segments keep flowing between backups
    let wal_dir = dir.path().join("pg_wal");
    fs::create_dir_all(&wal_dir).unwrap();
    let segment = wal_dir.join("000000010000000000000002");
    fs::write(&segment, "wal").unwrap();
    let archiver = WalArchiver::new(&ctx);
    archiver
        .archive(&mut store, &segment, "000000010000000000000002")
        .unwrap();

    // 5. A dump of the local database
    let dumps = DumpManager::new(&ctx);
    let dump = dumps.create_dump(&mut store, None).unwrap();

    // 6. Reopen the store: everything persisted
    drop(store);
    let mut store = open_sqlite(&state_file).unwrap();
    assert_eq!(lineage.chain(&store, incremental.id).unwrap().len(), 2);
    assert_eq!(archiver.stats(&store).unwrap().segments, 1);
    assert_eq!(dumps.list_dumps(&store).unwrap(), vec![dump.clone()]);

    // 7. Certificates are reused on the next boot and already installed
    harness.clock.advance(Duration::days(30));
    let again = certs.resolve_certificate(&mut store).unwrap();
    assert_eq!(again.id, cert.id);
    assert_eq!(
        certs.install_certificate(&again).unwrap(),
        InstallOutcome::AlreadyCurrent
    );

    // 8. Restore the incremental backup and boot into point-in-time recovery
    lineage
        .restore_backup(&store, incremental.id, Confirmation::Confirmed)
        .unwrap();
    let plan = select_recovery_mode(
        marker_present(&harness.settings.data_dir),
        Some("2024-01-01 06:30:00"),
        true,
    );
    assert_eq!(plan.mode, BootMode::Recovering);
    assert_eq!(plan.action, Some(RecoveryAction::Promote));

    let restored_segment = harness.settings.data_dir.join("RECOVERYXLOG");
    archiver
        .unarchive(&restored_segment, "000000010000000000000002")
        .unwrap();
    assert_eq!(fs::read_to_string(&restored_segment).unwrap(), "wal");

    // 9. Restore the dump by id
    dumps.restore_dump(&store, &dump.id.to_string()).unwrap();
    assert_eq!(harness.runner.invocations_of("pg_restore").len(), 1);

    // 10. Ship the state to a fresh host
    drop(store);
    let sync = StateSync::new(&ctx);
    sync.push().unwrap();
    fs::remove_file(&state_file).unwrap();
    sync.pull().unwrap();
    let store = open_sqlite(&state_file).unwrap();
    assert_eq!(lineage.list_backups(&store).unwrap().len(), 2);

    // Scratch space is empty after every operation
    assert_eq!(
        fs::read_dir(&harness.settings.tmp_dir).unwrap().count(),
        0
    );
}

#[test]
fn smoke_test_document_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let harness = TestHarness::new(dir.path()).unwrap();
    let ctx = harness.context();
    let path = dir.path().join("state").join("state.json");
    let mut store = open_document(&path).unwrap();

    let lineage = BackupLineage::new(&ctx);
    let full = lineage
        .create_backup(&mut store, BackupOptions::default())
        .unwrap();
    let next = lineage
        .create_backup(
            &mut store,
            BackupOptions {
                incremental: true,
                fast: true,
            },
        )
        .unwrap();
    assert_eq!(next.parent_id, Some(full.id));

    let reopened = open_document(&path).unwrap();
    let ids: Vec<_> = lineage
        .chain(&reopened, next.id)
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec![next.id, full.id]);
    assert!(reopened.fetch_by_id::<pgwarden_core::BackupRecord>(3).unwrap().is_none());
}
