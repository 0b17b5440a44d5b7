//! Full cycle against the file-backed stores: seal records, grant access,
//! back up encrypted, lose the primary store, restore, decrypt again.

use coffer_core::audit::{AccessLog, DEFAULT_MAX_BYTES};
use coffer_core::backup::{BackupEngine, BackupFilter, FileBackupIndex, RestoreOptions};
use coffer_core::config::BackupConfig;
use coffer_core::crypto::generate_signing_key;
use coffer_core::keys::FileKeyProvider;
use coffer_core::models::Sensitivity;
use coffer_core::storage::FileBackend;
use coffer_core::vault::VaultStore;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn vault_backup_restore_cycle_with_file_stores() {
    let dir = tempdir().unwrap();
    let data = dir.path();
    let archives = data.join("backups");

    let keys = Arc::new(FileKeyProvider::open(data.join("keys.json")).unwrap());
    let audit = Arc::new(
        AccessLog::new(
            data.join("audit.log"),
            generate_signing_key(),
            DEFAULT_MAX_BYTES,
            5,
        )
        .unwrap(),
    );

    let summary = {
        let backend = Arc::new(FileBackend::open(data.join("vault.json")).unwrap());
        let vault = VaultStore::new(backend.clone(), keys.clone(), audit.clone());
        let summary = vault
            .store(
                "alice",
                "bank_details",
                b"account 12345678",
                Sensitivity::Confidential,
            )
            .unwrap();
        vault
            .grant_access(summary.id, "alice", "bob", None)
            .unwrap();

        let mut config = BackupConfig::new(archives.clone());
        config.encrypt = true;
        let index = Arc::new(FileBackupIndex::open(archives.join("backups.json")).unwrap());
        let engine = BackupEngine::new(backend, keys.clone(), index, config);
        let metadata = engine.create_full_backup().unwrap();
        assert!(metadata.encryption_key_id.is_some());
        summary
    };

    // The primary store is lost; key store and archives survive.
    std::fs::remove_file(data.join("vault.json")).unwrap();

    let backend = Arc::new(FileBackend::open(data.join("vault.json")).unwrap());
    let index = Arc::new(FileBackupIndex::open(archives.join("backups.json")).unwrap());
    let engine = BackupEngine::new(
        backend.clone(),
        keys.clone(),
        index,
        BackupConfig::new(archives.clone()),
    );
    let listed = engine.list_backups(&BackupFilter::default()).unwrap();
    assert_eq!(listed.len(), 1);
    engine
        .restore_from_backup(&listed[0].id, &RestoreOptions::default())
        .unwrap();

    // Both the record and bob's grant came back with the snapshot.
    let vault = VaultStore::new(backend, keys, audit);
    let plaintext = vault
        .retrieve(summary.id, "bob", Some("post_restore_check"))
        .unwrap();
    assert_eq!(plaintext.as_slice(), b"account 12345678");
}
