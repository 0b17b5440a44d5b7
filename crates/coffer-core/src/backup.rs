//! Backup engine: full-snapshot archives with compression, optional
//! whole-archive encryption, checksums and retention.
//!
//! One file per backup, named from the timestamp-derived id:
//!
//!   backup_<id>.dat        zstd( [nonce 24 | tag 16 | ciphertext] or plain json )
//!   backup_<id>_media.dat  zstd( media manifest json )
//!
//! Metadata lives in the backup index beside the archives, never inside
//! them, so a restore knows how to decode before touching the bytes. The
//! checksum is BLAKE3 over the final on-disk archive, computed after
//! compression and encryption, and verified before anything else on
//! restore. Decrypting corrupted bytes throws cryptic lower-level errors;
//! the checksum mismatch does not.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::BackupConfig;
use crate::crypto::{
    decrypt, derive_key, encrypt, generate_salt, generate_secure_password, EncryptedPayload,
    NONCE_LEN, TAG_LEN,
};
use crate::error::BackupError;
use crate::keys::{KeyMaterial, KeyProvider};
use crate::storage::{atomic_write_json, fsync_dir, read_json, VaultBackend, VaultSnapshot, SCHEMA_VERSION};

pub const BACKUP_FORMAT_VERSION: u32 = 1;
const ARCHIVE_PASSWORD_LEN: usize = 48;
const CHECKSUM_BUF_LEN: usize = 64 * 1024;

// ── Metadata ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompressionKind {
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Timestamp-derived, lexicographically ordered.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub kind: BackupKind,
    /// Reference into the key provider when the archive is encrypted.
    pub encryption_key_id: Option<Uuid>,
    pub compression: CompressionKind,
    pub compression_level: i32,
    pub schema_version: u32,
    pub format_version: u32,
    /// BLAKE3 hex over the final on-disk archive bytes.
    pub checksum: String,
}

#[derive(Debug, Clone, Default)]
pub struct BackupFilter {
    pub kind: Option<BackupKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub restore_media: bool,
    pub validate_checksum: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            restore_media: false,
            validate_checksum: true,
        }
    }
}

// ── Backup index ────────────────────────────────────────────────────────────

pub trait BackupIndex: Send + Sync {
    fn insert(&self, metadata: BackupMetadata) -> Result<(), BackupError>;
    fn get(&self, id: &str) -> Result<Option<BackupMetadata>, BackupError>;
    fn remove(&self, id: &str) -> Result<(), BackupError>;
    fn list(&self) -> Result<Vec<BackupMetadata>, BackupError>;
}

#[derive(Default, Serialize, Deserialize)]
struct IndexDocument {
    backups: Vec<BackupMetadata>,
}

/// Index persisted as `backups.json` in the archive directory.
pub struct FileBackupIndex {
    path: PathBuf,
    inner: RwLock<HashMap<String, BackupMetadata>>,
}

impl FileBackupIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackupError> {
        let path = path.as_ref().to_path_buf();
        let backups = if path.exists() {
            let doc: IndexDocument = read_json(&path).map_err(|e| BackupError::Storage(e.to_string()))?;
            doc.backups.into_iter().map(|m| (m.id.clone(), m)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            inner: RwLock::new(backups),
        })
    }

    fn persist(&self, backups: &HashMap<String, BackupMetadata>) -> Result<(), BackupError> {
        let mut sorted: Vec<BackupMetadata> = backups.values().cloned().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        atomic_write_json(&self.path, &IndexDocument { backups: sorted })
            .map_err(|e| BackupError::Storage(e.to_string()))
    }
}

impl BackupIndex for FileBackupIndex {
    fn insert(&self, metadata: BackupMetadata) -> Result<(), BackupError> {
        let mut backups = self.inner.write();
        backups.insert(metadata.id.clone(), metadata);
        self.persist(&backups)
    }

    fn get(&self, id: &str) -> Result<Option<BackupMetadata>, BackupError> {
        Ok(self.inner.read().get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<(), BackupError> {
        let mut backups = self.inner.write();
        backups.remove(id);
        self.persist(&backups)
    }

    fn list(&self) -> Result<Vec<BackupMetadata>, BackupError> {
        Ok(self.inner.read().values().cloned().collect())
    }
}

/// In-memory index (test fake).
#[derive(Default)]
pub struct MemoryBackupIndex {
    inner: RwLock<HashMap<String, BackupMetadata>>,
}

impl MemoryBackupIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupIndex for MemoryBackupIndex {
    fn insert(&self, metadata: BackupMetadata) -> Result<(), BackupError> {
        self.inner.write().insert(metadata.id.clone(), metadata);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<BackupMetadata>, BackupError> {
        Ok(self.inner.read().get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<(), BackupError> {
        self.inner.write().remove(id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<BackupMetadata>, BackupError> {
        Ok(self.inner.read().values().cloned().collect())
    }
}

// ── Media manifest ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct MediaManifest {
    format_version: u32,
    entries: Vec<MediaEntry>,
}

#[derive(Serialize, Deserialize)]
struct MediaEntry {
    path: String,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub struct BackupEngine {
    backend: Arc<dyn VaultBackend>,
    keys: Arc<dyn KeyProvider>,
    index: Arc<dyn BackupIndex>,
    config: BackupConfig,
    /// Held for the duration of a run; overlapping full backups for the
    /// same target are rejected, not queued.
    run_lock: Mutex<()>,
    /// Ids currently being restored or deleted.
    busy_ids: Mutex<HashSet<String>>,
}

struct BusyGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}

impl BackupEngine {
    pub fn new(
        backend: Arc<dyn VaultBackend>,
        keys: Arc<dyn KeyProvider>,
        index: Arc<dyn BackupIndex>,
        config: BackupConfig,
    ) -> Self {
        Self {
            backend,
            keys,
            index,
            config,
            run_lock: Mutex::new(()),
            busy_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Run one full backup. Snapshot → serialize → (encrypt) → compress →
    /// atomic write → checksum → metadata → (media) → retention. A failure
    /// before the metadata step leaves no metadata behind.
    pub fn create_full_backup(&self) -> Result<BackupMetadata, BackupError> {
        let _running = self.run_lock.try_lock().ok_or_else(|| {
            BackupError::BackupInProgress(self.config.location.display().to_string())
        })?;

        let started = Utc::now();
        let id = started.format("%Y%m%dT%H%M%S%f").to_string();
        info!(backup_id = %id, "full backup started");

        let snapshot = self.backend.export_snapshot()?;
        let document = serde_json::to_vec(&snapshot)?;

        let (body, encryption_key_id) = if self.config.encrypt {
            let password = Zeroizing::new(generate_secure_password(ARCHIVE_PASSWORD_LEN));
            let salt = generate_salt();
            let key = derive_key(&password, &salt)?;
            let payload = encrypt(&document, &key)?;
            let material = KeyMaterial::new(id.clone(), key.to_vec(), salt);
            let key_id = material.id;
            self.keys.store_key(material)?;
            (frame_encrypted(&payload), Some(key_id))
        } else {
            (document, None)
        };

        fs::create_dir_all(&self.config.location)?;
        let archive_path = self.archive_path(&id);
        let level = self.config.clamped_compression_level();
        write_compressed_atomic(&archive_path, &body, level)?;

        let checksum = file_checksum(&archive_path)?;
        let size_bytes = fs::metadata(&archive_path)?.len();

        let metadata = BackupMetadata {
            id: id.clone(),
            created_at: started,
            size_bytes,
            kind: BackupKind::Full,
            encryption_key_id,
            compression: CompressionKind::Zstd,
            compression_level: level,
            schema_version: SCHEMA_VERSION,
            format_version: BACKUP_FORMAT_VERSION,
            checksum,
        };
        self.index.insert(metadata.clone())?;

        if self.config.include_media {
            self.archive_media(&id)?;
        }

        self.apply_retention_policy();
        info!(backup_id = %id, size_bytes, encrypted = self.config.encrypt, "full backup complete");
        Ok(metadata)
    }

    /// All-or-nothing restore. The checksum is verified before any
    /// decompression or decryption is attempted.
    pub fn restore_from_backup(
        &self,
        backup_id: &str,
        options: &RestoreOptions,
    ) -> Result<(), BackupError> {
        let _busy = self.mark_busy(backup_id)?;
        let metadata = self
            .index
            .get(backup_id)?
            .ok_or_else(|| BackupError::BackupNotFound(backup_id.to_string()))?;
        let archive_path = self.archive_path(backup_id);
        if !archive_path.exists() {
            return Err(BackupError::BackupNotFound(backup_id.to_string()));
        }

        if options.validate_checksum {
            let actual = file_checksum(&archive_path)?;
            if actual != metadata.checksum {
                return Err(BackupError::IntegrityCheckFailed {
                    id: backup_id.to_string(),
                    expected: metadata.checksum,
                    actual,
                });
            }
        }

        if metadata.format_version != BACKUP_FORMAT_VERSION {
            return Err(BackupError::UnsupportedFormat(format!(
                "backup format version {}",
                metadata.format_version
            )));
        }

        let body = read_decompressed(&archive_path)?;
        let document = match metadata.encryption_key_id {
            Some(key_id) => {
                let material = self
                    .keys
                    .key_by_id(key_id)?
                    .ok_or_else(|| BackupError::Storage(format!("archive key {key_id} missing")))?;
                let payload = parse_encrypted(&body)?;
                decrypt(&payload, &material.key)?.to_vec()
            }
            None => body,
        };

        let snapshot: VaultSnapshot = serde_json::from_slice(&document)?;
        self.backend.apply_snapshot(snapshot)?;

        if options.restore_media {
            self.restore_media(backup_id)?;
        }
        info!(backup_id, "restore complete");
        Ok(())
    }

    /// Known backups, newest first, optionally filtered by kind and
    /// creation-time range.
    pub fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<BackupMetadata>, BackupError> {
        let mut backups = self.index.list()?;
        backups.retain(|m| {
            filter.kind.map_or(true, |k| m.kind == k)
                && filter.since.map_or(true, |s| m.created_at >= s)
                && filter.until.map_or(true, |u| m.created_at <= u)
        });
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Delete the archive, its media archive (absent is fine), then the
    /// metadata, in that order, so metadata never outlives its file.
    pub fn delete_backup(&self, backup_id: &str) -> Result<(), BackupError> {
        let _busy = self.mark_busy(backup_id)?;
        self.index
            .get(backup_id)?
            .ok_or_else(|| BackupError::BackupNotFound(backup_id.to_string()))?;
        remove_file_if_present(&self.archive_path(backup_id))?;
        remove_file_if_present(&self.media_archive_path(backup_id))?;
        self.index.remove(backup_id)?;
        info!(backup_id, "backup deleted");
        Ok(())
    }

    /// Drop the oldest archives beyond the retention count. Runs after
    /// every successful full backup; a failed deletion is logged and
    /// skipped; housekeeping must not fail the backup that triggered it.
    pub fn apply_retention_policy(&self) {
        let backups = match self.index.list() {
            Ok(backups) => backups,
            Err(e) => {
                warn!(error = %e, "retention: cannot list backups");
                return;
            }
        };
        if backups.len() <= self.config.retention {
            return;
        }
        let mut by_age = backups;
        by_age.sort_by_key(|m| m.created_at);
        let excess = by_age.len() - self.config.retention;
        for old in by_age.into_iter().take(excess) {
            match self.delete_backup(&old.id) {
                Ok(()) => info!(backup_id = %old.id, "retention: old backup removed"),
                Err(e) => warn!(backup_id = %old.id, error = %e, "retention: delete failed"),
            }
        }
    }

    fn mark_busy(&self, backup_id: &str) -> Result<BusyGuard<'_>, BackupError> {
        let mut busy = self.busy_ids.lock();
        if !busy.insert(backup_id.to_string()) {
            return Err(BackupError::BackupBusy(backup_id.to_string()));
        }
        Ok(BusyGuard {
            set: &self.busy_ids,
            id: backup_id.to_string(),
        })
    }

    fn archive_path(&self, id: &str) -> PathBuf {
        self.config.location.join(format!("backup_{id}.dat"))
    }

    fn media_archive_path(&self, id: &str) -> PathBuf {
        self.config.location.join(format!("backup_{id}_media.dat"))
    }

    fn archive_media(&self, id: &str) -> Result<(), BackupError> {
        let media_root = self.config.media_location.as_ref().ok_or_else(|| {
            BackupError::Storage("include_media set but no media location configured".into())
        })?;
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(media_root) {
            let entry = entry.map_err(|e| BackupError::Storage(format!("walk media: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(media_root)
                .map_err(|e| BackupError::Storage(format!("media path: {e}")))?
                .to_string_lossy()
                .to_string();
            let data = fs::read(entry.path())?;
            entries.push(MediaEntry { path: rel, data });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let manifest = MediaManifest {
            format_version: BACKUP_FORMAT_VERSION,
            entries,
        };
        let bytes = serde_json::to_vec(&manifest)?;
        write_compressed_atomic(
            &self.media_archive_path(id),
            &bytes,
            self.config.clamped_compression_level(),
        )?;
        info!(backup_id = %id, files = manifest.entries.len(), "media archived");
        Ok(())
    }

    fn restore_media(&self, id: &str) -> Result<(), BackupError> {
        let media_root = self.config.media_location.as_ref().ok_or_else(|| {
            BackupError::Storage("media restore requested but no media location configured".into())
        })?;
        let path = self.media_archive_path(id);
        if !path.exists() {
            return Err(BackupError::BackupNotFound(format!("{id} (media archive)")));
        }
        let bytes = read_decompressed(&path)?;
        let manifest: MediaManifest = serde_json::from_slice(&bytes)?;
        for entry in manifest.entries {
            let dest = media_root.join(&entry.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, entry.data)?;
        }
        info!(backup_id = %id, "media restored");
        Ok(())
    }
}

// ── Archive I/O helpers ─────────────────────────────────────────────────────

/// Wire format for an encrypted archive body: nonce | tag | ciphertext.
fn frame_encrypted(payload: &EncryptedPayload) -> Vec<u8> {
    let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + payload.ciphertext.len());
    out.extend_from_slice(&payload.nonce);
    out.extend_from_slice(&payload.auth_tag);
    out.extend_from_slice(&payload.ciphertext);
    out
}

fn parse_encrypted(body: &[u8]) -> Result<EncryptedPayload, BackupError> {
    if body.len() < NONCE_LEN + TAG_LEN {
        return Err(BackupError::UnsupportedFormat(
            "encrypted archive body too short".into(),
        ));
    }
    let (nonce_bytes, rest) = body.split_at(NONCE_LEN);
    let (tag_bytes, ciphertext) = rest.split_at(TAG_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(nonce_bytes);
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag_bytes);
    Ok(EncryptedPayload {
        ciphertext: ciphertext.to_vec(),
        nonce,
        auth_tag,
    })
}

/// Compress into a temp file in the target directory, fsync, rename over
/// the destination, fsync the directory. An interrupted run leaves no
/// partial archive under the final name.
fn write_compressed_atomic(dest: &Path, bytes: &[u8], level: i32) -> Result<(), BackupError> {
    let parent = dest
        .parent()
        .ok_or_else(|| BackupError::Storage(format!("no parent directory for {}", dest.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    zstd::stream::copy_encode(bytes, &mut tmp, level)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest)
        .map_err(|e| BackupError::Storage(format!("persist {}: {}", dest.display(), e)))?;
    fsync_dir(parent).map_err(|e| BackupError::Storage(e.to_string()))?;
    Ok(())
}

/// Streaming decompression with the decoder's bounded internal buffer.
/// The archive is never held in memory compressed and decompressed at
/// once.
fn read_decompressed(path: &Path) -> Result<Vec<u8>, BackupError> {
    let file = File::open(path)?;
    let mut out = Vec::new();
    zstd::stream::copy_decode(file, &mut out)?;
    Ok(out)
}

/// BLAKE3 over the on-disk bytes, read in fixed-size chunks.
fn file_checksum(path: &Path) -> Result<String, BackupError> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHECKSUM_BUF_LEN];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn remove_file_if_present(path: &Path) -> Result<(), BackupError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::MemoryKeyProvider;
    use crate::models::{EncryptedRecord, Sensitivity};
    use crate::storage::MemoryBackend;
    use std::io::Write;
    use tempfile::tempdir;

    fn seeded_backend(records: usize) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        for i in 0..records {
            let payload = encrypt(format!("payload {i}").as_bytes(), &[3u8; 32]).unwrap();
            backend
                .insert_record(EncryptedRecord {
                    id: Uuid::new_v4(),
                    owner_id: "alice".into(),
                    data_type: "notes".into(),
                    sensitivity: Sensitivity::Internal,
                    payload,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        backend
    }

    fn engine_for(
        backend: Arc<MemoryBackend>,
        keys: Arc<MemoryKeyProvider>,
        index: Arc<MemoryBackupIndex>,
        config: BackupConfig,
    ) -> BackupEngine {
        BackupEngine::new(backend, keys, index, config)
    }

    fn plain_config(location: PathBuf) -> BackupConfig {
        let mut config = BackupConfig::new(location);
        config.encrypt = false;
        config
    }

    #[test]
    fn backup_restore_roundtrip_plain() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(3);
        let keys = Arc::new(MemoryKeyProvider::new());
        let index = Arc::new(MemoryBackupIndex::new());
        let engine = engine_for(
            backend.clone(),
            keys.clone(),
            index.clone(),
            plain_config(dir.path().to_path_buf()),
        );

        let exported = backend.export_snapshot().unwrap();
        let metadata = engine.create_full_backup().unwrap();
        assert_eq!(metadata.kind, BackupKind::Full);
        assert!(metadata.encryption_key_id.is_none());
        assert!(metadata.size_bytes > 0);

        let fresh = Arc::new(MemoryBackend::new());
        let restorer = engine_for(
            fresh.clone(),
            keys,
            index,
            plain_config(dir.path().to_path_buf()),
        );
        restorer
            .restore_from_backup(&metadata.id, &RestoreOptions::default())
            .unwrap();
        let restored = fresh.export_snapshot().unwrap();
        assert_eq!(
            serde_json::to_vec(&exported.records).unwrap(),
            serde_json::to_vec(&restored.records).unwrap()
        );
        assert_eq!(
            serde_json::to_vec(&exported.grants).unwrap(),
            serde_json::to_vec(&restored.grants).unwrap()
        );
    }

    #[test]
    fn backup_restore_roundtrip_encrypted() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(2);
        let keys = Arc::new(MemoryKeyProvider::new());
        let index = Arc::new(MemoryBackupIndex::new());
        let mut config = BackupConfig::new(dir.path().to_path_buf());
        config.encrypt = true;
        let engine = engine_for(backend.clone(), keys.clone(), index.clone(), config.clone());

        let exported = backend.export_snapshot().unwrap();
        let metadata = engine.create_full_backup().unwrap();
        let key_id = metadata.encryption_key_id.expect("archive key reference");
        assert!(keys.key_by_id(key_id).unwrap().is_some());

        let fresh = Arc::new(MemoryBackend::new());
        let restorer = engine_for(fresh.clone(), keys, index, config);
        restorer
            .restore_from_backup(&metadata.id, &RestoreOptions::default())
            .unwrap();
        let restored = fresh.export_snapshot().unwrap();
        assert_eq!(
            serde_json::to_vec(&exported.records).unwrap(),
            serde_json::to_vec(&restored.records).unwrap()
        );
    }

    #[test]
    fn corrupted_archive_is_rejected_before_any_mutation() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(2);
        let keys = Arc::new(MemoryKeyProvider::new());
        let index = Arc::new(MemoryBackupIndex::new());
        let engine = engine_for(
            backend,
            keys.clone(),
            index.clone(),
            plain_config(dir.path().to_path_buf()),
        );
        let metadata = engine.create_full_backup().unwrap();

        // Flip the last byte of the archive on disk.
        let archive = dir.path().join(format!("backup_{}.dat", metadata.id));
        let mut bytes = fs::read(&archive).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut file = File::create(&archive).unwrap();
        file.write_all(&bytes).unwrap();

        let fresh = Arc::new(MemoryBackend::new());
        let restorer = engine_for(
            fresh.clone(),
            keys,
            index,
            plain_config(dir.path().to_path_buf()),
        );
        let err = restorer
            .restore_from_backup(&metadata.id, &RestoreOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackupError::IntegrityCheckFailed { .. }));
        assert!(fresh.export_snapshot().unwrap().records.is_empty());
    }

    #[test]
    fn retention_keeps_only_newest() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(1);
        let keys = Arc::new(MemoryKeyProvider::new());
        let index = Arc::new(MemoryBackupIndex::new());
        let mut config = plain_config(dir.path().to_path_buf());
        config.retention = 2;
        let engine = engine_for(backend, keys, index, config);

        let first = engine.create_full_backup().unwrap();
        let second = engine.create_full_backup().unwrap();
        let third = engine.create_full_backup().unwrap();

        let listed = engine.list_backups(&BackupFilter::default()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, third.id);
        assert_eq!(listed[1].id, second.id);
        assert!(!listed.iter().any(|m| m.id == first.id));
        assert!(!dir.path().join(format!("backup_{}.dat", first.id)).exists());

        assert!(matches!(
            engine.delete_backup("19700101T000000000000000"),
            Err(BackupError::BackupNotFound(_))
        ));
    }

    #[test]
    fn list_filters_by_time_range() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(1);
        let engine = engine_for(
            backend,
            Arc::new(MemoryKeyProvider::new()),
            Arc::new(MemoryBackupIndex::new()),
            plain_config(dir.path().to_path_buf()),
        );
        let first = engine.create_full_backup().unwrap();
        let second = engine.create_full_backup().unwrap();

        let only_second = engine
            .list_backups(&BackupFilter {
                since: Some(second.created_at),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_second.len(), 1);
        assert_eq!(only_second[0].id, second.id);

        let only_first = engine
            .list_backups(&BackupFilter {
                until: Some(first.created_at),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_first.len(), 1);
        assert_eq!(only_first[0].id, first.id);

        let full_only = engine
            .list_backups(&BackupFilter {
                kind: Some(BackupKind::Full),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(full_only.len(), 2);
    }

    #[test]
    fn delete_removes_archive_and_metadata() {
        let dir = tempdir().unwrap();
        let engine = engine_for(
            seeded_backend(1),
            Arc::new(MemoryKeyProvider::new()),
            Arc::new(MemoryBackupIndex::new()),
            plain_config(dir.path().to_path_buf()),
        );
        let metadata = engine.create_full_backup().unwrap();
        let archive = dir.path().join(format!("backup_{}.dat", metadata.id));
        assert!(archive.exists());
        engine.delete_backup(&metadata.id).unwrap();
        assert!(!archive.exists());
        assert!(engine.list_backups(&BackupFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn media_archive_roundtrip() {
        let dir = tempdir().unwrap();
        let media = dir.path().join("media");
        fs::create_dir_all(media.join("images")).unwrap();
        fs::write(media.join("images/a.png"), b"png bytes").unwrap();
        fs::write(media.join("doc.pdf"), b"pdf bytes").unwrap();

        let mut config = plain_config(dir.path().join("archives"));
        config.include_media = true;
        config.media_location = Some(media.clone());
        let engine = engine_for(
            seeded_backend(1),
            Arc::new(MemoryKeyProvider::new()),
            Arc::new(MemoryBackupIndex::new()),
            config,
        );
        let metadata = engine.create_full_backup().unwrap();

        fs::remove_file(media.join("images/a.png")).unwrap();
        fs::remove_file(media.join("doc.pdf")).unwrap();

        engine
            .restore_from_backup(
                &metadata.id,
                &RestoreOptions {
                    restore_media: true,
                    validate_checksum: true,
                },
            )
            .unwrap();
        assert_eq!(fs::read(media.join("images/a.png")).unwrap(), b"png bytes");
        assert_eq!(fs::read(media.join("doc.pdf")).unwrap(), b"pdf bytes");
    }
}
