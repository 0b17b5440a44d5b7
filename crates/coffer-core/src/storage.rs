//! Persistence backends for the vault.
//!
//! `VaultBackend` is the seam between the vault store and whatever holds its
//! data: a single JSON document on disk in production, an in-memory fake in
//! tests. All mutation goes through one write lock per backend, so record
//! inserts and grant updates are atomic with respect to each other, and a
//! snapshot export always sees a consistent state.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::VaultError;
use crate::models::{AccessGrant, EncryptedRecord};

pub const SCHEMA_VERSION: u32 = 1;

/// Full export of the structured data: records and grants, sorted by id so
/// the serialized bytes are canonical. Key material is custodied by the
/// `KeyProvider` and never appears in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub records: Vec<EncryptedRecord>,
    pub grants: Vec<AccessGrant>,
}

pub trait VaultBackend: Send + Sync {
    fn insert_record(&self, record: EncryptedRecord) -> Result<(), VaultError>;
    fn record(&self, id: Uuid) -> Result<Option<EncryptedRecord>, VaultError>;
    fn insert_grant(&self, grant: AccessGrant) -> Result<(), VaultError>;
    fn grant(&self, id: Uuid) -> Result<Option<AccessGrant>, VaultError>;
    fn grants_for_record(&self, record_id: Uuid) -> Result<Vec<AccessGrant>, VaultError>;
    /// Replace an existing grant (revocation stamping). `GrantNotFound` if absent.
    fn update_grant(&self, grant: AccessGrant) -> Result<(), VaultError>;
    fn export_snapshot(&self) -> Result<VaultSnapshot, VaultError>;
    /// All-or-nothing: on failure the previous state stays visible.
    fn apply_snapshot(&self, snapshot: VaultSnapshot) -> Result<(), VaultError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultDocument {
    schema_version: u32,
    records: HashMap<Uuid, EncryptedRecord>,
    grants: HashMap<Uuid, AccessGrant>,
}

impl VaultDocument {
    fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records: HashMap::new(),
            grants: HashMap::new(),
        }
    }

    fn to_snapshot(&self) -> VaultSnapshot {
        let mut records: Vec<EncryptedRecord> = self.records.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        let mut grants: Vec<AccessGrant> = self.grants.values().cloned().collect();
        grants.sort_by_key(|g| g.id);
        VaultSnapshot {
            schema_version: self.schema_version,
            exported_at: Utc::now(),
            records,
            grants,
        }
    }

    fn from_snapshot(snapshot: VaultSnapshot) -> Self {
        Self {
            schema_version: snapshot.schema_version,
            records: snapshot.records.into_iter().map(|r| (r.id, r)).collect(),
            grants: snapshot.grants.into_iter().map(|g| (g.id, g)).collect(),
        }
    }
}

// ── File-backed backend ─────────────────────────────────────────────────────

/// Vault data persisted as one JSON document, rewritten atomically
/// (temp file + rename + directory fsync) on every mutation.
pub struct FileBackend {
    path: PathBuf,
    inner: RwLock<VaultDocument>,
}

impl FileBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let doc: VaultDocument = read_json(&path)?;
            if doc.schema_version != SCHEMA_VERSION {
                return Err(VaultError::Storage(format!(
                    "unsupported vault schema version {}",
                    doc.schema_version
                )));
            }
            doc
        } else {
            let doc = VaultDocument::new();
            atomic_write_json(&path, &doc)?;
            doc
        };
        Ok(Self {
            path,
            inner: RwLock::new(document),
        })
    }

    fn persist(&self, document: &VaultDocument) -> Result<(), VaultError> {
        atomic_write_json(&self.path, document)
    }
}

impl VaultBackend for FileBackend {
    fn insert_record(&self, record: EncryptedRecord) -> Result<(), VaultError> {
        let mut doc = self.inner.write();
        doc.records.insert(record.id, record);
        self.persist(&doc)
    }

    fn record(&self, id: Uuid) -> Result<Option<EncryptedRecord>, VaultError> {
        Ok(self.inner.read().records.get(&id).cloned())
    }

    fn insert_grant(&self, grant: AccessGrant) -> Result<(), VaultError> {
        let mut doc = self.inner.write();
        doc.grants.insert(grant.id, grant);
        self.persist(&doc)
    }

    fn grant(&self, id: Uuid) -> Result<Option<AccessGrant>, VaultError> {
        Ok(self.inner.read().grants.get(&id).cloned())
    }

    fn grants_for_record(&self, record_id: Uuid) -> Result<Vec<AccessGrant>, VaultError> {
        Ok(self
            .inner
            .read()
            .grants
            .values()
            .filter(|g| g.record_id == record_id)
            .cloned()
            .collect())
    }

    fn update_grant(&self, grant: AccessGrant) -> Result<(), VaultError> {
        let mut doc = self.inner.write();
        if !doc.grants.contains_key(&grant.id) {
            return Err(VaultError::GrantNotFound(grant.id));
        }
        doc.grants.insert(grant.id, grant);
        self.persist(&doc)
    }

    fn export_snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        Ok(self.inner.read().to_snapshot())
    }

    fn apply_snapshot(&self, snapshot: VaultSnapshot) -> Result<(), VaultError> {
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(VaultError::Storage(format!(
                "snapshot schema version {} does not match store version {}",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }
        let mut doc = self.inner.write();
        let replacement = VaultDocument::from_snapshot(snapshot);
        // Disk first: if the write fails the in-memory state is untouched.
        self.persist(&replacement)?;
        *doc = replacement;
        Ok(())
    }
}

// ── In-memory backend (test fake) ───────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<VaultDocument>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(VaultDocument::new()),
        }
    }
}

impl VaultBackend for MemoryBackend {
    fn insert_record(&self, record: EncryptedRecord) -> Result<(), VaultError> {
        self.inner.write().records.insert(record.id, record);
        Ok(())
    }

    fn record(&self, id: Uuid) -> Result<Option<EncryptedRecord>, VaultError> {
        Ok(self.inner.read().records.get(&id).cloned())
    }

    fn insert_grant(&self, grant: AccessGrant) -> Result<(), VaultError> {
        self.inner.write().grants.insert(grant.id, grant);
        Ok(())
    }

    fn grant(&self, id: Uuid) -> Result<Option<AccessGrant>, VaultError> {
        Ok(self.inner.read().grants.get(&id).cloned())
    }

    fn grants_for_record(&self, record_id: Uuid) -> Result<Vec<AccessGrant>, VaultError> {
        Ok(self
            .inner
            .read()
            .grants
            .values()
            .filter(|g| g.record_id == record_id)
            .cloned()
            .collect())
    }

    fn update_grant(&self, grant: AccessGrant) -> Result<(), VaultError> {
        let mut doc = self.inner.write();
        if !doc.grants.contains_key(&grant.id) {
            return Err(VaultError::GrantNotFound(grant.id));
        }
        doc.grants.insert(grant.id, grant);
        Ok(())
    }

    fn export_snapshot(&self) -> Result<VaultSnapshot, VaultError> {
        Ok(self.inner.read().to_snapshot())
    }

    fn apply_snapshot(&self, snapshot: VaultSnapshot) -> Result<(), VaultError> {
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(VaultError::Storage(format!(
                "snapshot schema version {} does not match store version {}",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }
        *self.inner.write() = VaultDocument::from_snapshot(snapshot);
        Ok(())
    }
}

// ── Shared file helpers ─────────────────────────────────────────────────────

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, VaultError> {
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Write a JSON document via a temp file in the same directory, fsync,
/// rename over the destination, then fsync the directory.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), VaultError> {
    let parent = path
        .parent()
        .ok_or_else(|| VaultError::Storage(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)?;
    let json = serde_json::to_vec_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| VaultError::Storage(format!("persist {}: {}", path.display(), e)))?;
    fsync_dir(parent)?;
    Ok(())
}

pub(crate) fn fsync_dir(path: &Path) -> Result<(), VaultError> {
    #[cfg(unix)]
    {
        let dir = fs::OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(unix)]
pub(crate) fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("cannot restrict permissions on {}: {}", path.display(), e);
    }
}

#[cfg(not(unix))]
pub(crate) fn restrict_file_permissions(_path: &Path) {}
