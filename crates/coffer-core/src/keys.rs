//! Key custody behind a narrow provider interface.
//!
//! Key material lives in its own store, separate from the records it
//! protects, and never appears in vault snapshots or backup archives. The
//! vault and the backup engine depend only on the `KeyProvider` trait, so
//! the file-backed store here can be swapped for an external KMS without
//! touching either of them.
//!
//! Exactly one key exists per subject (record or backup archive), created
//! once when the subject is sealed. There is no silent rotation: a second
//! `store_key` for the same subject is an error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::SALT_LEN;
use crate::error::VaultError;
use crate::storage::{atomic_write_json, read_json, restrict_file_permissions};

/// A symmetric key plus the salt its password was stretched with.
/// The raw key bytes are zeroized when the material is dropped.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    #[zeroize(skip)]
    pub id: Uuid,
    /// Record id or backup id this key seals.
    #[zeroize(skip)]
    pub subject_id: String,
    #[serde(with = "serde_bytes")]
    pub key: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,
}

impl KeyMaterial {
    pub fn new(subject_id: String, key: Vec<u8>, salt: [u8; SALT_LEN]) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            key,
            salt,
            created_at: Utc::now(),
        }
    }
}

pub trait KeyProvider: Send + Sync {
    /// Persist new key material. Fails if the subject already has a key.
    fn store_key(&self, material: KeyMaterial) -> Result<(), VaultError>;
    fn key_for_subject(&self, subject_id: &str) -> Result<Option<KeyMaterial>, VaultError>;
    fn key_by_id(&self, id: Uuid) -> Result<Option<KeyMaterial>, VaultError>;
}

#[derive(Default, Serialize, Deserialize)]
struct KeyDocument {
    keys: Vec<KeyMaterial>,
}

// ── File-backed provider ────────────────────────────────────────────────────

/// Keys persisted as `keys.json`, mode 0600, rewritten atomically on every
/// store.
pub struct FileKeyProvider {
    path: PathBuf,
    inner: RwLock<HashMap<Uuid, KeyMaterial>>,
}

impl FileKeyProvider {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        let keys = if path.exists() {
            let doc: KeyDocument = read_json(&path)?;
            doc.keys.into_iter().map(|k| (k.id, k)).collect()
        } else {
            atomic_write_json(&path, &KeyDocument::default())?;
            restrict_file_permissions(&path);
            HashMap::new()
        };
        Ok(Self {
            path,
            inner: RwLock::new(keys),
        })
    }

    fn persist(&self, keys: &HashMap<Uuid, KeyMaterial>) -> Result<(), VaultError> {
        let mut sorted: Vec<KeyMaterial> = keys.values().cloned().collect();
        sorted.sort_by_key(|k| k.id);
        atomic_write_json(&self.path, &KeyDocument { keys: sorted })?;
        restrict_file_permissions(&self.path);
        Ok(())
    }
}

impl KeyProvider for FileKeyProvider {
    fn store_key(&self, material: KeyMaterial) -> Result<(), VaultError> {
        let mut keys = self.inner.write();
        if keys.values().any(|k| k.subject_id == material.subject_id) {
            return Err(VaultError::Storage(format!(
                "key already exists for subject {}",
                material.subject_id
            )));
        }
        keys.insert(material.id, material);
        self.persist(&keys)
    }

    fn key_for_subject(&self, subject_id: &str) -> Result<Option<KeyMaterial>, VaultError> {
        Ok(self
            .inner
            .read()
            .values()
            .find(|k| k.subject_id == subject_id)
            .cloned())
    }

    fn key_by_id(&self, id: Uuid) -> Result<Option<KeyMaterial>, VaultError> {
        Ok(self.inner.read().get(&id).cloned())
    }
}

// ── In-memory provider (test fake) ──────────────────────────────────────────

#[derive(Default)]
pub struct MemoryKeyProvider {
    inner: RwLock<HashMap<Uuid, KeyMaterial>>,
}

impl MemoryKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyProvider for MemoryKeyProvider {
    fn store_key(&self, material: KeyMaterial) -> Result<(), VaultError> {
        let mut keys = self.inner.write();
        if keys.values().any(|k| k.subject_id == material.subject_id) {
            return Err(VaultError::Storage(format!(
                "key already exists for subject {}",
                material.subject_id
            )));
        }
        keys.insert(material.id, material);
        Ok(())
    }

    fn key_for_subject(&self, subject_id: &str) -> Result<Option<KeyMaterial>, VaultError> {
        Ok(self
            .inner
            .read()
            .values()
            .find(|k| k.subject_id == subject_id)
            .cloned())
    }

    fn key_by_id(&self, id: Uuid) -> Result<Option<KeyMaterial>, VaultError> {
        Ok(self.inner.read().get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_salt;
    use tempfile::tempdir;

    #[test]
    fn one_key_per_subject() {
        let provider = MemoryKeyProvider::new();
        let first = KeyMaterial::new("record-1".into(), vec![1u8; 32], generate_salt());
        provider.store_key(first).unwrap();
        let second = KeyMaterial::new("record-1".into(), vec![2u8; 32], generate_salt());
        assert!(provider.store_key(second).is_err());
    }

    #[test]
    fn file_provider_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let material = KeyMaterial::new("record-9".into(), vec![9u8; 32], generate_salt());
        let id = material.id;
        {
            let provider = FileKeyProvider::open(&path).unwrap();
            provider.store_key(material).unwrap();
        }
        let provider = FileKeyProvider::open(&path).unwrap();
        let loaded = provider.key_by_id(id).unwrap().unwrap();
        assert_eq!(loaded.subject_id, "record-9");
        assert_eq!(loaded.key, vec![9u8; 32]);
        let by_subject = provider.key_for_subject("record-9").unwrap().unwrap();
        assert_eq!(by_subject.id, id);
    }
}
