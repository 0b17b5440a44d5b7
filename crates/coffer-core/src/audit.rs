//! Append-only access audit log.
//!
//! One JSON entry per line, hash-chained and Ed25519-signed. Every decrypt,
//! grant and revoke lands here synchronously: the entry is flushed and
//! synced before the triggering operation returns, because this trail is
//! the compliance control, not a best-effort log line. The public surface
//! is append and read; nothing updates or deletes an entry.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::VaultError;
use crate::storage::restrict_file_permissions;

pub const DEFAULT_PURPOSE: &str = "standard_access";
pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_ROTATIONS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub seq: u64,
    pub record_id: Uuid,
    pub principal_id: String,
    pub timestamp: DateTime<Utc>,
    /// Why the record was touched: "standard_access", "grant_access",
    /// "revoke_access", or a caller-supplied tag.
    pub purpose: String,
    pub prev_hash: String,
    pub hash: String,
    pub signature: String,
}

pub struct AccessLog {
    path: PathBuf,
    signer: SigningKey,
    inner: Mutex<LogState>,
    max_bytes: u64,
    max_rotations: usize,
}

#[derive(Debug)]
struct LogState {
    last_seq: u64,
    last_hash: String,
}

impl AccessLog {
    pub fn new<P: AsRef<Path>>(
        path: P,
        signer: SigningKey,
        max_bytes: u64,
        max_rotations: usize,
    ) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        let (last_seq, last_hash) = Self::load_state(&path)?;
        Ok(Self {
            path,
            signer,
            inner: Mutex::new(LogState {
                last_seq,
                last_hash,
            }),
            max_bytes,
            max_rotations,
        })
    }

    fn load_state(path: &Path) -> Result<(u64, String), VaultError> {
        if !path.exists() {
            return Ok((0, "CHAIN_START".to_string()));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut last_seq = 0;
        let mut last_hash = "CHAIN_START".to_string();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AccessLogEntry = serde_json::from_str(&line)?;
            last_seq = entry.seq;
            last_hash = entry.hash;
        }
        Ok((last_seq, last_hash))
    }

    fn compute_hash(entry_without_sig: &serde_json::Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(entry_without_sig.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn append(
        &self,
        record_id: Uuid,
        principal_id: &str,
        purpose: &str,
    ) -> Result<AccessLogEntry, VaultError> {
        self.rotate_if_needed()?;
        let mut state = self.inner.lock();
        let seq = state.last_seq + 1;
        let prev_hash = state.last_hash.clone();
        let mut entry_value = serde_json::json!({
            "seq": seq,
            "record_id": record_id,
            "principal_id": principal_id,
            "timestamp": Utc::now(),
            "purpose": purpose,
            "prev_hash": prev_hash,
        });
        let hash = Self::compute_hash(&entry_value);
        entry_value["hash"] = serde_json::Value::String(hash.clone());
        let sig = self.signer.sign(entry_value.to_string().as_bytes());
        let signature = general_purpose::STANDARD.encode(sig.to_bytes());
        entry_value["signature"] = serde_json::Value::String(signature);

        let entry: AccessLogEntry = serde_json::from_value(entry_value)?;
        self.write_entry(&entry)?;
        state.last_seq = seq;
        state.last_hash = hash;
        Ok(entry)
    }

    fn write_entry(&self, entry: &AccessLogEntry) -> Result<(), VaultError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        // The triggering operation must not complete before the entry is
        // on disk.
        file.sync_data()?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), VaultError> {
        let mut state = self.inner.lock();
        if let Ok(metadata) = fs::metadata(&self.path) {
            if metadata.len() < self.max_bytes {
                return Ok(());
            }
        } else {
            return Ok(());
        }
        for i in (1..=self.max_rotations).rev() {
            let rotated = self.path_with_suffix(i);
            if rotated.exists() {
                if i == self.max_rotations {
                    fs::remove_file(&rotated)?;
                } else {
                    let next = self.path_with_suffix(i + 1);
                    fs::rename(&rotated, next)?;
                }
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, self.path_with_suffix(1))?;
        }
        // Chain restarts on the fresh file; sequence stays monotonic.
        state.last_hash = "CHAIN_START".to_string();
        Ok(())
    }

    /// Recent entries, newest first, optionally bounded by `since` and
    /// `limit`. This is the read surface for the external log collector.
    pub fn read_recent(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<AccessLogEntry>, VaultError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AccessLogEntry = serde_json::from_str(&line)?;
            if let Some(since_ts) = &since {
                if entry.timestamp < *since_ts {
                    continue;
                }
            }
            entries.push(entry);
        }
        entries.reverse();
        if let Some(lim) = limit {
            entries.truncate(lim);
        }
        Ok(entries)
    }

    /// Entries touching one record, oldest first.
    pub fn entries_for_record(&self, record_id: Uuid) -> Result<Vec<AccessLogEntry>, VaultError> {
        let mut entries = self.read_recent(None, None)?;
        entries.retain(|e| e.record_id == record_id);
        entries.reverse();
        Ok(entries)
    }

    fn path_with_suffix(&self, index: usize) -> PathBuf {
        let mut p = self.path.clone();
        let filename = p
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "audit.log".to_string());
        p.set_file_name(format!("{}.{}", filename, index));
        p
    }
}

/// Load the audit signing key from disk, generating one on first run.
/// Stored base64-encoded, mode 0600.
pub fn load_or_create_signing_key<P: AsRef<Path>>(path: P) -> Result<SigningKey, VaultError> {
    let path = path.as_ref();
    if path.exists() {
        let encoded = fs::read_to_string(path)?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| VaultError::Storage(format!("decode signing key: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::Storage("signing key length invalid".into()))?;
        Ok(SigningKey::from_bytes(&bytes))
    } else {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let key = crate::crypto::generate_signing_key();
        fs::write(path, general_purpose::STANDARD.encode(key.to_bytes()))?;
        restrict_file_permissions(path);
        Ok(key)
    }
}
