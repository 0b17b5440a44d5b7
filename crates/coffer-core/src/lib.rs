//! coffer-core: encrypted data vault with access grants and backup/restore.
//!
//! # Encryption strategy
//! Every record is sealed under its own XChaCha20-Poly1305 key, derived
//! with Argon2id from a random password generated at store time. Key
//! material is custodied behind the [`keys::KeyProvider`] trait in a store
//! separate from the records, and never appears in snapshots or backup
//! archives.
//!
//! # Access control
//! Only the owning principal decrypts by default. Owners hand out
//! revocable, optionally time-limited grants; every decrypt, grant and
//! revoke is appended synchronously to a hash-chained, signed audit log.
//!
//! # Backup
//! The backup engine serializes a consistent snapshot, optionally encrypts
//! the whole archive, compresses with zstd, and checksums the final bytes
//! with BLAKE3. Restores verify the checksum before touching the contents
//! and apply the snapshot all-or-nothing. A retention policy bounds how
//! many archives are kept.

pub mod audit;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod models;
pub mod paths;
pub mod scheduler;
pub mod storage;
pub mod vault;

pub use backup::{BackupEngine, BackupFilter, BackupMetadata, RestoreOptions};
pub use config::{BackupConfig, BackupFrequency};
pub use error::{BackupError, CryptoError, VaultError};
pub use vault::VaultStore;
