use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    EncryptFailed,

    #[error("AEAD decryption failed (authentication tag mismatch — possible tampering)")]
    AuthenticationFailed,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Access denied: principal {principal_id} has no active grant for record {record_id}")]
    AccessDenied {
        record_id: Uuid,
        principal_id: String,
    },

    #[error("Principal {0} is not the record owner")]
    NotOwner(String),

    #[error("Principal {0} is not authorised to revoke this grant")]
    NotAuthorized(String),

    #[error("Record not found: {0}")]
    RecordNotFound(Uuid),

    #[error("Grant not found: {0}")]
    GrantNotFound(Uuid),

    #[error("No encryption key held for {0}")]
    KeyMissing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Integrity check failed for backup {id}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("A backup is already in progress for {0}")]
    BackupInProgress(String),

    #[error("Backup {0} is busy with a concurrent restore or delete")]
    BackupBusy(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
