//! Stored entities for the vault: records, grants, summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::EncryptedPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// A stored secret. Immutable after creation apart from its grant
/// relationships; the sealed payload keeps ciphertext, nonce and tag
/// together so a record can never be half-written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub id: Uuid,
    pub owner_id: String,
    /// Free-form classification, e.g. "bank_details" or "medical_note".
    pub data_type: String,
    pub sensitivity: Sensitivity,
    pub payload: EncryptedPayload,
    pub created_at: DateTime<Utc>,
}

/// Non-sensitive view returned to callers after a store. Plaintext and key
/// material never leave the vault through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: Uuid,
    pub data_type: String,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
}

impl From<&EncryptedRecord> for RecordSummary {
    fn from(record: &EncryptedRecord) -> Self {
        Self {
            id: record.id,
            data_type: record.data_type.clone(),
            sensitivity: record.sensitivity,
            created_at: record.created_at,
        }
    }
}

/// A revocable permission for a non-owner principal to decrypt one record.
/// Revocation stamps metadata instead of deleting the row; the grant
/// history is part of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: Uuid,
    pub record_id: Uuid,
    pub grantor_id: String,
    pub grantee_id: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
}

impl AccessGrant {
    /// An expired-but-unrevoked grant authorises nothing, the same as a
    /// revoked one. No write happens until an explicit revoke.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            Some(expiry) => now < expiry,
            None => true,
        }
    }
}
