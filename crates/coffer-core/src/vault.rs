//! Vault store: encrypt-on-store, authorise-then-decrypt-on-retrieve.
//!
//! Every record is sealed under its own key, generated from a fresh random
//! password and salt at store time and custodied by the `KeyProvider`.
//! Retrieval enforces ownership or an active grant, and the audit log is
//! written before the plaintext is handed back, so a successful read is
//! always on the trail and a failed one never is.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::audit::{AccessLog, DEFAULT_PURPOSE};
use crate::crypto::{decrypt, derive_key, encrypt, generate_salt, generate_secure_password};
use crate::error::VaultError;
use crate::keys::{KeyMaterial, KeyProvider};
use crate::models::{AccessGrant, EncryptedRecord, RecordSummary, Sensitivity};
use crate::storage::VaultBackend;

const RECORD_PASSWORD_LEN: usize = 32;

pub struct VaultStore {
    backend: Arc<dyn VaultBackend>,
    keys: Arc<dyn KeyProvider>,
    audit: Arc<AccessLog>,
}

impl VaultStore {
    pub fn new(
        backend: Arc<dyn VaultBackend>,
        keys: Arc<dyn KeyProvider>,
        audit: Arc<AccessLog>,
    ) -> Self {
        Self {
            backend,
            keys,
            audit,
        }
    }

    /// Seal a payload for `owner_id`. Returns only non-sensitive summary
    /// fields; plaintext and key material never come back out of here.
    pub fn store(
        &self,
        owner_id: &str,
        data_type: &str,
        plaintext: &[u8],
        sensitivity: Sensitivity,
    ) -> Result<RecordSummary, VaultError> {
        let password = Zeroizing::new(generate_secure_password(RECORD_PASSWORD_LEN));
        let salt = generate_salt();
        let key = derive_key(&password, &salt)?;
        let payload = encrypt(plaintext, &key)?;

        let record = EncryptedRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            data_type: data_type.to_string(),
            sensitivity,
            payload,
            created_at: Utc::now(),
        };
        // Key first: a visible record must always have a key to open it.
        let material = KeyMaterial::new(record.id.to_string(), key.to_vec(), salt);
        self.keys.store_key(material)?;
        self.backend.insert_record(record.clone())?;
        info!(record_id = %record.id, data_type, "record stored");
        Ok(RecordSummary::from(&record))
    }

    /// Decrypt a record for `principal_id`, enforcing ownership or an
    /// active, unexpired grant. The audit entry is durable before the
    /// plaintext is returned.
    pub fn retrieve(
        &self,
        record_id: Uuid,
        principal_id: &str,
        purpose: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let record = self
            .backend
            .record(record_id)?
            .ok_or(VaultError::RecordNotFound(record_id))?;

        if record.owner_id != principal_id {
            let now = Utc::now();
            let authorised = self
                .backend
                .grants_for_record(record_id)?
                .iter()
                .any(|g| g.grantee_id == principal_id && g.is_active_at(now));
            if !authorised {
                return Err(VaultError::AccessDenied {
                    record_id,
                    principal_id: principal_id.to_string(),
                });
            }
        }

        let material = self
            .keys
            .key_for_subject(&record_id.to_string())?
            .ok_or_else(|| VaultError::KeyMissing(record_id.to_string()))?;
        let plaintext = decrypt(&record.payload, &material.key)?;
        self.audit
            .append(record_id, principal_id, purpose.unwrap_or(DEFAULT_PURPOSE))?;
        Ok(plaintext)
    }

    /// Create an active grant. Only the record owner may grant.
    pub fn grant_access(
        &self,
        record_id: Uuid,
        owner_id: &str,
        grantee_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<AccessGrant, VaultError> {
        let record = self
            .backend
            .record(record_id)?
            .ok_or(VaultError::RecordNotFound(record_id))?;
        if record.owner_id != owner_id {
            return Err(VaultError::NotOwner(owner_id.to_string()));
        }
        let grant = AccessGrant {
            id: Uuid::new_v4(),
            record_id,
            grantor_id: owner_id.to_string(),
            grantee_id: grantee_id.to_string(),
            granted_at: Utc::now(),
            expires_at,
            active: true,
            revoked_at: None,
            revoked_by: None,
        };
        self.backend.insert_grant(grant.clone())?;
        self.audit.append(record_id, owner_id, "grant_access")?;
        info!(record_id = %record_id, grantee = grantee_id, "access granted");
        Ok(grant)
    }

    /// Deactivate a grant. Only the original grantor or the record owner
    /// may revoke; the row is stamped, never deleted.
    pub fn revoke_access(
        &self,
        grant_id: Uuid,
        acting_principal: &str,
    ) -> Result<(), VaultError> {
        let mut grant = self
            .backend
            .grant(grant_id)?
            .ok_or(VaultError::GrantNotFound(grant_id))?;
        let record = self
            .backend
            .record(grant.record_id)?
            .ok_or(VaultError::RecordNotFound(grant.record_id))?;
        if acting_principal != grant.grantor_id && acting_principal != record.owner_id {
            return Err(VaultError::NotAuthorized(acting_principal.to_string()));
        }
        grant.active = false;
        grant.revoked_at = Some(Utc::now());
        grant.revoked_by = Some(acting_principal.to_string());
        self.backend.update_grant(grant.clone())?;
        self.audit
            .append(grant.record_id, acting_principal, "revoke_access")?;
        info!(record_id = %grant.record_id, grant_id = %grant_id, "access revoked");
        Ok(())
    }
}

// ── Anonymisation for analytics export ──────────────────────────────────────

/// Pure transform for analytics export; never persisted over the original.
/// Named sensitive fields are reduced: strings become a stable truncated
/// hash, RFC 3339 dates collapse to month granularity, numbers round to the
/// nearest 10, and anything else is dropped. Unlisted fields pass through.
pub fn anonymize(record: &Value, sensitive_fields: &[&str]) -> Value {
    let Value::Object(map) = record else {
        return record.clone();
    };
    let mut out = serde_json::Map::new();
    for (field, value) in map {
        if !sensitive_fields.contains(&field.as_str()) {
            out.insert(field.clone(), value.clone());
            continue;
        }
        match value {
            Value::String(s) => {
                if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                    out.insert(
                        field.clone(),
                        Value::String(date.format("%Y-%m").to_string()),
                    );
                } else {
                    out.insert(field.clone(), Value::String(stable_hash(s)));
                }
            }
            Value::Number(n) => {
                if let Some(v) = n.as_f64() {
                    let rounded = (v / 10.0).round() * 10.0;
                    out.insert(field.clone(), serde_json::json!(rounded));
                }
            }
            // Booleans, arrays, objects, nulls carry too much shape to keep.
            _ => {}
        }
    }
    Value::Object(out)
}

fn stable_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    hex::encode(&digest[..6])
}
