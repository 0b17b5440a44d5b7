//! Crypto engine: Argon2id key derivation and XChaCha20-Poly1305 AEAD.
//!
//! Key size: 32 bytes. Nonce: 24 bytes (random, generated inside `encrypt`
//! so a nonce can never be reused under the same key). Tag: 16 bytes, split
//! off the ciphertext so stored records carry the (nonce, ciphertext, tag)
//! triple explicitly.

use argon2::{Argon2, Params};
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use ed25519_dalek::SigningKey;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KDF_TIME_COST: u32 = 3;
pub const KDF_MEMORY_COST: u32 = 65536; // 64 MiB
pub const KDF_PARALLELISM: u32 = 4;
pub const DERIVED_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const SALT_LEN: usize = 16;

const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*-_=+";

/// One sealed value. The three parts are always written and read together;
/// a record can never hold ciphertext without its nonce and tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub auth_tag: [u8; TAG_LEN],
}

/// Argon2id key stretching over (password, salt). Deterministic for the
/// same inputs; the salt must come from `generate_salt`.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let params = Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(DERIVED_KEY_LEN),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon = Argon2::from(params);
    let mut key = Zeroizing::new(vec![0u8; DERIVED_KEY_LEN]);
    argon
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Encrypt `plaintext` under a 32-byte key with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedPayload, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes".into()))?;
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let mut sealed = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::EncryptFailed)?;
    let tag_bytes = sealed.split_off(sealed.len() - TAG_LEN);
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&tag_bytes);
    Ok(EncryptedPayload {
        ciphertext: sealed,
        nonce,
        auth_tag,
    })
}

/// Decrypt a payload. A tag mismatch is `AuthenticationFailed`; any other
/// decoding problem is `DecryptionFailed`. Neither path falls back to
/// returning unverified plaintext.
pub fn decrypt(
    payload: &EncryptedPayload,
    key: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| CryptoError::DecryptionFailed("key must be 32 bytes".into()))?;
    let mut sealed = Vec::with_capacity(payload.ciphertext.len() + TAG_LEN);
    sealed.extend_from_slice(&payload.ciphertext);
    sealed.extend_from_slice(&payload.auth_tag);
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&payload.nonce), sealed.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(Zeroizing::new(plaintext))
}

/// Cryptographically random password over a fixed alphabet. Used for
/// per-record keys and for whole-archive encryption.
pub fn generate_secure_password(length: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..PASSWORD_ALPHABET.len());
            PASSWORD_ALPHABET[idx] as char
        })
        .collect()
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// BLAKE3 hex digest of `data`. Archive checksums use the streaming
/// variant in the backup engine; this helper covers in-memory buffers.
pub fn blake3_hex(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = derive_key("a strong passphrase", &generate_salt()).unwrap();
        let plaintext = b"national insurance: QQ123456C";
        let payload = encrypt(plaintext, &key).unwrap();
        let recovered = decrypt(&payload, &key).unwrap();
        assert_eq!(recovered.as_slice(), plaintext);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = derive_key("pw", &generate_salt()).unwrap();
        let a = encrypt(b"same plaintext", &key).unwrap();
        let b = encrypt(b"same plaintext", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = derive_key("pw", &generate_salt()).unwrap();
        let mut payload = encrypt(b"some secret", &key).unwrap();
        for bit in 0..8 {
            let mut tampered = payload.clone();
            tampered.ciphertext[0] ^= 1 << bit;
            match decrypt(&tampered, &key) {
                Err(CryptoError::AuthenticationFailed) => {}
                other => panic!("expected AuthenticationFailed, got {:?}", other.map(|_| ())),
            }
        }
        payload.auth_tag[TAG_LEN - 1] ^= 0x01;
        assert!(matches!(
            decrypt(&payload, &key),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn derive_key_is_deterministic_with_avalanche() {
        let salt = generate_salt();
        let k1 = derive_key("password", &salt).unwrap();
        let k2 = derive_key("password", &salt).unwrap();
        assert_eq!(k1.as_slice(), k2.as_slice());

        let k3 = derive_key("passwore", &salt).unwrap();
        assert_ne!(k1.as_slice(), k3.as_slice());

        let other_salt = generate_salt();
        let k4 = derive_key("password", &other_salt).unwrap();
        assert_ne!(k1.as_slice(), k4.as_slice());
    }

    #[test]
    fn wrong_key_rejected() {
        let key = derive_key("pw", &generate_salt()).unwrap();
        let other = derive_key("pw-other", &generate_salt()).unwrap();
        let payload = encrypt(b"payload", &key).unwrap();
        assert!(matches!(
            decrypt(&payload, &other),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn generated_passwords_are_unique_and_sized() {
        let a = generate_secure_password(32);
        let b = generate_secure_password(32);
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| PASSWORD_ALPHABET.contains(&c)));
    }
}
