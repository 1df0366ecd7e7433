//! # Backup Cipher
//!
//! Password-derived wrapping of raw key material.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           WRAP                                          │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  salt  = 16 random bytes        (fresh every call)                     │
//! │  iv    = 12 random bytes        (fresh every call)                     │
//! │  key   = PBKDF2-HMAC-SHA256(password, salt, iterations) → 32 bytes     │
//! │  ct    = AES-256-GCM(key, iv, plain)                                   │
//! │                                                                         │
//! │  EncryptedBackup { cipher_text: ct, initialization_vector: iv, salt }  │
//! │                                                                         │
//! │  Text form:                                                            │
//! │  {"encryptedKey":"<b64>","iv":"<b64>","salt":"<b64>"}                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The record is versionless: the iteration count is not stored, so backups
//! only restore under the iteration count they were made with.
//!
//! Unwrapping fails with the single [`Error::DecryptionFailed`] whether the
//! password is wrong, any field was tampered with, a field has the wrong
//! length or the text form does not parse.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::MIN_PBKDF2_ITERATIONS;
use crate::crypto::{decrypt, derive_password_key, encrypt, EncryptionKey, Nonce, NONCE_SIZE};
use crate::encoding::base64_bytes;
use crate::error::{Error, Result};

/// Salt length for the password KDF
pub const SALT_SIZE: usize = 16;

/// A password-wrapped blob
///
/// Two backups of the same bytes under the same password never share a salt
/// or an IV, so backups are not comparable by content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBackup {
    /// AES-256-GCM ciphertext with appended tag
    #[serde(rename = "encryptedKey", with = "base64_bytes")]
    pub cipher_text: Vec<u8>,
    /// 12-byte AES-GCM nonce
    #[serde(rename = "iv", with = "base64_bytes")]
    pub initialization_vector: Vec<u8>,
    /// PBKDF2 salt
    #[serde(rename = "salt", with = "base64_bytes")]
    pub salt: Vec<u8>,
}

impl EncryptedBackup {
    /// Flat JSON text form with base64 fields
    pub fn to_encoded(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// Parse the text form
    ///
    /// Anything that does not parse is reported as `DecryptionFailed`, the
    /// same outcome as a wrong password.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        serde_json::from_str(encoded).map_err(|_| Error::DecryptionFailed)
    }
}

/// Wraps and unwraps bytes under a password
#[derive(Debug, Clone, Copy)]
pub struct BackupCipher {
    iterations: u32,
}

impl BackupCipher {
    /// Create a cipher using `iterations` rounds of PBKDF2
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "backup cipher needs at least {} PBKDF2 iterations",
                MIN_PBKDF2_ITERATIONS
            )));
        }
        Ok(Self { iterations })
    }

    /// Iteration count in use
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `plain` under a key derived from `password`
    pub fn wrap(&self, plain: &[u8], password: &str) -> Result<EncryptedBackup> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let key = self.derive_key(password, &salt);
        let (nonce, cipher_text) = encrypt(&key, plain, &[])?;

        debug!(len = plain.len(), "Wrapped backup payload");

        Ok(EncryptedBackup {
            cipher_text,
            initialization_vector: nonce.as_bytes().to_vec(),
            salt,
        })
    }

    /// Decrypt a backup made with [`wrap`](Self::wrap)
    pub fn unwrap(&self, backup: &EncryptedBackup, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        if backup.initialization_vector.len() != NONCE_SIZE || backup.salt.len() < SALT_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let nonce =
            Nonce::from_slice(&backup.initialization_vector).ok_or(Error::DecryptionFailed)?;

        let key = self.derive_key(password, &backup.salt);
        let plain = decrypt(&key, &nonce, &backup.cipher_text, &[])?;

        Ok(Zeroizing::new(plain))
    }

    /// [`wrap`](Self::wrap) on the blocking pool
    pub async fn wrap_blocking(
        &self,
        plain: Zeroizing<Vec<u8>>,
        password: Zeroizing<String>,
    ) -> Result<EncryptedBackup> {
        let cipher = *self;
        tokio::task::spawn_blocking(move || cipher.wrap(&plain, &password)).await?
    }

    /// [`unwrap`](Self::unwrap) on the blocking pool
    pub async fn unwrap_blocking(
        &self,
        backup: EncryptedBackup,
        password: Zeroizing<String>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let cipher = *self;
        tokio::task::spawn_blocking(move || cipher.unwrap(&backup, &password)).await?
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> EncryptionKey {
        let raw = derive_password_key(password.as_bytes(), salt, self.iterations);
        EncryptionKey::from_bytes(*raw)
    }
}

impl Default for BackupCipher {
    fn default() -> Self {
        Self {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> BackupCipher {
        BackupCipher::default()
    }

    #[test]
    fn test_round_trip() {
        let plain = b"identity key material".to_vec();
        let backup = cipher().wrap(&plain, "correct-horse").unwrap();

        let restored = cipher().unwrap(&backup, "correct-horse").unwrap();
        assert_eq!(&*restored, &plain);
    }

    #[test]
    fn test_empty_plaintext_round_trip() {
        let backup = cipher().wrap(b"", "pw").unwrap();
        assert!(cipher().unwrap(&backup, "pw").unwrap().is_empty());
    }

    #[test]
    fn test_wrong_password_fails() {
        let backup = cipher().wrap(b"secret", "correct-horse").unwrap();
        let result = cipher().unwrap(&backup, "wrong-horse");
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_fresh_salt_and_iv() {
        let a = cipher().wrap(b"same", "same").unwrap();
        let b = cipher().wrap(b"same", "same").unwrap();

        assert_ne!(a.salt, b.salt);
        assert_ne!(a.initialization_vector, b.initialization_vector);
        assert_ne!(a.cipher_text, b.cipher_text);
        assert_eq!(a.salt.len(), SALT_SIZE);
        assert_eq!(a.initialization_vector.len(), NONCE_SIZE);
    }

    #[test]
    fn test_bit_flips_fail_closed() {
        let backup = cipher().wrap(b"sensitive", "pw").unwrap();

        let mut flipped = backup.clone();
        flipped.cipher_text[0] ^= 0x01;
        assert!(matches!(cipher().unwrap(&flipped, "pw"), Err(Error::DecryptionFailed)));

        let mut flipped = backup.clone();
        flipped.initialization_vector[5] ^= 0x80;
        assert!(matches!(cipher().unwrap(&flipped, "pw"), Err(Error::DecryptionFailed)));

        let mut flipped = backup.clone();
        flipped.salt[15] ^= 0x10;
        assert!(matches!(cipher().unwrap(&flipped, "pw"), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_truncated_fields_fail_closed() {
        let mut backup = cipher().wrap(b"sensitive", "pw").unwrap();
        backup.initialization_vector.truncate(8);
        assert!(matches!(cipher().unwrap(&backup, "pw"), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_text_encoding_round_trip() {
        let backup = cipher().wrap(b"bytes", "pw").unwrap();
        let encoded = backup.to_encoded().unwrap();

        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert!(object.contains_key("encryptedKey"));
        assert!(object.contains_key("iv"));
        assert!(object.contains_key("salt"));

        let decoded = EncryptedBackup::from_encoded(&encoded).unwrap();
        assert_eq!(decoded, backup);
        assert_eq!(&*cipher().unwrap(&decoded, "pw").unwrap(), b"bytes");
    }

    #[test]
    fn test_garbage_text_is_decryption_failure() {
        assert!(matches!(
            EncryptedBackup::from_encoded("not json"),
            Err(Error::DecryptionFailed)
        ));
        assert!(matches!(
            EncryptedBackup::from_encoded(r#"{"encryptedKey":"!!","iv":"AA==","salt":"AA=="}"#),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_weak_iteration_count_rejected() {
        assert!(matches!(BackupCipher::new(1_000), Err(Error::InvalidConfig(_))));
        assert_eq!(BackupCipher::new(150_000).unwrap().iterations(), 150_000);
    }

    #[tokio::test]
    async fn test_blocking_helpers() {
        let backup = cipher()
            .wrap_blocking(
                Zeroizing::new(b"async".to_vec()),
                Zeroizing::new("pw".to_string()),
            )
            .await
            .unwrap();

        let plain = cipher()
            .unwrap_blocking(backup, Zeroizing::new("pw".to_string()))
            .await
            .unwrap();
        assert_eq!(&*plain, b"async");
    }
}
