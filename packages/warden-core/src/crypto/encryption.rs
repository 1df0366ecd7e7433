//! # Encryption Module
//!
//! AES-256-GCM used by both the backup cipher and session messages.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  AES-256-GCM(                                                          │
//! │    key       = 32 bytes (PBKDF2 output or ratchet message key)         │
//! │    nonce     = 12 random bytes, fresh per call                         │
//! │    plaintext = backup bytes / message                                  │
//! │    aad       = caller-defined binding (empty for backups)              │
//! │  )                                                                      │
//! │       ↓                                                                 │
//! │  ciphertext || 16-byte tag                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Decryption never says why it failed. Tag mismatch, wrong key, wrong nonce
//! and wrong AAD all surface as [`Error::DecryptionFailed`].

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::ZeroizeOnDrop;

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce for AES-GCM encryption
///
/// **Never reuse a nonce with the same key.** Every nonce here comes from
/// the OS RNG, which is safe for up to 2^32 messages per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly [`NONCE_SIZE`] bytes
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(Self)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An AES-256-GCM key, zeroized when dropped
#[derive(ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Encrypt with AES-256-GCM under a fresh random nonce
///
/// Returns `(nonce, ciphertext_with_tag)`.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Result<(Nonce, Vec<u8>)> {
    let nonce = Nonce::random();
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|e| Error::EncryptionFailed(format!("Invalid key: {}", e)))?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    Ok((nonce, ciphertext))
}

/// Decrypt AES-256-GCM ciphertext
///
/// ## Errors
///
/// [`Error::DecryptionFailed`] for any failure: tampered ciphertext,
/// mismatched AAD, wrong key or wrong nonce.
pub fn decrypt(
    key: &EncryptionKey,
    nonce: &Nonce,
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| Error::DecryptionFailed)?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|_| Error::DecryptionFailed)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let (nonce, ciphertext) = encrypt(&key, b"hello warden", b"aad").unwrap();

        assert_eq!(ciphertext.len(), b"hello warden".len() + TAG_SIZE);

        let plaintext = decrypt(&key, &nonce, &ciphertext, b"aad").unwrap();
        assert_eq!(plaintext, b"hello warden");
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let (nonce, ciphertext) = encrypt(&key, b"payload", b"alice->bob").unwrap();

        let result = decrypt(&key, &nonce, &ciphertext, b"bob->alice");
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let key = EncryptionKey::from_bytes([7u8; KEY_SIZE]);
        let other = EncryptionKey::from_bytes([8u8; KEY_SIZE]);
        let (nonce, ciphertext) = encrypt(&key, b"payload", b"").unwrap();

        assert!(matches!(
            decrypt(&other, &nonce, &ciphertext, b""),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let key = EncryptionKey::from_bytes([1u8; KEY_SIZE]);
        let (n1, c1) = encrypt(&key, b"same", b"").unwrap();
        let (n2, c2) = encrypt(&key, b"same", b"").unwrap();

        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_nonce_from_slice() {
        assert!(Nonce::from_slice(&[0u8; 12]).is_some());
        assert!(Nonce::from_slice(&[0u8; 11]).is_none());
    }
}
