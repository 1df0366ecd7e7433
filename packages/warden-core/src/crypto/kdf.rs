//! # Key Derivation Functions
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION                                       │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Backups                                                               │
//! │  ───────                                                                │
//! │  PBKDF2-HMAC-SHA256(password, salt = 16 random bytes, ≥100k rounds)    │
//! │       → 32-byte AES-256-GCM key                                        │
//! │                                                                         │
//! │  Sessions                                                              │
//! │  ────────                                                               │
//! │  HKDF-SHA256(ikm = 0xFF×32 || DH1 || DH2 || DH3 [|| DH4],               │
//! │              salt = 0×32, info = "warden-x3dh-v1")                      │
//! │       → 32-byte root secret                                            │
//! │  HKDF-SHA256(ikm = root, info = "warden-chain-{initiator,responder}")  │
//! │       → one chain key per direction                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Domain separation strings
///
/// Keys derived for different purposes stay independent even when they come
/// from the same input material.
pub mod domain {
    /// HKDF info for the X3DH root secret
    pub const X3DH_ROOT: &[u8] = b"warden-x3dh-v1";

    /// HKDF info for the chain keyed by the session initiator
    pub const INITIATOR_CHAIN: &[u8] = b"warden-chain-initiator-v1";

    /// HKDF info for the chain keyed by the session responder
    pub const RESPONDER_CHAIN: &[u8] = b"warden-chain-responder-v1";

    /// Prefix hashed into every fingerprint
    pub const FINGERPRINT: &[u8] = b"warden-fingerprint-v1";

    /// Prefix of the associated data bound into session messages
    pub const MESSAGE_AAD: &[u8] = b"warden-message-v1";
}

/// HKDF-SHA256 extract-and-expand into a 32-byte key
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(info, okm.as_mut())
        .map_err(|_| Error::KeyDerivationFailed("HKDF expansion failed".into()))?;
    Ok(okm)
}

/// PBKDF2-HMAC-SHA256 password key, 256-bit output
///
/// CPU-bound: async callers run it on the blocking pool.
pub fn derive_password_key(password: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut());
    key
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_domain_separation() {
        let ikm = [9u8; 32];
        let a = hkdf_sha256(&ikm, None, domain::INITIATOR_CHAIN).unwrap();
        let b = hkdf_sha256(&ikm, None, domain::RESPONDER_CHAIN).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_hkdf_deterministic() {
        let ikm = [3u8; 32];
        let a = hkdf_sha256(&ikm, Some(&[0u8; 32]), domain::X3DH_ROOT).unwrap();
        let b = hkdf_sha256(&ikm, Some(&[0u8; 32]), domain::X3DH_ROOT).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_pbkdf2_rfc7914_vector() {
        // RFC 7914 section 11, PBKDF2-HMAC-SHA256("passwd", "salt", 1)
        let key = derive_password_key(b"passwd", b"salt", 1);
        assert_eq!(
            hex::encode(&key[..]),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_pbkdf2_salt_matters() {
        let a = derive_password_key(b"correct-horse", &[1u8; 16], 1000);
        let b = derive_password_key(b"correct-horse", &[2u8; 16], 1000);
        assert_ne!(*a, *b);
    }
}
