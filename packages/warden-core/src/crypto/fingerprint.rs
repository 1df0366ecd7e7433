//! Identity key fingerprints for out-of-band verification.
//!
//! ```text
//! SHA-256("warden-fingerprint-v1" || signing_pub || agreement_pub)
//!     → first 16 bytes
//!     → "3F2A 91C0 7B1E 44D8 0A6F 2C93 E1B7 5D04"
//! ```
//!
//! Display only: a fingerprint is never key material.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::crypto::kdf::domain;
use crate::crypto::PublicIdentityKey;

/// Bytes of the digest kept in the fingerprint.
pub const FINGERPRINT_BYTES: usize = 16;

/// Short, stable rendering of a public identity key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a public identity key
    pub fn of(key: &PublicIdentityKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain::FINGERPRINT);
        hasher.update(key.to_bytes());
        let digest = hasher.finalize();

        let hex = hex::encode_upper(&digest[..FINGERPRINT_BYTES]);
        let groups: Vec<&str> = hex
            .as_bytes()
            .chunks(4)
            .filter_map(|chunk| std::str::from_utf8(chunk).ok())
            .collect();

        Self(groups.join(" "))
    }

    /// The grouped hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a value typed or read back by a user
    ///
    /// Whitespace and case are ignored.
    pub fn matches(&self, candidate: &str) -> bool {
        let normalize = |s: &str| -> String {
            s.chars()
                .filter(|c| !c.is_whitespace())
                .map(|c| c.to_ascii_uppercase())
                .collect()
        };
        normalize(&self.0) == normalize(candidate)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of a public identity key
pub fn fingerprint(key: &PublicIdentityKey) -> Fingerprint {
    Fingerprint::of(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKeyPair;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let key = IdentityKeyPair::generate().public_key();
        assert_eq!(fingerprint(&key), fingerprint(&key));
    }

    #[test]
    fn test_distinct_keys_distinct_fingerprints() {
        let a = IdentityKeyPair::generate().public_key();
        let b = IdentityKeyPair::generate().public_key();
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_shape() {
        let key = PublicIdentityKey::from_bytes([1u8; 32], [2u8; 32]);
        let fp = fingerprint(&key);

        let groups: Vec<&str> = fp.as_str().split(' ').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().all(|g| g.len() == 4));
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c == ' ' || c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_either_half_changes_fingerprint() {
        let base = PublicIdentityKey::from_bytes([1u8; 32], [2u8; 32]);
        let other_signing = PublicIdentityKey::from_bytes([3u8; 32], [2u8; 32]);
        let other_agreement = PublicIdentityKey::from_bytes([1u8; 32], [3u8; 32]);

        assert_ne!(fingerprint(&base), fingerprint(&other_signing));
        assert_ne!(fingerprint(&base), fingerprint(&other_agreement));
    }

    #[test]
    fn test_matches_ignores_spacing_and_case() {
        let key = IdentityKeyPair::generate().public_key();
        let fp = fingerprint(&key);
        let typed = fp.as_str().replace(' ', "").to_lowercase();

        assert!(fp.matches(&typed));
        assert!(!fp.matches("0000 0000"));
    }
}
