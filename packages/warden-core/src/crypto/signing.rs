//! # Digital Signatures
//!
//! Ed25519 signatures over signed pre-keys.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Owner:     sig = Ed25519.sign(identity_signing_key, SPK_public)       │
//! │  Initiator: Ed25519.verify(bundle.identity.signing, SPK_public, sig)   │
//! │             ✗ → InvalidSignature, no session is derived               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Signatures travel inside published bundles, so they serialize as a
//! base64 string like every other binary field on the wire.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::SigningKeyPair;
use crate::error::{Error, Result};

/// Ed25519 signature length
pub const SIGNATURE_SIZE: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// Detached Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Raw signature bytes
    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

impl From<[u8; SIGNATURE_SIZE]> for Signature {
    fn from(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let bytes: [u8; SIGNATURE_SIZE] = decoded.try_into().map_err(|v: Vec<u8>| {
            serde::de::Error::custom(format!(
                "signature is {} bytes, expected {}",
                v.len(),
                SIGNATURE_SIZE
            ))
        })?;
        Ok(Self(bytes))
    }
}

/// Sign `message` with the identity's Ed25519 key
pub fn sign(keypair: &SigningKeyPair, message: &[u8]) -> Signature {
    Signature(keypair.signing_key().sign(message).to_bytes())
}

/// Check `signature` over `message` against an Ed25519 public key
///
/// A public key that is not a curve point is [`Error::InvalidKey`]; any
/// other failure is [`Error::InvalidSignature`].
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &Signature) -> Result<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| Error::InvalidKey(format!("signing key: {}", e)))?;

    key.verify_strict(message, &ed25519_dalek::Signature::from_bytes(&signature.0))
        .map_err(|_| Error::InvalidSignature)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_pre_key_verifies() {
        let identity = SigningKeyPair::generate();
        let signature = sign(&identity, b"signed pre-key");

        verify(&identity.public_bytes(), b"signed pre-key", &signature).unwrap();
    }

    #[test]
    fn test_different_message_rejected() {
        let identity = SigningKeyPair::generate();
        let signature = sign(&identity, b"signed pre-key");

        assert!(matches!(
            verify(&identity.public_bytes(), b"another key", &signature),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn test_different_signer_rejected() {
        let signer = SigningKeyPair::generate();
        let other = SigningKeyPair::generate();
        let signature = sign(&signer, b"payload");

        assert!(matches!(
            verify(&other.public_bytes(), b"payload", &signature),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn test_flipped_bit_rejected() {
        let identity = SigningKeyPair::generate();
        let mut bytes = sign(&identity, b"payload").to_bytes();
        bytes[10] ^= 0x01;

        assert!(verify(&identity.public_bytes(), b"payload", &Signature::from(bytes)).is_err());
    }

    #[test]
    fn test_json_is_base64() {
        let signature = sign(&SigningKeyPair::generate(), b"x");
        let json = serde_json::to_string(&signature).unwrap();
        assert_eq!(json.len(), 88 + 2);

        let restored: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(signature, restored);
        assert!(serde_json::from_str::<Signature>("\"AAAA\"").is_err());
    }
}
