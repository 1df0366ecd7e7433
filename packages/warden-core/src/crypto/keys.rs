//! # Key Management
//!
//! Identity key generation and the public half that gets published.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SigningKeyPair (Ed25519)                                       │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │  • Signs the published signed pre-key                           │   │
//! │  │  • Private key: 32 bytes (zeroized on drop)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  AgreementKeyPair (X25519)                                      │   │
//! │  │  ─────────────────────────────                                   │   │
//! │  │  • Identity DH in session establishment                         │   │
//! │  │  • Also used for signed / one-time pre-keys and base keys       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  IdentityKeyPair = SigningKeyPair + AgreementKeyPair            │   │
//! │  │                                                                  │   │
//! │  │  Generated once per installation. The private half only ever   │   │
//! │  │  leaves the secure store inside a password-wrapped backup.      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Length of the canonical public identity encoding (signing || agreement).
pub const PUBLIC_IDENTITY_LEN: usize = 64;

/// Long-term identity key pair for one installation
///
/// ## Security
///
/// - Private keys are zeroized when this struct is dropped
/// - Only [`PublicIdentityKey`] is ever published
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// Ed25519 keypair for signing pre-keys
    pub signing: SigningKeyPair,
    /// X25519 keypair for key agreement
    pub agreement: AgreementKeyPair,
}

impl IdentityKeyPair {
    /// Generate a new random identity using the OS RNG
    pub fn generate() -> Self {
        Self {
            signing: SigningKeyPair::generate(),
            agreement: AgreementKeyPair::generate(),
        }
    }

    /// Rebuild an identity from its two 32-byte private keys
    pub fn from_secret_bytes(signing: &[u8; 32], agreement: &[u8; 32]) -> Self {
        Self {
            signing: SigningKeyPair::from_bytes(signing),
            agreement: AgreementKeyPair::from_bytes(agreement),
        }
    }

    /// Get the public keys for publishing
    pub fn public_key(&self) -> PublicIdentityKey {
        PublicIdentityKey {
            signing: self.signing.public_bytes(),
            agreement: self.agreement.public_bytes(),
        }
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.public_key().to_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Ed25519 signing keypair
#[derive(ZeroizeOnDrop)]
pub struct SigningKeyPair {
    #[zeroize(skip)] // ed25519_dalek::SigningKey handles its own zeroization
    secret: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from raw private key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(bytes),
        }
    }

    /// Get the secret key bytes (for the secure store and backups only)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.secret
    }
}

/// X25519 key pair used for every Diffie-Hellman step
#[derive(ZeroizeOnDrop)]
pub struct AgreementKeyPair {
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl AgreementKeyPair {
    /// Generate a new random agreement keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw private key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the secret key bytes (for the secure store and backups only)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the public key bytes
    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// X25519 with the other party's public key
    pub fn diffie_hellman(&self, their_public: &[u8; 32]) -> Zeroizing<[u8; 32]> {
        let their_public = X25519PublicKey::from(*their_public);
        Zeroizing::new(self.secret.diffie_hellman(&their_public).to_bytes())
    }
}

/// Public half of an identity, safe to publish and log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PublicIdentityKey {
    /// Ed25519 public key (32 bytes)
    #[serde(with = "hex_bytes")]
    pub signing: [u8; 32],

    /// X25519 public key (32 bytes)
    #[serde(with = "hex_bytes")]
    pub agreement: [u8; 32],
}

impl PublicIdentityKey {
    /// Create from raw bytes
    pub fn from_bytes(signing: [u8; 32], agreement: [u8; 32]) -> Self {
        Self { signing, agreement }
    }

    /// Canonical encoding: `signing || agreement`
    ///
    /// Fingerprints and message associated data are computed over this.
    pub fn to_bytes(&self) -> [u8; PUBLIC_IDENTITY_LEN] {
        let mut out = [0u8; PUBLIC_IDENTITY_LEN];
        out[..32].copy_from_slice(&self.signing);
        out[32..].copy_from_slice(&self.agreement);
        out
    }

    /// Get the verifying key for signature checks
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signing)
            .map_err(|e| Error::InvalidKey(format!("Invalid signing public key: {}", e)))
    }

    /// Encode as hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode from hex string
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        if hex_str.len() != PUBLIC_IDENTITY_LEN * 2 {
            return Err(Error::InvalidKey("Public identity hex must be 128 characters".into()));
        }

        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::InvalidKey(format!("Invalid hex: {}", e)))?;

        let signing: [u8; 32] = bytes[0..32]
            .try_into()
            .map_err(|_| Error::InvalidKey("Invalid signing key length".into()))?;
        let agreement: [u8; 32] = bytes[32..64]
            .try_into()
            .map_err(|_| Error::InvalidKey("Invalid agreement key length".into()))?;

        Ok(Self { signing, agreement })
    }
}

/// Serde helper for serializing 32-byte arrays as hex
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("Invalid length"))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_generation() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();

        assert_ne!(a.signing.public_bytes(), b.signing.public_bytes());
        assert_ne!(a.agreement.public_bytes(), b.agreement.public_bytes());
    }

    #[test]
    fn test_identity_from_secret_bytes() {
        let original = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_secret_bytes(
            &original.signing.secret_bytes(),
            &original.agreement.secret_bytes(),
        );

        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn test_diffie_hellman() {
        let alice = AgreementKeyPair::generate();
        let bob = AgreementKeyPair::generate();

        let alice_shared = alice.diffie_hellman(&bob.public_bytes());
        let bob_shared = bob.diffie_hellman(&alice.public_bytes());

        assert_eq!(*alice_shared, *bob_shared);
    }

    #[test]
    fn test_public_key_serialization() {
        let public = IdentityKeyPair::generate().public_key();

        let json = serde_json::to_string(&public).unwrap();
        let restored: PublicIdentityKey = serde_json::from_str(&json).unwrap();

        assert_eq!(public, restored);
    }

    #[test]
    fn test_public_key_hex() {
        let public = IdentityKeyPair::generate().public_key();
        let restored = PublicIdentityKey::from_hex(&public.to_hex()).unwrap();
        assert_eq!(public, restored);
        assert!(PublicIdentityKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let identity = IdentityKeyPair::generate();
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&hex::encode(*identity.signing.secret_bytes())));
    }
}
