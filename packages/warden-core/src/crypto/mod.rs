//! # Cryptography Module
//!
//! Primitives shared by the backup cipher, the session manager and the
//! fingerprint generator.
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | Ed25519 | Signing the published signed pre-key |
//! | X25519 | Identity, pre-key and base-key agreement |
//! | AES-256-GCM | Backups and session messages |
//! | HKDF-SHA256 | Session root and chain keys |
//! | PBKDF2-HMAC-SHA256 | Password-derived backup keys |
//! | SHA-256 | Fingerprints |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: secret keys and derived keys are zeroized on drop
//! 2. **Secure Random**: `rand::rngs::OsRng` for every key, salt and nonce
//! 3. **No Nonce Reuse**: nonces are random per encryption

mod encryption;
mod fingerprint;
mod kdf;
mod keys;
mod signing;

pub use encryption::{decrypt, encrypt, EncryptionKey, Nonce, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use fingerprint::{fingerprint, Fingerprint, FINGERPRINT_BYTES};
pub use kdf::{derive_password_key, domain, hkdf_sha256};
pub use keys::{
    AgreementKeyPair, IdentityKeyPair, PublicIdentityKey, SigningKeyPair, PUBLIC_IDENTITY_LEN,
};
pub use signing::{sign, verify, Signature, SIGNATURE_SIZE};

pub(crate) use keys::hex_bytes;
