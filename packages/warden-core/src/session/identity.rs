//! Installation identity: key pair plus registration id.
//!
//! The same serialized record is written to the secure store and wrapped by
//! the backup cipher on export, so a restored backup is byte-for-byte the
//! stored identity.

use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{IdentityKeyPair, PublicIdentityKey};
use crate::error::{Error, Result};
use crate::storage::{secure_keys, SecureStore};

/// Largest registration id handed out
pub const MAX_REGISTRATION_ID: u32 = 16380;

const RECORD_VERSION: u8 = 1;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct IdentityRecord {
    version: u8,
    signing: [u8; 32],
    agreement: [u8; 32],
    registration_id: u32,
}

/// This installation's long-term identity
pub struct LocalIdentity {
    key_pair: IdentityKeyPair,
    registration_id: u32,
}

impl LocalIdentity {
    /// Fresh key pair and a random registration id in `1..=16380`
    pub fn generate() -> Self {
        Self {
            key_pair: IdentityKeyPair::generate(),
            registration_id: rand::rngs::OsRng.gen_range(1..=MAX_REGISTRATION_ID),
        }
    }

    /// Combine an existing key pair with its registration id
    pub fn from_parts(key_pair: IdentityKeyPair, registration_id: u32) -> Result<Self> {
        if !(1..=MAX_REGISTRATION_ID).contains(&registration_id) {
            return Err(Error::InvalidKey(format!(
                "registration id {} out of range",
                registration_id
            )));
        }
        Ok(Self {
            key_pair,
            registration_id,
        })
    }

    /// Private key pair
    pub fn key_pair(&self) -> &IdentityKeyPair {
        &self.key_pair
    }

    /// Registration id published with the bundle
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Public identity
    pub fn public_key(&self) -> PublicIdentityKey {
        self.key_pair.public_key()
    }

    /// Serialized private record
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let record = IdentityRecord {
            version: RECORD_VERSION,
            signing: *self.key_pair.signing.secret_bytes(),
            agreement: *self.key_pair.agreement.secret_bytes(),
            registration_id: self.registration_id,
        };
        Ok(Zeroizing::new(bincode::serialize(&record)?))
    }

    /// Parse a record produced by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: IdentityRecord = bincode::deserialize(bytes)
            .map_err(|e| Error::DeserializationError(format!("identity record: {}", e)))?;
        if record.version != RECORD_VERSION {
            return Err(Error::DeserializationError(format!(
                "unknown identity record version {}",
                record.version
            )));
        }

        let key_pair = IdentityKeyPair::from_secret_bytes(&record.signing, &record.agreement);
        Self::from_parts(key_pair, record.registration_id)
    }

    pub(crate) fn load(store: &SecureStore) -> Result<Option<Self>> {
        match store.retrieve(secure_keys::IDENTITY_KEYS)? {
            Some(bytes) => Self::from_bytes(&bytes)
                .map(Some)
                .map_err(|e| Error::StorageCorrupted(e.to_string())),
            None => Ok(None),
        }
    }

    pub(crate) fn save(&self, store: &SecureStore) -> Result<()> {
        store.store(secure_keys::IDENTITY_KEYS, &self.to_bytes()?)
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity")
            .field("public", &self.public_key().to_hex())
            .field("registration_id", &self.registration_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_id_in_range() {
        for _ in 0..100 {
            let id = LocalIdentity::generate().registration_id();
            assert!((1..=MAX_REGISTRATION_ID).contains(&id));
        }
    }

    #[test]
    fn test_record_round_trip() {
        let identity = LocalIdentity::generate();
        let restored = LocalIdentity::from_bytes(&identity.to_bytes().unwrap()).unwrap();

        assert_eq!(restored.public_key(), identity.public_key());
        assert_eq!(restored.registration_id(), identity.registration_id());
    }

    #[test]
    fn test_out_of_range_registration_id() {
        assert!(LocalIdentity::from_parts(IdentityKeyPair::generate(), 0).is_err());
        assert!(LocalIdentity::from_parts(IdentityKeyPair::generate(), MAX_REGISTRATION_ID + 1).is_err());
    }

    #[test]
    fn test_garbage_record_rejected() {
        assert!(LocalIdentity::from_bytes(&[0u8; 5]).is_err());

        let mut bytes = LocalIdentity::generate().to_bytes().unwrap();
        bytes[0] = 9;
        assert!(LocalIdentity::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_store_round_trip() {
        let store = SecureStore::new();
        assert!(LocalIdentity::load(&store).unwrap().is_none());

        let identity = LocalIdentity::generate();
        identity.save(&store).unwrap();

        let loaded = LocalIdentity::load(&store).unwrap().unwrap();
        assert_eq!(loaded.public_key(), identity.public_key());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let identity = LocalIdentity::generate();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(&identity.public_key().to_hex()));
        assert!(!debug.contains(&hex::encode(*identity.key_pair().signing.secret_bytes())));
    }
}
