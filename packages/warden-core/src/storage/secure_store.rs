//! # Secure Storage
//!
//! Local storage for private key material: the identity, the pre-key store
//! and per-correspondent sessions.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SECURE STORE LAYOUT                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  warden.identity.keys          IdentityRecord (bincode)                │
//! │  warden.prekeys                LocalPreKeys   (bincode)                │
//! │  warden.session.<user_id>      Session        (bincode)                │
//! │                                                                         │
//! │  With a storage key every value is sealed:                             │
//! │                                                                         │
//! │    nonce (12) || AES-256-GCM(value, aad = entry name)                  │
//! │                                                                         │
//! │  Binding the entry name as AAD stops one entry being swapped for       │
//! │  another.                                                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store here is in-process. Hosts that need durability share one
//! `Arc<SecureStore>` across restarts of the core (the integration tests
//! do exactly that) or mirror it into a platform keychain.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::crypto::{decrypt, encrypt, EncryptionKey, Nonce, NONCE_SIZE};
use crate::error::{Error, Result};

/// Entry names used by the core
pub mod keys {
    /// The identity key pair and registration id
    pub const IDENTITY_KEYS: &str = "warden.identity.keys";

    /// Private halves of published pre-keys
    pub const PRE_KEYS: &str = "warden.prekeys";

    /// Prefix of every session entry
    pub const SESSION_PREFIX: &str = "warden.session.";

    /// Entry holding the session with `user_id`
    pub fn session(user_id: &str) -> String {
        format!("{}{}", SESSION_PREFIX, user_id)
    }
}

/// Key-value store for secrets
pub struct SecureStore {
    memory: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,

    /// Optional storage key sealing every value at rest
    encryption_key: Option<EncryptionKey>,
}

impl SecureStore {
    /// Create a new secure store
    pub fn new() -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: None,
        }
    }

    /// Create a secure store that seals every value under `key`
    pub fn with_encryption(key: [u8; 32]) -> Self {
        Self {
            memory: RwLock::new(HashMap::new()),
            encryption_key: Some(EncryptionKey::from_bytes(key)),
        }
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        let data = match &self.encryption_key {
            Some(enc_key) => {
                let (nonce, ciphertext) = encrypt(enc_key, value, key.as_bytes())
                    .map_err(|e| Error::StorageWriteError(e.to_string()))?;
                let mut sealed = nonce.as_bytes().to_vec();
                sealed.extend_from_slice(&ciphertext);
                sealed
            }
            None => value.to_vec(),
        };

        self.memory
            .write()
            .insert(key.to_string(), Zeroizing::new(data));
        Ok(())
    }

    /// Retrieve the value under `key`
    pub fn retrieve(&self, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let data = match self.memory.read().get(key) {
            Some(d) => d.clone(),
            None => return Ok(None),
        };

        let Some(enc_key) = &self.encryption_key else {
            return Ok(Some(data));
        };

        if data.len() < NONCE_SIZE {
            return Err(Error::StorageReadError("Stored data too short".into()));
        }
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE])
            .ok_or_else(|| Error::StorageReadError("Stored nonce malformed".into()))?;

        let plaintext = decrypt(enc_key, &nonce, &data[NONCE_SIZE..], key.as_bytes())
            .map_err(|_| Error::StorageCorrupted(format!("entry {} failed authentication", key)))?;
        Ok(Some(Zeroizing::new(plaintext)))
    }

    /// Delete the value under `key`
    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.memory.write().remove(key).is_some())
    }

    /// Check if a key exists
    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.memory.read().contains_key(key))
    }

    /// Entry names starting with `prefix`, sorted
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .memory
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Delete every entry starting with `prefix`, returning how many went
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut storage = self.memory.write();
        let before = storage.len();
        storage.retain(|k, _| !k.starts_with(prefix));
        before - storage.len()
    }
}

impl Default for SecureStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_retrieve() {
        let store = SecureStore::new();

        store.store("test-key", b"test-value").unwrap();

        let value = store.retrieve("test-key").unwrap().unwrap();
        assert_eq!(&*value, b"test-value");

        assert!(store.delete("test-key").unwrap());
        assert!(store.retrieve("test-key").unwrap().is_none());
        assert!(!store.delete("test-key").unwrap());
    }

    #[test]
    fn test_store_with_encryption() {
        let store = SecureStore::with_encryption([42u8; 32]);

        store.store("secret", b"very secret data").unwrap();

        let value = store.retrieve("secret").unwrap().unwrap();
        assert_eq!(&*value, b"very secret data");

        let raw = store.memory.read().get("secret").cloned().unwrap();
        assert_ne!(&raw[NONCE_SIZE..], b"very secret data");
    }

    #[test]
    fn test_swapped_entries_detected() {
        let store = SecureStore::with_encryption([42u8; 32]);
        store.store("a", b"alpha").unwrap();

        let sealed = store.memory.read().get("a").cloned().unwrap();
        store.memory.write().insert("b".into(), sealed);

        assert!(matches!(store.retrieve("b"), Err(Error::StorageCorrupted(_))));
    }

    #[test]
    fn test_exists() {
        let store = SecureStore::new();

        assert!(!store.exists("nonexistent").unwrap());

        store.store("exists", b"data").unwrap();
        assert!(store.exists("exists").unwrap());
    }

    #[test]
    fn test_prefix_operations() {
        let store = SecureStore::new();
        store.store(&keys::session("bob"), b"1").unwrap();
        store.store(&keys::session("alice"), b"2").unwrap();
        store.store(keys::PRE_KEYS, b"3").unwrap();

        assert_eq!(
            store.keys_with_prefix(keys::SESSION_PREFIX),
            vec!["warden.session.alice".to_string(), "warden.session.bob".to_string()]
        );
        assert_eq!(store.delete_prefix(keys::SESSION_PREFIX), 2);
        assert!(store.exists(keys::PRE_KEYS).unwrap());
    }
}
