//! Pre-key bundles (public) and the local pre-key store (private).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PreKeyBundle (published)                                              │
//! │  ├── identity_key        signing ‖ agreement public keys               │
//! │  ├── registration_id     1..=16380                                     │
//! │  ├── signed_pre_key      (id, X25519 public, Ed25519 signature)        │
//! │  └── one_time_pre_keys   [(id, X25519 public), ...]                    │
//! │                                                                         │
//! │  LocalPreKeys (secure store only)                                      │
//! │  ├── signed      id → secret (current + a few previous),               │
//! │  │               plus the base keys already accepted under it          │
//! │  └── one_time    id → secret, removed on first successful use          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{hex_bytes, sign, verify, AgreementKeyPair, IdentityKeyPair, PublicIdentityKey, Signature};
use crate::error::{Error, Result};

/// Curve tag prefixed to an X25519 public key before signing
const CURVE_ID_X25519: u8 = 0x05;

/// Signed pre-keys kept after rotation, so in-flight initial messages that
/// reference an older one still open.
const RETAINED_SIGNED_PRE_KEYS: usize = 3;

/// `0x05 || public_key`, the byte string covered by the signed pre-key signature
pub fn encode_public_key(public_key: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = CURVE_ID_X25519;
    out[1..].copy_from_slice(public_key);
    out
}

/// A published one-time pre-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimePreKey {
    /// Local identifier
    pub id: u32,
    /// X25519 public key
    #[serde(with = "hex_bytes")]
    pub public_key: [u8; 32],
}

/// A published signed pre-key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPreKey {
    /// Local identifier
    pub id: u32,
    /// X25519 public key
    #[serde(with = "hex_bytes")]
    pub public_key: [u8; 32],
    /// Ed25519 signature by the identity key over [`encode_public_key`]
    pub signature: Signature,
}

/// Everything another party needs to open a session without a round trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyBundle {
    /// Owner's public identity
    pub identity_key: PublicIdentityKey,
    /// Owner's registration id
    pub registration_id: u32,
    /// Unused one-time pre-keys
    pub one_time_pre_keys: Vec<OneTimePreKey>,
    /// Current signed pre-key
    pub signed_pre_key: SignedPreKey,
}

impl PreKeyBundle {
    /// Check the signed pre-key signature against the bundle's identity key
    pub fn verify(&self) -> Result<()> {
        verify(
            &self.identity_key.signing,
            &encode_public_key(&self.signed_pre_key.public_key),
            &self.signed_pre_key.signature,
        )
        .map_err(|_| Error::InvalidSignature)
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct SignedPreKeyRecord {
    secret: [u8; 32],
    signature: Signature,
    accepted_base_keys: BTreeSet<[u8; 32]>,
}

/// Private halves of the pre-keys this installation has published
#[derive(Default, Serialize, Deserialize)]
pub struct LocalPreKeys {
    next_one_time_id: u32,
    next_signed_id: u32,
    current_signed_id: Option<u32>,
    signed: BTreeMap<u32, SignedPreKeyRecord>,
    one_time: BTreeMap<u32, [u8; 32]>,
}

impl LocalPreKeys {
    /// Generate `count` one-time pre-keys, creating a signed pre-key first
    /// if there is none
    pub fn replenish(&mut self, identity: &IdentityKeyPair, count: u32) {
        if self.current_signed_id.is_none() {
            self.rotate_signed(identity);
        }
        for _ in 0..count {
            let id = self.next_one_time_id;
            self.next_one_time_id = self.next_one_time_id.wrapping_add(1);
            let pair = AgreementKeyPair::generate();
            self.one_time.insert(id, *pair.secret_bytes());
        }
    }

    /// Replace the current signed pre-key, keeping a few old ones
    pub fn rotate_signed(&mut self, identity: &IdentityKeyPair) -> u32 {
        let id = self.next_signed_id;
        self.next_signed_id = self.next_signed_id.wrapping_add(1);

        let pair = AgreementKeyPair::generate();
        let signature = sign(&identity.signing, &encode_public_key(&pair.public_bytes()));
        self.signed.insert(
            id,
            SignedPreKeyRecord {
                secret: *pair.secret_bytes(),
                signature,
                accepted_base_keys: BTreeSet::new(),
            },
        );
        self.current_signed_id = Some(id);

        while self.signed.len() > RETAINED_SIGNED_PRE_KEYS {
            let Some(oldest) = self.signed.keys().next().copied() else {
                break;
            };
            if let Some(mut record) = self.signed.remove(&oldest) {
                record.secret.zeroize();
            }
        }
        id
    }

    /// Forget every key (signed and one-time) and start over for `identity`
    ///
    /// Ids keep counting up, so a stale initial message never lines up with
    /// a key generated afterwards.
    pub fn reset(&mut self, identity: &IdentityKeyPair, count: u32) {
        self.clear_one_time();
        for record in self.signed.values_mut() {
            record.secret.zeroize();
        }
        self.signed.clear();
        self.current_signed_id = None;
        self.replenish(identity, count);
    }

    /// Drop every unused one-time pre-key
    pub fn clear_one_time(&mut self) {
        for secret in self.one_time.values_mut() {
            secret.zeroize();
        }
        self.one_time.clear();
    }

    /// Public bundle for the current key set
    pub fn bundle(&self, identity: &IdentityKeyPair, registration_id: u32) -> Result<PreKeyBundle> {
        let signed_id = self
            .current_signed_id
            .ok_or_else(|| Error::Internal("no signed pre-key generated".into()))?;
        let record = self
            .signed
            .get(&signed_id)
            .ok_or_else(|| Error::Internal("current signed pre-key missing".into()))?;

        let one_time_pre_keys = self
            .one_time
            .iter()
            .map(|(id, secret)| OneTimePreKey {
                id: *id,
                public_key: AgreementKeyPair::from_bytes(secret).public_bytes(),
            })
            .collect();

        Ok(PreKeyBundle {
            identity_key: identity.public_key(),
            registration_id,
            one_time_pre_keys,
            signed_pre_key: SignedPreKey {
                id: signed_id,
                public_key: AgreementKeyPair::from_bytes(&record.secret).public_bytes(),
                signature: record.signature,
            },
        })
    }

    /// Signed pre-key by id
    pub fn signed(&self, id: u32) -> Option<AgreementKeyPair> {
        self.signed
            .get(&id)
            .map(|record| AgreementKeyPair::from_bytes(&record.secret))
    }

    /// One-time pre-key by id, without consuming it
    pub fn one_time(&self, id: u32) -> Option<AgreementKeyPair> {
        self.one_time.get(&id).map(AgreementKeyPair::from_bytes)
    }

    /// Consume a one-time pre-key
    ///
    /// Returns `false` if it was already consumed or never existed.
    pub fn take_one_time(&mut self, id: u32) -> bool {
        match self.one_time.remove(&id) {
            Some(mut secret) => {
                secret.zeroize();
                true
            }
            None => false,
        }
    }

    /// Whether an initial message with `base_key` was already accepted
    /// against signed pre-key `signed_id`
    pub fn was_accepted(&self, signed_id: u32, base_key: &[u8; 32]) -> bool {
        self.signed
            .get(&signed_id)
            .is_some_and(|record| record.accepted_base_keys.contains(base_key))
    }

    /// Remember that an initial message with `base_key` opened a session
    /// against signed pre-key `signed_id`
    ///
    /// The record lives as long as the signed pre-key does; once it rotates
    /// out, initial messages referencing it fail anyway.
    pub fn record_accepted(&mut self, signed_id: u32, base_key: [u8; 32]) -> bool {
        match self.signed.get_mut(&signed_id) {
            Some(record) => record.accepted_base_keys.insert(base_key),
            None => false,
        }
    }

    /// Unused one-time pre-keys
    pub fn one_time_count(&self) -> usize {
        self.one_time.len()
    }

    /// Id of the signed pre-key currently published
    pub fn current_signed_id(&self) -> Option<u32> {
        self.current_signed_id
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::from)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::StorageCorrupted(format!("pre-key store: {}", e)))
    }
}

impl Drop for LocalPreKeys {
    fn drop(&mut self) {
        self.clear_one_time();
        for record in self.signed.values_mut() {
            record.secret.zeroize();
        }
    }
}
