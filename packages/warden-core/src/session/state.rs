//! Per-correspondent session state.
//!
//! ```text
//! root key (X3DH)
//!   ├── HKDF(info = "warden-chain-initiator-v1") ──► initiator → responder chain
//!   └── HKDF(info = "warden-chain-responder-v1") ──► responder → initiator chain
//! ```
//!
//! Every message is sealed with AES-256-GCM under its chain's message key.
//! The associated data binds the sender and recipient identities and the
//! generation, so a message cannot be replayed into another session or at
//! another position.
//!
//! Decryption is transactional: chain state only changes once the
//! authentication tag has been checked, so a forged or corrupted message
//! leaves the session untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::envelope::{Envelope, PreKeyHeader, SessionMessage};
use super::ratchet::{ChainRatchet, MessageKey};
use crate::crypto::{self, domain, hkdf_sha256, EncryptionKey, PublicIdentityKey};
use crate::error::{Error, Result};

/// Which side of the key agreement this party ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRole {
    /// Fetched the other party's bundle and sent the first message
    Initiator,
    /// Accepted an initial message against its own bundle
    Responder,
}

/// Pairwise encrypted channel with one correspondent
#[derive(Serialize, Deserialize)]
pub struct Session {
    local_identity: PublicIdentityKey,
    remote_identity: PublicIdentityKey,
    remote_registration_id: u32,
    base_key: [u8; 32],
    role: SessionRole,
    sending: ChainRatchet,
    receiving: ChainRatchet,
    skipped: BTreeMap<u32, [u8; 32]>,
    pending_pre_key: Option<PreKeyHeader>,
    created_at: i64,
}

impl Session {
    /// Session opened by us from `header`, which goes out with every message
    /// until the correspondent replies
    pub fn initiate(
        local_identity: PublicIdentityKey,
        remote_identity: PublicIdentityKey,
        remote_registration_id: u32,
        root_key: &[u8; 32],
        header: PreKeyHeader,
    ) -> Result<Self> {
        let sending = hkdf_sha256(root_key, None, domain::INITIATOR_CHAIN)?;
        let receiving = hkdf_sha256(root_key, None, domain::RESPONDER_CHAIN)?;

        Ok(Self {
            local_identity,
            remote_identity,
            remote_registration_id,
            base_key: header.base_key,
            role: SessionRole::Initiator,
            sending: ChainRatchet::new(&sending),
            receiving: ChainRatchet::new(&receiving),
            skipped: BTreeMap::new(),
            pending_pre_key: Some(header),
            created_at: crate::time::now_timestamp(),
        })
    }

    /// Session accepted from a correspondent's initial message
    pub fn respond(local_identity: PublicIdentityKey, root_key: &[u8; 32], header: &PreKeyHeader) -> Result<Self> {
        let sending = hkdf_sha256(root_key, None, domain::RESPONDER_CHAIN)?;
        let receiving = hkdf_sha256(root_key, None, domain::INITIATOR_CHAIN)?;

        Ok(Self {
            local_identity,
            remote_identity: header.identity_key,
            remote_registration_id: header.registration_id,
            base_key: header.base_key,
            role: SessionRole::Responder,
            sending: ChainRatchet::new(&sending),
            receiving: ChainRatchet::new(&receiving),
            skipped: BTreeMap::new(),
            pending_pre_key: None,
            created_at: crate::time::now_timestamp(),
        })
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Seal the next outgoing message
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope> {
        let message_key = self.sending.advance()?;
        let aad = associated_data(&self.local_identity, &self.remote_identity, message_key.generation());

        let key = EncryptionKey::from_bytes(*message_key.key());
        let (nonce, ciphertext) = crypto::encrypt(&key, plaintext, &aad)?;

        let message = SessionMessage {
            generation: message_key.generation(),
            nonce: nonce.as_bytes().to_vec(),
            ciphertext,
        };

        Ok(match &self.pending_pre_key {
            Some(header) => Envelope::PreKey {
                header: header.clone(),
                message,
            },
            None => Envelope::Message(message),
        })
    }

    /// Open an incoming message
    ///
    /// Messages may arrive out of order. Keys for generations jumped over
    /// are kept (at most `max_skip`) until their message shows up. Each key
    /// opens exactly one message, so a replay fails with
    /// [`Error::DecryptionFailed`].
    pub fn decrypt(&mut self, message: &SessionMessage, max_skip: u32) -> Result<Vec<u8>> {
        let nonce = message.checked_nonce()?;
        let aad = associated_data(&self.remote_identity, &self.local_identity, message.generation);

        if message.generation < self.receiving.generation() {
            let key = self
                .skipped
                .get(&message.generation)
                .ok_or(Error::DecryptionFailed)?;
            let plaintext = crypto::decrypt(&EncryptionKey::from_bytes(*key), &nonce, &message.ciphertext, &aad)?;

            if let Some(mut used) = self.skipped.remove(&message.generation) {
                used.zeroize();
            }
            self.on_received();
            return Ok(plaintext);
        }

        let mut chain = self.receiving.clone();
        let (skipped, message_key) = chain.advance_to(message.generation, max_skip)?;
        let plaintext = crypto::decrypt(
            &EncryptionKey::from_bytes(*message_key.key()),
            &nonce,
            &message.ciphertext,
            &aad,
        )?;

        self.receiving = chain;
        self.store_skipped(skipped, max_skip);
        self.on_received();
        Ok(plaintext)
    }

    fn store_skipped(&mut self, keys: Vec<MessageKey>, max_skip: u32) {
        for key in keys {
            self.skipped.insert(key.generation(), *key.key());
        }
        while self.skipped.len() > max_skip as usize {
            match self.skipped.pop_first() {
                Some((_, mut evicted)) => evicted.zeroize(),
                None => break,
            }
        }
    }

    fn on_received(&mut self) {
        // A reply proves the responder holds the session.
        if self.role == SessionRole::Initiator {
            self.pending_pre_key = None;
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Correspondent's public identity
    pub fn remote_identity(&self) -> &PublicIdentityKey {
        &self.remote_identity
    }

    /// Correspondent's registration id
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    /// Initiator's ephemeral key, identifying this session instance
    pub fn base_key(&self) -> &[u8; 32] {
        &self.base_key
    }

    /// Our side of the key agreement
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Whether outgoing messages still carry the initial header
    pub fn is_pending(&self) -> bool {
        self.pending_pre_key.is_some()
    }

    /// Unix timestamp (seconds) when the session was created
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Next sending generation
    pub fn sending_generation(&self) -> u32 {
        self.sending.generation()
    }

    /// Next expected receiving generation
    pub fn receiving_generation(&self) -> u32 {
        self.receiving.generation()
    }

    /// Message keys held for messages not yet received
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(Error::from)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::StorageCorrupted(format!("session: {}", e)))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for key in self.skipped.values_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("remote_identity", &self.remote_identity.to_hex())
            .field("role", &self.role)
            .field("sending_generation", &self.sending.generation())
            .field("receiving_generation", &self.receiving.generation())
            .field("pending", &self.pending_pre_key.is_some())
            .finish_non_exhaustive()
    }
}

/// `"warden-message-v1" || sender || recipient || generation (big-endian)`
fn associated_data(sender: &PublicIdentityKey, recipient: &PublicIdentityKey, generation: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(domain::MESSAGE_AAD.len() + 2 * crypto::PUBLIC_IDENTITY_LEN + 4);
    aad.extend_from_slice(domain::MESSAGE_AAD);
    aad.extend_from_slice(&sender.to_bytes());
    aad.extend_from_slice(&recipient.to_bytes());
    aad.extend_from_slice(&generation.to_be_bytes());
    aad
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKeyPair;
    use crate::session::prekeys::LocalPreKeys;
    use crate::session::x3dh;

    const MAX_SKIP: u32 = 16;

    struct Pair {
        alice: Session,
        bob: Session,
    }

    /// Alice initiates, Bob accepts her first envelope
    fn established() -> (Pair, Envelope) {
        let alice_id = IdentityKeyPair::generate();
        let bob_id = IdentityKeyPair::generate();
        let mut bob_keys = LocalPreKeys::default();
        bob_keys.replenish(&bob_id, 1);
        let bundle = bob_keys.bundle(&bob_id, 2).unwrap();

        let (root, header) = x3dh::initiate(&alice_id, 1, &bundle).unwrap();
        let mut alice = Session::initiate(alice_id.public_key(), bundle.identity_key, 2, &root, header).unwrap();
        let first = alice.encrypt(b"hello bob").unwrap();

        let Envelope::PreKey { header, .. } = &first else {
            panic!("first envelope must carry the header");
        };
        let signed = bob_keys.signed(header.signed_pre_key_id).unwrap();
        let one_time = bob_keys.one_time(header.one_time_pre_key_id.unwrap()).unwrap();
        let bob_root = x3dh::respond(&bob_id, header, &signed, Some(&one_time)).unwrap();
        let bob = Session::respond(bob_id.public_key(), &bob_root, header).unwrap();

        (Pair { alice, bob }, first)
    }

    #[test]
    fn test_first_message_round_trip() {
        let (mut pair, first) = established();
        let plaintext = pair.bob.decrypt(first.message(), MAX_SKIP).unwrap();

        assert_eq!(plaintext, b"hello bob");
        assert_eq!(pair.bob.role(), SessionRole::Responder);
        assert_eq!(pair.bob.remote_registration_id(), 1);
    }

    #[test]
    fn test_pre_key_until_reply() {
        let (mut pair, first) = established();
        pair.bob.decrypt(first.message(), MAX_SKIP).unwrap();

        assert!(pair.alice.encrypt(b"again").unwrap().is_pre_key());
        assert!(pair.alice.is_pending());

        let reply = pair.bob.encrypt(b"hi alice").unwrap();
        assert!(!reply.is_pre_key());
        assert_eq!(pair.alice.decrypt(reply.message(), MAX_SKIP).unwrap(), b"hi alice");

        assert!(!pair.alice.is_pending());
        assert!(!pair.alice.encrypt(b"now plain").unwrap().is_pre_key());
    }

    #[test]
    fn test_out_of_order_delivery() {
        let (mut pair, first) = established();
        pair.bob.decrypt(first.message(), MAX_SKIP).unwrap();

        let m1 = pair.alice.encrypt(b"one").unwrap();
        let m2 = pair.alice.encrypt(b"two").unwrap();
        let m3 = pair.alice.encrypt(b"three").unwrap();

        assert_eq!(pair.bob.decrypt(m3.message(), MAX_SKIP).unwrap(), b"three");
        assert_eq!(pair.bob.skipped_count(), 2);
        assert_eq!(pair.bob.decrypt(m1.message(), MAX_SKIP).unwrap(), b"one");
        assert_eq!(pair.bob.decrypt(m2.message(), MAX_SKIP).unwrap(), b"two");
        assert_eq!(pair.bob.skipped_count(), 0);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut pair, first) = established();
        pair.bob.decrypt(first.message(), MAX_SKIP).unwrap();

        assert!(matches!(
            pair.bob.decrypt(first.message(), MAX_SKIP),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_message_leaves_state_untouched() {
        let (mut pair, first) = established();
        let mut forged = first.message().clone();
        forged.ciphertext[0] ^= 0x01;

        assert!(matches!(pair.bob.decrypt(&forged, MAX_SKIP), Err(Error::DecryptionFailed)));
        assert_eq!(pair.bob.receiving_generation(), 0);

        assert_eq!(pair.bob.decrypt(first.message(), MAX_SKIP).unwrap(), b"hello bob");
    }

    #[test]
    fn test_far_future_generation_rejected() {
        let (mut pair, first) = established();
        let mut message = first.message().clone();
        message.generation = MAX_SKIP + 5;

        assert!(matches!(pair.bob.decrypt(&message, MAX_SKIP), Err(Error::DecryptionFailed)));
        assert_eq!(pair.bob.receiving_generation(), 0);
    }

    #[test]
    fn test_generation_bound_into_aad() {
        let (mut pair, _) = established();
        let m1 = pair.alice.encrypt(b"one").unwrap();
        let mut moved = m1.message().clone();
        moved.generation = 0;

        assert!(matches!(pair.bob.decrypt(&moved, MAX_SKIP), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_persistence_round_trip() {
        let (mut pair, first) = established();
        pair.bob.decrypt(first.message(), MAX_SKIP).unwrap();

        let mut restored = Session::from_bytes(&pair.bob.to_bytes().unwrap()).unwrap();
        let next = pair.alice.encrypt(b"after restart").unwrap();

        assert_eq!(restored.decrypt(next.message(), MAX_SKIP).unwrap(), b"after restart");
        assert_eq!(restored.base_key(), pair.bob.base_key());
    }

    #[test]
    fn test_corrupted_bytes() {
        assert!(matches!(Session::from_bytes(&[1, 2, 3]), Err(Error::StorageCorrupted(_))));
    }
}
