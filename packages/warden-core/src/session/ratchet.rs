//! Symmetric chain ratchet for per-message keys.
//!
//! Each direction of a session owns one chain:
//!
//! ```text
//! chain_key[n+1] = HMAC-SHA256(chain_key[n], "chain")
//! message_key[n] = HMAC-SHA256(chain_key[n], "message")
//! ```
//!
//! Old chain keys are overwritten as the chain advances, so compromise of
//! the current state does not reveal earlier message keys.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const CHAIN_LABEL: &[u8] = b"chain";
const MESSAGE_LABEL: &[u8] = b"message";

/// Key for exactly one message
pub struct MessageKey {
    key: [u8; 32],
    generation: u32,
}

impl MessageKey {
    pub(crate) fn new(key: [u8; 32], generation: u32) -> Self {
        Self { key, generation }
    }

    /// 32-byte AES-256-GCM key
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Chain generation this key belongs to
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// One direction of a session's key schedule
#[derive(Clone, Serialize, Deserialize)]
pub struct ChainRatchet {
    chain_key: [u8; 32],
    generation: u32,
}

impl ChainRatchet {
    /// Start a chain at generation 0
    pub fn new(seed: &[u8; 32]) -> Self {
        Self {
            chain_key: *seed,
            generation: 0,
        }
    }

    /// Generation of the next key [`advance`](Self::advance) will return
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Derive the key for the current generation and step forward
    pub fn advance(&mut self) -> Result<MessageKey> {
        if self.generation == u32::MAX {
            return Err(Error::Internal("ratchet generation exhausted".into()));
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let next_chain_key = self.derive(CHAIN_LABEL);

        self.chain_key.zeroize();
        self.chain_key = next_chain_key;

        let generation = self.generation;
        self.generation += 1;

        Ok(MessageKey::new(message_key, generation))
    }

    /// Step forward to `target`, returning the keys for every skipped
    /// generation and then the key for `target` itself
    ///
    /// Fails with `DecryptionFailed` if `target` is behind the chain or more
    /// than `max_skip` generations ahead.
    pub fn advance_to(&mut self, target: u32, max_skip: u32) -> Result<(Vec<MessageKey>, MessageKey)> {
        if target < self.generation || target - self.generation > max_skip {
            return Err(Error::DecryptionFailed);
        }

        let mut skipped = Vec::with_capacity((target - self.generation) as usize);
        loop {
            let key = self.advance()?;
            if key.generation() == target {
                return Ok((skipped, key));
            }
            skipped.push(key);
        }
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.chain_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut key = [0u8; 32];
        key.copy_from_slice(&result);
        key
    }
}

impl Drop for ChainRatchet {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = ChainRatchet::new(&seed());
        let mut b = ChainRatchet::new(&seed());

        for _ in 0..5 {
            assert_eq!(a.advance().unwrap().key(), b.advance().unwrap().key());
        }
    }

    #[test]
    fn test_keys_are_unique() {
        let mut chain = ChainRatchet::new(&seed());
        let k0 = *chain.advance().unwrap().key();
        let k1 = *chain.advance().unwrap().key();
        assert_ne!(k0, k1);
        assert_eq!(chain.generation(), 2);
    }

    #[test]
    fn test_advance_to_returns_skipped_keys() {
        let mut reference = ChainRatchet::new(&seed());
        let expected: Vec<[u8; 32]> = (0..4).map(|_| *reference.advance().unwrap().key()).collect();

        let mut chain = ChainRatchet::new(&seed());
        let (skipped, key) = chain.advance_to(3, 10).unwrap();

        assert_eq!(skipped.len(), 3);
        for (i, k) in skipped.iter().enumerate() {
            assert_eq!(k.generation(), i as u32);
            assert_eq!(k.key(), &expected[i]);
        }
        assert_eq!(key.key(), &expected[3]);
        assert_eq!(chain.generation(), 4);
    }

    #[test]
    fn test_advance_to_bounds() {
        let mut chain = ChainRatchet::new(&seed());
        chain.advance().unwrap();

        assert!(matches!(chain.advance_to(0, 10), Err(Error::DecryptionFailed)));
        assert!(matches!(chain.advance_to(50, 10), Err(Error::DecryptionFailed)));
        assert_eq!(chain.generation(), 1);
    }
}
