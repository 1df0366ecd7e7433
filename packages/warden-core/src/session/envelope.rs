//! Wire envelope for session messages.
//!
//! ```text
//! {"type":"pre_key",
//!  "header":{"registration_id":..,"identity_key":{..},"base_key":"<b64>",
//!            "signed_pre_key_id":..,"one_time_pre_key_id":..|null},
//!  "message":{"generation":0,"nonce":"<b64>","ciphertext":"<b64>"}}
//!
//! {"type":"message","generation":7,"nonce":"<b64>","ciphertext":"<b64>"}
//! ```
//!
//! The initiator keeps sending `pre_key` envelopes until it has decrypted a
//! reply, so the responder can still open the session if earlier envelopes
//! were lost.

use serde::{Deserialize, Serialize};

use crate::crypto::{Nonce, PublicIdentityKey, TAG_SIZE};
use crate::encoding::{base64_bytes, base64_key};
use crate::error::{Error, Result};

/// Key-agreement parameters carried by an initial message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyHeader {
    /// Initiator's registration id
    pub registration_id: u32,
    /// Initiator's public identity
    pub identity_key: PublicIdentityKey,
    /// Initiator's ephemeral X25519 public key
    #[serde(with = "base64_key")]
    pub base_key: [u8; 32],
    /// Responder's signed pre-key used
    pub signed_pre_key_id: u32,
    /// Responder's one-time pre-key used, if the bundle had one
    pub one_time_pre_key_id: Option<u32>,
}

/// An encrypted message on an established chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Sending-chain generation
    pub generation: u32,
    /// AES-GCM nonce
    #[serde(with = "base64_bytes")]
    pub nonce: Vec<u8>,
    /// Ciphertext with tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl SessionMessage {
    /// Parsed nonce, rejecting structurally impossible messages
    pub fn checked_nonce(&self) -> Result<Nonce> {
        if self.ciphertext.len() < TAG_SIZE {
            return Err(Error::MalformedEnvelope("ciphertext shorter than tag".into()));
        }
        Nonce::from_slice(&self.nonce)
            .ok_or_else(|| Error::MalformedEnvelope(format!("nonce length {}", self.nonce.len())))
    }
}

/// Self-describing session envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Initial message that can establish a session
    PreKey {
        /// Agreement parameters
        header: PreKeyHeader,
        /// First (or a repeated early) message
        message: SessionMessage,
    },
    /// Follow-up message in an established session
    Message(SessionMessage),
}

impl Envelope {
    /// Whether this envelope can establish a session
    pub fn is_pre_key(&self) -> bool {
        matches!(self, Envelope::PreKey { .. })
    }

    /// The encrypted message, regardless of kind
    pub fn message(&self) -> &SessionMessage {
        match self {
            Envelope::PreKey { message, .. } => message,
            Envelope::Message(message) => message,
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> SessionMessage {
        SessionMessage {
            generation: 3,
            nonce: vec![1u8; 12],
            ciphertext: vec![2u8; 20],
        }
    }

    #[test]
    fn test_message_json_shape() {
        let json = Envelope::Message(message()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["type"], "message");
        assert_eq!(value["generation"], 3);
        assert_eq!(value["nonce"], "AQEBAQEBAQEBAQEB");
    }

    #[test]
    fn test_pre_key_round_trip() {
        let envelope = Envelope::PreKey {
            header: PreKeyHeader {
                registration_id: 12,
                identity_key: PublicIdentityKey::from_bytes([4u8; 32], [5u8; 32]),
                base_key: [6u8; 32],
                signed_pre_key_id: 0,
                one_time_pre_key_id: Some(9),
            },
            message: message(),
        };

        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"type\":\"pre_key\""));

        let parsed = Envelope::from_json(&json).unwrap();
        assert_eq!(parsed, envelope);
        assert!(parsed.is_pre_key());
        assert_eq!(parsed.message().generation, 3);
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(Envelope::from_json("{}"), Err(Error::MalformedEnvelope(_))));
        assert!(matches!(
            Envelope::from_json(r#"{"type":"bogus"}"#),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Envelope::from_json(r#"{"type":"message","generation":1,"nonce":"%%","ciphertext":""}"#),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_checked_nonce() {
        assert!(message().checked_nonce().is_ok());

        let mut short_nonce = message();
        short_nonce.nonce.pop();
        assert!(matches!(short_nonce.checked_nonce(), Err(Error::MalformedEnvelope(_))));

        let mut short_body = message();
        short_body.ciphertext.truncate(4);
        assert!(matches!(short_body.checked_nonce(), Err(Error::MalformedEnvelope(_))));
    }
}
