//! The shared TOTP secret.

use std::fmt;

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Length of a freshly generated secret (160 bits, the RFC 4226 recommendation)
pub const SECRET_LEN: usize = 20;

/// Raw TOTP key, zeroized on drop
///
/// Displayed and persisted as unpadded RFC 4648 base32.
#[derive(Clone)]
pub struct TotpSecret(Zeroizing<Vec<u8>>);

impl TotpSecret {
    /// Generate a new random secret
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; SECRET_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidKey("TOTP secret must not be empty".into()));
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    /// Decode base32, tolerating lowercase, spaces and trailing padding
    pub fn from_base32(encoded: &str) -> Result<Self> {
        let normalized: Zeroizing<String> = Zeroizing::new(
            encoded
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '=')
                .map(|c| c.to_ascii_uppercase())
                .collect(),
        );
        let bytes = BASE32_NOPAD
            .decode(normalized.as_bytes())
            .map_err(|e| Error::InvalidKey(format!("Invalid base32 TOTP secret: {}", e)))?;
        Self::from_bytes(&Zeroizing::new(bytes))
    }

    /// Unpadded base32 for display and provisioning URIs
    pub fn to_base32(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE32_NOPAD.encode(&self.0))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for TotpSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_slice().ct_eq(other.0.as_slice()).into()
    }
}

impl Eq for TotpSecret {}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TotpSecret([REDACTED])")
    }
}

impl Serialize for TotpSecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base32())
    }
}

impl<'de> Deserialize<'de> for TotpSecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        TotpSecret::from_base32(&encoded).map_err(serde::de::Error::custom)
    }
}
