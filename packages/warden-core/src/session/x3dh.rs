//! X3DH-style key agreement.
//!
//! ```text
//! Initiator A (identity IK_A, ephemeral EK)     Responder B (IK_B, SPK_B, OPK_B)
//!
//!   DH1 = DH(IK_A,  SPK_B)
//!   DH2 = DH(EK,    IK_B)
//!   DH3 = DH(EK,    SPK_B)
//!   DH4 = DH(EK,    OPK_B)        (only when B's bundle offered one)
//!
//!   root = HKDF-SHA256(
//!     ikm  = 0xFF * 32 || DH1 || DH2 || DH3 [|| DH4],
//!     salt = 0x00 * 32,
//!     info = "warden-x3dh-v1")
//! ```
//!
//! The responder computes the same four values from the other side using the
//! [`PreKeyHeader`] carried by the first message.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::envelope::PreKeyHeader;
use super::prekeys::PreKeyBundle;
use crate::crypto::{domain, hkdf_sha256, AgreementKeyPair, IdentityKeyPair};
use crate::error::{Error, Result};

const PADDING: [u8; 32] = [0xFF; 32];
const SALT: [u8; 32] = [0u8; 32];

/// Run the initiator side against a fetched bundle
///
/// Verifies the signed pre-key, picks one of the offered one-time pre-keys
/// at random and returns the root key with the header the responder needs.
pub fn initiate(
    identity: &IdentityKeyPair,
    registration_id: u32,
    bundle: &PreKeyBundle,
) -> Result<(Zeroizing<[u8; 32]>, PreKeyHeader)> {
    bundle.verify()?;

    let one_time = bundle.one_time_pre_keys.choose(&mut OsRng);
    let ephemeral = AgreementKeyPair::generate();

    let spk = &bundle.signed_pre_key.public_key;
    let mut dhs = vec![
        identity.agreement.diffie_hellman(spk),
        ephemeral.diffie_hellman(&bundle.identity_key.agreement),
        ephemeral.diffie_hellman(spk),
    ];
    if let Some(opk) = one_time {
        dhs.push(ephemeral.diffie_hellman(&opk.public_key));
    }

    let root_key = derive_root(&dhs)?;
    let header = PreKeyHeader {
        registration_id,
        identity_key: identity.public_key(),
        base_key: ephemeral.public_bytes(),
        signed_pre_key_id: bundle.signed_pre_key.id,
        one_time_pre_key_id: one_time.map(|k| k.id),
    };

    Ok((root_key, header))
}

/// Run the responder side for an incoming header
///
/// `one_time` must be the private half of `header.one_time_pre_key_id`, or
/// `None` when the header names no one-time pre-key.
pub fn respond(
    identity: &IdentityKeyPair,
    header: &PreKeyHeader,
    signed: &AgreementKeyPair,
    one_time: Option<&AgreementKeyPair>,
) -> Result<Zeroizing<[u8; 32]>> {
    if header.one_time_pre_key_id.is_some() != one_time.is_some() {
        return Err(Error::DecryptionFailed);
    }

    let mut dhs = vec![
        signed.diffie_hellman(&header.identity_key.agreement),
        identity.agreement.diffie_hellman(&header.base_key),
        signed.diffie_hellman(&header.base_key),
    ];
    if let Some(opk) = one_time {
        dhs.push(opk.diffie_hellman(&header.base_key));
    }

    derive_root(&dhs)
}

fn derive_root(dhs: &[Zeroizing<[u8; 32]>]) -> Result<Zeroizing<[u8; 32]>> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(32 * (dhs.len() + 1)));
    ikm.extend_from_slice(&PADDING);
    for dh in dhs {
        // Low-order points yield an all-zero shared secret.
        if bool::from(dh[..].ct_eq(&[0u8; 32])) {
            return Err(Error::InvalidKey("degenerate key agreement".into()));
        }
        ikm.extend_from_slice(&dh[..]);
    }
    hkdf_sha256(&ikm, Some(&SALT), domain::X3DH_ROOT)
}

// ============================================================================
// TESTS
// ============================================================================
