//! # TOTP Engine
//!
//! RFC 6238 time-based one-time passwords plus recovery codes.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       CODE DERIVATION                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  counter = floor(unix_time / 30)          (8 bytes, big-endian)        │
//! │  mac     = HMAC-SHA1(secret, counter)     (20 bytes)                   │
//! │  offset  = mac[19] & 0x0F                                              │
//! │  bin     = mac[offset..offset+4] & 0x7FFFFFFF                          │
//! │  code    = bin mod 10^6, zero-padded to 6 digits                       │
//! │                                                                         │
//! │  validate() accepts exactly the steps for now-30, now, now+30.         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Enrollment lifecycle (driven by the settings facade):
//!
//! ```text
//! UNENROLLED ──setup()──► PENDING_VERIFICATION ──validate ok──► ENABLED
//!                                                                 │  ▲
//!                                                regenerate codes └──┘
//!                                                                 │
//!                                                  disable ──► DISABLED
//! ```

mod recovery;
mod secret;

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

pub use recovery::{
    consume_recovery_code, generate_recovery_codes, RecoveryCodeSet,
    DEFAULT_RECOVERY_CODE_COUNT, SEGMENT_LEN,
};
pub use secret::{TotpSecret, SECRET_LEN};

type HmacSha1 = Hmac<Sha1>;

/// Seconds per time step
pub const STEP_SECONDS: u64 = 30;

/// Digits per code
pub const DIGITS: usize = 6;

const MODULUS: u32 = 1_000_000;

/// Result of [`TotpEngine::setup`]
///
/// Nothing is persisted by `setup`. The caller keeps this as pending state
/// until a code validates against [`TotpSetup::secret`].
#[derive(Debug, Clone)]
pub struct TotpSetup {
    /// Freshly generated shared secret
    pub secret: TotpSecret,
    /// `otpauth://` URI for authenticator apps
    pub provisioning_uri: String,
    /// Fresh recovery codes to show once
    pub recovery_codes: RecoveryCodeSet,
}

/// Stateless enrollment helper carrying issuer and batch size
#[derive(Debug, Clone)]
pub struct TotpEngine {
    issuer: String,
    recovery_code_count: usize,
}

impl TotpEngine {
    /// Create an engine for `issuer`
    pub fn new(issuer: impl Into<String>, recovery_code_count: usize) -> Self {
        Self {
            issuer: issuer.into(),
            recovery_code_count,
        }
    }

    /// Issuer label shown by authenticator apps
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Generate a new secret, its provisioning URI and recovery codes
    pub fn setup(&self, account: &str) -> TotpSetup {
        let secret = TotpSecret::generate();
        let provisioning_uri = self.provisioning_uri(&secret, account);
        TotpSetup {
            secret,
            provisioning_uri,
            recovery_codes: RecoveryCodeSet::generate(self.recovery_code_count),
        }
    }

    /// Fresh recovery codes for regeneration
    pub fn generate_recovery_codes(&self) -> RecoveryCodeSet {
        RecoveryCodeSet::generate(self.recovery_code_count)
    }

    /// `otpauth://totp/<issuer>:<account>?secret=..&issuer=..&algorithm=SHA1&digits=6&period=30`
    ///
    /// Issuer and account are percent-encoded; the `:` separating them is not.
    pub fn provisioning_uri(&self, secret: &TotpSecret, account: &str) -> String {
        let issuer = urlencoding::encode(&self.issuer);
        format!(
            "otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={digits}&period={period}",
            issuer = issuer,
            account = urlencoding::encode(account),
            secret = secret.to_base32().as_str(),
            digits = DIGITS,
            period = STEP_SECONDS,
        )
    }
}

/// Six-digit code for `unix_time`
pub fn code(secret: &TotpSecret, unix_time: u64) -> String {
    hotp(secret.as_bytes(), unix_time / STEP_SECONDS)
}

/// Check `submitted` against the steps for `now - 30`, `now` and `now + 30`
///
/// Whitespace inside the submission is ignored. Anything that is not six
/// digits simply fails.
pub fn validate(secret: &TotpSecret, submitted: &str, now: u64) -> bool {
    let submitted: String = submitted.chars().filter(|c| !c.is_whitespace()).collect();
    if submitted.len() != DIGITS || !submitted.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let counter = now / STEP_SECONDS;
    let mut accepted = Choice::from(0u8);
    for candidate in [counter.checked_sub(1), Some(counter), counter.checked_add(1)]
        .into_iter()
        .flatten()
    {
        let expected = hotp(secret.as_bytes(), candidate);
        accepted |= expected.as_bytes().ct_eq(submitted.as_bytes());
    }
    accepted.into()
}

/// RFC 4226 HOTP with dynamic truncation
fn hotp(key: &[u8], counter: u64) -> String {
    let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
        unreachable!("HMAC-SHA1 accepts any key size");
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7fff_ffff;

    format!("{:0width$}", binary % MODULUS, width = DIGITS)
}
