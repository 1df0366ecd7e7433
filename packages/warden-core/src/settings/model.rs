//! Persisted security settings.
//!
//! ```text
//! SecuritySettings
//! ├── encryptionEnabled   bool
//! ├── twoFactor
//! │   ├── enabled         bool        (true ⇒ secret present)
//! │   ├── secret          base32?     (TOTP shared secret)
//! │   ├── recoveryCodes   [code]?     (unused codes only)
//! │   └── disabledAt      unix secs?  (set when 2FA was turned off)
//! └── updatedAt           unix secs
//! ```
//!
//! `TwoFactorSettings` keeps its fields private and validates on
//! deserialization, so a record claiming `enabled` without a secret can
//! neither be built nor loaded.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::totp::{RecoveryCodeSet, TotpSecret};

/// Where a user is in the two-factor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorState {
    /// Never enrolled
    Unenrolled,
    /// Secret generated, waiting for the first valid code
    PendingVerification,
    /// Codes are required at sign-in
    Enabled,
    /// Was enabled, then turned off
    Disabled,
}

/// Two-factor part of the settings record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawTwoFactorSettings")]
pub struct TwoFactorSettings {
    enabled: bool,
    secret: Option<TotpSecret>,
    recovery_codes: Option<RecoveryCodeSet>,
    disabled_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTwoFactorSettings {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    secret: Option<TotpSecret>,
    #[serde(default)]
    recovery_codes: Option<RecoveryCodeSet>,
    #[serde(default)]
    disabled_at: Option<i64>,
}

impl TryFrom<RawTwoFactorSettings> for TwoFactorSettings {
    type Error = Error;

    fn try_from(raw: RawTwoFactorSettings) -> Result<Self> {
        if raw.enabled && raw.secret.is_none() {
            return Err(Error::StorageCorrupted(
                "two-factor marked enabled without a secret".into(),
            ));
        }
        Ok(Self {
            enabled: raw.enabled,
            secret: raw.secret,
            recovery_codes: raw.recovery_codes,
            disabled_at: raw.disabled_at,
        })
    }
}

impl TwoFactorSettings {
    /// Enabled with a verified secret and fresh recovery codes
    pub fn enabled(secret: TotpSecret, recovery_codes: RecoveryCodeSet) -> Self {
        Self {
            enabled: true,
            secret: Some(secret),
            recovery_codes: Some(recovery_codes),
            disabled_at: None,
        }
    }

    /// Turned off at `at`, with secret and codes dropped
    pub fn disabled(at: i64) -> Self {
        Self {
            enabled: false,
            secret: None,
            recovery_codes: None,
            disabled_at: Some(at),
        }
    }

    /// Whether codes are required
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// TOTP secret, present whenever enabled
    pub fn secret(&self) -> Option<&TotpSecret> {
        self.secret.as_ref()
    }

    /// Unused recovery codes
    pub fn recovery_codes(&self) -> Option<&RecoveryCodeSet> {
        self.recovery_codes.as_ref()
    }

    /// When 2FA was last turned off
    pub fn disabled_at(&self) -> Option<i64> {
        self.disabled_at
    }

    /// Same settings with `codes` replacing the recovery set
    pub fn with_recovery_codes(&self, codes: RecoveryCodeSet) -> Result<Self> {
        if !self.enabled {
            return Err(Error::TwoFactorNotEnabled);
        }
        Ok(Self {
            recovery_codes: Some(codes),
            ..self.clone()
        })
    }

    /// Persisted part of the lifecycle (pending enrollments live in memory)
    pub fn state(&self) -> TwoFactorState {
        match (self.enabled, self.disabled_at) {
            (true, _) => TwoFactorState::Enabled,
            (false, Some(_)) => TwoFactorState::Disabled,
            (false, None) => TwoFactorState::Unenrolled,
        }
    }
}

/// Per-user security record kept by the settings store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    /// Whether messages go through the session manager
    #[serde(default)]
    pub encryption_enabled: bool,
    /// Second-factor settings
    #[serde(default)]
    pub two_factor: TwoFactorSettings,
    /// Unix timestamp (seconds) of the last change
    #[serde(default)]
    pub updated_at: i64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            encryption_enabled: false,
            two_factor: TwoFactorSettings::default(),
            updated_at: crate::time::now_timestamp(),
        }
    }
}

impl SecuritySettings {
    /// Bump `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = crate::time::now_timestamp();
    }
}

/// Explicit consent for a destructive transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The user confirmed
    Confirmed,
    /// No confirmation given
    NotConfirmed,
}

impl Confirmation {
    /// `Ok` only when confirmed
    pub fn require(self, action: &'static str) -> Result<()> {
        match self {
            Confirmation::Confirmed => Ok(()),
            Confirmation::NotConfirmed => Err(Error::ConfirmationRequired(action)),
        }
    }
}

impl From<bool> for Confirmation {
    fn from(confirmed: bool) -> Self {
        if confirmed {
            Confirmation::Confirmed
        } else {
            Confirmation::NotConfirmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_without_secret_rejected() {
        let json = r#"{"enabled":true,"secret":null,"recoveryCodes":null}"#;
        assert!(serde_json::from_str::<TwoFactorSettings>(json).is_err());
    }

    #[test]
    fn test_settings_json_shape() {
        let secret = TotpSecret::from_base32("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        let codes = RecoveryCodeSet::from_codes(vec!["AAAAA-BBBBB".into()]);
        let settings = SecuritySettings {
            encryption_enabled: true,
            two_factor: TwoFactorSettings::enabled(secret, codes),
            updated_at: 1_700_000_000,
        };

        let value = serde_json::to_value(&settings).unwrap();
        assert_eq!(value["encryptionEnabled"], true);
        assert_eq!(value["twoFactor"]["enabled"], true);
        assert_eq!(value["twoFactor"]["secret"], "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ");
        assert_eq!(value["twoFactor"]["recoveryCodes"][0], "AAAAA-BBBBB");

        let parsed: SecuritySettings = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_missing_fields_default() {
        let parsed: SecuritySettings = serde_json::from_str("{}").unwrap();
        assert!(!parsed.encryption_enabled);
        assert_eq!(parsed.two_factor.state(), TwoFactorState::Unenrolled);
    }

    #[test]
    fn test_state_transitions() {
        let secret = TotpSecret::generate();
        let enabled = TwoFactorSettings::enabled(secret, RecoveryCodeSet::generate(2));
        assert_eq!(enabled.state(), TwoFactorState::Enabled);

        let disabled = TwoFactorSettings::disabled(5);
        assert_eq!(disabled.state(), TwoFactorState::Disabled);
        assert!(disabled.secret().is_none());
        assert!(disabled.recovery_codes().is_none());
    }

    #[test]
    fn test_regenerating_codes_requires_enabled() {
        let codes = RecoveryCodeSet::generate(1);
        assert!(matches!(
            TwoFactorSettings::default().with_recovery_codes(codes.clone()),
            Err(Error::TwoFactorNotEnabled)
        ));

        let enabled = TwoFactorSettings::enabled(TotpSecret::generate(), RecoveryCodeSet::generate(3));
        let replaced = enabled.with_recovery_codes(codes.clone()).unwrap();
        assert_eq!(replaced.recovery_codes(), Some(&codes));
        assert_eq!(replaced.secret(), enabled.secret());
    }

    #[test]
    fn test_confirmation() {
        assert!(Confirmation::Confirmed.require("disable").is_ok());
        assert!(matches!(
            Confirmation::from(false).require("disable"),
            Err(Error::ConfirmationRequired("disable"))
        ));
    }
}
