//! Security core configuration.
//!
//! Values come from [`SecurityConfig::default`], from a deserialized
//! document, or from `WARDEN_*` environment variables. Every constructor path
//! should end in [`SecurityConfig::validate`].

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lowest PBKDF2 iteration count accepted for backup keys.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Configuration shared by the session manager and the settings facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// PBKDF2-HMAC-SHA256 iterations used when wrapping backups.
    pub pbkdf2_iterations: u32,
    /// Issuer label embedded in TOTP provisioning URIs.
    pub totp_issuer: String,
    /// Number of recovery codes generated per enrollment/regeneration.
    pub recovery_code_count: usize,
    /// One-time pre-keys generated per published batch.
    pub one_time_pre_key_count: u32,
    /// Upper bound on a single directory call, in milliseconds.
    pub directory_timeout_ms: u64,
    /// How far ahead of the receiving chain a message may be.
    pub max_skipped_message_keys: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: MIN_PBKDF2_ITERATIONS,
            totp_issuer: "Warden".to_string(),
            recovery_code_count: 8,
            one_time_pre_key_count: 50,
            directory_timeout_ms: 10_000,
            max_skipped_message_keys: 1000,
        }
    }
}

impl SecurityConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are errors.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            pbkdf2_iterations: parse_env("WARDEN_PBKDF2_ITERATIONS")?
                .unwrap_or(defaults.pbkdf2_iterations),
            totp_issuer: env::var("WARDEN_TOTP_ISSUER").unwrap_or(defaults.totp_issuer),
            recovery_code_count: parse_env("WARDEN_RECOVERY_CODE_COUNT")?
                .unwrap_or(defaults.recovery_code_count),
            one_time_pre_key_count: parse_env("WARDEN_ONE_TIME_PRE_KEYS")?
                .unwrap_or(defaults.one_time_pre_key_count),
            directory_timeout_ms: parse_env("WARDEN_DIRECTORY_TIMEOUT_MS")?
                .unwrap_or(defaults.directory_timeout_ms),
            max_skipped_message_keys: parse_env("WARDEN_MAX_SKIPPED_KEYS")?
                .unwrap_or(defaults.max_skipped_message_keys),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would weaken the core or make it unusable.
    pub fn validate(&self) -> Result<()> {
        if self.pbkdf2_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "pbkdf2_iterations must be at least {}, got {}",
                MIN_PBKDF2_ITERATIONS, self.pbkdf2_iterations
            )));
        }
        if self.totp_issuer.trim().is_empty() {
            return Err(Error::InvalidConfig("totp_issuer must not be empty".into()));
        }
        if self.totp_issuer.contains(':') {
            return Err(Error::InvalidConfig("totp_issuer must not contain ':'".into()));
        }
        if self.recovery_code_count == 0 {
            return Err(Error::InvalidConfig("recovery_code_count must be positive".into()));
        }
        if self.one_time_pre_key_count == 0 {
            return Err(Error::InvalidConfig(
                "one_time_pre_key_count must be positive".into(),
            ));
        }
        if self.directory_timeout_ms == 0 {
            return Err(Error::InvalidConfig("directory_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Directory timeout as a [`Duration`].
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{} is not a valid value: {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SecurityConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pbkdf2_iterations, 100_000);
        assert_eq!(config.recovery_code_count, 8);
        assert_eq!(config.directory_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_weak_iterations_rejected() {
        let config = SecurityConfig {
            pbkdf2_iterations: 10_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_issuer_with_colon_rejected() {
        let config = SecurityConfig {
            totp_issuer: "Acme:Corp".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: SecurityConfig =
            serde_json::from_str(r#"{"totp_issuer": "Acme", "pbkdf2_iterations": 200000}"#)
                .unwrap();
        assert_eq!(config.totp_issuer, "Acme");
        assert_eq!(config.pbkdf2_iterations, 200_000);
        assert_eq!(config.one_time_pre_key_count, 50);
        config.validate().unwrap();
    }
}
