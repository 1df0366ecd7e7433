//! # Security Facade
//!
//! The one object the application talks to. It ties the session manager,
//! the TOTP engine and the backup cipher to the user's persisted settings.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SECURITY FACADE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  initialize()            load/create identity, publish bundle,         │
//! │                          load settings                                 │
//! │                                                                         │
//! │  Messaging               enable / disable encryption                   │
//! │                          encrypt_message / decrypt_message             │
//! │                                                                         │
//! │  Two-factor              begin → confirm enrollment                    │
//! │                          verify_totp / redeem_recovery_code            │
//! │                          regenerate codes / disable                    │
//! │                                                                         │
//! │  Backup                  create_backup / restore_backup                │
//! │                                                                         │
//! │  Verification            local / correspondent fingerprints            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every read-modify-write of the settings record happens under one async
//! mutex, so two concurrent redemptions of the same recovery code cannot
//! both succeed. Destructive transitions take a [`Confirmation`].

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use super::model::{Confirmation, SecuritySettings, TwoFactorSettings, TwoFactorState};
use crate::config::SecurityConfig;
use crate::crypto::{Fingerprint, PublicIdentityKey};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::session::{Envelope, IdentityBackup, SessionManager};
use crate::storage::{SecureStore, SettingsStore};
use crate::totp::{self, RecoveryCodeSet, TotpEngine, TotpSetup, DIGITS};

/// Which second factor a sign-in used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    /// A code from the authenticator app
    Totp,
    /// A recovery code, now spent
    RecoveryCode {
        /// Codes left after this one
        remaining: usize,
    },
}

/// Enrollment generated but not yet confirmed
struct PendingEnrollment {
    setup: TotpSetup,
}

/// Application-facing security API for one user
pub struct SecurityFacade {
    user_id: String,
    sessions: Arc<SessionManager>,
    settings_store: Arc<dyn SettingsStore>,
    totp: TotpEngine,

    settings_lock: AsyncMutex<()>,
    pending: Mutex<Option<PendingEnrollment>>,
}

impl SecurityFacade {
    /// Build a facade and its session manager
    pub fn new(
        user_id: impl Into<String>,
        config: SecurityConfig,
        store: Arc<SecureStore>,
        directory: Arc<dyn Directory>,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        let user_id = user_id.into();
        let sessions = Arc::new(SessionManager::new(user_id.clone(), config.clone(), store, directory)?);
        Self::with_session_manager(sessions, config, settings_store)
    }

    /// Build a facade around an existing session manager
    pub fn with_session_manager(
        sessions: Arc<SessionManager>,
        config: SecurityConfig,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            user_id: sessions.user_id().to_string(),
            totp: TotpEngine::new(config.totp_issuer.clone(), config.recovery_code_count),
            sessions,
            settings_store,
            settings_lock: AsyncMutex::new(()),
            pending: Mutex::new(None),
        })
    }

    /// Underlying session manager
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Load or create the identity, publish the bundle and make sure a
    /// settings record exists
    pub async fn initialize(&self) -> Result<SecuritySettings> {
        self.sessions.load_or_create_identity().await?;

        let _guard = self.settings_lock.lock().await;
        let settings = match self.settings_store.get_security_settings(&self.user_id).await? {
            Some(settings) => settings,
            None => {
                let settings = SecuritySettings::default();
                self.settings_store
                    .set_security_settings(&self.user_id, &settings)
                    .await?;
                settings
            }
        };

        tracing::info!(
            "Security core ready for {} (encryption {}, two-factor {:?})",
            self.user_id,
            if settings.encryption_enabled { "on" } else { "off" },
            settings.two_factor.state()
        );
        Ok(settings)
    }

    /// Current settings record (defaults if none is stored)
    pub async fn settings(&self) -> Result<SecuritySettings> {
        Ok(self
            .settings_store
            .get_security_settings(&self.user_id)
            .await?
            .unwrap_or_default())
    }

    async fn update<T>(&self, change: impl FnOnce(&mut SecuritySettings) -> Result<T>) -> Result<T> {
        let _guard = self.settings_lock.lock().await;
        let mut settings = self.settings().await?;
        let result = change(&mut settings)?;
        settings.touch();
        self.settings_store
            .set_security_settings(&self.user_id, &settings)
            .await?;
        Ok(result)
    }

    // ========================================================================
    // MESSAGE ENCRYPTION
    // ========================================================================

    /// Turn on end-to-end encryption for outgoing messages
    pub async fn enable_encryption(&self) -> Result<()> {
        self.sessions.load_or_create_identity().await?;
        self.update(|settings| {
            settings.encryption_enabled = true;
            Ok(())
        })
        .await?;
        tracing::info!("Encryption enabled for {}", self.user_id);
        Ok(())
    }

    /// Turn off encryption for outgoing messages
    ///
    /// Sessions and keys are kept, so earlier messages still decrypt.
    pub async fn disable_encryption(&self, confirmation: Confirmation) -> Result<()> {
        confirmation.require("disable encryption")?;
        self.update(|settings| {
            settings.encryption_enabled = false;
            Ok(())
        })
        .await?;
        tracing::info!("Encryption disabled for {}", self.user_id);
        Ok(())
    }

    /// Whether outgoing messages are encrypted
    pub async fn is_encryption_enabled(&self) -> Result<bool> {
        Ok(self.settings().await?.encryption_enabled)
    }

    /// Encrypt a message for `recipient`
    pub async fn encrypt_message(&self, recipient: &str, plaintext: &[u8]) -> Result<Envelope> {
        if !self.is_encryption_enabled().await? {
            return Err(Error::EncryptionDisabled);
        }
        self.sessions.encrypt(recipient, plaintext).await
    }

    /// Forget the session with `user_id` so the next message starts over
    pub async fn reset_session(&self, user_id: &str) -> Result<bool> {
        self.sessions.reset_session(user_id).await
    }

    /// Decrypt a message from `sender`
    ///
    /// Works whether or not encryption is currently enabled for outgoing
    /// messages.
    pub async fn decrypt_message(&self, sender: &str, envelope: &Envelope) -> Result<Vec<u8>> {
        self.sessions.decrypt(sender, envelope).await
    }

    // ========================================================================
    // TWO-FACTOR
    // ========================================================================

    /// Start enrollment: a fresh secret, provisioning URI and recovery codes
    ///
    /// Nothing is persisted until [`confirm_two_factor_enrollment`] accepts
    /// a code. Calling this again discards the previous pending setup.
    ///
    /// [`confirm_two_factor_enrollment`]: Self::confirm_two_factor_enrollment
    pub async fn begin_two_factor_enrollment(&self, account: &str) -> Result<TotpSetup> {
        if self.settings().await?.two_factor.is_enabled() {
            return Err(Error::TwoFactorAlreadyEnabled);
        }

        let setup = self.totp.setup(account);
        *self.pending.lock() = Some(PendingEnrollment { setup: setup.clone() });

        tracing::info!("Two-factor enrollment started for {}", self.user_id);
        Ok(setup)
    }

    /// Finish enrollment once the authenticator produces a valid code
    ///
    /// A wrong code keeps the enrollment pending.
    pub async fn confirm_two_factor_enrollment(&self, code: &str) -> Result<RecoveryCodeSet> {
        let setup = self
            .pending
            .lock()
            .as_ref()
            .map(|p| p.setup.clone())
            .ok_or(Error::NoPendingEnrollment)?;

        if !totp::validate(&setup.secret, code, crate::time::now_unix_seconds()) {
            tracing::warn!("Rejected enrollment code for {}", self.user_id);
            return Err(Error::InvalidTotpCode);
        }

        let codes = setup.recovery_codes.clone();
        self.update(move |settings| {
            if settings.two_factor.is_enabled() {
                return Err(Error::TwoFactorAlreadyEnabled);
            }
            settings.two_factor = TwoFactorSettings::enabled(setup.secret, setup.recovery_codes);
            Ok(())
        })
        .await?;
        *self.pending.lock() = None;

        tracing::info!("Two-factor enabled for {}", self.user_id);
        Ok(codes)
    }

    /// Drop a pending enrollment
    pub fn cancel_two_factor_enrollment(&self) -> bool {
        self.pending.lock().take().is_some()
    }

    /// Where the user is in the two-factor lifecycle
    pub async fn two_factor_state(&self) -> Result<TwoFactorState> {
        let state = self.settings().await?.two_factor.state();
        if state != TwoFactorState::Enabled && self.pending.lock().is_some() {
            return Ok(TwoFactorState::PendingVerification);
        }
        Ok(state)
    }

    /// Check an authenticator code
    pub async fn verify_totp(&self, code: &str) -> Result<()> {
        let settings = self.settings().await?;
        let secret = match settings.two_factor.secret() {
            Some(secret) if settings.two_factor.is_enabled() => secret,
            _ => return Err(Error::TwoFactorNotEnabled),
        };

        if totp::validate(secret, code, crate::time::now_unix_seconds()) {
            Ok(())
        } else {
            tracing::warn!("Rejected TOTP code for {}", self.user_id);
            Err(Error::InvalidTotpCode)
        }
    }

    /// Spend a recovery code, returning how many remain
    pub async fn redeem_recovery_code(&self, code: &str) -> Result<usize> {
        let remaining = self
            .update(|settings| {
                let codes = match settings.two_factor.recovery_codes() {
                    Some(codes) if settings.two_factor.is_enabled() => codes,
                    _ => return Err(Error::TwoFactorNotEnabled),
                };

                let (matched, rest) = codes.consume(code);
                if !matched {
                    return Err(Error::RecoveryCodeNotFound);
                }
                let remaining = rest.len();
                settings.two_factor = settings.two_factor.with_recovery_codes(rest)?;
                Ok(remaining)
            })
            .await;

        match &remaining {
            Ok(left) => tracing::info!("Recovery code used for {} ({} left)", self.user_id, left),
            Err(Error::RecoveryCodeNotFound) => {
                tracing::warn!("Rejected recovery code for {}", self.user_id)
            }
            Err(_) => {}
        }
        remaining
    }

    /// Accept either a six-digit authenticator code or a recovery code
    pub async fn verify_second_factor(&self, input: &str) -> Result<SecondFactor> {
        let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() == DIGITS && compact.bytes().all(|b| b.is_ascii_digit()) {
            self.verify_totp(&compact).await?;
            return Ok(SecondFactor::Totp);
        }
        let remaining = self.redeem_recovery_code(input).await?;
        Ok(SecondFactor::RecoveryCode { remaining })
    }

    /// Replace every recovery code with a fresh set
    pub async fn regenerate_recovery_codes(&self, confirmation: Confirmation) -> Result<RecoveryCodeSet> {
        confirmation.require("regenerate recovery codes")?;
        let codes = self.totp.generate_recovery_codes();
        let fresh = codes.clone();

        self.update(move |settings| {
            settings.two_factor = settings.two_factor.with_recovery_codes(fresh)?;
            Ok(())
        })
        .await?;

        tracing::info!("Recovery codes regenerated for {}", self.user_id);
        Ok(codes)
    }

    /// Turn two-factor off, dropping the secret and every recovery code
    pub async fn disable_two_factor(&self, confirmation: Confirmation) -> Result<()> {
        confirmation.require("disable two-factor authentication")?;
        self.update(|settings| {
            if !settings.two_factor.is_enabled() {
                return Err(Error::TwoFactorNotEnabled);
            }
            settings.two_factor = TwoFactorSettings::disabled(crate::time::now_timestamp());
            Ok(())
        })
        .await?;
        self.pending.lock().take();

        tracing::info!("Two-factor disabled for {}", self.user_id);
        Ok(())
    }

    // ========================================================================
    // BACKUP
    // ========================================================================

    /// Export the identity wrapped under `password`
    pub async fn create_backup(&self, password: &str) -> Result<IdentityBackup> {
        self.sessions.export_identity(password).await
    }

    /// Restore the identity from an encoded backup
    ///
    /// Replacing an identity that is already loaded needs confirmation,
    /// since every existing session is dropped.
    pub async fn restore_backup(
        &self,
        encoded: &str,
        password: &str,
        confirmation: Confirmation,
    ) -> Result<PublicIdentityKey> {
        if self.sessions.identity_key().is_ok() {
            confirmation.require("replace the current identity")?;
        }
        self.sessions.restore_identity_from_encoded(encoded, password).await
    }

    // ========================================================================
    // VERIFICATION
    // ========================================================================

    /// Fingerprint of this installation's identity
    pub fn local_fingerprint(&self) -> Result<Fingerprint> {
        self.sessions.local_fingerprint()
    }

    /// Fingerprint of `user_id`'s identity
    pub async fn correspondent_fingerprint(&self, user_id: &str) -> Result<Fingerprint> {
        self.sessions.fingerprint_of(user_id).await
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::storage::InMemorySettingsStore;

    fn facade() -> SecurityFacade {
        let config = SecurityConfig {
            one_time_pre_key_count: 4,
            recovery_code_count: 3,
            ..Default::default()
        };
        SecurityFacade::new(
            "alice",
            config,
            Arc::new(SecureStore::new()),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(InMemorySettingsStore::new()),
        )
        .unwrap()
    }

    fn current_code(setup: &TotpSetup) -> String {
        totp::code(&setup.secret, crate::time::now_unix_seconds())
    }

    #[tokio::test]
    async fn test_initialize_creates_settings() {
        let facade = facade();
        let settings = facade.initialize().await.unwrap();

        assert!(!settings.encryption_enabled);
        assert_eq!(facade.two_factor_state().await.unwrap(), TwoFactorState::Unenrolled);
        assert!(facade.local_fingerprint().is_ok());
    }

    #[tokio::test]
    async fn test_encryption_gate() {
        let facade = facade();
        facade.initialize().await.unwrap();

        assert!(matches!(
            facade.encrypt_message("bob", b"hi").await,
            Err(Error::EncryptionDisabled)
        ));

        facade.enable_encryption().await.unwrap();
        assert!(facade.is_encryption_enabled().await.unwrap());

        assert!(matches!(
            facade.disable_encryption(Confirmation::NotConfirmed).await,
            Err(Error::ConfirmationRequired(_))
        ));
        assert!(facade.is_encryption_enabled().await.unwrap());

        facade.disable_encryption(Confirmation::Confirmed).await.unwrap();
        assert!(!facade.is_encryption_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_enrollment_requires_valid_code() {
        let facade = facade();
        facade.initialize().await.unwrap();

        assert!(matches!(
            facade.confirm_two_factor_enrollment("123456").await,
            Err(Error::NoPendingEnrollment)
        ));

        let setup = facade.begin_two_factor_enrollment("alice@example.com").await.unwrap();
        assert_eq!(setup.recovery_codes.len(), 3);
        assert_eq!(
            facade.two_factor_state().await.unwrap(),
            TwoFactorState::PendingVerification
        );

        let wrong = if current_code(&setup) == "000000" { "111111" } else { "000000" };
        // A wrong code may still hit an adjacent step, so only assert when it cannot.
        if !totp::validate(&setup.secret, wrong, crate::time::now_unix_seconds()) {
            assert!(matches!(
                facade.confirm_two_factor_enrollment(wrong).await,
                Err(Error::InvalidTotpCode)
            ));
            assert!(!facade.settings().await.unwrap().two_factor.is_enabled());
        }

        let codes = facade
            .confirm_two_factor_enrollment(&current_code(&setup))
            .await
            .unwrap();
        assert_eq!(codes, setup.recovery_codes);
        assert_eq!(facade.two_factor_state().await.unwrap(), TwoFactorState::Enabled);

        assert!(matches!(
            facade.begin_two_factor_enrollment("alice@example.com").await,
            Err(Error::TwoFactorAlreadyEnabled)
        ));
    }

    #[tokio::test]
    async fn test_second_factor_paths() {
        let facade = facade();
        facade.initialize().await.unwrap();
        let setup = facade.begin_two_factor_enrollment("alice").await.unwrap();
        facade
            .confirm_two_factor_enrollment(&current_code(&setup))
            .await
            .unwrap();

        assert_eq!(
            facade.verify_second_factor(&current_code(&setup)).await.unwrap(),
            SecondFactor::Totp
        );

        let code = setup.recovery_codes.codes()[0].to_lowercase();
        assert_eq!(
            facade.verify_second_factor(&code).await.unwrap(),
            SecondFactor::RecoveryCode { remaining: 2 }
        );
        assert!(matches!(
            facade.verify_second_factor(&code).await,
            Err(Error::RecoveryCodeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_regenerate_and_disable_need_confirmation() {
        let facade = facade();
        facade.initialize().await.unwrap();

        assert!(matches!(
            facade.regenerate_recovery_codes(Confirmation::Confirmed).await,
            Err(Error::TwoFactorNotEnabled)
        ));

        let setup = facade.begin_two_factor_enrollment("alice").await.unwrap();
        facade
            .confirm_two_factor_enrollment(&current_code(&setup))
            .await
            .unwrap();

        assert!(matches!(
            facade.regenerate_recovery_codes(Confirmation::NotConfirmed).await,
            Err(Error::ConfirmationRequired(_))
        ));
        let fresh = facade
            .regenerate_recovery_codes(Confirmation::Confirmed)
            .await
            .unwrap();
        assert_ne!(fresh, setup.recovery_codes);
        assert!(matches!(
            facade.redeem_recovery_code(&setup.recovery_codes.codes()[0]).await,
            Err(Error::RecoveryCodeNotFound)
        ));

        assert!(matches!(
            facade.disable_two_factor(Confirmation::NotConfirmed).await,
            Err(Error::ConfirmationRequired(_))
        ));
        facade.disable_two_factor(Confirmation::Confirmed).await.unwrap();

        let settings = facade.settings().await.unwrap();
        assert!(settings.two_factor.secret().is_none());
        assert!(settings.two_factor.recovery_codes().is_none());
        assert_eq!(facade.two_factor_state().await.unwrap(), TwoFactorState::Disabled);
        assert!(matches!(
            facade.verify_totp(&current_code(&setup)).await,
            Err(Error::TwoFactorNotEnabled)
        ));
    }

    #[tokio::test]
    async fn test_restore_over_identity_needs_confirmation() {
        let facade = facade();
        facade.initialize().await.unwrap();
        let backup = facade.create_backup("pw-long-enough").await.unwrap();

        assert!(matches!(
            facade
                .restore_backup(&backup.encoded, "pw-long-enough", Confirmation::NotConfirmed)
                .await,
            Err(Error::ConfirmationRequired(_))
        ));

        let restored = facade
            .restore_backup(&backup.encoded, "pw-long-enough", Confirmation::Confirmed)
            .await
            .unwrap();
        assert_eq!(Fingerprint::of(&restored), facade.local_fingerprint().unwrap());
    }
}
