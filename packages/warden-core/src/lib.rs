//! # Warden Core
//!
//! The security core of a messaging client: password-wrapped identity
//! backups, key fingerprints, per-correspondent encrypted sessions and a
//! TOTP second factor with recovery codes.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         WARDEN CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                    ┌───────────────────────────────┐                    │
//! │                    │        SecurityFacade         │                    │
//! │                    │  encryption · 2FA · backups   │                    │
//! │                    └───────┬───────────┬───────────┘                    │
//! │                            │           │                                │
//! │         ┌──────────────────┘           └──────────────┐                 │
//! │         ▼                                             ▼                 │
//! │  ┌─────────────────┐  ┌─────────────┐  ┌─────────────────────────────┐  │
//! │  │ SessionManager  │  │    TOTP     │  │      SettingsStore          │  │
//! │  │                 │  │             │  │   (host collaborator)       │  │
//! │  │ - Identity      │  │ - Secret    │  └─────────────────────────────┘  │
//! │  │ - Pre-keys      │  │ - Codes     │                                   │
//! │  │ - X3DH + chain  │  │ - Recovery  │  ┌─────────────────────────────┐  │
//! │  │ - Backups ──────┼──┼─────────────┼─►│         Directory           │  │
//! │  └────────┬────────┘  └─────────────┘  │   (host collaborator)       │  │
//! │           │                            └─────────────────────────────┘  │
//! │           ▼                                                             │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐                      │
//! │  │   Crypto    │  │   Backup    │  │ SecureStore │                      │
//! │  │ - Ed25519   │  │ - PBKDF2    │  │ - Identity  │                      │
//! │  │ - X25519    │  │ - AES-GCM   │  │ - Pre-keys  │                      │
//! │  │ - AES-GCM   │  │             │  │ - Sessions  │                      │
//! │  └─────────────┘  └─────────────┘  └─────────────┘                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Tunables, with `WARDEN_*` environment overrides
//! - [`crypto`] - Keys, AES-GCM, signatures, KDFs, fingerprints
//! - [`backup`] - Password-wrapped key backups
//! - [`totp`] - Time-based one-time passwords and recovery codes
//! - [`session`] - Pre-key bundles, key agreement and session management
//! - [`directory`] - Bundle directory collaborator
//! - [`storage`] - Secure key store and settings-store collaborator
//! - [`settings`] - Settings record and the [`SecurityFacade`]
//!
//! ## Getting Started
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_core::{
//!     InMemoryDirectory, InMemorySettingsStore, SecureStore, SecurityConfig, SecurityFacade,
//! };
//!
//! let facade = SecurityFacade::new(
//!     "alice",
//!     SecurityConfig::from_env()?,
//!     Arc::new(SecureStore::new()),
//!     Arc::new(InMemoryDirectory::new()),
//!     Arc::new(InMemorySettingsStore::new()),
//! )?;
//! facade.initialize().await?;
//! facade.enable_encryption().await?;
//! let envelope = facade.encrypt_message("bob", b"hello").await?;
//! ```
//!
//! There is no global instance: construct a facade per signed-in user and
//! share it by `Arc`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod backup;
pub mod config;
pub mod crypto;
pub mod directory;
mod encoding;
pub mod error;
pub mod session;
pub mod settings;
pub mod storage;
/// Wall-clock helpers.
pub mod time;
pub mod totp;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use backup::{BackupCipher, EncryptedBackup};
pub use config::SecurityConfig;
pub use crypto::{fingerprint, Fingerprint, IdentityKeyPair, PublicIdentityKey};
pub use directory::{Directory, DirectoryEvent, InMemoryDirectory};
pub use error::{Error, Result};
pub use session::{Envelope, IdentityBackup, PreKeyBundle, SessionManager};
pub use settings::{Confirmation, SecondFactor, SecurityFacade, SecuritySettings, TwoFactorSettings, TwoFactorState};
pub use storage::{InMemorySettingsStore, SecureStore, SettingsStore};
pub use totp::{RecoveryCodeSet, TotpEngine, TotpSecret, TotpSetup};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Warden Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        #[cfg(target_os = "ios")]
        target: "ios",
        #[cfg(target_os = "android")]
        target: "android",
        #[cfg(target_os = "macos")]
        target: "macos",
        #[cfg(target_os = "linux")]
        target: "linux",
        #[cfg(target_os = "windows")]
        target: "windows",
        #[cfg(not(any(
            target_os = "ios",
            target_os = "android",
            target_os = "macos",
            target_os = "linux",
            target_os = "windows"
        )))]
        target: "unknown",
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert!(info.profile == "debug" || info.profile == "release");
    }
}
