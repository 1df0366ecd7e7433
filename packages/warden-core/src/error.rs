//! # Error Handling
//!
//! This module provides the error type shared by every Warden Core module.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Configuration Errors                                              │
//! │  │   └── InvalidConfig         - Rejected configuration value          │
//! │  │                                                                      │
//! │  ├── Identity Errors                                                   │
//! │  │   ├── NoIdentity            - No identity loaded                    │
//! │  │   └── KeyDerivationFailed   - HKDF/PBKDF2 failure                   │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EncryptionFailed      - AEAD encryption failed                │
//! │  │   ├── DecryptionFailed      - Wrong password / tampered / replayed  │
//! │  │   ├── InvalidSignature      - Signed pre-key did not verify         │
//! │  │   └── InvalidKey            - Malformed key bytes                   │
//! │  │                                                                      │
//! │  ├── Session Errors                                                    │
//! │  │   ├── BundleUnavailable     - Directory has no usable bundle        │
//! │  │   ├── PreKeyExhausted       - Referenced pre-key already consumed   │
//! │  │   └── MalformedEnvelope     - Envelope could not be parsed          │
//! │  │                                                                      │
//! │  ├── Second Factor Errors                                              │
//! │  │   ├── InvalidTotpCode       - Code outside the accepted window      │
//! │  │   ├── RecoveryCodeNotFound  - Code not in the recovery set          │
//! │  │   ├── NoPendingEnrollment   - Confirm called before setup           │
//! │  │   ├── TwoFactorNotEnabled   - Operation needs enabled 2FA           │
//! │  │   └── TwoFactorAlreadyEnabled                                       │
//! │  │                                                                      │
//! │  ├── Settings Errors                                                   │
//! │  │   ├── ConfirmationRequired  - Destructive transition not confirmed  │
//! │  │   └── EncryptionDisabled    - Messaging while encryption is off     │
//! │  │                                                                      │
//! │  ├── Storage / Collaborator Errors                                     │
//! │  │   ├── StorageReadError / StorageWriteError / StorageCorrupted       │
//! │  │   ├── DirectoryError        - Directory call failed                 │
//! │  │   └── Timeout               - Collaborator call timed out           │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── Internal                                                      │
//! │      ├── SerializationError                                            │
//! │      └── DeserializationError                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `DecryptionFailed` carries no detail: a wrong backup password and a
//! corrupted backup are indistinguishable to the caller.

use thiserror::Error;

/// Result type alias for Warden Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Warden Core
///
/// Errors are grouped by the component that raises them.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (100-199)
    // ========================================================================

    /// A configuration value was rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// No identity has been loaded
    #[error("No identity loaded. Call load_or_create_identity() first.")]
    NoIdentity,

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Signature on a pre-key bundle did not verify
    #[error("Invalid signature")]
    InvalidSignature,

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Session Errors (400-499)
    // ========================================================================

    /// The directory returned no bundle (or failed) and nothing is cached
    #[error("Pre-key bundle unavailable for {0}")]
    BundleUnavailable(String),

    /// The referenced pre-key is unknown or was already consumed
    #[error("Pre-key {0} is exhausted")]
    PreKeyExhausted(u32),

    /// The envelope could not be parsed
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    // ========================================================================
    // Second Factor Errors (500-599)
    // ========================================================================

    /// TOTP code did not validate
    #[error("Invalid TOTP code")]
    InvalidTotpCode,

    /// Recovery code is not in the current set
    #[error("Recovery code not found")]
    RecoveryCodeNotFound,

    /// Enrollment confirmation without a pending setup
    #[error("No pending two-factor enrollment. Call begin_two_factor_enrollment() first.")]
    NoPendingEnrollment,

    /// Operation requires two-factor authentication to be enabled
    #[error("Two-factor authentication is not enabled")]
    TwoFactorNotEnabled,

    /// Enrollment started while two-factor authentication is already on
    #[error("Two-factor authentication is already enabled. Disable it before re-enrolling.")]
    TwoFactorAlreadyEnabled,

    // ========================================================================
    // Settings Errors (600-699)
    // ========================================================================

    /// A destructive transition was attempted without explicit confirmation
    #[error("Confirmation required to {0}")]
    ConfirmationRequired(&'static str),

    /// Messaging attempted while encryption is disabled
    #[error("Encryption is disabled for this account")]
    EncryptionDisabled,

    // ========================================================================
    // Storage & Collaborator Errors (700-799)
    // ========================================================================

    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Stored data could not be interpreted
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Directory collaborator failure
    #[error("Directory error: {0}")]
    DirectoryError(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// Error codes are organized by category:
    /// - 100-199: Configuration
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Sessions
    /// - 500-599: Second factor
    /// - 600-699: Settings
    /// - 700-799: Storage and collaborators
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Configuration (100-199)
            Error::InvalidConfig(_) => 100,

            // Identity (200-299)
            Error::NoIdentity => 200,
            Error::KeyDerivationFailed(_) => 201,

            // Crypto (300-399)
            Error::EncryptionFailed(_) => 300,
            Error::DecryptionFailed => 301,
            Error::InvalidSignature => 302,
            Error::InvalidKey(_) => 303,

            // Sessions (400-499)
            Error::BundleUnavailable(_) => 400,
            Error::PreKeyExhausted(_) => 401,
            Error::MalformedEnvelope(_) => 402,

            // Second factor (500-599)
            Error::InvalidTotpCode => 500,
            Error::RecoveryCodeNotFound => 501,
            Error::NoPendingEnrollment => 502,
            Error::TwoFactorNotEnabled => 503,
            Error::TwoFactorAlreadyEnabled => 504,

            // Settings (600-699)
            Error::ConfirmationRequired(_) => 600,
            Error::EncryptionDisabled => 601,

            // Storage & collaborators (700-799)
            Error::StorageReadError(_) => 700,
            Error::StorageWriteError(_) => 701,
            Error::StorageCorrupted(_) => 702,
            Error::DirectoryError(_) => 703,
            Error::Timeout(_) => 704,

            // Internal (900-999)
            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors may succeed if the caller retries later. The core
    /// itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::DirectoryError(_) | Error::BundleUnavailable(_)
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::InvalidTotpCode
                | Error::RecoveryCodeNotFound
                | Error::ConfirmationRequired(_)
                | Error::EncryptionDisabled
                | Error::DecryptionFailed
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Internal(format!("Blocking task failed: {}", err))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::InvalidConfig("test".into()).code(), 100);
        assert_eq!(Error::NoIdentity.code(), 200);
        assert_eq!(Error::DecryptionFailed.code(), 301);
        assert_eq!(Error::BundleUnavailable("bob".into()).code(), 400);
        assert_eq!(Error::InvalidTotpCode.code(), 500);
        assert_eq!(Error::ConfirmationRequired("disable encryption").code(), 600);
        assert_eq!(Error::Timeout("test".into()).code(), 704);
        assert_eq!(Error::Internal("test".into()).code(), 900);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Timeout("fetch".into()).is_recoverable());
        assert!(Error::BundleUnavailable("bob".into()).is_recoverable());
        assert!(!Error::DecryptionFailed.is_recoverable());
        assert!(!Error::InvalidSignature.is_recoverable());
    }

    #[test]
    fn test_decryption_failed_has_no_detail() {
        assert_eq!(Error::DecryptionFailed.to_string(), "Decryption failed");
    }

    #[test]
    fn test_user_action_errors() {
        assert!(Error::ConfirmationRequired("regenerate recovery codes").requires_user_action());
        assert!(Error::InvalidTotpCode.requires_user_action());
        assert!(!Error::Internal("x".into()).requires_user_action());
    }
}
