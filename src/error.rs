//! # Error Handling
//!
//! This module provides the error types for FlowSec Core.
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
//! │  ├── Identity Errors                                                   │
//! │  │   ├── NoIdentity            - No key pair available for the user    │
//! │  │   ├── IdentityExists        - Identity already provisioned          │
//! │  │   ├── NotAuthenticated      - No current principal                  │
//! │  │   ├── PasswordRejected      - Verifier says the secret is wrong     │
//! │  │   └── WrongSecretOrCorrupt  - Wrapped key could not be opened       │
//! │  │                                                                      │
//! │  ├── Crypto Errors                                                     │
//! │  │   ├── EntropyUnavailable    - Platform RNG failed                   │
//! │  │   ├── MalformedKey          - Structurally invalid key              │
//! │  │   ├── MalformedEnvelope     - Structurally invalid envelope         │
//! │  │   ├── DecryptionFailed      - Envelope failed authentication        │
//! │  │   ├── NoSenderKeyAvailable  - Envelope predates dual wrapping       │
//! │  │   ├── UnsupportedLocalFormat- Route to the legacy service           │
//! │  │   ├── InvalidDerivationParams - Bad salt / cost parameters          │
//! │  │   └── EncryptionFailed      - AEAD encryption failed                │
//! │  │                                                                      │
//! │  ├── Storage Errors                                                    │
//! │  │   ├── BackupWriteFailed     - Server copy not updated               │
//! │  │   ├── StorageReadError      - Collaborator read failed              │
//! │  │   └── StorageWriteError     - Collaborator write failed             │
//! │  │                                                                      │
//! │  └── Internal Errors                                                   │
//! │      ├── LegacyDecryptionFailed                                        │
//! │      ├── Cancelled                                                     │
//! │      ├── SerializationError / DeserializationError                     │
//! │      └── Internal                                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Messages never carry key material, secrets or plaintext.

use thiserror::Error;

/// Result type alias for FlowSec Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for FlowSec Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Identity Errors (200-299)
    // ========================================================================

    /// No identity key pair is available (neither cached nor backed up)
    #[error("No identity available. Set up or regenerate encryption keys first.")]
    NoIdentity,

    /// An identity already exists for this user
    #[error("An identity already exists. Regenerate it instead of creating a new one.")]
    IdentityExists,

    /// There is no authenticated principal
    #[error("Not authenticated.")]
    NotAuthenticated,

    /// The password verifier rejected the secret; no decrypt was attempted
    #[error("Wrong password.")]
    PasswordRejected,

    /// The wrapped private key could not be opened with the given secret
    #[error("Wrong secret or corrupted key material.")]
    WrongSecretOrCorrupt,

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================

    /// The platform could not supply randomness
    #[error("Secure randomness is unavailable on this platform.")]
    EntropyUnavailable,

    /// Key bytes or encoding are structurally invalid
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    /// Envelope fields are missing or structurally invalid
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The envelope failed to authenticate or unwrap
    #[error("Decryption failed.")]
    DecryptionFailed,

    /// The envelope carries no key wrapped for its sender
    #[error("This message was sent before dual encryption and is not recoverable by you.")]
    NoSenderKeyAvailable,

    /// The envelope uses the pre-hybrid format and must be opened remotely
    #[error("Envelope uses the legacy format; use the legacy decryption service.")]
    UnsupportedLocalFormat,

    /// Key derivation parameters are invalid (configuration error)
    #[error("Invalid key derivation parameters: {0}")]
    InvalidDerivationParams(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// The server-side backup could not be written
    #[error("Key backup failed: {0}")]
    BackupWriteFailed(String),

    /// Failed to read from a store
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to a store
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// The legacy decryption service failed
    #[error("Legacy decryption failed: {0}")]
    LegacyDecryptionFailed(String),

    /// A background derivation was cancelled before it completed
    #[error("Operation cancelled")]
    Cancelled,

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
    /// - 200-299: Identity
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            // Identity (200-299)
            Error::NoIdentity => 200,
            Error::IdentityExists => 201,
            Error::NotAuthenticated => 202,
            Error::PasswordRejected => 203,
            Error::WrongSecretOrCorrupt => 204,

            // Crypto (300-399)
            Error::EntropyUnavailable => 300,
            Error::MalformedKey(_) => 301,
            Error::MalformedEnvelope(_) => 302,
            Error::DecryptionFailed => 303,
            Error::NoSenderKeyAvailable => 304,
            Error::UnsupportedLocalFormat => 305,
            Error::InvalidDerivationParams(_) => 306,
            Error::EncryptionFailed(_) => 307,

            // Storage (400-499)
            Error::BackupWriteFailed(_) => 400,
            Error::StorageReadError(_) => 401,
            Error::StorageWriteError(_) => 402,

            // Internal (900-999)
            Error::LegacyDecryptionFailed(_) => 900,
            Error::Cancelled => 901,
            Error::Internal(_) => 902,
            Error::SerializationError(_) => 903,
            Error::DeserializationError(_) => 904,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying or by user action;
    /// everything else is permanent for the given inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::WrongSecretOrCorrupt
                | Error::PasswordRejected
                | Error::BackupWriteFailed(_)
                | Error::StorageReadError(_)
                | Error::StorageWriteError(_)
                | Error::Cancelled
        )
    }

    /// Check if this error requires user action
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::NoIdentity
                | Error::NotAuthenticated
                | Error::PasswordRejected
                | Error::WrongSecretOrCorrupt
        )
    }

    /// Check if this is a routing signal rather than a failure
    pub fn is_routing_signal(&self) -> bool {
        matches!(self, Error::UnsupportedLocalFormat)
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

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageReadError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(err.to_string())
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
        assert_eq!(Error::NoIdentity.code(), 200);
        assert_eq!(Error::WrongSecretOrCorrupt.code(), 204);
        assert_eq!(Error::EntropyUnavailable.code(), 300);
        assert_eq!(Error::DecryptionFailed.code(), 303);
        assert_eq!(Error::BackupWriteFailed("test".into()).code(), 400);
        assert_eq!(Error::Internal("test".into()).code(), 902);
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::WrongSecretOrCorrupt.is_recoverable());
        assert!(Error::BackupWriteFailed("offline".into()).is_recoverable());
        assert!(!Error::EntropyUnavailable.is_recoverable());
        assert!(!Error::DecryptionFailed.is_recoverable());
        assert!(!Error::NoSenderKeyAvailable.is_recoverable());
        assert!(!Error::MalformedKey("x".into()).is_recoverable());
    }

    #[test]
    fn test_routing_signal() {
        assert!(Error::UnsupportedLocalFormat.is_routing_signal());
        assert!(!Error::DecryptionFailed.is_routing_signal());
    }

    #[test]
    fn test_messages_are_generic() {
        // Same wording for wrong secret and tampering
        assert_eq!(
            Error::WrongSecretOrCorrupt.to_string(),
            "Wrong secret or corrupted key material."
        );
    }
}
