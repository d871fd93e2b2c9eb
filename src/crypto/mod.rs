//! # Cryptography Module
//!
//! All cryptographic primitives used by FlowSec Core.
//!
//! ## Security Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    CRYPTOGRAPHIC ARCHITECTURE                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    KEY HIERARCHY                                │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  Account secret ──Argon2id──► Wrapping key (32 bytes)          │   │
//! │  │                                      │                          │   │
//! │  │                                      ▼ AES-256-GCM              │   │
//! │  │  Identity key pair (X25519) ◄── WrappedPrivateKey               │   │
//! │  │        │                        (local cache + server backup)   │   │
//! │  │        ▼                                                        │   │
//! │  │  PublicKeyBlob ──SHA-256──► KeyFingerprint                      │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 HYBRID MESSAGE ENCRYPTION                       │   │
//! │  ├─────────────────────────────────────────────────────────────────┤   │
//! │  │                                                                 │   │
//! │  │  1. Session key: 32 random bytes, one per message              │   │
//! │  │                                                                 │   │
//! │  │  2. Payload: AES-256-GCM(session_key, random iv, plaintext)    │   │
//! │  │                                                                 │   │
//! │  │  3. Per reader (recipient, and sender when known):             │   │
//! │  │     ephemeral X25519 × reader_public → HKDF-SHA256 → KEK       │   │
//! │  │     AES-256-GCM(KEK, session_key)                              │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | X25519 | Identity keys, session key wrapping |
//! | AES-256-GCM | Payloads, wrapped keys |
//! | HKDF-SHA256 | Key-encryption keys |
//! | Argon2id | Wrapping key, password verifier |
//! | SHA-256 | Fingerprints |
//!
//! ## Security Considerations
//!
//! 1. **Key Zeroization**: All secret keys are zeroized when dropped
//! 2. **Secure Random**: `rand::rngs::OsRng`, with failures surfaced as errors
//! 3. **No Key Reuse**: Fresh nonce and session key for every message

mod encryption;
mod kdf;
mod keys;

pub use encryption::{decrypt, encrypt, fill_random, Nonce, SymmetricKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use kdf::{
    derive_key_encryption_key, derive_wrapping_key, derive_wrapping_key_async, domain,
    DerivationParams, KdfAlgorithm, PasswordVerifier, MIN_SALT_SIZE, SALT_SIZE,
};
pub(crate) use kdf::run_blocking;
pub use keys::{
    fingerprint, import_public, verify_fingerprint, IdentityKeyPair, IdentityPublicKey,
    KeyFingerprint, PublicKeyBlob, DEFAULT_FINGERPRINT_HEX_LEN, X25519_KEY_SIZE,
};

/// Serde helper for binary fields stored as standard base64
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BASE64.decode(&s).map_err(serde::de::Error::custom)
    }
}
