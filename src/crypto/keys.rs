//! # Key Management
//!
//! Generation, import/export and fingerprinting of the long-lived X25519
//! identity key pair.
//!
//! ## Key Types
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          KEY TYPES                                      │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  IdentityKeyPair (X25519)                                              │
//! │  • Private key: 32 bytes, zeroized on drop, never persisted in clear   │
//! │  • Public key: 32 bytes, published on the profile                      │
//! │                                                                         │
//! │  PublicKeyBlob                                                         │
//! │  • Canonical base64 of the 32 public bytes                             │
//! │  • Exactly what is stored on the profile and what gets fingerprinted   │
//! │                                                                         │
//! │  KeyFingerprint                                                        │
//! │  • hex(SHA-256(blob))[..16] by default                                 │
//! │  • For out-of-band comparison only, never for lookup                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Changing the blob encoding changes every fingerprint users have already
//! compared, so the encoding is fixed.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroizing, ZeroizeOnDrop};

use super::encryption::fill_random;
use crate::error::{Error, Result};

/// Size of an X25519 key in bytes
pub const X25519_KEY_SIZE: usize = 32;

/// Default fingerprint length in hex characters
pub const DEFAULT_FINGERPRINT_HEX_LEN: usize = 16;

/// Shortest fingerprint we are willing to compute or compare
pub const MIN_FINGERPRINT_HEX_LEN: usize = 8;

/// Longest fingerprint (full SHA-256)
pub const MAX_FINGERPRINT_HEX_LEN: usize = 64;

/// The user's identity key pair
///
/// ## Security
///
/// - The private key is zeroized when this struct is dropped
/// - There is no `Clone`; a session holds exactly one handle
/// - `Debug` prints only the public half
#[derive(ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    /// Private key (secret)
    #[zeroize(skip)] // x25519_dalek handles its own zeroization
    secret: StaticSecret,
    /// Public key (derived from secret)
    #[zeroize(skip)]
    public: X25519PublicKey,
}

impl IdentityKeyPair {
    /// Generate a new random key pair
    ///
    /// Fails with [`Error::EntropyUnavailable`] if the OS RNG fails.
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new([0u8; X25519_KEY_SIZE]);
        fill_random(&mut bytes[..])?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    /// Rebuild a key pair from its private key bytes
    pub fn from_secret_bytes(bytes: &[u8; X25519_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(*bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Get the private key bytes (for wrapping only)
    ///
    /// ## Security Warning
    ///
    /// Never log or transmit these bytes unencrypted.
    pub(crate) fn secret_bytes(&self) -> Zeroizing<[u8; X25519_KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Get the public half
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.public.to_bytes())
    }

    /// Export the public half in its storage encoding
    pub fn export_public(&self) -> PublicKeyBlob {
        self.public_key().export()
    }

    /// Fingerprint of the exported public key
    pub fn fingerprint(&self) -> KeyFingerprint {
        fingerprint(&self.export_public(), DEFAULT_FINGERPRINT_HEX_LEN)
    }

    /// X25519 agreement with a peer public key
    pub(crate) fn diffie_hellman(&self, their_public: &IdentityPublicKey) -> x25519_dalek::SharedSecret {
        self.secret
            .diffie_hellman(&X25519PublicKey::from(their_public.0))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &self.export_public().as_str())
            .finish_non_exhaustive()
    }
}

/// An imported X25519 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey([u8; X25519_KEY_SIZE]);

impl IdentityPublicKey {
    /// Build from raw bytes, rejecting the all-zero point
    pub fn from_bytes(bytes: [u8; X25519_KEY_SIZE]) -> Result<Self> {
        if bytes.iter().all(|b| *b == 0) {
            return Err(Error::MalformedKey("public key is the zero point".into()));
        }
        Ok(Self(bytes))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; X25519_KEY_SIZE] {
        &self.0
    }

    /// Serialize to the storage encoding
    pub fn export(&self) -> PublicKeyBlob {
        PublicKeyBlob(BASE64.encode(self.0))
    }
}

/// Exported public key as stored on the profile
///
/// Deterministic and canonical: `import_public(export_public(k))` yields
/// `k`, and re-exporting yields the identical string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKeyBlob(String);

impl PublicKeyBlob {
    /// Wrap a string received from storage (not validated until imported)
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Get the encoded string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse into a public key
    pub fn import(&self) -> Result<IdentityPublicKey> {
        import_public(self)
    }
}

impl std::fmt::Display for PublicKeyBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse an exported public key
///
/// Never partially succeeds: invalid base64, a wrong length, a
/// non-canonical encoding or the zero point are all
/// [`Error::MalformedKey`].
pub fn import_public(blob: &PublicKeyBlob) -> Result<IdentityPublicKey> {
    let bytes = BASE64
        .decode(blob.as_str())
        .map_err(|e| Error::MalformedKey(format!("invalid base64: {}", e)))?;

    let raw: [u8; X25519_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        Error::MalformedKey(format!(
            "expected {} bytes, got {}",
            X25519_KEY_SIZE,
            bytes.len()
        ))
    })?;

    if BASE64.encode(raw) != blob.as_str() {
        return Err(Error::MalformedKey("non-canonical encoding".into()));
    }

    IdentityPublicKey::from_bytes(raw)
}

/// Short hex digest of an exported public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// Get the hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group into blocks of four for reading aloud
    ///
    /// `"3f9ab2c41d07e655"` → `"3f9a b2c4 1d07 e655"`
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of an exported public key
///
/// `hex(SHA-256(blob_utf8))` truncated to `hex_len` characters (clamped to
/// 8..=64).
pub fn fingerprint(blob: &PublicKeyBlob, hex_len: usize) -> KeyFingerprint {
    let len = hex_len.clamp(MIN_FINGERPRINT_HEX_LEN, MAX_FINGERPRINT_HEX_LEN);
    let digest = Sha256::digest(blob.as_str().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    KeyFingerprint(hex)
}

/// Check a displayed fingerprint against a public key in constant time
///
/// The expected length decides the truncation, so both short and full
/// fingerprints can be checked.
pub fn verify_fingerprint(blob: &PublicKeyBlob, expected: &str) -> bool {
    let expected = expected.trim().to_ascii_lowercase().replace(' ', "");
    if !(MIN_FINGERPRINT_HEX_LEN..=MAX_FINGERPRINT_HEX_LEN).contains(&expected.len()) {
        return false;
    }
    let actual = fingerprint(blob, expected.len());
    actual.0.as_bytes().ct_eq(expected.as_bytes()).into()
}

// ============================================================================
// TESTS
// ============================================================================
