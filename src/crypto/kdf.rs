//! # Key Derivation Functions
//!
//! Password-based derivation for the private-key wrapping key and the
//! password verifier, plus HKDF for per-reader session key wrapping.
//!
//! ## Key Derivation Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    KEY DERIVATION HIERARCHY                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                      ACCOUNT SECRET (password)                         │
//! │                                │                                        │
//! │              ┌─────────────────┴─────────────────┐                     │
//! │              ▼                                   ▼                     │
//! │  ┌───────────────────────────┐   ┌───────────────────────────┐       │
//! │  │     WRAPPING KEY          │   │    PASSWORD VERIFIER      │       │
//! │  │                           │   │                           │       │
//! │  │  Argon2id(                │   │  Argon2id PHC string(     │       │
//! │  │    "flowsec-wrapping-     │   │    "flowsec-password-     │       │
//! │  │     key-v1" ‖ secret,     │   │     verifier-v1" ‖ secret,│       │
//! │  │    salt = 16 random bytes │   │    salt = own 16 bytes    │       │
//! │  │  )                        │   │  )                        │       │
//! │  │                           │   │                           │       │
//! │  │  → 32-byte AES key        │   │  → "$argon2id$v=19$..."   │       │
//! │  │    (never stored)         │   │    (stored on profile)    │       │
//! │  └───────────────────────────┘   └───────────────────────────┘       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Session Key Wrapping
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ephemeral_secret × reader_public = shared (X25519)                     │
//! │                                                                         │
//! │  HKDF-SHA256(                                                          │
//! │    ikm  = shared,                                                      │
//! │    salt = ephemeral_public ‖ reader_public,                            │
//! │    info = "flowsec-session-wrap-v1"                                    │
//! │  )                                                                      │
//! │  → 32-byte key-encryption key                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Considerations
//!
//! | Aspect | Design Choice |
//! |--------|---------------|
//! | Password KDF | Argon2id v0x13, parameters stored with the record |
//! | Key Separation | Different domain tags for wrapping key and verifier |
//! | Cost | Runs on the blocking pool via `spawn_blocking` |
//! | Version String | "-v1" suffix on every domain tag |

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::encryption::{fill_random, SymmetricKey, KEY_SIZE};
use crate::config::KdfConfig;
use crate::error::{Error, Result};

/// Domain separation strings
///
/// These keep keys derived for different purposes independent even when
/// they come from the same secret.
pub mod domain {
    /// Domain for the private-key wrapping key
    pub const WRAPPING_KEY: &[u8] = b"flowsec-wrapping-key-v1";

    /// Domain for the stored password verifier
    pub const PASSWORD_VERIFIER: &[u8] = b"flowsec-password-verifier-v1";

    /// Domain for per-reader session key wrapping
    pub const SESSION_WRAP: &[u8] = b"flowsec-session-wrap-v1";
}

/// Size of freshly generated salts
pub const SALT_SIZE: usize = 16;

/// Smallest salt accepted from a stored record
pub const MIN_SALT_SIZE: usize = 8;

const MAX_PARALLELISM: u32 = 16;
const MAX_ITERATIONS: u32 = 64;
const MAX_MEMORY_KIB: u32 = 4 * 1024 * 1024;

/// Password-based KDF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfAlgorithm {
    /// Argon2id, version 0x13
    Argon2id,
}

/// Salt and cost parameters stored alongside a wrapped key
///
/// Self-describing: unwrapping needs nothing beyond this record and the
/// secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationParams {
    /// KDF algorithm
    pub algorithm: KdfAlgorithm,
    /// Random salt
    #[serde(with = "super::base64_bytes", default)]
    pub salt: Vec<u8>,
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Lanes
    pub parallelism: u32,
}

impl DerivationParams {
    /// New parameters with a fresh random salt
    pub fn generate(config: &KdfConfig) -> Result<Self> {
        let mut salt = vec![0u8; SALT_SIZE];
        fill_random(&mut salt)?;

        let params = Self {
            algorithm: KdfAlgorithm::Argon2id,
            salt,
            memory_kib: config.memory_kib,
            iterations: config.iterations,
            parallelism: config.parallelism,
        };
        params.validate()?;
        Ok(params)
    }

    /// Check the parameters are usable
    ///
    /// Returns [`Error::InvalidDerivationParams`], which is a configuration
    /// error and never an authentication failure.
    pub fn validate(&self) -> Result<()> {
        if self.salt.len() < MIN_SALT_SIZE {
            return Err(Error::InvalidDerivationParams(format!(
                "salt must be at least {} bytes, got {}",
                MIN_SALT_SIZE,
                self.salt.len()
            )));
        }
        check_cost(self.memory_kib, self.iterations, self.parallelism)
    }

    fn argon2(&self) -> Result<Argon2<'static>> {
        self.validate()?;
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| Error::InvalidDerivationParams(e.to_string()))?;

        Ok(match self.algorithm {
            KdfAlgorithm::Argon2id => Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

fn check_cost(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<()> {
    if !(1..=MAX_PARALLELISM).contains(&parallelism) {
        return Err(Error::InvalidDerivationParams(format!(
            "parallelism {} out of range",
            parallelism
        )));
    }
    if !(1..=MAX_ITERATIONS).contains(&iterations) {
        return Err(Error::InvalidDerivationParams(format!(
            "iterations {} out of range",
            iterations
        )));
    }
    if memory_kib < 8 * parallelism || memory_kib > MAX_MEMORY_KIB {
        return Err(Error::InvalidDerivationParams(format!(
            "memory cost {} KiB out of range",
            memory_kib
        )));
    }
    Ok(())
}

fn domain_input(domain: &[u8], secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut input = Zeroizing::new(Vec::with_capacity(domain.len() + secret.len()));
    input.extend_from_slice(domain);
    input.extend_from_slice(secret);
    input
}

/// Derive the private-key wrapping key from a secret
///
/// Deterministic for the same `(secret, params)`; the salt lives in
/// `params`. Expensive by design, so interactive callers should use
/// [`derive_wrapping_key_async`].
pub fn derive_wrapping_key(secret: &[u8], params: &DerivationParams) -> Result<SymmetricKey> {
    let argon2 = params.argon2()?;
    let input = domain_input(domain::WRAPPING_KEY, secret);

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(&input, &params.salt, &mut output[..])
        .map_err(|e| Error::InvalidDerivationParams(e.to_string()))?;

    Ok(SymmetricKey::from_bytes(*output))
}

/// [`derive_wrapping_key`] on the blocking thread pool
///
/// Dropping the returned future abandons the result; the key is zeroized
/// when the task finishes, and nothing is written to shared state.
pub async fn derive_wrapping_key_async(
    secret: &[u8],
    params: &DerivationParams,
) -> Result<SymmetricKey> {
    let secret = Zeroizing::new(secret.to_vec());
    let params = params.clone();
    run_blocking(move || derive_wrapping_key(&secret, &params)).await
}

/// Run a CPU-heavy closure on tokio's blocking pool
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        if e.is_cancelled() {
            Error::Cancelled
        } else {
            Error::Internal(format!("key derivation task failed: {}", e))
        }
    })?
}

/// One-way password check stored on the profile
///
/// An Argon2id PHC string computed over a different domain and salt than
/// the wrapping key, so neither reveals the other.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordVerifier(String);

impl PasswordVerifier {
    /// Hash a secret for later verification
    pub fn hash_for_verification(secret: &[u8], config: &KdfConfig) -> Result<Self> {
        check_cost(config.memory_kib, config.iterations, config.parallelism)?;

        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;
        let salt = SaltString::encode_b64(&salt)
            .map_err(|e| Error::InvalidDerivationParams(e.to_string()))?;

        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| Error::InvalidDerivationParams(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let input = domain_input(domain::PASSWORD_VERIFIER, secret);
        let hash = argon2
            .hash_password(&input, &salt)
            .map_err(|e| Error::InvalidDerivationParams(e.to_string()))?;

        Ok(Self(hash.to_string()))
    }

    /// Wrap a stored PHC string
    pub fn from_phc(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    /// Get the PHC string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check a secret against this verifier
    ///
    /// A mismatch is `Ok(false)`, not an error. An unparsable stored string,
    /// or one naming costs outside the wrapped-key bounds, is
    /// [`Error::InvalidDerivationParams`] and no hashing is attempted.
    pub fn verify(&self, secret: &[u8]) -> Result<bool> {
        let parsed = PasswordHash::new(&self.0)
            .map_err(|e| Error::InvalidDerivationParams(format!("bad verifier: {}", e)))?;
        let stored = Params::try_from(&parsed)
            .map_err(|e| Error::InvalidDerivationParams(format!("bad verifier: {}", e)))?;
        check_cost(stored.m_cost(), stored.t_cost(), stored.p_cost())?;

        let input = domain_input(domain::PASSWORD_VERIFIER, secret);
        match Argon2::default().verify_password(&input, &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::InvalidDerivationParams(format!("bad verifier: {}", e))),
        }
    }
}

impl std::fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordVerifier(..)")
    }
}

/// Derive the key-encryption key for one reader's session key wrap
///
/// Both public keys go into the salt so a wrap cannot be replayed against
/// another reader.
pub fn derive_key_encryption_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    reader_public: &[u8; 32],
) -> Result<SymmetricKey> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_public);
    salt[32..].copy_from_slice(reader_public);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(domain::SESSION_WRAP, &mut key[..])
        .map_err(|_| Error::Internal("Failed to derive key-encryption key".into()))?;

    Ok(SymmetricKey::from_bytes(*key))
}

// ============================================================================
// TESTS
// ============================================================================
