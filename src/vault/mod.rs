//! # Key Vault
//!
//! Password-wrapped storage of the identity private key, on the device and
//! as a server-side backup on the profile record.
//!
//! ## Wrapped Key Format
//!
//! ```text
//! {
//!   "version": 1,
//!   "ciphertext": "<b64 AES-256-GCM(private_key) ‖ tag>",
//!   "iv": "<b64 12 bytes>",
//!   "params": {
//!     "algorithm": "argon2id",
//!     "salt": "<b64 16 bytes>",
//!     "memory_kib": 65536, "iterations": 3, "parallelism": 1
//!   }
//! }
//! ```
//!
//! The local and backup copies hold the same private key, wrapped
//! independently (different salts, possibly different costs).
//!
//! ## Unlock Policy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         UNLOCK FLOW                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Neither     → NoIdentity                                              │
//! │                                                                         │
//! │  LocalOnly   → unwrap(local)                                           │
//! │                failure is returned; the entry is kept (only copy)      │
//! │                                                                         │
//! │  BackupOnly  → recover:                                                │
//! │                  verifier recorded? verify first → PasswordRejected    │
//! │                  unwrap(backup)                                        │
//! │                  re-wrap with a fresh salt → local cache               │
//! │                                                                         │
//! │  Both        → unwrap(local)                                           │
//! │                  any failure → recover from backup                     │
//! │                    success: evict local, store fresh wrap              │
//! │                    failure: return backup error, keep local            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every Argon2 call runs on the blocking pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::config::{KdfConfig, VaultConfig};
use crate::crypto::{
    base64_bytes, decrypt, derive_wrapping_key, encrypt, fingerprint, run_blocking,
    DerivationParams, IdentityKeyPair, Nonce, PasswordVerifier, X25519_KEY_SIZE,
};
use crate::error::{Error, Result};
use crate::storage::{IdentityStore, LocalKeyCache, ProfileRecord};
use crate::time::now_timestamp;

/// Current wrapped key format version
pub const WRAPPED_KEY_VERSION: u8 = 1;

/// AAD for private-key wrapping
const WRAPPED_KEY_AAD: &[u8] = b"flowsec-wrapped-key-v1";

/// A private key encrypted under a password-derived key
///
/// Self-describing: the salt and cost needed to re-derive the wrapping key
/// travel with the ciphertext.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedPrivateKey {
    /// Format version
    pub version: u8,
    /// AES-256-GCM ciphertext with tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    /// Wrapping key derivation parameters
    pub params: DerivationParams,
}

impl WrappedPrivateKey {
    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

impl std::fmt::Debug for WrappedPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedPrivateKey")
            .field("version", &self.version)
            .field("algorithm", &self.params.algorithm)
            .finish_non_exhaustive()
    }
}

/// Wrap a private key under a secret, with a fresh random salt
pub fn wrap(keypair: &IdentityKeyPair, secret: &[u8], kdf: &KdfConfig) -> Result<WrappedPrivateKey> {
    let params = DerivationParams::generate(kdf)?;
    let wrapping_key = derive_wrapping_key(secret, &params)?;

    let (nonce, ciphertext) = encrypt(&wrapping_key, &keypair.secret_bytes()[..], WRAPPED_KEY_AAD)?;

    Ok(WrappedPrivateKey {
        version: WRAPPED_KEY_VERSION,
        ciphertext,
        iv: nonce.as_bytes().to_vec(),
        params,
    })
}

/// Recover a private key
///
/// A wrong secret and a tampered record are indistinguishable: both are
/// [`Error::WrongSecretOrCorrupt`]. Unusable derivation parameters are
/// [`Error::InvalidDerivationParams`].
pub fn unwrap(wrapped: &WrappedPrivateKey, secret: &[u8]) -> Result<IdentityKeyPair> {
    if wrapped.version != WRAPPED_KEY_VERSION {
        return Err(Error::WrongSecretOrCorrupt);
    }
    let nonce = Nonce::from_slice(&wrapped.iv).ok_or(Error::WrongSecretOrCorrupt)?;
    let wrapping_key = derive_wrapping_key(secret, &wrapped.params)?;

    let plaintext = Zeroizing::new(
        decrypt(&wrapping_key, &nonce, &wrapped.ciphertext, WRAPPED_KEY_AAD)
            .map_err(|_| Error::WrongSecretOrCorrupt)?,
    );

    let bytes: Zeroizing<[u8; X25519_KEY_SIZE]> = Zeroizing::new(
        plaintext
            .as_slice()
            .try_into()
            .map_err(|_| Error::WrongSecretOrCorrupt)?,
    );

    Ok(IdentityKeyPair::from_secret_bytes(&bytes))
}

/// [`wrap`] on the blocking pool
pub async fn wrap_async(
    keypair: &IdentityKeyPair,
    secret: &[u8],
    kdf: &KdfConfig,
) -> Result<WrappedPrivateKey> {
    let key_bytes = keypair.secret_bytes();
    let secret = Zeroizing::new(secret.to_vec());
    let kdf = *kdf;
    run_blocking(move || wrap(&IdentityKeyPair::from_secret_bytes(&key_bytes), &secret, &kdf)).await
}

/// [`unwrap`] on the blocking pool
pub async fn unwrap_async(wrapped: &WrappedPrivateKey, secret: &[u8]) -> Result<IdentityKeyPair> {
    let wrapped = wrapped.clone();
    let secret = Zeroizing::new(secret.to_vec());
    run_blocking(move || unwrap(&wrapped, &secret)).await
}

/// Which copies of the wrapped key exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultState {
    /// Only the device cache holds a copy
    LocalOnly,
    /// Only the server backup holds a copy
    BackupOnly,
    /// Both copies exist
    Both,
    /// No copy anywhere
    Neither,
}

impl std::fmt::Display for VaultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultState::LocalOnly => f.write_str("local-only"),
            VaultState::BackupOnly => f.write_str("backup-only"),
            VaultState::Both => f.write_str("both"),
            VaultState::Neither => f.write_str("neither"),
        }
    }
}

/// What was found for a user, with the records themselves
enum VaultContents {
    LocalOnly(WrappedPrivateKey),
    BackupOnly(String),
    Both(WrappedPrivateKey, String),
    Neither,
}

impl VaultContents {
    fn new(local: Option<WrappedPrivateKey>, backup: Option<String>) -> Self {
        match (local, backup) {
            (Some(local), Some(backup)) => VaultContents::Both(local, backup),
            (Some(local), None) => VaultContents::LocalOnly(local),
            (None, Some(backup)) => VaultContents::BackupOnly(backup),
            (None, None) => VaultContents::Neither,
        }
    }

    fn state(&self) -> VaultState {
        match self {
            VaultContents::LocalOnly(_) => VaultState::LocalOnly,
            VaultContents::BackupOnly(_) => VaultState::BackupOnly,
            VaultContents::Both(..) => VaultState::Both,
            VaultContents::Neither => VaultState::Neither,
        }
    }
}

/// Local cache plus server backup of the wrapped identity key
pub struct KeyVault {
    cache: Arc<dyn LocalKeyCache>,
    store: Arc<dyn IdentityStore>,
    config: VaultConfig,
}

impl KeyVault {
    /// Create a vault over a local cache and an identity store
    pub fn new(cache: Arc<dyn LocalKeyCache>, store: Arc<dyn IdentityStore>, config: VaultConfig) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    /// Vault configuration
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// The identity store backing the server copy
    pub fn identity_store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    // ========================================================================
    // LOCAL CACHE
    // ========================================================================

    /// Write the device copy
    pub fn store_local(&self, user_id: &str, wrapped: &WrappedPrivateKey) -> Result<()> {
        self.cache.put(&self.config.cache_key(user_id), &wrapped.to_json()?)
    }

    /// Read the device copy
    ///
    /// A miss is `Ok(None)`. An unreadable primary entry is evicted and
    /// reported as a miss. On a primary miss, legacy entries are consulted
    /// and the first readable one is moved under the primary key.
    pub fn load_local(&self, user_id: &str) -> Result<Option<WrappedPrivateKey>> {
        let primary = self.config.cache_key(user_id);

        if let Some(raw) = self.cache.get(&primary)? {
            match WrappedPrivateKey::from_json(&raw) {
                Ok(wrapped) => return Ok(Some(wrapped)),
                Err(_) => {
                    tracing::warn!("Evicting unreadable local key entry for {}", user_id);
                    self.cache.remove(&primary)?;
                }
            }
        }

        for legacy in self.config.legacy_cache_keys(user_id) {
            let Some(raw) = self.cache.get(&legacy)? else {
                continue;
            };
            match WrappedPrivateKey::from_json(&raw) {
                Ok(wrapped) => {
                    self.cache.put(&primary, &raw)?;
                    self.cache.remove(&legacy)?;
                    tracing::info!("Migrated legacy local key entry for {}", user_id);
                    return Ok(Some(wrapped));
                }
                Err(_) => {
                    tracing::debug!("Ignoring unreadable legacy key entry for {}", user_id);
                }
            }
        }

        Ok(None)
    }

    /// Remove the primary device copy
    pub fn remove_local(&self, user_id: &str) -> Result<bool> {
        self.cache.remove(&self.config.cache_key(user_id))
    }

    /// Remove the device copy under every namespace
    pub fn purge_local(&self, user_id: &str) -> Result<()> {
        self.remove_local(user_id)?;
        self.remove_legacy(user_id)
    }

    fn remove_legacy(&self, user_id: &str) -> Result<()> {
        for legacy in self.config.legacy_cache_keys(user_id) {
            self.cache.remove(&legacy)?;
        }
        Ok(())
    }

    // ========================================================================
    // SERVER BACKUP
    // ========================================================================

    /// Write only the backup blob on the profile
    pub async fn store_backup(&self, user_id: &str, wrapped: &WrappedPrivateKey) -> Result<()> {
        let mut profile = self.profile_or_empty(user_id).await?;
        profile.encrypted_private_key = Some(wrapped.to_json()?);
        profile.updated_at = Some(now_timestamp());
        self.save_profile(&profile).await
    }

    /// Read the backup blob from the profile
    ///
    /// An unreadable blob is [`Error::WrongSecretOrCorrupt`].
    pub async fn load_backup(&self, user_id: &str) -> Result<Option<WrappedPrivateKey>> {
        let profile = self.store.load_profile(user_id).await?;
        match profile.as_ref().and_then(ProfileRecord::backup) {
            Some(raw) => parse_backup(user_id, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Which copies exist for a user
    pub async fn state(&self, user_id: &str) -> Result<VaultState> {
        let local = self.load_local(user_id)?;
        let profile = self.store.load_profile(user_id).await?;
        let backup = profile.as_ref().and_then(ProfileRecord::backup).map(str::to_string);
        Ok(VaultContents::new(local, backup).state())
    }

    // ========================================================================
    // UNLOCK
    // ========================================================================

    /// Recover the identity key pair, falling back from local to backup
    pub async fn unlock(&self, user_id: &str, secret: &[u8]) -> Result<IdentityKeyPair> {
        let local = self.load_local(user_id).unwrap_or_else(|e| {
            tracing::warn!("Local key cache unreadable for {}: {}", user_id, e);
            None
        });

        let profile = match self.store.load_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) if local.is_some() => {
                tracing::warn!("Profile unavailable for {}, using local copy only: {}", user_id, e);
                None
            }
            Err(e) => return Err(e),
        };
        let backup = profile.as_ref().and_then(ProfileRecord::backup).map(str::to_string);

        let contents = VaultContents::new(local, backup);
        tracing::debug!("Unlocking identity for {} (vault: {})", user_id, contents.state());

        let keypair = match contents {
            VaultContents::Neither => return Err(Error::NoIdentity),
            VaultContents::LocalOnly(local) => unwrap_async(&local, secret).await?,
            VaultContents::BackupOnly(backup) => {
                tracing::info!("No local key for {}, recovering from backup", user_id);
                self.recover_from_backup(user_id, profile.as_ref(), &backup, secret, false)
                    .await?
            }
            VaultContents::Both(local, backup) => match unwrap_async(&local, secret).await {
                Ok(keypair) => keypair,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::info!("Local key for {} unusable ({}), trying backup", user_id, e);
                    self.recover_from_backup(user_id, profile.as_ref(), &backup, secret, true)
                        .await?
                }
            },
        };

        if let Some(published) = profile.as_ref().and_then(|p| p.public_key.as_ref()) {
            if *published != keypair.export_public() {
                tracing::warn!(
                    "Unlocked key for {} does not match the published public key",
                    user_id
                );
            }
        }

        Ok(keypair)
    }

    async fn recover_from_backup(
        &self,
        user_id: &str,
        profile: Option<&ProfileRecord>,
        backup: &str,
        secret: &[u8],
        evict_local: bool,
    ) -> Result<IdentityKeyPair> {
        if let Some(verifier) = profile.and_then(|p| p.password_hash.clone()) {
            let candidate = Zeroizing::new(secret.to_vec());
            let accepted = run_blocking(move || verifier.verify(&candidate)).await?;
            if !accepted {
                tracing::warn!("Password rejected for {}", user_id);
                return Err(Error::PasswordRejected);
            }
        }

        let wrapped = parse_backup(user_id, backup)?;
        let keypair = unwrap_async(&wrapped, secret).await?;

        if evict_local {
            tracing::info!("Evicting corrupt local key entry for {}", user_id);
            if let Err(e) = self.remove_local(user_id) {
                tracing::warn!("Could not evict local key entry for {}: {}", user_id, e);
            }
        }

        let refreshed = match wrap_async(&keypair, secret, &self.config.kdf).await {
            Ok(wrapped) => self.store_local(user_id, &wrapped),
            Err(e) => Err(e),
        };
        match refreshed {
            Ok(()) => tracing::info!("Refreshed local key cache for {}", user_id),
            Err(e) => tracing::warn!("Could not refresh local key cache for {}: {}", user_id, e),
        }

        Ok(keypair)
    }

    // ========================================================================
    // REPLACEMENT
    // ========================================================================

    /// Replace both copies with a new key pair
    ///
    /// The local copy is written first. If the profile write then fails the
    /// result is [`Error::BackupWriteFailed`]; the local copy already holds
    /// the new key and [`KeyVault::publish`] can be retried.
    pub async fn replace(&self, user_id: &str, keypair: &IdentityKeyPair, secret: &[u8]) -> Result<()> {
        let local = wrap_async(keypair, secret, &self.config.kdf).await?;
        self.store_local(user_id, &local)?;
        self.remove_legacy(user_id)?;

        self.publish(user_id, keypair, secret).await
    }

    /// Write the public key, fingerprint, backup and verifier to the profile
    /// in a single store call
    pub async fn publish(&self, user_id: &str, keypair: &IdentityKeyPair, secret: &[u8]) -> Result<()> {
        let backup = wrap_async(keypair, secret, &self.config.kdf).await?;

        let candidate = Zeroizing::new(secret.to_vec());
        let kdf = self.config.kdf;
        let verifier =
            run_blocking(move || PasswordVerifier::hash_for_verification(&candidate, &kdf)).await?;

        let public_key = keypair.export_public();
        let mut profile = self.profile_or_empty(user_id).await?;
        profile.key_fingerprint = Some(fingerprint(&public_key, self.config.fingerprint_hex_len));
        profile.public_key = Some(public_key);
        profile.encrypted_private_key = Some(backup.to_json()?);
        profile.password_hash = Some(verifier);
        profile.updated_at = Some(now_timestamp());

        self.save_profile(&profile).await
    }

    async fn profile_or_empty(&self, user_id: &str) -> Result<ProfileRecord> {
        let profile = self
            .store
            .load_profile(user_id)
            .await
            .map_err(|e| Error::BackupWriteFailed(e.to_string()))?;
        Ok(profile.unwrap_or_else(|| ProfileRecord::empty(user_id)))
    }

    async fn save_profile(&self, profile: &ProfileRecord) -> Result<()> {
        self.store.save_profile(profile).await.map_err(|e| {
            tracing::warn!("Key backup for {} not written: {}", profile.user_id, e);
            Error::BackupWriteFailed(e.to_string())
        })
    }
}

fn parse_backup(user_id: &str, raw: &str) -> Result<WrappedPrivateKey> {
    WrappedPrivateKey::from_json(raw).map_err(|_| {
        tracing::warn!("Key backup for {} is unreadable", user_id);
        Error::WrongSecretOrCorrupt
    })
}

// ============================================================================
// TESTS
// ============================================================================
