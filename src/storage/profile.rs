//! Identity store boundary: the authenticated principal and their profile
//! record, which carries the public key and the server-side key backup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::{KeyFingerprint, PasswordVerifier, PublicKeyBlob};
use crate::error::{Error, Result};

/// A user's profile as the identity store holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// Owner of the profile
    pub user_id: String,
    /// Exported identity public key
    #[serde(default)]
    pub public_key: Option<PublicKeyBlob>,
    /// Fingerprint of `public_key`
    #[serde(default)]
    pub key_fingerprint: Option<KeyFingerprint>,
    /// Serialized `WrappedPrivateKey` (the server backup)
    #[serde(default)]
    pub encrypted_private_key: Option<String>,
    /// Password verifier checked before unwrapping the backup
    #[serde(default)]
    pub password_hash: Option<PasswordVerifier>,
    /// Unix timestamp of the last key change
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl ProfileRecord {
    /// Profile with no key material
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            public_key: None,
            key_fingerprint: None,
            encrypted_private_key: None,
            password_hash: None,
            updated_at: None,
        }
    }

    /// The backup blob, if one is recorded
    pub fn backup(&self) -> Option<&str> {
        self.encrypted_private_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

/// Server-side identity and profile storage
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// The authenticated principal, if any
    async fn current_user_id(&self) -> Result<Option<String>>;

    /// Read a profile record
    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>>;

    /// Create or replace a profile record
    async fn save_profile(&self, profile: &ProfileRecord) -> Result<()>;
}

/// In-memory identity store for development and tests
#[derive(Default)]
pub struct MemoryIdentityStore {
    current_user: RwLock<Option<String>>,
    profiles: RwLock<HashMap<String, ProfileRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryIdentityStore {
    /// Store with `user_id` signed in
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        let store = Self::default();
        *store.current_user.write() = Some(user_id.into());
        store
    }

    /// Change (or clear) the signed-in user
    pub fn set_current_user(&self, user_id: Option<String>) {
        *self.current_user.write() = user_id;
    }

    /// Make every `save_profile` fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Synchronous read for inspection
    pub fn profile(&self, user_id: &str) -> Option<ProfileRecord> {
        self.profiles.read().get(user_id).cloned()
    }

    /// Synchronous write, bypassing the failure switch
    pub fn insert_profile(&self, profile: ProfileRecord) {
        self.profiles.write().insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn current_user_id(&self) -> Result<Option<String>> {
        Ok(self.current_user.read().clone())
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>> {
        Ok(self.profile(user_id))
    }

    async fn save_profile(&self, profile: &ProfileRecord) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageWriteError("identity store unavailable".into()));
        }
        self.insert_profile(profile.clone());
        Ok(())
    }
}
