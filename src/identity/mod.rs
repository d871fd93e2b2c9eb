//! # Identity Module
//!
//! The public face of the crate: provisioning, unlocking and replacing the
//! user's identity key, and sealing/opening messages with it.
//!
//! ## Identity Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         IDENTITY SYSTEM                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  setup_identity(secret)                                                │
//! │    generate X25519 key pair                                            │
//! │    local cache ◄── wrap(key, secret)                                   │
//! │    profile     ◄── public_key, fingerprint, wrap(key, secret), hash    │
//! │                                                                         │
//! │  unlock_identity(secret)          (session start)                      │
//! │    KeyVault::unlock → IdentityKeyPair, owned by the caller             │
//! │                                                                         │
//! │  seal / open / open_with_fallback (every message)                      │
//! │    caller passes the key pair in; nothing is held here                 │
//! │                                                                         │
//! │  regenerate_identity(secret)                                           │
//! │    same as setup, replacing the old key                                │
//! │    envelopes sealed to the old key can no longer be opened             │
//! │                                                                         │
//! │  logout()                                                              │
//! │    purge every local cache entry for the user                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Note
//!
//! The account password is both the login credential and the input to the
//! wrapping key, so message confidentiality is only as strong as the
//! password. This is kept for compatibility with existing backups.

use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::{
    fingerprint, import_public, IdentityKeyPair, KeyFingerprint, PublicKeyBlob,
};
use crate::error::{Error, Result};
use crate::messaging::{self, MessageEnvelope, Role};
use crate::vault::KeyVault;

/// Out-of-band service that opens pre-hybrid messages
#[async_trait]
pub trait LegacyDecryptor: Send + Sync {
    /// Decrypt a legacy ciphertext/iv pair
    async fn decrypt(&self, ciphertext: &str, iv: &str) -> Result<String>;
}

/// A freshly provisioned identity
pub struct ProvisionedIdentity {
    /// Exported public key, as published on the profile
    pub public_key: PublicKeyBlob,
    /// Fingerprint for out-of-band verification
    pub fingerprint: KeyFingerprint,
    /// The new key pair, for immediate use in this session
    pub keypair: IdentityKeyPair,
}

impl std::fmt::Debug for ProvisionedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedIdentity")
            .field("public_key", &self.public_key)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// How a message was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenedVia {
    /// Local hybrid decryption
    Local,
    /// The legacy decryption service
    LegacyService,
}

/// A decrypted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMessage {
    /// Message text
    pub plaintext: String,
    /// Path that produced it
    pub via: OpenedVia,
}

/// Identity and message encryption service
pub struct IdentityService {
    vault: KeyVault,
    legacy: Option<Arc<dyn LegacyDecryptor>>,
}

impl IdentityService {
    /// Create a service over a key vault
    pub fn new(vault: KeyVault) -> Self {
        Self { vault, legacy: None }
    }

    /// Attach the legacy decryption service
    pub fn with_legacy_decryptor(mut self, legacy: Arc<dyn LegacyDecryptor>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// The underlying vault
    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    async fn current_user(&self) -> Result<String> {
        self.vault
            .identity_store()
            .current_user_id()
            .await?
            .ok_or(Error::NotAuthenticated)
    }

    // ========================================================================
    // IDENTITY LIFECYCLE
    // ========================================================================

    /// Create the user's first identity
    ///
    /// Fails with [`Error::IdentityExists`] if the profile already has a
    /// public key. On [`Error::BackupWriteFailed`] the key is cached
    /// locally; unlock it and call [`IdentityService::publish_identity`].
    pub async fn setup_identity(&self, secret: &str) -> Result<ProvisionedIdentity> {
        let user_id = self.current_user().await?;

        let profile = self.vault.identity_store().load_profile(&user_id).await?;
        if profile.as_ref().is_some_and(|p| p.public_key.is_some()) {
            return Err(Error::IdentityExists);
        }

        let provisioned = self.provision(&user_id, secret).await?;
        tracing::info!(
            "Identity created for {} (fingerprint {})",
            user_id,
            provisioned.fingerprint
        );
        Ok(provisioned)
    }

    /// Recover the identity key pair for this session
    pub async fn unlock_identity(&self, secret: &str) -> Result<IdentityKeyPair> {
        let user_id = self.current_user().await?;
        let keypair = self.vault.unlock(&user_id, secret.as_bytes()).await?;
        tracing::info!("Identity unlocked for {}", user_id);
        Ok(keypair)
    }

    /// Replace the identity with a new key pair
    ///
    /// Envelopes sealed to the old public key become permanently
    /// unreadable.
    pub async fn regenerate_identity(&self, secret: &str) -> Result<ProvisionedIdentity> {
        let user_id = self.current_user().await?;
        let provisioned = self.provision(&user_id, secret).await?;
        tracing::info!(
            "Identity regenerated for {} (fingerprint {})",
            user_id,
            provisioned.fingerprint
        );
        Ok(provisioned)
    }

    /// Write the profile backup for a key pair (retry after
    /// [`Error::BackupWriteFailed`])
    pub async fn publish_identity(&self, keypair: &IdentityKeyPair, secret: &str) -> Result<()> {
        let user_id = self.current_user().await?;
        self.vault.publish(&user_id, keypair, secret.as_bytes()).await?;
        tracing::info!("Identity backup published for {}", user_id);
        Ok(())
    }

    /// Forget the local key material for the signed-in user
    pub async fn logout(&self) -> Result<()> {
        match self.vault.identity_store().current_user_id().await? {
            Some(user_id) => {
                self.vault.purge_local(&user_id)?;
                tracing::info!("Local key material purged for {}", user_id);
            }
            None => tracing::debug!("Logout with no signed-in user"),
        }
        Ok(())
    }

    /// Fingerprint of a published public key
    pub fn fingerprint_for(&self, public_key: &PublicKeyBlob) -> KeyFingerprint {
        fingerprint(public_key, self.vault.config().fingerprint_hex_len)
    }

    async fn provision(&self, user_id: &str, secret: &str) -> Result<ProvisionedIdentity> {
        let keypair = IdentityKeyPair::generate()?;
        self.vault.replace(user_id, &keypair, secret.as_bytes()).await?;

        let public_key = keypair.export_public();
        Ok(ProvisionedIdentity {
            fingerprint: self.fingerprint_for(&public_key),
            public_key,
            keypair,
        })
    }

    // ========================================================================
    // MESSAGES
    // ========================================================================

    /// Encrypt a message
    ///
    /// Dual-wrapped when the sender's public key is known, single-wrapped
    /// otherwise. Never needs a private key.
    pub fn seal(
        &self,
        plaintext: &str,
        recipient: &PublicKeyBlob,
        sender: Option<&PublicKeyBlob>,
    ) -> Result<MessageEnvelope> {
        let recipient = import_public(recipient)?;
        match sender {
            Some(sender) => {
                let sender = import_public(sender)?;
                messaging::encrypt_dual(plaintext.as_bytes(), &recipient, &sender)
            }
            None => {
                tracing::debug!("Sender key unknown, sealing for recipient only");
                messaging::encrypt_for_one(plaintext.as_bytes(), &recipient)
            }
        }
    }

    /// Decrypt a message locally
    ///
    /// `Legacy` envelopes return [`Error::UnsupportedLocalFormat`].
    pub fn open(&self, envelope: &MessageEnvelope, keypair: &IdentityKeyPair, role: Role) -> Result<String> {
        let plaintext = messaging::decrypt(envelope, keypair, role)?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::MalformedEnvelope("plaintext is not UTF-8".into()))
    }

    /// Decrypt a message, routing `Legacy` envelopes to the legacy service
    ///
    /// Without a key pair only legacy envelopes can be opened; anything else
    /// is [`Error::NoIdentity`].
    pub async fn open_with_fallback(
        &self,
        envelope: &MessageEnvelope,
        keypair: Option<&IdentityKeyPair>,
        role: Role,
    ) -> Result<OpenedMessage> {
        match envelope {
            MessageEnvelope::Legacy { ciphertext, iv } => {
                let legacy = self.legacy.as_ref().ok_or(Error::UnsupportedLocalFormat)?;
                let plaintext = legacy.decrypt(ciphertext, iv).await.map_err(|e| match e {
                    Error::LegacyDecryptionFailed(_) => e,
                    other => Error::LegacyDecryptionFailed(other.to_string()),
                })?;
                Ok(OpenedMessage {
                    plaintext,
                    via: OpenedVia::LegacyService,
                })
            }
            _ => {
                let keypair = keypair.ok_or(Error::NoIdentity)?;
                Ok(OpenedMessage {
                    plaintext: self.open(envelope, keypair, role)?,
                    via: OpenedVia::Local,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use crate::storage::{MemoryIdentityStore, MemoryKeyCache};

    struct EchoLegacy;

    #[async_trait]
    impl LegacyDecryptor for EchoLegacy {
        async fn decrypt(&self, ciphertext: &str, _iv: &str) -> Result<String> {
            if ciphertext == "broken" {
                return Err(Error::Internal("service down".into()));
            }
            Ok(format!("legacy:{}", ciphertext))
        }
    }

    fn service(user: Option<&str>) -> (IdentityService, Arc<MemoryIdentityStore>) {
        let store = Arc::new(MemoryIdentityStore::default());
        store.set_current_user(user.map(str::to_string));
        let vault = KeyVault::new(
            Arc::new(MemoryKeyCache::new()),
            store.clone(),
            VaultConfig::insecure_fast(),
        );
        (
            IdentityService::new(vault).with_legacy_decryptor(Arc::new(EchoLegacy)),
            store,
        )
    }

    #[tokio::test]
    async fn test_not_authenticated() {
        let (service, _) = service(None);

        assert!(matches!(
            service.setup_identity("pw").await,
            Err(Error::NotAuthenticated)
        ));
        assert!(matches!(
            service.unlock_identity("pw").await,
            Err(Error::NotAuthenticated)
        ));
        // Nothing to purge, not an error
        service.logout().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_publishes_profile() {
        let (service, store) = service(Some("u1"));

        let provisioned = service.setup_identity("correct-horse").await.unwrap();
        let profile = store.profile("u1").unwrap();

        assert_eq!(profile.public_key.as_ref(), Some(&provisioned.public_key));
        assert_eq!(profile.key_fingerprint.as_ref(), Some(&provisioned.fingerprint));
        assert!(profile.backup().is_some());
        assert!(profile.password_hash.is_some());
        assert_eq!(provisioned.fingerprint.as_str().len(), 16);
    }

    #[tokio::test]
    async fn test_setup_twice_is_rejected() {
        let (service, _) = service(Some("u1"));

        service.setup_identity("pw").await.unwrap();
        assert!(matches!(
            service.setup_identity("pw").await,
            Err(Error::IdentityExists)
        ));
    }

    #[tokio::test]
    async fn test_seal_without_sender_is_single_wrap() {
        let (service, _) = service(Some("u1"));
        let recipient = IdentityKeyPair::generate().unwrap();

        let envelope = service.seal("hi", &recipient.export_public(), None).unwrap();

        assert_eq!(envelope.format_name(), "single_wrap");
        assert_eq!(service.open(&envelope, &recipient, Role::Recipient).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_seal_rejects_malformed_key() {
        let (service, _) = service(Some("u1"));

        let result = service.seal("hi", &PublicKeyBlob::new("nope"), None);
        assert!(matches!(result, Err(Error::MalformedKey(_))));
    }

    #[tokio::test]
    async fn test_open_with_fallback_routes_legacy() {
        let (service, _) = service(Some("u1"));
        let envelope = MessageEnvelope::Legacy {
            ciphertext: "abc".into(),
            iv: "iv".into(),
        };

        let opened = service
            .open_with_fallback(&envelope, None, Role::Recipient)
            .await
            .unwrap();

        assert_eq!(opened.plaintext, "legacy:abc");
        assert_eq!(opened.via, OpenedVia::LegacyService);
    }

    #[tokio::test]
    async fn test_legacy_service_failure() {
        let (service, _) = service(Some("u1"));
        let envelope = MessageEnvelope::Legacy {
            ciphertext: "broken".into(),
            iv: "iv".into(),
        };

        let result = service
            .open_with_fallback(&envelope, None, Role::Recipient)
            .await;
        assert!(matches!(result, Err(Error::LegacyDecryptionFailed(_))));
    }

    #[tokio::test]
    async fn test_open_with_fallback_without_keypair() {
        let (service, _) = service(Some("u1"));
        let recipient = IdentityKeyPair::generate().unwrap();
        let envelope = service.seal("hi", &recipient.export_public(), None).unwrap();

        let result = service
            .open_with_fallback(&envelope, None, Role::Recipient)
            .await;
        assert!(matches!(result, Err(Error::NoIdentity)));

        let opened = service
            .open_with_fallback(&envelope, Some(&recipient), Role::Recipient)
            .await
            .unwrap();
        assert_eq!(opened.via, OpenedVia::Local);
    }

    #[tokio::test]
    async fn test_legacy_without_service_is_routing_signal() {
        let store = Arc::new(MemoryIdentityStore::signed_in("u1"));
        let vault = KeyVault::new(
            Arc::new(MemoryKeyCache::new()),
            store,
            VaultConfig::insecure_fast(),
        );
        let service = IdentityService::new(vault);
        let envelope = MessageEnvelope::Legacy {
            ciphertext: "abc".into(),
            iv: "iv".into(),
        };

        let err = service
            .open_with_fallback(&envelope, None, Role::Recipient)
            .await
            .unwrap_err();
        assert!(err.is_routing_signal());
    }
}
