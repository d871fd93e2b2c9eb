//! # FlowSec Core
//!
//! Key management and hybrid message encryption for FlowSec end-to-end
//! encrypted chat. The message store and profile backend only ever see
//! ciphertext and password-wrapped keys.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FLOWSEC CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      IdentityService                            │   │
//! │  │  setup · unlock · seal · open · regenerate · publish · logout   │   │
//! │  └──────────────┬──────────────────────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────┐  ┌────────────▼───────────────────┐   │
//! │  │          KeyVault           │  │         Messaging              │   │
//! │  │                             │  │                                │   │
//! │  │ - wrap / unwrap             │  │ - encrypt_for_one              │   │
//! │  │ - local cache + migration   │  │ - encrypt_dual                 │   │
//! │  │ - server backup             │  │ - decrypt (by role)            │   │
//! │  │ - unlock fallback chain     │  │ - envelope formats             │   │
//! │  └──────────────┬──────────────┘  └────────────┬───────────────────┘   │
//! │                 │                              │                        │
//! │  ┌──────────────▼──────────────────────────────▼───────────────────┐   │
//! │  │                         Crypto                                  │   │
//! │  │  X25519 keys · fingerprints · AES-256-GCM · Argon2id · HKDF     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Storage boundaries: LocalKeyCache · IdentityStore              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`identity`] - The public facade ([`IdentityService`])
//! - [`vault`] - Wrapped private key storage and recovery
//! - [`messaging`] - Hybrid envelopes
//! - [`crypto`] - Cryptographic primitives
//! - [`storage`] - Local cache and identity store boundaries
//! - [`config`] - Vault configuration
//! - [`error`] - Error types
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use flowsec_core::{IdentityService, KeyVault, Role, VaultConfig};
//! use flowsec_core::storage::{MemoryIdentityStore, MemoryKeyCache};
//!
//! let store = Arc::new(MemoryIdentityStore::signed_in("alice"));
//! let vault = KeyVault::new(Arc::new(MemoryKeyCache::new()), store, VaultConfig::default());
//! let service = IdentityService::new(vault);
//!
//! let me = service.setup_identity("correct-horse").await?;
//! let envelope = service.seal("hello", &bob_public, Some(&me.public_key))?;
//! let text = service.open(&envelope, &me.keypair, Role::Sender)?;
//! ```
//!
//! ## Key Lifetime
//!
//! The unlocked [`IdentityKeyPair`] is owned by the caller and passed into
//! every `open` call. Nothing in this crate keeps it in global state, and it
//! is zeroized when dropped.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod messaging;
pub mod storage;
pub mod vault;

/// Time utilities
pub mod time;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{KdfConfig, VaultConfig};
pub use crypto::{IdentityKeyPair, KeyFingerprint, PublicKeyBlob};
pub use error::{Error, Result};
pub use identity::{IdentityService, LegacyDecryptor, OpenedMessage, OpenedVia, ProvisionedIdentity};
pub use messaging::{MessageEnvelope, Role, StoredMessageRecord};
pub use vault::{KeyVault, VaultState, WrappedPrivateKey};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of FlowSec Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
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
}
