//! # Configuration
//!
//! Tunables for the key vault: KDF cost, fingerprint length and the
//! local cache key names.
//!
//! ```text
//! {
//!   "kdf": { "memory_kib": 65536, "iterations": 3, "parallelism": 1 },
//!   "fingerprint_hex_len": 16,
//!   "cache_namespace": "flowsec-privatekey-",
//!   "legacy_namespaces": ["privateKey_", "encrypted_privateKey_"]
//! }
//! ```
//!
//! Every field has a default, so a partial JSON document is valid.

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_FINGERPRINT_HEX_LEN;
use crate::error::Result;

/// Argon2id cost parameters used when wrapping a key or hashing a password
///
/// Existing wrapped keys carry their own parameters, so changing these only
/// affects newly written records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism (lanes)
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfConfig {
    /// Cheap parameters for tests and demos
    ///
    /// Never use these for real keys.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Key vault configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// KDF cost for new wraps and verifiers
    pub kdf: KdfConfig,

    /// Fingerprint length in hex characters
    pub fingerprint_hex_len: usize,

    /// Prefix of the primary local cache key (`{prefix}{user_id}`)
    pub cache_namespace: String,

    /// Older cache key prefixes, consulted in order on a primary miss
    pub legacy_namespaces: Vec<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfConfig::default(),
            fingerprint_hex_len: DEFAULT_FINGERPRINT_HEX_LEN,
            cache_namespace: "flowsec-privatekey-".to_string(),
            legacy_namespaces: vec![
                "privateKey_".to_string(),
                "encrypted_privateKey_".to_string(),
            ],
        }
    }
}

impl VaultConfig {
    /// Parse from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Default configuration with [`KdfConfig::insecure_fast`]
    pub fn insecure_fast() -> Self {
        Self {
            kdf: KdfConfig::insecure_fast(),
            ..Self::default()
        }
    }

    /// Primary cache key for a user
    pub fn cache_key(&self, user_id: &str) -> String {
        format!("{}{}", self.cache_namespace, user_id)
    }

    /// Legacy cache keys for a user, in lookup order
    pub fn legacy_cache_keys(&self, user_id: &str) -> Vec<String> {
        self.legacy_namespaces
            .iter()
            .map(|ns| format!("{}{}", ns, user_id))
            .collect()
    }
}
