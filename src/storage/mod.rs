//! # Storage Module
//!
//! Boundaries to the two places wrapped keys live.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Local Key Cache (device)                                       │   │
//! │  │  ─────────────────────────                                       │   │
//! │  │                                                                 │   │
//! │  │  flowsec-privatekey-{user_id}    → WrappedPrivateKey JSON      │   │
//! │  │  privateKey_{user_id}            → older clients (migrated)    │   │
//! │  │  encrypted_privateKey_{user_id}  → older clients (migrated)    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Identity Store (server)                                        │   │
//! │  │  ───────────────────────                                         │   │
//! │  │                                                                 │   │
//! │  │  profiles: public_key, key_fingerprint,                        │   │
//! │  │            encrypted_private_key (backup), password_hash       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither store ever sees an unwrapped private key.

mod key_cache;
mod profile;

pub use key_cache::{FileKeyCache, LocalKeyCache, MemoryKeyCache};
pub use profile::{IdentityStore, MemoryIdentityStore, ProfileRecord};
