//! Envelope formats and their message-store row form.
//!
//! ```text
//! StoredMessageRecord (row)                MessageEnvelope
//! ─────────────────────────                ───────────────
//! encrypted_content + iv
//!   + encrypted_aes_key
//!   + encrypted_aes_key_sender   ──────►   DualWrap
//!   (no sender key)              ──────►   SingleWrap
//! app_ciphertext + app_iv        ──────►   Legacy
//! anything else                  ──────►   Err(MalformedEnvelope)
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::{base64_bytes, KEY_SIZE, NONCE_SIZE, TAG_SIZE, X25519_KEY_SIZE};
use crate::error::{Error, Result};

/// Size of one wrapped session key: `ephemeral_pub ‖ nonce ‖ ciphertext+tag`
pub const WRAPPED_SESSION_KEY_SIZE: usize = X25519_KEY_SIZE + NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// A session key wrapped for one reader
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedSessionKey(Vec<u8>);

impl Serialize for WrappedSessionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        base64_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for WrappedSessionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes = base64_bytes::deserialize(deserializer)?;
        Self::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

impl WrappedSessionKey {
    /// Parse raw bytes, checking the length
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != WRAPPED_SESSION_KEY_SIZE {
            return Err(Error::MalformedEnvelope(format!(
                "wrapped session key must be {} bytes, got {}",
                WRAPPED_SESSION_KEY_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse the base64 row form
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::MalformedEnvelope(format!("wrapped key: {}", e)))?;
        Self::from_bytes(bytes)
    }

    /// Encode for the message store
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn ephemeral_public(&self) -> [u8; X25519_KEY_SIZE] {
        let mut out = [0u8; X25519_KEY_SIZE];
        out.copy_from_slice(&self.0[..X25519_KEY_SIZE]);
        out
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.0[X25519_KEY_SIZE..X25519_KEY_SIZE + NONCE_SIZE]
    }

    pub(crate) fn ciphertext(&self) -> &[u8] {
        &self.0[X25519_KEY_SIZE + NONCE_SIZE..]
    }

    #[cfg(test)]
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl std::fmt::Debug for WrappedSessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedSessionKey({} bytes)", self.0.len())
    }
}

/// The symmetrically encrypted message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// AES-256-GCM ciphertext with tag
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    /// 96-bit nonce
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
}

/// An encrypted message as stored and transmitted
///
/// One envelope per plaintext. The payload is encrypted once; the session
/// key is wrapped once per reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MessageEnvelope {
    /// Only the recipient can open it (sender key was unknown, or the
    /// message predates dual wrapping)
    SingleWrap {
        /// Encrypted body
        payload: SealedPayload,
        /// Session key for the recipient
        recipient_key: WrappedSessionKey,
    },
    /// Both the recipient and the sender can open it
    DualWrap {
        /// Encrypted body
        payload: SealedPayload,
        /// Session key for the recipient
        recipient_key: WrappedSessionKey,
        /// Session key for the sender
        sender_key: WrappedSessionKey,
    },
    /// Pre-hybrid format, opened by the legacy decryption service
    Legacy {
        /// Opaque legacy ciphertext
        ciphertext: String,
        /// Opaque legacy iv
        iv: String,
    },
}

impl MessageEnvelope {
    /// Short name of the format, for logs
    pub fn format_name(&self) -> &'static str {
        match self {
            MessageEnvelope::SingleWrap { .. } => "single_wrap",
            MessageEnvelope::DualWrap { .. } => "dual_wrap",
            MessageEnvelope::Legacy { .. } => "legacy",
        }
    }

    /// Whether the local cipher can open this envelope
    pub fn is_legacy(&self) -> bool {
        matches!(self, MessageEnvelope::Legacy { .. })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::MalformedEnvelope(e.to_string()))
    }
}

/// A message row as the message store holds it
///
/// Every field is optional; which ones are present decides the envelope
/// format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessageRecord {
    /// Payload ciphertext (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_content: Option<String>,
    /// Session key wrapped for the recipient (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_aes_key: Option<String>,
    /// Session key wrapped for the sender (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_aes_key_sender: Option<String>,
    /// Payload iv (base64)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// Legacy ciphertext
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_ciphertext: Option<String>,
    /// Legacy iv
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_iv: Option<String>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| Error::MalformedEnvelope(format!("{}: {}", name, e)))
}

impl TryFrom<StoredMessageRecord> for MessageEnvelope {
    type Error = Error;

    fn try_from(row: StoredMessageRecord) -> Result<Self> {
        let hybrid = (
            present(&row.encrypted_content),
            present(&row.iv),
            present(&row.encrypted_aes_key),
        );

        if let (Some(content), Some(iv), Some(recipient)) = hybrid {
            let payload = SealedPayload {
                ciphertext: decode_field("encrypted_content", content)?,
                iv: decode_field("iv", iv)?,
            };
            let recipient_key = WrappedSessionKey::from_base64(recipient)?;

            return Ok(match present(&row.encrypted_aes_key_sender) {
                Some(sender) => MessageEnvelope::DualWrap {
                    payload,
                    recipient_key,
                    sender_key: WrappedSessionKey::from_base64(sender)?,
                },
                None => MessageEnvelope::SingleWrap {
                    payload,
                    recipient_key,
                },
            });
        }

        match (present(&row.app_ciphertext), present(&row.app_iv)) {
            (Some(ciphertext), Some(iv)) => Ok(MessageEnvelope::Legacy {
                ciphertext: ciphertext.to_string(),
                iv: iv.to_string(),
            }),
            _ => Err(Error::MalformedEnvelope(
                "row carries neither a hybrid nor a legacy payload".into(),
            )),
        }
    }
}

impl From<&MessageEnvelope> for StoredMessageRecord {
    fn from(envelope: &MessageEnvelope) -> Self {
        match envelope {
            MessageEnvelope::SingleWrap {
                payload,
                recipient_key,
            } => StoredMessageRecord {
                encrypted_content: Some(BASE64.encode(&payload.ciphertext)),
                iv: Some(BASE64.encode(&payload.iv)),
                encrypted_aes_key: Some(recipient_key.to_base64()),
                ..Default::default()
            },
            MessageEnvelope::DualWrap {
                payload,
                recipient_key,
                sender_key,
            } => StoredMessageRecord {
                encrypted_content: Some(BASE64.encode(&payload.ciphertext)),
                iv: Some(BASE64.encode(&payload.iv)),
                encrypted_aes_key: Some(recipient_key.to_base64()),
                encrypted_aes_key_sender: Some(sender_key.to_base64()),
                ..Default::default()
            },
            MessageEnvelope::Legacy { ciphertext, iv } => StoredMessageRecord {
                app_ciphertext: Some(ciphertext.clone()),
                app_iv: Some(iv.clone()),
                ..Default::default()
            },
        }
    }
}
