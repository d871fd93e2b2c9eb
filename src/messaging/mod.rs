//! # Messaging Module
//!
//! Hybrid encryption of message payloads.
//!
//! ## Envelope Construction
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      DUAL-WRAP ENVELOPE                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  session_key = 32 random bytes                                         │
//! │                                                                         │
//! │  recipient_key = wrap(session_key, recipient_public)                   │
//! │  sender_key    = wrap(session_key, sender_public)     (dual only)      │
//! │                                                                         │
//! │  payload = AES-256-GCM(                                                │
//! │    key   = session_key,                                                │
//! │    iv    = random 12 bytes,                                            │
//! │    aad   = "flowsec-message-v1"                                        │
//! │            ‖ len ‖ recipient_key                                       │
//! │            ‖ len ‖ sender_key (len = 0 when absent)                    │
//! │  )                                                                      │
//! │                                                                         │
//! │  wrap(k, reader_public):                                               │
//! │    eph ← fresh X25519                                                  │
//! │    kek = HKDF(eph × reader_public, salt = eph_pub ‖ reader_pub)        │
//! │    → eph_pub(32) ‖ nonce(12) ‖ AES-GCM(kek, k, aad = eph_pub)(48)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both wrapped keys are bound into the payload AAD. A flipped bit in
//! either one, or a stripped sender key, makes the payload fail for every
//! reader.
//!
//! ## Opening
//!
//! | Envelope | Recipient | Sender |
//! |----------|-----------|--------|
//! | `DualWrap` | recipient_key | sender_key |
//! | `SingleWrap` | recipient_key | `NoSenderKeyAvailable` |
//! | `Legacy` | `UnsupportedLocalFormat` | `UnsupportedLocalFormat` |

mod envelope;

pub use envelope::{
    MessageEnvelope, SealedPayload, StoredMessageRecord, WrappedSessionKey,
    WRAPPED_SESSION_KEY_SIZE,
};

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{
    decrypt as aead_decrypt, derive_key_encryption_key, encrypt as aead_encrypt, IdentityKeyPair,
    IdentityPublicKey, Nonce, SymmetricKey, KEY_SIZE,
};
use crate::error::{Error, Result};

/// AAD domain tag for message payloads
const MESSAGE_AAD_DOMAIN: &[u8] = b"flowsec-message-v1";

/// Which side of the conversation is opening an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The author re-reading their own message
    Sender,
    /// The addressee
    Recipient,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Recipient => f.write_str("recipient"),
        }
    }
}

/// Encrypt for the recipient only
///
/// Fallback for when the sender's own public key is unknown. The sender
/// will not be able to re-read the result.
pub fn encrypt_for_one(plaintext: &[u8], recipient: &IdentityPublicKey) -> Result<MessageEnvelope> {
    let session_key = SymmetricKey::random()?;
    let recipient_key = wrap_session_key(&session_key, recipient)?;
    let payload = seal_payload(&session_key, plaintext, &recipient_key, None)?;

    Ok(MessageEnvelope::SingleWrap {
        payload,
        recipient_key,
    })
}

/// Encrypt for both the recipient and the sender
///
/// The same session key is wrapped under each public key, so either side
/// can open the envelope with only their own private key.
pub fn encrypt_dual(
    plaintext: &[u8],
    recipient: &IdentityPublicKey,
    sender: &IdentityPublicKey,
) -> Result<MessageEnvelope> {
    let session_key = SymmetricKey::random()?;
    let recipient_key = wrap_session_key(&session_key, recipient)?;
    let sender_key = wrap_session_key(&session_key, sender)?;
    let payload = seal_payload(&session_key, plaintext, &recipient_key, Some(&sender_key))?;

    Ok(MessageEnvelope::DualWrap {
        payload,
        recipient_key,
        sender_key,
    })
}

/// Open an envelope with a private key
///
/// ## Errors
///
/// - [`Error::DecryptionFailed`]: wrong key, tampering, or any unwrap failure
/// - [`Error::NoSenderKeyAvailable`]: `SingleWrap` opened as [`Role::Sender`]
/// - [`Error::UnsupportedLocalFormat`]: `Legacy`; route to the legacy service
pub fn decrypt(envelope: &MessageEnvelope, keypair: &IdentityKeyPair, role: Role) -> Result<Vec<u8>> {
    match (envelope, role) {
        (MessageEnvelope::Legacy { .. }, _) => Err(Error::UnsupportedLocalFormat),
        (MessageEnvelope::SingleWrap { .. }, Role::Sender) => Err(Error::NoSenderKeyAvailable),
        (
            MessageEnvelope::SingleWrap {
                payload,
                recipient_key,
            },
            Role::Recipient,
        ) => open_payload(payload, recipient_key, None, recipient_key, keypair),
        (
            MessageEnvelope::DualWrap {
                payload,
                recipient_key,
                sender_key,
            },
            role,
        ) => {
            let own = match role {
                Role::Sender => sender_key,
                Role::Recipient => recipient_key,
            };
            open_payload(payload, recipient_key, Some(sender_key), own, keypair)
        }
    }
}

fn seal_payload(
    session_key: &SymmetricKey,
    plaintext: &[u8],
    recipient_key: &WrappedSessionKey,
    sender_key: Option<&WrappedSessionKey>,
) -> Result<SealedPayload> {
    let aad = build_aad(recipient_key, sender_key);
    let (nonce, ciphertext) = aead_encrypt(session_key, plaintext, &aad)?;

    Ok(SealedPayload {
        ciphertext,
        iv: nonce.as_bytes().to_vec(),
    })
}

fn open_payload(
    payload: &SealedPayload,
    recipient_key: &WrappedSessionKey,
    sender_key: Option<&WrappedSessionKey>,
    own_key: &WrappedSessionKey,
    keypair: &IdentityKeyPair,
) -> Result<Vec<u8>> {
    let nonce = Nonce::from_slice(&payload.iv).ok_or_else(|| {
        Error::MalformedEnvelope(format!("iv must be 12 bytes, got {}", payload.iv.len()))
    })?;

    let session_key = unwrap_session_key(own_key, keypair)?;
    let aad = build_aad(recipient_key, sender_key);

    aead_decrypt(&session_key, &nonce, &payload.ciphertext, &aad)
}

/// Payload AAD: domain tag, then each wrapped key with a u32 length prefix
fn build_aad(recipient_key: &WrappedSessionKey, sender_key: Option<&WrappedSessionKey>) -> Vec<u8> {
    let sender_bytes = sender_key.map(|k| k.as_bytes()).unwrap_or_default();

    let mut aad = Vec::with_capacity(
        MESSAGE_AAD_DOMAIN.len() + 8 + recipient_key.as_bytes().len() + sender_bytes.len(),
    );
    aad.extend_from_slice(MESSAGE_AAD_DOMAIN);
    aad.extend_from_slice(&(recipient_key.as_bytes().len() as u32).to_be_bytes());
    aad.extend_from_slice(recipient_key.as_bytes());
    aad.extend_from_slice(&(sender_bytes.len() as u32).to_be_bytes());
    aad.extend_from_slice(sender_bytes);
    aad
}

/// Wrap a session key for one reader
fn wrap_session_key(session_key: &SymmetricKey, reader: &IdentityPublicKey) -> Result<WrappedSessionKey> {
    let ephemeral = IdentityKeyPair::generate()?;
    let ephemeral_public = ephemeral.public_key();

    let shared = ephemeral.diffie_hellman(reader);
    if !shared.was_contributory() {
        return Err(Error::MalformedKey("reader public key is a low-order point".into()));
    }

    let kek = derive_key_encryption_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        reader.as_bytes(),
    )?;
    let (nonce, ciphertext) = aead_encrypt(&kek, session_key.as_bytes(), ephemeral_public.as_bytes())?;

    let mut bytes = Vec::with_capacity(WRAPPED_SESSION_KEY_SIZE);
    bytes.extend_from_slice(ephemeral_public.as_bytes());
    bytes.extend_from_slice(nonce.as_bytes());
    bytes.extend_from_slice(&ciphertext);

    WrappedSessionKey::from_bytes(bytes)
}

/// Recover a session key with the reader's private key
///
/// Every failure is [`Error::DecryptionFailed`].
fn unwrap_session_key(wrapped: &WrappedSessionKey, keypair: &IdentityKeyPair) -> Result<SymmetricKey> {
    let ephemeral_bytes = wrapped.ephemeral_public();
    let ephemeral_public =
        IdentityPublicKey::from_bytes(ephemeral_bytes).map_err(|_| Error::DecryptionFailed)?;

    let shared = keypair.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(Error::DecryptionFailed);
    }

    let kek = derive_key_encryption_key(
        shared.as_bytes(),
        &ephemeral_bytes,
        keypair.public_key().as_bytes(),
    )?;
    let nonce = Nonce::from_slice(wrapped.nonce()).ok_or(Error::DecryptionFailed)?;

    let raw = Zeroizing::new(aead_decrypt(&kek, &nonce, wrapped.ciphertext(), &ephemeral_bytes)?);
    let bytes: [u8; KEY_SIZE] = raw.as_slice().try_into().map_err(|_| Error::DecryptionFailed)?;

    Ok(SymmetricKey::from_bytes(bytes))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn keypairs() -> (IdentityKeyPair, IdentityKeyPair) {
        (
            IdentityKeyPair::generate().unwrap(),
            IdentityKeyPair::generate().unwrap(),
        )
    }

    #[test]
    fn test_single_wrap_round_trip() {
        let (_sender, recipient) = keypairs();

        let envelope = encrypt_for_one(b"hello", &recipient.public_key()).unwrap();
        let plaintext = decrypt(&envelope, &recipient, Role::Recipient).unwrap();

        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn test_dual_wrap_both_roles() {
        let (sender, recipient) = keypairs();

        let envelope =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        assert_eq!(decrypt(&envelope, &recipient, Role::Recipient).unwrap(), b"hello");
        assert_eq!(decrypt(&envelope, &sender, Role::Sender).unwrap(), b"hello");
    }

    #[test]
    fn test_empty_plaintext() {
        let (sender, recipient) = keypairs();

        let envelope = encrypt_dual(b"", &recipient.public_key(), &sender.public_key()).unwrap();

        assert!(decrypt(&envelope, &recipient, Role::Recipient).unwrap().is_empty());
    }

    #[test]
    fn test_wrapped_key_size() {
        let (_, recipient) = keypairs();
        let envelope = encrypt_for_one(b"x", &recipient.public_key()).unwrap();

        match envelope {
            MessageEnvelope::SingleWrap { recipient_key, .. } => {
                assert_eq!(recipient_key.as_bytes().len(), 92);
            }
            other => panic!("expected SingleWrap, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_keypair_fails() {
        let (sender, recipient) = keypairs();
        let stranger = IdentityKeyPair::generate().unwrap();

        let envelope =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        assert!(matches!(
            decrypt(&envelope, &stranger, Role::Recipient),
            Err(Error::DecryptionFailed)
        ));
        // Right key, wrong role
        assert!(matches!(
            decrypt(&envelope, &recipient, Role::Sender),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_single_wrap_sender_has_no_key() {
        let (sender, recipient) = keypairs();
        let envelope = encrypt_for_one(b"hello", &recipient.public_key()).unwrap();

        assert!(matches!(
            decrypt(&envelope, &sender, Role::Sender),
            Err(Error::NoSenderKeyAvailable)
        ));
        assert_eq!(decrypt(&envelope, &recipient, Role::Recipient).unwrap(), b"hello");
    }

    #[test]
    fn test_legacy_is_routed() {
        let (_, recipient) = keypairs();
        let envelope = MessageEnvelope::Legacy {
            ciphertext: "ct".into(),
            iv: "iv".into(),
        };

        let err = decrypt(&envelope, &recipient, Role::Recipient).unwrap_err();
        assert!(err.is_routing_signal());
    }

    #[test]
    fn test_tampered_ciphertext_fails_every_role() {
        let (sender, recipient) = keypairs();
        let mut envelope =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        if let MessageEnvelope::DualWrap { payload, .. } = &mut envelope {
            payload.ciphertext[0] ^= 0x01;
        }

        for (kp, role) in [(&recipient, Role::Recipient), (&sender, Role::Sender)] {
            assert!(matches!(decrypt(&envelope, kp, role), Err(Error::DecryptionFailed)));
        }
    }

    #[test]
    fn test_tampered_wrapped_keys_fail_every_role() {
        let (sender, recipient) = keypairs();
        let original =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        // Flip one bit in the ephemeral key, the nonce and the ciphertext of
        // each wrapped key in turn
        for target in 0..2 {
            for index in [0, 40, 60, 91] {
                let mut envelope = original.clone();
                if let MessageEnvelope::DualWrap {
                    recipient_key,
                    sender_key,
                    ..
                } = &mut envelope
                {
                    let key = if target == 0 { recipient_key } else { sender_key };
                    key.bytes_mut()[index] ^= 0x01;
                }

                for (kp, role) in [(&recipient, Role::Recipient), (&sender, Role::Sender)] {
                    assert!(
                        matches!(decrypt(&envelope, kp, role), Err(Error::DecryptionFailed)),
                        "target {} index {} role {}",
                        target,
                        index,
                        role
                    );
                }
            }
        }
    }

    #[test]
    fn test_stripped_sender_key_fails_for_recipient() {
        let (sender, recipient) = keypairs();
        let envelope =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        let downgraded = match envelope {
            MessageEnvelope::DualWrap {
                payload,
                recipient_key,
                ..
            } => MessageEnvelope::SingleWrap {
                payload,
                recipient_key,
            },
            other => panic!("expected DualWrap, got {:?}", other),
        };

        assert!(matches!(
            decrypt(&downgraded, &recipient, Role::Recipient),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_bad_iv_is_malformed() {
        let (_, recipient) = keypairs();
        let mut envelope = encrypt_for_one(b"hello", &recipient.public_key()).unwrap();

        if let MessageEnvelope::SingleWrap { payload, .. } = &mut envelope {
            payload.iv.truncate(4);
        }

        assert!(matches!(
            decrypt(&envelope, &recipient, Role::Recipient),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_envelope_json_round_trip_opens() {
        let (sender, recipient) = keypairs();
        let envelope =
            encrypt_dual(b"hello", &recipient.public_key(), &sender.public_key()).unwrap();

        let json = envelope.to_json().unwrap();
        let parsed = MessageEnvelope::from_json(&json).unwrap();

        assert_eq!(decrypt(&parsed, &sender, Role::Sender).unwrap(), b"hello");
    }
}
