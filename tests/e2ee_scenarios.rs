//! End-to-end scenarios across the identity service, vault and cipher.

use std::sync::Arc;

use flowsec_core::crypto::{fingerprint, verify_fingerprint, DEFAULT_FINGERPRINT_HEX_LEN};
use flowsec_core::storage::{FileKeyCache, LocalKeyCache, MemoryIdentityStore, MemoryKeyCache};
use flowsec_core::vault::{unwrap, wrap};
use flowsec_core::{
    Error, IdentityKeyPair, IdentityService, KdfConfig, KeyVault, MessageEnvelope, Role,
    StoredMessageRecord, VaultConfig, VaultState,
};

struct Device {
    service: IdentityService,
    cache: Arc<MemoryKeyCache>,
}

fn device(store: Arc<MemoryIdentityStore>) -> Device {
    let cache = Arc::new(MemoryKeyCache::new());
    let vault = KeyVault::new(cache.clone(), store, VaultConfig::insecure_fast());
    Device {
        service: IdentityService::new(vault),
        cache,
    }
}

fn user(user_id: &str) -> (Device, Arc<MemoryIdentityStore>) {
    let store = Arc::new(MemoryIdentityStore::signed_in(user_id));
    (device(store.clone()), store)
}

#[tokio::test]
async fn hello_is_readable_by_recipient_and_sender() {
    let (alice, _) = user("alice");
    let (bob, _) = user("bob");

    let alice_id = alice.service.setup_identity("correct-horse").await.unwrap();
    let bob_id = bob.service.setup_identity("battery-staple").await.unwrap();

    let envelope = alice
        .service
        .seal("hello", &bob_id.public_key, Some(&alice_id.public_key))
        .unwrap();

    let received = bob
        .service
        .open(&envelope, &bob_id.keypair, Role::Recipient)
        .unwrap();
    assert_eq!(received, "hello");

    // Later, in a new session, Alice re-reads her own message
    let alice_key = alice.service.unlock_identity("correct-horse").await.unwrap();
    let reread = alice.service.open(&envelope, &alice_key, Role::Sender).unwrap();
    assert_eq!(reread, "hello");
}

#[tokio::test]
async fn message_survives_the_store_row_form() {
    let (alice, _) = user("alice");
    let alice_id = alice.service.setup_identity("correct-horse").await.unwrap();
    let bob = IdentityKeyPair::generate().unwrap();

    let envelope = alice
        .service
        .seal("over the wire", &bob.export_public(), Some(&alice_id.public_key))
        .unwrap();

    let row = StoredMessageRecord::from(&envelope);
    let json = serde_json::to_string(&row).unwrap();
    let parsed: StoredMessageRecord = serde_json::from_str(&json).unwrap();
    let restored = MessageEnvelope::try_from(parsed).unwrap();

    assert_eq!(restored, envelope);
    assert_eq!(
        alice.service.open(&restored, &bob, Role::Recipient).unwrap(),
        "over the wire"
    );
}

#[tokio::test]
async fn tampered_row_fails_for_every_role() {
    let (alice, _) = user("alice");
    let alice_id = alice.service.setup_identity("pw").await.unwrap();
    let bob = IdentityKeyPair::generate().unwrap();

    let envelope = alice
        .service
        .seal("hello", &bob.export_public(), Some(&alice_id.public_key))
        .unwrap();
    let row = StoredMessageRecord::from(&envelope);

    // Swap the two wrapped keys: both are well-formed but bound to the
    // other reader and to the other AAD position
    let swapped = StoredMessageRecord {
        encrypted_aes_key: row.encrypted_aes_key_sender.clone(),
        encrypted_aes_key_sender: row.encrypted_aes_key.clone(),
        ..row
    };
    let tampered = MessageEnvelope::try_from(swapped).unwrap();

    assert!(matches!(
        alice.service.open(&tampered, &bob, Role::Recipient),
        Err(Error::DecryptionFailed)
    ));
    assert!(matches!(
        alice.service.open(&tampered, &alice_id.keypair, Role::Sender),
        Err(Error::DecryptionFailed)
    ));
}

#[tokio::test]
async fn new_device_recovers_from_backup() {
    let store = Arc::new(MemoryIdentityStore::signed_in("alice"));
    let laptop = device(store.clone());
    let provisioned = laptop.service.setup_identity("correct-horse").await.unwrap();

    let phone = device(store);
    assert_eq!(
        phone.service.vault().state("alice").await.unwrap(),
        VaultState::BackupOnly
    );

    let unlocked = phone.service.unlock_identity("correct-horse").await.unwrap();
    assert_eq!(unlocked.export_public(), provisioned.public_key);

    // The phone now has its own freshly wrapped copy
    let local = phone.service.vault().load_local("alice").unwrap().unwrap();
    let backup = phone.service.vault().load_backup("alice").await.unwrap().unwrap();
    assert_ne!(local.params.salt, backup.params.salt);
    assert_eq!(
        phone.service.vault().state("alice").await.unwrap(),
        VaultState::Both
    );
    assert!(!phone.cache.is_empty());
}

#[tokio::test]
async fn wrong_password_on_backup_is_rejected_without_touching_cache() {
    let store = Arc::new(MemoryIdentityStore::signed_in("alice"));
    let laptop = device(store.clone());
    laptop.service.setup_identity("correct-horse").await.unwrap();

    let phone = device(store);
    assert!(matches!(
        phone.service.unlock_identity("wrong-horse").await,
        Err(Error::PasswordRejected)
    ));
    assert!(phone.cache.is_empty());

    let before = laptop.cache.get("flowsec-privatekey-alice").unwrap();
    assert!(matches!(
        laptop.service.unlock_identity("wrong-horse").await,
        Err(Error::PasswordRejected)
    ));
    assert_eq!(laptop.cache.get("flowsec-privatekey-alice").unwrap(), before);
}

#[tokio::test]
async fn single_wrap_is_not_recoverable_by_sender() {
    let (alice, _) = user("alice");
    let alice_id = alice.service.setup_identity("pw").await.unwrap();
    let bob = IdentityKeyPair::generate().unwrap();

    let envelope = alice.service.seal("hello", &bob.export_public(), None).unwrap();

    let err = alice
        .service
        .open(&envelope, &alice_id.keypair, Role::Sender)
        .unwrap_err();
    assert!(matches!(err, Error::NoSenderKeyAvailable));
    assert!(!err.is_recoverable());

    assert_eq!(
        alice.service.open(&envelope, &bob, Role::Recipient).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn regeneration_makes_old_messages_unreadable() {
    let (bob, bob_store) = user("bob");
    let old = bob.service.setup_identity("pw").await.unwrap();
    let alice = IdentityKeyPair::generate().unwrap();

    let envelope = bob
        .service
        .seal("before", &old.public_key, Some(&alice.export_public()))
        .unwrap();

    let new = bob.service.regenerate_identity("pw").await.unwrap();
    assert_ne!(new.public_key, old.public_key);
    assert_ne!(new.fingerprint, old.fingerprint);

    let profile = bob_store.profile("bob").unwrap();
    assert_eq!(profile.public_key, Some(new.public_key.clone()));

    assert!(matches!(
        bob.service.open(&envelope, &new.keypair, Role::Recipient),
        Err(Error::DecryptionFailed)
    ));

    // Unlocking now yields the new key
    let unlocked = bob.service.unlock_identity("pw").await.unwrap();
    assert_eq!(unlocked.export_public(), new.public_key);
}

#[tokio::test]
async fn backup_write_failure_during_regeneration_can_be_retried() {
    let (bob, bob_store) = user("bob");
    let old = bob.service.setup_identity("pw").await.unwrap();

    bob_store.set_fail_writes(true);
    let err = bob.service.regenerate_identity("pw").await.unwrap_err();
    assert!(matches!(err, Error::BackupWriteFailed(_)));
    assert!(err.is_recoverable());

    // Server still has the old key; the device already holds the new one
    let profile = bob_store.profile("bob").unwrap();
    assert_eq!(profile.public_key, Some(old.public_key.clone()));
    let local = bob.service.unlock_identity("pw").await.unwrap();
    assert_ne!(local.export_public(), old.public_key);

    bob_store.set_fail_writes(false);
    bob.service.publish_identity(&local, "pw").await.unwrap();

    let profile = bob_store.profile("bob").unwrap();
    assert_eq!(profile.public_key, Some(local.export_public()));
    assert_eq!(
        profile.key_fingerprint,
        Some(bob.service.fingerprint_for(&local.export_public()))
    );
}

#[tokio::test]
async fn logout_purges_local_copy() {
    let (alice, _) = user("alice");
    alice.service.setup_identity("pw").await.unwrap();
    assert!(!alice.cache.is_empty());

    alice.service.logout().await.unwrap();
    assert!(alice.cache.is_empty());

    // Next sign-in recovers from the backup
    alice.service.unlock_identity("pw").await.unwrap();
    assert!(!alice.cache.is_empty());
}

#[tokio::test]
async fn legacy_file_cache_entry_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = IdentityKeyPair::generate().unwrap();
    let wrapped = wrap(&keypair, b"pw", &KdfConfig::insecure_fast()).unwrap();

    // An older client left the key under its own name
    let legacy = FileKeyCache::open(dir.path()).unwrap();
    legacy
        .put("encrypted_privateKey_alice", &wrapped.to_json().unwrap())
        .unwrap();

    let cache = Arc::new(FileKeyCache::open(dir.path()).unwrap());
    let store = Arc::new(MemoryIdentityStore::signed_in("alice"));
    let service = IdentityService::new(KeyVault::new(
        cache.clone(),
        store,
        VaultConfig::insecure_fast(),
    ));

    let unlocked = service.unlock_identity("pw").await.unwrap();
    assert_eq!(unlocked.public_key(), keypair.public_key());

    assert!(cache.get("flowsec-privatekey-alice").unwrap().is_some());
    assert!(cache.get("encrypted_privateKey_alice").unwrap().is_none());
}

#[test]
fn wrap_round_trip_and_wrong_secret() {
    let kdf = KdfConfig::insecure_fast();
    let keypair = IdentityKeyPair::generate().unwrap();

    for secret in ["correct-horse", "", "päss wörd ✓"] {
        let wrapped = wrap(&keypair, secret.as_bytes(), &kdf).unwrap();
        assert_eq!(
            unwrap(&wrapped, secret.as_bytes()).unwrap().public_key(),
            keypair.public_key()
        );
        assert!(matches!(
            unwrap(&wrapped, b"something else"),
            Err(Error::WrongSecretOrCorrupt)
        ));
    }
}

#[test]
fn fingerprints_are_stable_and_distinct() {
    let a = IdentityKeyPair::generate().unwrap();
    let b = IdentityKeyPair::generate().unwrap();

    let fp_a = fingerprint(&a.export_public(), DEFAULT_FINGERPRINT_HEX_LEN);
    assert_eq!(fp_a, fingerprint(&a.export_public(), DEFAULT_FINGERPRINT_HEX_LEN));
    assert_ne!(fp_a, fingerprint(&b.export_public(), DEFAULT_FINGERPRINT_HEX_LEN));

    assert!(verify_fingerprint(&a.export_public(), &fp_a.grouped()));
    assert!(!verify_fingerprint(&b.export_public(), fp_a.as_str()));
}

#[test]
fn unlock_with_a_plain_runtime() {
    let store = Arc::new(MemoryIdentityStore::signed_in("carol"));
    let service = device(store).service;

    let provisioned = tokio_test::block_on(service.setup_identity("pw")).unwrap();
    let unlocked = tokio_test::block_on(service.unlock_identity("pw")).unwrap();

    assert_eq!(unlocked.export_public(), provisioned.public_key);
}
