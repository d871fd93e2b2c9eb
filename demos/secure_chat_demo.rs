//! # Secure Chat Demo
//!
//! This example walks through the full key lifecycle:
//! 1. Alice and Bob provision identities
//! 2. Alice sends Bob a dual-wrapped message
//! 3. Both sides open the same envelope
//! 4. Alice signs in on a new device and recovers from her backup
//! 5. Bob regenerates his key; the old message becomes unreadable
//!
//! ## Run
//!
//! ```bash
//! cargo run --example secure_chat_demo
//! ```

use std::sync::Arc;

use flowsec_core::storage::{MemoryIdentityStore, MemoryKeyCache};
use flowsec_core::{
    Error, IdentityService, KeyVault, Role, StoredMessageRecord, VaultConfig,
};

fn service(store: Arc<MemoryIdentityStore>) -> IdentityService {
    // Cheap KDF parameters so the demo runs instantly
    let vault = KeyVault::new(
        Arc::new(MemoryKeyCache::new()),
        store,
        VaultConfig::insecure_fast(),
    );
    IdentityService::new(vault)
}

#[tokio::main]
async fn main() {
    println!("=================================================");
    println!("          FLOWSEC SECURE CHAT DEMO");
    println!("=================================================\n");

    // =========================================================================
    // STEP 1: Provision identities
    // =========================================================================
    println!("1. Provisioning identities...\n");

    let alice_store = Arc::new(MemoryIdentityStore::signed_in("alice"));
    let bob_store = Arc::new(MemoryIdentityStore::signed_in("bob"));
    let alice = service(alice_store.clone());
    let bob = service(bob_store);

    let alice_id = alice
        .setup_identity("correct-horse")
        .await
        .expect("Failed to set up Alice");
    let bob_id = bob
        .setup_identity("battery-staple")
        .await
        .expect("Failed to set up Bob");

    println!("   Alice public key: {}", alice_id.public_key);
    println!("   Alice fingerprint: {}", alice_id.fingerprint.grouped());
    println!("   Bob fingerprint:   {}", bob_id.fingerprint.grouped());
    println!();

    // =========================================================================
    // STEP 2: Seal a message
    // =========================================================================
    println!("2. Alice seals \"hello\" for Bob...\n");

    let envelope = alice
        .seal("hello", &bob_id.public_key, Some(&alice_id.public_key))
        .expect("Failed to seal");
    let row = StoredMessageRecord::from(&envelope);

    println!("   Format: {}", envelope.format_name());
    println!(
        "   Stored row: {}",
        serde_json::to_string_pretty(&row).expect("Failed to serialize row")
    );
    println!();

    // =========================================================================
    // STEP 3: Both sides open it
    // =========================================================================
    println!("3. Opening the envelope...\n");

    let for_bob = bob
        .open(&envelope, &bob_id.keypair, Role::Recipient)
        .expect("Bob could not open");
    let for_alice = alice
        .open(&envelope, &alice_id.keypair, Role::Sender)
        .expect("Alice could not re-read");

    println!("   Bob reads:   {}", for_bob);
    println!("   Alice reads: {}", for_alice);
    println!();

    // =========================================================================
    // STEP 4: New device, recover from backup
    // =========================================================================
    println!("4. Alice signs in on a new device...\n");

    let phone = service(alice_store);
    println!(
        "   Vault state before unlock: {}",
        phone.vault().state("alice").await.expect("state")
    );

    match phone.unlock_identity("wrong-horse").await {
        Err(Error::PasswordRejected) => println!("   Wrong password rejected before any decrypt"),
        other => println!("   Unexpected: {:?}", other.map(|_| ())),
    }

    let recovered = phone
        .unlock_identity("correct-horse")
        .await
        .expect("Recovery failed");
    println!(
        "   Recovered key matches: {}",
        recovered.export_public() == alice_id.public_key
    );
    println!(
        "   Vault state after unlock: {}",
        phone.vault().state("alice").await.expect("state")
    );
    println!();

    // =========================================================================
    // STEP 5: Regeneration
    // =========================================================================
    println!("5. Bob regenerates his identity...\n");

    let new_bob = bob
        .regenerate_identity("battery-staple")
        .await
        .expect("Regeneration failed");
    println!("   New fingerprint: {}", new_bob.fingerprint.grouped());

    match bob.open(&envelope, &new_bob.keypair, Role::Recipient) {
        Err(Error::DecryptionFailed) => println!("   Old message is no longer readable"),
        other => println!("   Unexpected: {:?}", other),
    }

    println!("\n=================================================");
    println!("                 DEMO COMPLETE");
    println!("=================================================");
}
