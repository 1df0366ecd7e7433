//! # Session Example
//!
//! Two users exchange encrypted messages through a shared directory.
//!
//! ## Run
//!
//! ```bash
//! RUST_LOG=warden_core=debug cargo run --example session_demo
//! ```

use std::sync::Arc;

use warden_core::{
    Directory, InMemoryDirectory, InMemorySettingsStore, SecureStore, SecurityConfig,
    SecurityFacade,
};

fn facade(user: &str, directory: Arc<dyn Directory>) -> SecurityFacade {
    SecurityFacade::new(
        user,
        SecurityConfig::default(),
        Arc::new(SecureStore::new()),
        directory,
        Arc::new(InMemorySettingsStore::new()),
    )
    .expect("Invalid configuration")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Warden Core: Session Example ===\n");

    let directory = Arc::new(InMemoryDirectory::new());
    let alice = facade("alice", directory.clone());
    let bob = facade("bob", directory.clone());

    // Step 1: Both sides publish bundles
    println!("Step 1: Initializing both users...");
    for user in [&alice, &bob] {
        user.initialize().await.expect("Failed to initialize");
        user.enable_encryption().await.expect("Failed to enable encryption");
    }
    let bundle = directory.bundle("bob").expect("Bob has no bundle");
    println!(
        "  Bob published {} one-time pre-keys (signed pre-key {})",
        bundle.one_time_pre_keys.len(),
        bundle.signed_pre_key.id
    );
    println!();

    // Step 2: Alice sends the first message
    println!("Step 2: Alice -> Bob");
    let first = alice
        .encrypt_message("bob", b"Hi Bob, it's Alice")
        .await
        .expect("Encryption failed");
    println!("  Envelope: {}", first.to_json().unwrap());
    let plaintext = bob.decrypt_message("alice", &first).await.expect("Decryption failed");
    println!("  Bob reads: {}", String::from_utf8_lossy(&plaintext));
    println!();

    // Step 3: Bob replies
    println!("Step 3: Bob -> Alice");
    let reply = bob
        .encrypt_message("alice", b"Hi Alice!")
        .await
        .expect("Encryption failed");
    println!("  Pre-key envelope: {}", reply.is_pre_key());
    let plaintext = alice.decrypt_message("bob", &reply).await.expect("Decryption failed");
    println!("  Alice reads: {}", String::from_utf8_lossy(&plaintext));
    println!();

    // Step 4: Compare fingerprints out of band
    println!("Step 4: Verifying fingerprints");
    let seen = alice.correspondent_fingerprint("bob").await.unwrap();
    let actual = bob.local_fingerprint().unwrap();
    println!("  Alice sees Bob as: {}", seen);
    println!("  Bob's own:         {}", actual);
    println!("  Match: {}", seen == actual);
    println!();

    // Step 5: Replays are rejected
    println!("Step 5: Replaying Alice's first message...");
    match bob.decrypt_message("alice", &first).await {
        Ok(_) => println!("  [FAILED] Replay accepted"),
        Err(e) => println!("  [OK] Rejected: {}", e),
    }
    println!();

    println!("=== Example Complete ===");
}
