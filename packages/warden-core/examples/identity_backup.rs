//! # Identity Backup Example
//!
//! Creates an identity, exports it under a password, and restores it on a
//! second installation.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example identity_backup
//! ```

use std::sync::Arc;

use warden_core::{Error, InMemoryDirectory, SecureStore, SecurityConfig, SessionManager};

#[tokio::main]
async fn main() {
    println!("=== Warden Core: Identity Backup Example ===\n");

    let directory = Arc::new(InMemoryDirectory::new());

    // Step 1: Create an identity on the first installation
    println!("Step 1: Creating identity...");
    let phone = SessionManager::new(
        "alice",
        SecurityConfig::default(),
        Arc::new(SecureStore::new()),
        directory.clone(),
    )
    .expect("Invalid configuration");
    phone
        .load_or_create_identity()
        .await
        .expect("Failed to create identity");

    println!("  Registration ID: {}", phone.registration_id().unwrap());
    println!("  Fingerprint:     {}", phone.local_fingerprint().unwrap());
    println!();

    // Step 2: Export it under a password
    println!("Step 2: Exporting backup (PBKDF2, 100k iterations)...");
    let backup = phone
        .export_identity("correct-horse")
        .await
        .expect("Failed to export identity");

    println!("  Backup string ({} bytes):", backup.encoded.len());
    println!("  {}", backup.encoded);
    println!();

    // Step 3: Restore on a second installation
    println!("Step 3: Restoring on a new installation...");
    let laptop = SessionManager::new(
        "alice",
        SecurityConfig::default(),
        Arc::new(SecureStore::new()),
        directory.clone(),
    )
    .expect("Invalid configuration");

    match laptop
        .restore_identity_from_encoded(&backup.encoded, "wrong-horse")
        .await
    {
        Err(Error::DecryptionFailed) => println!("  [OK] Wrong password rejected"),
        other => println!("  [FAILED] Unexpected result: {:?}", other.map(|_| ())),
    }

    laptop
        .restore_identity_from_encoded(&backup.encoded, "correct-horse")
        .await
        .expect("Failed to restore identity");

    let original = phone.local_fingerprint().unwrap();
    let restored = laptop.local_fingerprint().unwrap();
    println!("  Original fingerprint: {}", original);
    println!("  Restored fingerprint: {}", restored);
    if original == restored {
        println!("  [OK] Fingerprints match - restore successful!");
    } else {
        println!("  [FAILED] Fingerprints do not match!");
    }
    println!();

    println!("=== Example Complete ===");
}
