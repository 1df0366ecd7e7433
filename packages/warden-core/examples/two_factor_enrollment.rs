//! # Two-Factor Enrollment Example
//!
//! Walks through TOTP enrollment, sign-in with a code, sign-in with a
//! recovery code, and disabling 2FA.
//!
//! ## Run
//!
//! ```bash
//! cargo run --example two_factor_enrollment
//! ```

use std::sync::Arc;

use warden_core::totp;
use warden_core::{
    Confirmation, InMemoryDirectory, InMemorySettingsStore, SecureStore, SecurityConfig,
    SecurityFacade,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Warden Core: Two-Factor Enrollment Example ===\n");

    let facade = SecurityFacade::new(
        "alice",
        SecurityConfig::default(),
        Arc::new(SecureStore::new()),
        Arc::new(InMemoryDirectory::new()),
        Arc::new(InMemorySettingsStore::new()),
    )
    .expect("Invalid configuration");
    facade.initialize().await.expect("Failed to initialize");

    // Step 1: Begin enrollment
    println!("Step 1: Generating secret...");
    let setup = facade
        .begin_two_factor_enrollment("alice@example.com")
        .await
        .expect("Failed to begin enrollment");

    println!("  Secret:           {}", setup.secret.to_base32().as_str());
    println!("  Provisioning URI: {}", setup.provisioning_uri);
    println!("  State:            {:?}", facade.two_factor_state().await.unwrap());
    println!();

    // Step 2: Confirm with the code the authenticator app shows
    println!("Step 2: Confirming with the current code...");
    let code = totp::code(&setup.secret, warden_core::time::now_unix_seconds());
    let codes = facade
        .confirm_two_factor_enrollment(&code)
        .await
        .expect("Code rejected");

    println!("  State: {:?}", facade.two_factor_state().await.unwrap());
    println!("  Recovery codes (show once!):");
    for recovery in codes.codes() {
        println!("    {}", recovery);
    }
    println!();

    // Step 3: Sign in
    println!("Step 3: Signing in...");
    let now = totp::code(&setup.secret, warden_core::time::now_unix_seconds());
    println!(
        "  With TOTP code:     {:?}",
        facade.verify_second_factor(&now).await.unwrap()
    );
    println!(
        "  With recovery code: {:?}",
        facade.verify_second_factor(&codes.codes()[0]).await.unwrap()
    );
    println!(
        "  Same code again:    {}",
        facade
            .verify_second_factor(&codes.codes()[0])
            .await
            .unwrap_err()
    );
    println!();

    // Step 4: Disable
    println!("Step 4: Disabling two-factor...");
    if let Err(e) = facade.disable_two_factor(Confirmation::NotConfirmed).await {
        println!("  Without confirmation: {}", e);
    }
    facade
        .disable_two_factor(Confirmation::Confirmed)
        .await
        .expect("Failed to disable");
    println!("  State: {:?}", facade.two_factor_state().await.unwrap());
    println!();

    println!("=== Example Complete ===");
}
