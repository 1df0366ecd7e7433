//! # Storage
//!
//! Two kinds of persistence with different trust levels:
//!
//! - [`SecureStore`]: private key material, owned by the core
//! - [`SettingsStore`]: the per-user security record, owned by the host
//!   application and reached through a trait

mod secure_store;
mod settings_store;

pub use secure_store::{keys as secure_keys, SecureStore};
pub use settings_store::{InMemorySettingsStore, SettingsStore};
