//! Settings-store collaborator.
//!
//! The application persists one [`SecuritySettings`] record per user in its
//! own document store. The core only needs get and set.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::settings::SecuritySettings;

/// Persistence for per-user security settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Stored settings for `user_id`, or `None` if the user has none yet
    async fn get_security_settings(&self, user_id: &str) -> Result<Option<SecuritySettings>>;

    /// Replace the stored settings for `user_id`
    async fn set_security_settings(&self, user_id: &str, settings: &SecuritySettings) -> Result<()>;
}

/// Settings store keeping JSON documents in memory
///
/// Round-tripping through JSON means records get the same validation as
/// ones loaded from a real document store.
#[derive(Default)]
pub struct InMemorySettingsStore {
    documents: RwLock<HashMap<String, String>>,
}

impl InMemorySettingsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw JSON document for `user_id`
    pub fn document(&self, user_id: &str) -> Option<String> {
        self.documents.read().get(user_id).cloned()
    }

    /// Overwrite a document without validation
    pub fn insert_document(&self, user_id: &str, json: impl Into<String>) {
        self.documents.write().insert(user_id.to_string(), json.into());
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get_security_settings(&self, user_id: &str) -> Result<Option<SecuritySettings>> {
        let Some(json) = self.document(user_id) else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| Error::StorageCorrupted(format!("settings for {}: {}", user_id, e)))
    }

    async fn set_security_settings(&self, user_id: &str, settings: &SecuritySettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        self.documents.write().insert(user_id.to_string(), json);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let store = InMemorySettingsStore::new();
        assert!(store.get_security_settings("alice").await.unwrap().is_none());

        let settings = SecuritySettings {
            encryption_enabled: true,
            ..Default::default()
        };
        store.set_security_settings("alice", &settings).await.unwrap();

        let loaded = store.get_security_settings("alice").await.unwrap().unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_invalid_document_is_corruption() {
        let store = InMemorySettingsStore::new();
        store.insert_document("alice", r#"{"twoFactor":{"enabled":true}}"#);

        assert!(matches!(
            store.get_security_settings("alice").await,
            Err(Error::StorageCorrupted(_))
        ));
    }
}
