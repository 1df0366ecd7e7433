//! In-process directory for tests, demos and single-host embedding.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use super::{Directory, DirectoryEvent};
use crate::error::{Error, Result};
use crate::session::PreKeyBundle;

const EVENT_CAPACITY: usize = 64;

/// Directory backed by a map, with knobs for simulating outages
pub struct InMemoryDirectory {
    bundles: RwLock<HashMap<String, PreKeyBundle>>,
    events: broadcast::Sender<DirectoryEvent>,
    fetches: AtomicUsize,
    offline: AtomicBool,
    fetch_delay_ms: AtomicU64,
}

impl InMemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bundles: RwLock::new(HashMap::new()),
            events,
            fetches: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
            fetch_delay_ms: AtomicU64::new(0),
        }
    }

    /// Make every call fail until set back to `false`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay each fetch, to widen race windows in tests
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of `fetch_bundle` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Currently published bundle for `user_id`
    pub fn bundle(&self, user_id: &str) -> Option<PreKeyBundle> {
        self.bundles.read().get(user_id).cloned()
    }

    /// Replace a published bundle without validation (tests only need this
    /// to plant tampered bundles)
    pub fn insert_raw(&self, user_id: &str, bundle: PreKeyBundle) {
        self.bundles.write().insert(user_id.to_string(), bundle);
    }

    /// Remove a user's bundle
    pub fn remove_bundle(&self, user_id: &str) -> bool {
        let removed = self.bundles.write().remove(user_id).is_some();
        if removed {
            let _ = self.events.send(DirectoryEvent::BundleRemoved {
                user_id: user_id.to_string(),
            });
        }
        removed
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::DirectoryError("directory unreachable".into()));
        }
        Ok(())
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn publish_bundle(&self, user_id: &str, bundle: &PreKeyBundle) -> Result<()> {
        self.ensure_online()?;
        self.bundles
            .write()
            .insert(user_id.to_string(), bundle.clone());
        debug!(user_id, one_time_pre_keys = bundle.one_time_pre_keys.len(), "Bundle published");

        // No subscribers is not an error.
        let _ = self.events.send(DirectoryEvent::BundlePublished {
            user_id: user_id.to_string(),
        });
        Ok(())
    }

    async fn fetch_bundle(&self, user_id: &str) -> Result<Option<PreKeyBundle>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.ensure_online()?;
        Ok(self.bundles.read().get(user_id).cloned())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<DirectoryEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::IdentityKeyPair;
    use crate::session::LocalPreKeys;

    fn sample_bundle() -> PreKeyBundle {
        let identity = IdentityKeyPair::generate();
        let mut pre_keys = LocalPreKeys::default();
        pre_keys.replenish(&identity, 3);
        pre_keys.bundle(&identity, 42).unwrap()
    }

    #[tokio::test]
    async fn test_publish_fetch() {
        let directory = InMemoryDirectory::new();
        let bundle = sample_bundle();

        directory.publish_bundle("alice", &bundle).await.unwrap();
        let fetched = directory.fetch_bundle("alice").await.unwrap().unwrap();

        assert_eq!(fetched, bundle);
        assert!(directory.fetch_bundle("bob").await.unwrap().is_none());
        assert_eq!(directory.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_publish_replaces() {
        let directory = InMemoryDirectory::new();
        directory.publish_bundle("alice", &sample_bundle()).await.unwrap();
        let second = sample_bundle();
        directory.publish_bundle("alice", &second).await.unwrap();

        assert_eq!(directory.bundle("alice"), Some(second));
    }

    #[tokio::test]
    async fn test_offline_errors() {
        let directory = InMemoryDirectory::new();
        directory.set_offline(true);

        assert!(matches!(
            directory.fetch_bundle("alice").await,
            Err(Error::DirectoryError(_))
        ));
        assert!(directory.publish_bundle("alice", &sample_bundle()).await.is_err());
    }

    #[tokio::test]
    async fn test_subscribe_sees_publications() {
        let directory = InMemoryDirectory::new();
        let mut events = directory.subscribe().unwrap();

        directory.publish_bundle("alice", &sample_bundle()).await.unwrap();
        let event = events.recv().await.unwrap();

        assert_eq!(
            event,
            DirectoryEvent::BundlePublished {
                user_id: "alice".into()
            }
        );
        assert_eq!(event.user_id(), "alice");
    }
}
