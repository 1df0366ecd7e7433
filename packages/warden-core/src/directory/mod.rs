//! # Directory Collaborator
//!
//! Where public pre-key bundles are published and fetched, keyed by user id.
//!
//! ```text
//! ┌──────────────┐  publish_bundle(alice, bundle)   ┌──────────────┐
//! │ Alice's core │ ───────────────────────────────► │              │
//! └──────────────┘                                  │  Directory   │
//! ┌──────────────┐  fetch_bundle(alice)             │              │
//! │  Bob's core  │ ◄─────────────────────────────── │              │
//! └──────────────┘                                  └──────┬───────┘
//!         ▲          DirectoryEvent::BundlePublished       │
//!         └──────────────── subscribe() (optional) ────────┘
//! ```
//!
//! The core never retries directory calls. Every call is bounded by the
//! configured timeout and failures surface as errors.

mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::session::PreKeyBundle;

pub use memory::InMemoryDirectory;

/// Change notifications emitted by a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    /// `user_id` replaced their published bundle
    BundlePublished {
        /// Owner of the new bundle
        user_id: String,
    },
    /// `user_id` removed their bundle
    BundleRemoved {
        /// Former owner
        user_id: String,
    },
}

impl DirectoryEvent {
    /// User the event is about
    pub fn user_id(&self) -> &str {
        match self {
            DirectoryEvent::BundlePublished { user_id } | DirectoryEvent::BundleRemoved { user_id } => {
                user_id
            }
        }
    }
}

/// Key-value store of public pre-key bundles
#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish `bundle` for `user_id`, replacing any previous one
    async fn publish_bundle(&self, user_id: &str, bundle: &PreKeyBundle) -> Result<()>;

    /// Fetch the bundle published by `user_id`, if any
    async fn fetch_bundle(&self, user_id: &str) -> Result<Option<PreKeyBundle>>;

    /// Optional change stream
    ///
    /// Directories without real-time delivery return `None`.
    fn subscribe(&self) -> Option<broadcast::Receiver<DirectoryEvent>> {
        None
    }
}
