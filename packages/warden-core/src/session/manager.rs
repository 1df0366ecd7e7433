//! # Session Manager
//!
//! Owns the installation identity, the local pre-key store and one session
//! per correspondent.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SESSION MANAGER STATE                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  identity      Option<Arc<LocalIdentity>>   (set once per install)     │
//! │  pre_keys      Mutex<LocalPreKeys>          (peek + take under lock)   │
//! │  sessions      user_id → Arc<AsyncMutex<Option<Session>>>              │
//! │  bundle_cache  user_id → last fetched PreKeyBundle                     │
//! │                                                                         │
//! │  encrypt(R) / decrypt(R) / ensure_session(R)                           │
//! │    1. take R's slot (one in-flight establishment per correspondent)   │
//! │    2. memory → secure store → directory                                │
//! │    3. mutate, persist to the secure store, release                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Slots are per correspondent, so establishing a session with Bob never
//! waits on Carol. Directory calls are bounded by the configured timeout and
//! never retried here.
//!
//! Session operations share the `lifecycle` lock; restoring an identity takes
//! it exclusively, so nothing in flight can persist state for the identity
//! being replaced.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use super::envelope::{Envelope, PreKeyHeader, SessionMessage};
use super::identity::LocalIdentity;
use super::prekeys::{LocalPreKeys, PreKeyBundle};
use super::state::{Session, SessionRole};
use super::x3dh;
use crate::backup::{BackupCipher, EncryptedBackup};
use crate::config::SecurityConfig;
use crate::crypto::{Fingerprint, PublicIdentityKey};
use crate::directory::{Directory, DirectoryEvent};
use crate::error::{Error, Result};
use crate::storage::{secure_keys, SecureStore};

type SessionSlot = Arc<AsyncMutex<Option<Session>>>;

/// Password-wrapped identity export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityBackup {
    /// Structured backup record
    pub backup: EncryptedBackup,
    /// JSON text form of `backup`
    pub encoded: String,
}

/// Summary of an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Correspondent's user id
    pub user_id: String,
    /// Correspondent's public identity
    pub remote_identity: PublicIdentityKey,
    /// Correspondent's registration id
    pub remote_registration_id: u32,
    /// Our side of the key agreement
    pub role: SessionRole,
    /// Unix timestamp (seconds) of establishment
    pub created_at: i64,
}

impl SessionInfo {
    fn of(user_id: &str, session: &Session) -> Self {
        Self {
            user_id: user_id.to_string(),
            remote_identity: *session.remote_identity(),
            remote_registration_id: session.remote_registration_id(),
            role: session.role(),
            created_at: session.created_at(),
        }
    }
}

/// Per-correspondent encrypted sessions for one local user
pub struct SessionManager {
    user_id: String,
    config: SecurityConfig,
    store: Arc<SecureStore>,
    directory: Arc<dyn Directory>,

    identity: RwLock<Option<Arc<LocalIdentity>>>,
    identity_init: AsyncMutex<()>,
    lifecycle: AsyncRwLock<()>,
    published: AtomicBool,

    pre_keys: Mutex<LocalPreKeys>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    bundle_cache: RwLock<HashMap<String, PreKeyBundle>>,
}

impl SessionManager {
    /// Create a manager for `user_id`
    ///
    /// Nothing is loaded until [`load_or_create_identity`](Self::load_or_create_identity).
    pub fn new(
        user_id: impl Into<String>,
        config: SecurityConfig,
        store: Arc<SecureStore>,
        directory: Arc<dyn Directory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            user_id: user_id.into(),
            config,
            store,
            directory,
            identity: RwLock::new(None),
            identity_init: AsyncMutex::new(()),
            lifecycle: AsyncRwLock::new(()),
            published: AtomicBool::new(false),
            pre_keys: Mutex::new(LocalPreKeys::default()),
            sessions: Mutex::new(HashMap::new()),
            bundle_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Local user id bundles are published under
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ========================================================================
    // IDENTITY
    // ========================================================================

    /// Load the persisted identity, or create and persist one, then publish
    /// a pre-key bundle
    ///
    /// Safe to call repeatedly and concurrently: only the first call does
    /// any work, later calls return the same identity.
    pub async fn load_or_create_identity(&self) -> Result<PublicIdentityKey> {
        let _guard = self.identity_init.lock().await;

        let existing = self.identity.read().clone();
        let identity = match existing {
            Some(identity) => identity,
            None => {
                let identity = Arc::new(self.load_or_generate()?);
                *self.identity.write() = Some(identity.clone());
                identity
            }
        };

        if !self.published.load(Ordering::SeqCst) {
            self.publish_pre_key_bundle().await?;
        }
        Ok(identity.public_key())
    }

    fn load_or_generate(&self) -> Result<LocalIdentity> {
        let count = self.config.one_time_pre_key_count;

        if let Some(identity) = LocalIdentity::load(&self.store)? {
            let mut pre_keys = match self.store.retrieve(secure_keys::PRE_KEYS)? {
                Some(bytes) => LocalPreKeys::from_bytes(&bytes)?,
                None => LocalPreKeys::default(),
            };
            let available = pre_keys.one_time_count() as u32;
            if pre_keys.current_signed_id().is_none() || available < count {
                pre_keys.replenish(identity.key_pair(), count.saturating_sub(available));
                self.store.store(secure_keys::PRE_KEYS, &pre_keys.to_bytes()?)?;
            }
            *self.pre_keys.lock() = pre_keys;

            tracing::info!(
                "Loaded identity for {} (registration id {})",
                self.user_id,
                identity.registration_id()
            );
            return Ok(identity);
        }

        // Identity and pre-keys are persisted before anything can use them.
        let identity = LocalIdentity::generate();
        identity.save(&self.store)?;

        let mut pre_keys = LocalPreKeys::default();
        pre_keys.replenish(identity.key_pair(), count);
        self.store.store(secure_keys::PRE_KEYS, &pre_keys.to_bytes()?)?;
        *self.pre_keys.lock() = pre_keys;

        tracing::info!(
            "Created identity for {} (registration id {})",
            self.user_id,
            identity.registration_id()
        );
        Ok(identity)
    }

    fn identity(&self) -> Result<Arc<LocalIdentity>> {
        self.identity.read().clone().ok_or(Error::NoIdentity)
    }

    /// Local public identity
    pub fn identity_key(&self) -> Result<PublicIdentityKey> {
        Ok(self.identity()?.public_key())
    }

    /// Local registration id
    pub fn registration_id(&self) -> Result<u32> {
        Ok(self.identity()?.registration_id())
    }

    /// Fingerprint of the local identity
    pub fn local_fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::of(&self.identity_key()?))
    }

    // ========================================================================
    // PRE-KEYS
    // ========================================================================

    /// Publish the current bundle, replacing the previous publication
    pub async fn publish_pre_key_bundle(&self) -> Result<PreKeyBundle> {
        let identity = self.identity()?;
        let bundle = self
            .pre_keys
            .lock()
            .bundle(identity.key_pair(), identity.registration_id())?;

        self.bounded("publish bundle", self.directory.publish_bundle(&self.user_id, &bundle))
            .await?;
        self.published.store(true, Ordering::SeqCst);

        tracing::info!(
            "Published bundle for {} with {} one-time pre-keys",
            self.user_id,
            bundle.one_time_pre_keys.len()
        );
        Ok(bundle)
    }

    /// Replace every published pre-key with fresh ones and republish
    pub async fn refresh_pre_keys(&self) -> Result<PreKeyBundle> {
        let identity = self.identity()?;
        {
            let mut pre_keys = self.pre_keys.lock();
            pre_keys.clear_one_time();
            pre_keys.rotate_signed(identity.key_pair());
            pre_keys.replenish(identity.key_pair(), self.config.one_time_pre_key_count);
            self.store.store(secure_keys::PRE_KEYS, &pre_keys.to_bytes()?)?;
        }
        self.publish_pre_key_bundle().await
    }

    /// Unused local one-time pre-keys
    pub fn one_time_pre_key_count(&self) -> usize {
        self.pre_keys.lock().one_time_count()
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Session with `remote`, establishing one from their published bundle
    /// if there is none
    pub async fn ensure_session(&self, remote: &str) -> Result<SessionInfo> {
        let _lifecycle = self.lifecycle.read().await;
        let slot = self.slot(remote);
        let mut guard = slot.lock().await;
        let session = self.ensure_locked(remote, &mut guard).await?;
        Ok(SessionInfo::of(remote, session))
    }

    /// Whether a session with `remote` exists
    pub fn has_session(&self, remote: &str) -> Result<bool> {
        self.store.exists(&secure_keys::session(remote))
    }

    /// Drop the session with `remote`, in memory and in the secure store
    ///
    /// The next [`encrypt`](Self::encrypt) establishes a fresh one from the
    /// correspondent's current bundle. Use this when the correspondent keeps
    /// rejecting our initial messages. Returns whether a session existed.
    pub async fn reset_session(&self, remote: &str) -> Result<bool> {
        let _lifecycle = self.lifecycle.read().await;
        let slot = self.slot(remote);
        let mut guard = slot.lock().await;

        let cached = guard.take().is_some();
        let stored = self.store.delete(&secure_keys::session(remote))?;
        if cached || stored {
            tracing::info!("Reset session with {}", remote);
        }
        Ok(cached || stored)
    }

    /// Encrypt `plaintext` for `remote`
    ///
    /// Returns a `PreKey` envelope until `remote` has replied on this
    /// session, then `Message` envelopes.
    pub async fn encrypt(&self, remote: &str, plaintext: &[u8]) -> Result<Envelope> {
        let _lifecycle = self.lifecycle.read().await;
        let slot = self.slot(remote);
        let mut guard = slot.lock().await;
        let session = self.ensure_locked(remote, &mut guard).await?;

        let envelope = session.encrypt(plaintext)?;
        self.persist_session(remote, session)?;

        tracing::debug!(
            "Encrypted message {} for {}",
            envelope.message().generation,
            remote
        );
        Ok(envelope)
    }

    /// Decrypt an envelope from `sender`
    ///
    /// A `PreKey` envelope for an unknown session establishes one, consuming
    /// the referenced one-time pre-key. Anything that fails to authenticate,
    /// including a replay, is [`Error::DecryptionFailed`].
    pub async fn decrypt(&self, sender: &str, envelope: &Envelope) -> Result<Vec<u8>> {
        let _lifecycle = self.lifecycle.read().await;
        let slot = self.slot(sender);
        let mut guard = slot.lock().await;
        self.load_persisted(sender, &mut guard)?;
        let max_skip = self.config.max_skipped_message_keys;

        match envelope {
            Envelope::Message(message) => {
                let Some(session) = guard.as_mut() else {
                    tracing::warn!("Message from {} without a session", sender);
                    return Err(Error::DecryptionFailed);
                };
                let plaintext = session.decrypt(message, max_skip)?;
                self.persist_session(sender, session)?;
                tracing::debug!("Decrypted message {} from {}", message.generation, sender);
                Ok(plaintext)
            }
            Envelope::PreKey { header, message } => {
                if let Some(session) = guard.as_mut() {
                    // The initiator repeats the header until we reply.
                    if session.base_key() == &header.base_key {
                        let plaintext = session.decrypt(message, max_skip)?;
                        self.persist_session(sender, session)?;
                        return Ok(plaintext);
                    }
                }

                let (session, plaintext, consumed) = self.accept_pre_key(header, message)?;
                if guard.is_some() {
                    tracing::warn!("Replacing existing session with {}", sender);
                }
                self.persist_session(sender, &session)?;
                *guard = Some(session);
                drop(guard);

                tracing::info!("Accepted session from {}", sender);
                if consumed {
                    self.after_one_time_consumed().await;
                }
                Ok(plaintext)
            }
        }
    }

    /// Responder side of establishment
    ///
    /// The one-time pre-key is only removed once the first message has
    /// authenticated, and peek and removal happen under one lock, so a key
    /// can back at most one session. Base keys accepted under each signed
    /// pre-key are remembered, so an initial message without a one-time key
    /// cannot be replayed to roll the session back.
    fn accept_pre_key(
        &self,
        header: &PreKeyHeader,
        message: &SessionMessage,
    ) -> Result<(Session, Vec<u8>, bool)> {
        let identity = self.identity()?;
        let mut pre_keys = self.pre_keys.lock();

        let signed = pre_keys.signed(header.signed_pre_key_id).ok_or_else(|| {
            tracing::warn!("Unknown signed pre-key {}", header.signed_pre_key_id);
            Error::DecryptionFailed
        })?;
        let one_time = match header.one_time_pre_key_id {
            Some(id) => Some(pre_keys.one_time(id).ok_or_else(|| {
                tracing::warn!("One-time pre-key {} already used or unknown", id);
                Error::PreKeyExhausted(id)
            })?),
            None => None,
        };
        if pre_keys.was_accepted(header.signed_pre_key_id, &header.base_key) {
            tracing::warn!("Replayed initial message under signed pre-key {}", header.signed_pre_key_id);
            return Err(Error::DecryptionFailed);
        }

        let root = x3dh::respond(identity.key_pair(), header, &signed, one_time.as_ref())?;
        let mut session = Session::respond(identity.public_key(), &root, header)?;
        let plaintext = session.decrypt(message, self.config.max_skipped_message_keys)?;

        let consumed = match header.one_time_pre_key_id {
            Some(id) => {
                if !pre_keys.take_one_time(id) {
                    return Err(Error::PreKeyExhausted(id));
                }
                tracing::debug!("Consumed one-time pre-key {}", id);
                true
            }
            None => false,
        };
        pre_keys.record_accepted(header.signed_pre_key_id, header.base_key);
        self.store.store(secure_keys::PRE_KEYS, &pre_keys.to_bytes()?)?;

        Ok((session, plaintext, consumed))
    }

    /// Top up the pre-key store if it is running low and republish so the
    /// directory stops offering consumed keys. Failures are logged only.
    async fn after_one_time_consumed(&self) {
        let Ok(identity) = self.identity() else {
            return;
        };

        let target = self.config.one_time_pre_key_count;
        let replenished = {
            let mut pre_keys = self.pre_keys.lock();
            let available = pre_keys.one_time_count() as u32;
            if available < target / 2 {
                pre_keys.replenish(identity.key_pair(), target - available);
                match pre_keys.to_bytes().and_then(|b| self.store.store(secure_keys::PRE_KEYS, &b)) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Failed to persist replenished pre-keys: {}", e);
                        false
                    }
                }
            } else {
                false
            }
        };
        if replenished {
            tracing::info!("Replenished one-time pre-keys for {}", self.user_id);
        }

        if let Err(e) = self.publish_pre_key_bundle().await {
            tracing::warn!("Failed to republish bundle: {}", e);
        }
    }

    async fn ensure_locked<'a>(
        &self,
        remote: &str,
        slot: &'a mut Option<Session>,
    ) -> Result<&'a mut Session> {
        self.load_persisted(remote, slot)?;

        if slot.is_none() {
            let identity = self.identity()?;
            let bundle = self.fetch_bundle(remote).await?;

            let (root, header) = x3dh::initiate(identity.key_pair(), identity.registration_id(), &bundle)?;
            self.forget_cached_one_time(remote, header.one_time_pre_key_id);

            let session = Session::initiate(
                identity.public_key(),
                bundle.identity_key,
                bundle.registration_id,
                &root,
                header,
            )?;
            self.persist_session(remote, &session)?;
            tracing::info!("Established session with {}", remote);
            *slot = Some(session);
        }

        slot.as_mut()
            .ok_or_else(|| Error::Internal("session slot empty after establishment".into()))
    }

    fn load_persisted(&self, remote: &str, slot: &mut Option<Session>) -> Result<()> {
        if slot.is_some() {
            return Ok(());
        }
        if let Some(bytes) = self.store.retrieve(&secure_keys::session(remote))? {
            *slot = Some(Session::from_bytes(&bytes)?);
            tracing::debug!("Loaded persisted session with {}", remote);
        }
        Ok(())
    }

    fn persist_session(&self, remote: &str, session: &Session) -> Result<()> {
        self.store.store(&secure_keys::session(remote), &session.to_bytes()?)
    }

    fn slot(&self, remote: &str) -> SessionSlot {
        self.sessions
            .lock()
            .entry(remote.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    // ========================================================================
    // DIRECTORY
    // ========================================================================

    /// Fresh bundle for `remote`, falling back to the last fetched one if
    /// the directory call fails
    async fn fetch_bundle(&self, remote: &str) -> Result<PreKeyBundle> {
        match self.bounded("fetch bundle", self.directory.fetch_bundle(remote)).await {
            Ok(Some(bundle)) => {
                self.bundle_cache
                    .write()
                    .insert(remote.to_string(), bundle.clone());
                Ok(bundle)
            }
            Ok(None) => {
                self.bundle_cache.write().remove(remote);
                Err(Error::BundleUnavailable(remote.to_string()))
            }
            Err(e) => {
                let cached = self.bundle_cache.read().get(remote).cloned();
                match cached {
                    Some(mut cached) => {
                        // Other initiators may have spent any cached one-time
                        // key; agree against the signed pre-key alone.
                        cached.one_time_pre_keys.clear();
                        tracing::warn!("Bundle fetch for {} failed ({}), using cached bundle", remote, e);
                        Ok(cached)
                    }
                    None => {
                        tracing::warn!("Bundle fetch for {} failed: {}", remote, e);
                        Err(Error::BundleUnavailable(format!("{}: {}", remote, e)))
                    }
                }
            }
        }
    }

    fn forget_cached_one_time(&self, remote: &str, id: Option<u32>) {
        let Some(id) = id else {
            return;
        };
        if let Some(bundle) = self.bundle_cache.write().get_mut(remote) {
            bundle.one_time_pre_keys.retain(|k| k.id != id);
        }
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.directory_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("{} after {:?}", what, limit))),
        }
    }

    /// Drop cached state invalidated by a directory change
    pub fn handle_directory_event(&self, event: &DirectoryEvent) {
        if self.bundle_cache.write().remove(event.user_id()).is_some() {
            tracing::debug!("Invalidated cached bundle for {}", event.user_id());
        }
    }

    /// Follow the directory's change stream in the background
    ///
    /// Returns `None` when the directory has no change stream. The task ends
    /// when the stream closes or the manager is dropped.
    pub fn spawn_directory_watcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut events = self.directory.subscribe()?;
        let weak = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => manager.handle_directory_event(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Directory watcher missed {} events, clearing bundle cache", missed);
                        manager.bundle_cache.write().clear();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Fingerprint of `remote`'s identity
    ///
    /// Uses the identity bound into an existing session, otherwise the one
    /// in their published bundle.
    pub async fn fingerprint_of(&self, remote: &str) -> Result<Fingerprint> {
        let _lifecycle = self.lifecycle.read().await;
        {
            let slot = self.slot(remote);
            let mut guard = slot.lock().await;
            self.load_persisted(remote, &mut guard)?;
            if let Some(session) = guard.as_ref() {
                return Ok(Fingerprint::of(session.remote_identity()));
            }
        }

        let bundle = self.fetch_bundle(remote).await?;
        bundle.verify()?;
        Ok(Fingerprint::of(&bundle.identity_key))
    }

    // ========================================================================
    // BACKUP
    // ========================================================================

    /// Wrap the identity record under `password`
    pub async fn export_identity(&self, password: &str) -> Result<IdentityBackup> {
        let identity = self.identity()?;
        let cipher = BackupCipher::new(self.config.pbkdf2_iterations)?;

        let backup = cipher
            .wrap_blocking(identity.to_bytes()?, Zeroizing::new(password.to_string()))
            .await?;
        let encoded = backup.to_encoded()?;

        tracing::info!("Exported identity backup for {}", self.user_id);
        Ok(IdentityBackup { backup, encoded })
    }

    /// Replace the local identity with one from a backup
    ///
    /// Every session and pre-key belonging to the previous identity is
    /// dropped and a fresh bundle is published.
    pub async fn restore_identity(&self, backup: &EncryptedBackup, password: &str) -> Result<PublicIdentityKey> {
        let cipher = BackupCipher::new(self.config.pbkdf2_iterations)?;
        let bytes = cipher
            .unwrap_blocking(backup.clone(), Zeroizing::new(password.to_string()))
            .await?;
        // A record that authenticates but does not parse is still a bad backup.
        let restored = LocalIdentity::from_bytes(&bytes).map_err(|_| Error::DecryptionFailed)?;

        // Waits for in-flight session operations and holds off new ones.
        let _lifecycle = self.lifecycle.write().await;
        let _guard = self.identity_init.lock().await;

        restored.save(&self.store)?;
        {
            let mut pre_keys = self.pre_keys.lock();
            pre_keys.reset(restored.key_pair(), self.config.one_time_pre_key_count);
            self.store.store(secure_keys::PRE_KEYS, &pre_keys.to_bytes()?)?;
        }

        self.sessions.lock().clear();
        let dropped = self.store.delete_prefix(secure_keys::SESSION_PREFIX);
        self.bundle_cache.write().clear();

        let public = restored.public_key();
        *self.identity.write() = Some(Arc::new(restored));
        self.published.store(false, Ordering::SeqCst);

        tracing::info!("Restored identity for {} ({} sessions dropped)", self.user_id, dropped);

        self.publish_pre_key_bundle().await?;
        Ok(public)
    }

    /// [`restore_identity`](Self::restore_identity) from the text form
    pub async fn restore_identity_from_encoded(&self, encoded: &str, password: &str) -> Result<PublicIdentityKey> {
        let backup = EncryptedBackup::from_encoded(encoded)?;
        self.restore_identity(&backup, password).await
    }
}

// ============================================================================
// TESTS
// ============================================================================
