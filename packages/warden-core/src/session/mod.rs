//! # Encrypted Sessions
//!
//! Pairwise sessions established asynchronously from published pre-key
//! bundles, then advanced by a symmetric chain ratchet per direction.
//!
//! ## Establishment
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     SESSION ESTABLISHMENT                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Bob (responder)                       Alice (initiator)               │
//! │  ───────────────                       ─────────────────               │
//! │                                                                         │
//! │  load_or_create_identity()                                             │
//! │  publish PreKeyBundle ─────► Directory ─────► fetch_bundle("bob")      │
//! │                                               verify SPK signature     │
//! │                                               X3DH(IK_A, EK; bundle)   │
//! │                                               encrypt → PreKey{..}     │
//! │                                                     │                   │
//! │  decrypt("alice", PreKey{header, msg}) ◄────────────┘                   │
//! │    X3DH(IK_B, SPK_B, OPK_B; header)                                    │
//! │    authenticate msg, then consume OPK_B                                │
//! │    republish bundle                                                    │
//! │                                                                         │
//! │  encrypt → Message{..} ─────────────────────► decrypt                   │
//! │                                               (stops sending PreKey)   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`prekeys`]: published bundles and the private pre-key store
//! - [`x3dh`]: the key agreement
//! - [`ratchet`]: per-direction HMAC chain
//! - [`envelope`]: JSON wire format
//! - `state`: a single session
//! - `identity`: identity plus registration id
//! - `manager`: [`SessionManager`]

pub mod envelope;
mod identity;
mod manager;
pub mod prekeys;
pub mod ratchet;
mod state;
pub mod x3dh;

pub use envelope::{Envelope, PreKeyHeader, SessionMessage};
pub use identity::{LocalIdentity, MAX_REGISTRATION_ID};
pub use manager::{IdentityBackup, SessionInfo, SessionManager};
pub use prekeys::{encode_public_key, LocalPreKeys, OneTimePreKey, PreKeyBundle, SignedPreKey};
pub use ratchet::{ChainRatchet, MessageKey};
pub use state::{Session, SessionRole};
