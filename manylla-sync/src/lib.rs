//! Zero-knowledge sync engine for Manylla.
//!
//! Keeps one encrypted JSON payload in step across a family's devices:
//! - Debounced push and interval pull against a blind relay
//! - Structural merge of local and remote snapshots
//! - Bounded offline queue replayed on reconnect
//! - Short invite codes for adding a device
//!
//! The relay only ever sees a sync id and ciphertext; keys are derived from
//! the recovery phrase on each device (see `manylla-crypto`).

pub mod api_client;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod device;
pub mod error;
pub mod invite;
pub mod listeners;
pub mod outbox;
pub mod store;
pub mod sync_engine;
pub mod types;

pub use api_client::{SyncApiClient, SyncTransport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use conflict::ConflictResolver;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use invite::{InviteCode, InviteCodec, JoinInput};
pub use listeners::ListenerToken;
pub use store::{FileStore, MemoryPayloadStore, MemoryStore, PayloadStore, SecureStore};
pub use sync_engine::{SyncDeps, SyncEngine};
pub use types::*;
