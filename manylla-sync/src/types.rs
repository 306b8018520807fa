//! Shared types for sync operations.

use crate::error::ErrorKind;
use manylla_crypto::{RecoveryPhrase, SyncId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent with every push.
pub const PROTOCOL_VERSION: &str = "2.0.0";

// ── Wire types ──

/// Body of `POST /sync_push`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushRequest {
    pub sync_id: String,
    /// Wire-encoded encrypted blob.
    pub data: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub device_id: String,
    pub version: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PullResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
}

// ── Engine state ──

/// Status of the sync subsystem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    #[default]
    NotSetup,
    Enabling,
    Idle,
    Syncing,
    Error,
}

/// Snapshot of the engine's state.
#[derive(Clone, Debug, Default)]
pub struct SyncState {
    pub is_enabled: bool,
    pub sync_id: Option<SyncId>,
    pub recovery_phrase: Option<RecoveryPhrase>,
    pub status: SyncStatus,
    /// Unix milliseconds of the last successful push or pull.
    pub last_sync_time: Option<i64>,
    pub last_error: Option<String>,
}

/// Operational summary, safe to show in diagnostics (no secrets).
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub initialized: bool,
    pub polling: bool,
    pub online: bool,
    pub status: SyncStatus,
    pub sync_id: Option<SyncId>,
    pub last_pull: Option<i64>,
    pub last_sync_time: Option<i64>,
    pub offline_queue_len: usize,
}

/// How sync is being enabled.
#[derive(Clone, Debug)]
pub enum EnableMode {
    /// Start a new sync group with a freshly generated phrase.
    New,
    /// Join an existing group with a phrase typed or scanned by the user.
    Join(String),
}

/// Result of enabling sync.
#[derive(Clone, Debug)]
pub struct EnableOutcome {
    pub sync_id: SyncId,
    pub recovery_phrase: RecoveryPhrase,
}

/// Operation recorded while offline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOperation {
    Push,
    Pull,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueEntry {
    pub operation: QueueOperation,
    pub payload: Option<Value>,
    /// Unix milliseconds when the entry was queued.
    pub timestamp: i64,
}

/// Events broadcast to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    Enabled { sync_id: SyncId },
    Disabled,
    Pushed { timestamp: i64 },
    /// Remote data was merged and saved locally.
    DataUpdated(Value),
    Queued { operation: QueueOperation, queue_len: usize },
    Online,
    Offline,
    Error { kind: ErrorKind, message: String },
}
