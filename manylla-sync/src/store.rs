//! Collaborator interfaces owned by the embedding application.
//!
//! The sync layer never talks to platform storage directly. The app picks a
//! [`SecureStore`] for the four sync keys and a [`PayloadStore`] for its own
//! data, and hands both to the engine at startup.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted flag, `"true"` while sync is enabled.
pub const KEY_SYNC_ENABLED: &str = "sync_enabled";
pub const KEY_RECOVERY_PHRASE: &str = "recovery_phrase";
pub const KEY_SYNC_ID: &str = "sync_id";
pub const KEY_DEVICE_ID: &str = "device_id";
/// Locally issued invite codes (JSON map keyed by code).
pub const KEY_INVITES: &str = "sync_invites";

/// Key-value store for sync secrets.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn get(&self, key: &str) -> SyncResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> SyncResult<()>;
    async fn remove(&self, key: &str) -> SyncResult<()>;
}

/// Source and sink of the application's payload.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn load(&self) -> SyncResult<Option<Value>>;
    async fn save(&self, payload: &Value) -> SyncResult<()>;
}

/// In-memory [`SecureStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl SecureStore for MemoryStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// [`SecureStore`] persisted as a JSON object in a single file.
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct FileStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> SyncResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(SyncError::Storage(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::Storage(format!("failed to create {}: {e}", parent.display())))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::Storage(format!("failed to replace {}: {e}", self.path.display())))?;
        debug!("persisted {} sync keys to {}", entries.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl SecureStore for FileStore {
    async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let _guard = self.write_lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

/// In-memory [`PayloadStore`].
#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    payload: Mutex<Option<Value>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Mutex::new(Some(payload)),
        }
    }

    /// Current payload, for inspection.
    pub fn snapshot(&self) -> Option<Value> {
        self.payload.lock().clone()
    }

    pub fn replace(&self, payload: Option<Value>) {
        *self.payload.lock() = payload;
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn load(&self) -> SyncResult<Option<Value>> {
        Ok(self.payload.lock().clone())
    }

    async fn save(&self, payload: &Value) -> SyncResult<()> {
        *self.payload.lock() = Some(payload.clone());
        Ok(())
    }
}
