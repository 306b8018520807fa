//! Shared helpers for engine integration tests: an in-memory relay and
//! engine construction with cheap key derivation.

#![allow(dead_code)]

use async_trait::async_trait;
use manylla_crypto::SecureRandom;
use manylla_sync::{
    HealthStatus, MemoryPayloadStore, MemoryStore, PushRequest, SyncConfig, SyncDeps, SyncEngine,
    SyncError, SyncEvent, SyncResult, SyncTransport,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("manylla_sync=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Failure the relay should answer a push with.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Unauthorized,
    ServerError,
    Rejected,
}

impl Fault {
    fn into_error(self) -> SyncError {
        match self {
            Fault::Unauthorized => SyncError::Auth("sync_push returned 401 Unauthorized".into()),
            Fault::ServerError => SyncError::Network("sync_push returned 503 Service Unavailable".into()),
            Fault::Rejected => SyncError::Api("Invalid sync ID".into()),
        }
    }
}

/// Blind relay keeping the latest blob per sync id.
#[derive(Default)]
pub struct FakeRelay {
    blobs: Mutex<HashMap<String, String>>,
    pushes: Mutex<Vec<PushRequest>>,
    push_attempts: Mutex<usize>,
    pull_count: Mutex<usize>,
    faults: Mutex<VecDeque<Fault>>,
    push_delay: Mutex<Option<Duration>>,
    pull_delay: Mutex<Option<Duration>>,
    unhealthy: Mutex<bool>,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answers the next pushes with `faults`, in order.
    pub fn fail_next(&self, faults: &[Fault]) {
        self.faults.lock().extend(faults.iter().copied());
    }

    pub fn delay_pushes(&self, delay: Duration) {
        *self.push_delay.lock() = Some(delay);
    }

    pub fn delay_pulls(&self, delay: Duration) {
        *self.pull_delay.lock() = Some(delay);
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        *self.unhealthy.lock() = unhealthy;
    }

    pub fn store_raw(&self, sync_id: &str, data: &str) {
        self.blobs.lock().insert(sync_id.to_string(), data.to_string());
    }

    pub fn blob(&self, sync_id: &str) -> Option<String> {
        self.blobs.lock().get(sync_id).cloned()
    }

    /// Successful pushes, in arrival order.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    pub fn push_attempts(&self) -> usize {
        *self.push_attempts.lock()
    }

    pub fn pull_count(&self) -> usize {
        *self.pull_count.lock()
    }
}

#[async_trait]
impl SyncTransport for FakeRelay {
    async fn health(&self) -> SyncResult<HealthStatus> {
        if *self.unhealthy.lock() {
            Ok(HealthStatus::Unhealthy)
        } else {
            Ok(HealthStatus::Healthy)
        }
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<()> {
        *self.push_attempts.lock() += 1;
        let delay = *self.push_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault.into_error());
        }
        self.blobs
            .lock()
            .insert(request.sync_id.clone(), request.data.clone());
        self.pushes.lock().push(request.clone());
        Ok(())
    }

    async fn pull(&self, sync_id: &str, _device_id: &str) -> SyncResult<Option<String>> {
        *self.pull_count.lock() += 1;
        let delay = *self.pull_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.blobs.lock().get(sync_id).cloned())
    }
}

/// One device: engine plus handles on its stores.
pub struct Device {
    pub engine: SyncEngine,
    pub store: Arc<MemoryStore>,
    pub payloads: Arc<MemoryPayloadStore>,
    pub events: Arc<Mutex<Vec<SyncEvent>>>,
}

pub fn device(relay: &Arc<FakeRelay>) -> Device {
    device_with_store(relay, Arc::new(MemoryStore::new()))
}

pub fn device_with_store(relay: &Arc<FakeRelay>, store: Arc<MemoryStore>) -> Device {
    build_device(relay, store, test_config(), SecureRandom::os())
}

pub fn device_with_config(relay: &Arc<FakeRelay>, config: SyncConfig) -> Device {
    build_device(relay, Arc::new(MemoryStore::new()), config, SecureRandom::os())
}

pub fn device_with_rng(relay: &Arc<FakeRelay>, rng: SecureRandom) -> Device {
    build_device(relay, Arc::new(MemoryStore::new()), test_config(), rng)
}

pub fn test_config() -> SyncConfig {
    SyncConfig::test("http://relay.invalid")
}

fn build_device(
    relay: &Arc<FakeRelay>,
    store: Arc<MemoryStore>,
    config: SyncConfig,
    rng: SecureRandom,
) -> Device {
    let payloads = Arc::new(MemoryPayloadStore::new());
    let deps = SyncDeps::new(store.clone(), relay.clone(), payloads.clone()).with_rng(rng);
    let engine = SyncEngine::new(config, deps).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    engine.subscribe(move |event| sink.lock().push(event.clone()));

    Device {
        engine,
        store,
        payloads,
        events,
    }
}
