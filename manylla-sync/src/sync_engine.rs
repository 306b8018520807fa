//! Sync orchestrator.
//!
//! Coordinates, for one enabled sync group:
//! - Debounced pushes of the local payload (quiet period before upload)
//! - Interval polling for data written by other devices
//! - Connectivity probing and the offline queue
//! - Listener notification for every state change
//!
//! [`SyncEngine`] is a cheap handle; clones share one engine. Background
//! tasks run only while sync is enabled and stop when it is disabled.

use crate::api_client::{SyncApiClient, SyncTransport};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::conflict::ConflictResolver;
use crate::device;
use crate::error::{SyncError, SyncResult};
use crate::invite::{self, InviteCode, InviteCodec, JoinInput};
use crate::listeners::{ListenerRegistry, ListenerToken};
use crate::outbox::OfflineQueue;
use crate::store::{KEY_RECOVERY_PHRASE, KEY_SYNC_ENABLED, KEY_SYNC_ID, PayloadStore, SecureStore};
use crate::types::*;

use manylla_crypto::{CryptoError, EncryptionService, RecoveryPhrase, SecureRandom, SyncId, derive_key};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Collaborators injected into the engine.
pub struct SyncDeps {
    pub store: Arc<dyn SecureStore>,
    pub transport: Arc<dyn SyncTransport>,
    pub payloads: Arc<dyn PayloadStore>,
    pub rng: SecureRandom,
    pub clock: Arc<dyn Clock>,
}

impl SyncDeps {
    /// Uses the OS random source and the system clock.
    pub fn new(
        store: Arc<dyn SecureStore>,
        transport: Arc<dyn SyncTransport>,
        payloads: Arc<dyn PayloadStore>,
    ) -> Self {
        Self {
            store,
            transport,
            payloads,
            rng: SecureRandom::os(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: SecureRandom) -> Self {
        self.rng = rng;
        self
    }
}

/// Timers and channels of one enabled session.
struct Session {
    shutdown: watch::Sender<bool>,
    debounce_tx: mpsc::UnboundedSender<Value>,
}

/// Identity of the session an operation started in.
struct Active {
    epoch: u64,
    sync_id: SyncId,
}

struct Inner {
    config: SyncConfig,
    store: Arc<dyn SecureStore>,
    transport: Arc<dyn SyncTransport>,
    payloads: Arc<dyn PayloadStore>,
    rng: SecureRandom,
    clock: Arc<dyn Clock>,
    crypto: EncryptionService,
    invites: InviteCodec,
    listeners: ListenerRegistry,
    state: Mutex<SyncState>,
    queue: Mutex<OfflineQueue>,
    session: Mutex<Option<Session>>,
    last_pull: Mutex<Option<i64>>,
    online: AtomicBool,
    /// Set while the offline queue is being replayed.
    draining: AtomicBool,
    /// Bumped whenever a session starts or ends; stale results are dropped.
    epoch: AtomicU64,
    device_id: OnceCell<String>,
    /// Serializes enable/restore/disable.
    lifecycle: tokio::sync::Mutex<()>,
    push_lock: tokio::sync::Mutex<()>,
    pull_lock: tokio::sync::Mutex<()>,
}

/// Handle to the sync engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, deps: SyncDeps) -> SyncResult<Self> {
        config.validate()?;
        let invites = InviteCodec::new(deps.store.clone(), deps.clock.clone(), config.invite_ttl_hours);
        let queue = OfflineQueue::new(config.offline_queue_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                crypto: EncryptionService::new(deps.rng.clone()),
                invites,
                listeners: ListenerRegistry::new(),
                state: Mutex::new(SyncState::default()),
                queue: Mutex::new(queue),
                session: Mutex::new(None),
                last_pull: Mutex::new(None),
                online: AtomicBool::new(true),
                draining: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                device_id: OnceCell::new(),
                lifecycle: tokio::sync::Mutex::new(()),
                push_lock: tokio::sync::Mutex::new(()),
                pull_lock: tokio::sync::Mutex::new(()),
                config,
                store: deps.store,
                transport: deps.transport,
                payloads: deps.payloads,
                rng: deps.rng,
                clock: deps.clock,
            }),
        })
    }

    /// Creates an engine talking HTTP to `config.api_base_url`.
    pub fn connect(
        config: SyncConfig,
        store: Arc<dyn SecureStore>,
        payloads: Arc<dyn PayloadStore>,
    ) -> SyncResult<Self> {
        let transport = Arc::new(SyncApiClient::new(&config)?);
        Self::new(config, SyncDeps::new(store, transport, payloads))
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Encryption service holding the session key (also used for shares).
    pub fn encryption(&self) -> &EncryptionService {
        &self.inner.crypto
    }

    // ── Lifecycle ──

    /// Enables sync, either starting a new group or joining one by phrase.
    pub async fn enable_sync(&self, mode: EnableMode) -> SyncResult<EnableOutcome> {
        let lifecycle = self.inner.lifecycle.lock().await;

        let (phrase, joining) = match &mode {
            EnableMode::New => {
                if !self.inner.rng.self_test() {
                    let err = SyncError::Crypto(CryptoError::RandomUnavailable(
                        "secure random self-test failed".to_string(),
                    ));
                    error!("refusing to generate a recovery phrase: {err}");
                    return Err(err);
                }
                (RecoveryPhrase::generate(&self.inner.rng)?, false)
            }
            EnableMode::Join(input) => (RecoveryPhrase::parse(input)?, true),
        };

        if self.is_enabled() {
            info!("re-enabling sync, stopping the current session");
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            self.stop_session();
            self.inner.crypto.lock();
            let same_group = self.inner.state.lock().sync_id.as_ref() == Some(&phrase.sync_id());
            if !same_group {
                self.inner.queue.lock().clear();
            }
        }

        self.set_status(SyncStatus::Enabling);
        let sync_id = match self.activate(&phrase).await {
            Ok(id) => id,
            Err(e) => {
                self.inner.crypto.lock();
                self.abort_enable(&e);
                return Err(e);
            }
        };
        if let Err(e) = self.persist_credentials(&phrase, &sync_id).await {
            self.inner.crypto.lock();
            self.stop_session();
            self.abort_enable(&e);
            return Err(e);
        }
        drop(lifecycle);

        info!("sync enabled for group {sync_id}");
        self.emit(SyncEvent::Enabled { sync_id: sync_id.clone() });

        if !self.check_health().await {
            warn!("sync relay reported unhealthy, continuing");
        }

        if joining {
            if let Err(e) = self.pull().await {
                warn!("initial pull after joining failed: {e}");
            }
        } else {
            match self.inner.payloads.load().await {
                Ok(Some(payload)) => {
                    if let Err(e) = self.push(payload).await {
                        warn!("initial push failed: {e}");
                    }
                }
                Ok(None) => debug!("no local payload to upload yet"),
                Err(e) => warn!("failed to load local payload for initial push: {e}"),
            }
        }

        Ok(EnableOutcome {
            sync_id,
            recovery_phrase: phrase,
        })
    }

    /// Joins with either a locally issued invite code or a recovery phrase.
    pub async fn join(&self, input: &str) -> SyncResult<EnableOutcome> {
        let phrase = match invite::classify(input)? {
            JoinInput::InviteCode(code) => self.inner.invites.resolve(&code).await?,
            JoinInput::RecoveryPhrase(phrase) => phrase,
        };
        self.enable_sync(EnableMode::Join(phrase.as_str().to_string())).await
    }

    /// Re-enables sync from persisted credentials. Returns false if sync was
    /// never enabled on this device.
    pub async fn restore(&self) -> SyncResult<bool> {
        let lifecycle = self.inner.lifecycle.lock().await;
        if self.is_enabled() {
            return Ok(true);
        }

        let store = &self.inner.store;
        if store.get(KEY_SYNC_ENABLED).await?.as_deref() != Some("true") {
            return Ok(false);
        }
        let Some(raw_phrase) = store.get(KEY_RECOVERY_PHRASE).await? else {
            warn!("sync flagged enabled but no recovery phrase is stored");
            return Ok(false);
        };
        let phrase = RecoveryPhrase::parse(&raw_phrase)?;

        let sync_id = match self.activate(&phrase).await {
            Ok(id) => id,
            Err(e) => {
                self.inner.crypto.lock();
                self.abort_enable(&e);
                return Err(e);
            }
        };
        let stored_id = store.get(KEY_SYNC_ID).await.ok().flatten();
        if stored_id.as_deref() != Some(sync_id.as_str()) {
            warn!("stored sync id did not match the recovery phrase, rewriting");
            if let Err(e) = store.set(KEY_SYNC_ID, sync_id.as_str()).await {
                warn!("failed to rewrite sync id: {e}");
            }
        }
        drop(lifecycle);

        info!("sync restored for group {sync_id}");
        self.emit(SyncEvent::Enabled { sync_id });
        if let Err(e) = self.pull().await {
            warn!("pull after restore failed: {e}");
        }
        Ok(true)
    }

    /// Derives the key, unlocks encryption and starts the session timers.
    async fn activate(&self, phrase: &RecoveryPhrase) -> SyncResult<SyncId> {
        let kdf = self.inner.config.kdf;
        let for_kdf = phrase.clone();
        let key = tokio::task::spawn_blocking(move || derive_key(&for_kdf, &kdf))
            .await
            .map_err(|e| SyncError::Crypto(CryptoError::KeyDerivation(e.to_string())))??;
        self.inner.crypto.unlock(key);

        let sync_id = phrase.sync_id();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.inner.state.lock();
            state.is_enabled = true;
            state.sync_id = Some(sync_id.clone());
            state.recovery_phrase = Some(phrase.clone());
            state.last_error = None;
        }
        self.set_status(SyncStatus::Idle);
        self.start_session(epoch);
        Ok(sync_id)
    }

    async fn persist_credentials(&self, phrase: &RecoveryPhrase, sync_id: &SyncId) -> SyncResult<()> {
        let store = &self.inner.store;
        store.set(KEY_RECOVERY_PHRASE, phrase.as_str()).await?;
        store.set(KEY_SYNC_ID, sync_id.as_str()).await?;
        store.set(KEY_SYNC_ENABLED, "true").await?;
        Ok(())
    }

    fn abort_enable(&self, err: &SyncError) {
        error!("enabling sync failed: {err}");
        {
            let mut state = self.inner.state.lock();
            *state = SyncState {
                last_error: Some(err.to_string()),
                ..SyncState::default()
            };
        }
        self.emit(SyncEvent::StatusChanged(SyncStatus::NotSetup));
        self.emit(SyncEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Disables sync and erases the recovery phrase from this device.
    ///
    /// Requests already in flight complete, but their results are discarded.
    pub async fn disable_sync(&self) -> SyncResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_session();
        self.inner.queue.lock().clear();
        self.inner.crypto.lock();

        let mut first_err = None;
        for key in [KEY_SYNC_ENABLED, KEY_RECOVERY_PHRASE, KEY_SYNC_ID] {
            if let Err(e) = self.inner.store.remove(key).await {
                error!("failed to erase {key}: {e}");
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.inner.invites.clear().await {
            error!("failed to erase invites: {e}");
            first_err.get_or_insert(e);
        }

        *self.inner.state.lock() = SyncState::default();
        *self.inner.last_pull.lock() = None;
        info!("sync disabled");
        self.emit(SyncEvent::StatusChanged(SyncStatus::NotSetup));
        self.emit(SyncEvent::Disabled);

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops all timers and drops every listener. Persisted state is kept.
    pub fn destroy(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_session();
        self.inner.listeners.clear();
        debug!("sync engine destroyed");
    }

    // ── Push / pull ──

    /// Encrypts and uploads `payload` now.
    ///
    /// While offline the push is queued and [`SyncError::Offline`] returned.
    pub async fn push(&self, payload: Value) -> SyncResult<()> {
        let active = self.active()?;
        if !self.is_online() {
            let queue_len = {
                let mut queue = self.inner.queue.lock();
                queue.enqueue_push(payload, self.inner.clock.now_millis());
                queue.len()
            };
            debug!("offline, queued push ({queue_len} pending)");
            self.emit(SyncEvent::Queued {
                operation: QueueOperation::Push,
                queue_len,
            });
            return Err(SyncError::Offline("push queued until connectivity returns".to_string()));
        }
        self.push_now(active, payload).await
    }

    async fn push_now(&self, active: Active, payload: Value) -> SyncResult<()> {
        let _guard = self.inner.push_lock.lock().await;
        if !self.is_current(active.epoch) {
            return Err(SyncError::NotEnabled);
        }
        self.set_status(SyncStatus::Syncing);

        let result = async {
            let data = self.inner.crypto.encrypt_payload(&payload)?;
            let timestamp = self.inner.clock.now_millis();
            let request = PushRequest {
                sync_id: active.sync_id.to_string(),
                data,
                timestamp,
                device_id: self.device_id().await,
                version: PROTOCOL_VERSION.to_string(),
            };
            self.send_with_retry(&request).await?;
            Ok::<_, SyncError>(timestamp)
        }
        .await;

        if !self.is_current(active.epoch) {
            debug!("discarding push result from an ended session");
            return Err(SyncError::NotEnabled);
        }
        match result {
            Ok(timestamp) => {
                self.record_success(timestamp);
                self.emit(SyncEvent::Pushed { timestamp });
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Sends one push, retrying transient failures with exponential backoff.
    async fn send_with_retry(&self, request: &PushRequest) -> SyncResult<()> {
        let max_attempts = self.inner.config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.inner.transport.push(request).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.inner.config.retry_delay(attempt);
                    warn!(
                        "push attempt {}/{max_attempts} failed: {e}, retrying in {delay:?}",
                        attempt + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetches remote data, merges it into the local payload and saves it.
    ///
    /// Returns the merged payload, or `None` if nothing is stored remotely.
    /// Waits for any pull already in flight.
    pub async fn pull(&self) -> SyncResult<Option<Value>> {
        let active = self.active()?;
        if !self.is_online() {
            self.queue_pull();
            return Err(SyncError::Offline("pull queued until connectivity returns".to_string()));
        }
        let _guard = self.inner.pull_lock.lock().await;
        self.pull_locked(active).await
    }

    fn queue_pull(&self) {
        let (added, queue_len) = {
            let mut queue = self.inner.queue.lock();
            let had_pull = queue.has_pending_pull();
            queue.enqueue_pull(self.inner.clock.now_millis());
            (!had_pull, queue.len())
        };
        if added {
            self.emit(SyncEvent::Queued {
                operation: QueueOperation::Pull,
                queue_len,
            });
        }
    }

    async fn pull_locked(&self, active: Active) -> SyncResult<Option<Value>> {
        if !self.is_current(active.epoch) {
            return Err(SyncError::NotEnabled);
        }
        self.set_status(SyncStatus::Syncing);

        let fetched = async {
            let device_id = self.device_id().await;
            let Some(data) = self.inner.transport.pull(active.sync_id.as_str(), &device_id).await? else {
                return Ok(None);
            };
            let remote: Value = self.inner.crypto.decrypt_payload(&data)?;
            Ok::<_, SyncError>(Some(remote))
        }
        .await;

        if !self.is_current(active.epoch) {
            debug!("discarding pull result from an ended session");
            return Err(SyncError::NotEnabled);
        }

        let now = self.inner.clock.now_millis();
        let result = match fetched {
            Ok(None) => {
                debug!("no remote data for this sync group yet");
                Ok(None)
            }
            Ok(Some(remote)) => self.apply_remote(remote).await.map(Some),
            Err(e) => Err(e),
        };

        match result {
            Ok(merged) => {
                *self.inner.last_pull.lock() = Some(now);
                self.record_success(now);
                if let Some(payload) = &merged {
                    self.emit(SyncEvent::DataUpdated(payload.clone()));
                }
                Ok(merged)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    async fn apply_remote(&self, remote: Value) -> SyncResult<Value> {
        let local = self.inner.payloads.load().await?.unwrap_or(Value::Null);
        let merged = ConflictResolver::merge(&local, &remote);
        self.inner.payloads.save(&merged).await?;
        Ok(merged)
    }

    /// Schedules a push after the quiet period; later calls replace the
    /// pending payload and restart the period.
    pub fn schedule_push(&self, payload: Value) -> SyncResult<()> {
        self.active()?;
        let session = self.inner.session.lock();
        let Some(session) = session.as_ref() else {
            return Err(SyncError::NotEnabled);
        };
        session
            .debounce_tx
            .send(payload)
            .map_err(|_| SyncError::NotEnabled)
    }

    // ── Connectivity ──

    /// Probes the relay once. Advisory; never retried.
    pub async fn check_health(&self) -> bool {
        match self.inner.transport.health().await {
            Ok(HealthStatus::Healthy) => true,
            Ok(HealthStatus::Unhealthy) => false,
            Err(e) => {
                debug!("health probe failed: {e}");
                false
            }
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity change. Coming back online replays the
    /// offline queue in order.
    pub async fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        if online {
            info!("connectivity restored");
            self.emit(SyncEvent::Online);
            self.drain_queue().await;
        } else {
            warn!("connectivity lost, queueing sync operations");
            self.emit(SyncEvent::Offline);
        }
    }

    /// Replays queued operations one at a time. Stops at the first failure
    /// and requeues what is left; a fatal failure drops only its own entry.
    ///
    /// Only one replay runs at a time. A reconnect that finds one running
    /// leaves its entries to it.
    async fn drain_queue(&self) {
        loop {
            if self.inner.draining.swap(true, Ordering::SeqCst) {
                debug!("offline queue replay already running");
                return;
            }
            let completed = self.replay_until_empty().await;
            self.inner.draining.store(false, Ordering::SeqCst);

            // Entries may have been queued after the last batch was taken.
            if !completed || !self.is_online() || self.inner.queue.lock().is_empty() {
                return;
            }
        }
    }

    /// Replays batches until the queue is empty. False if a batch stopped
    /// on an error.
    async fn replay_until_empty(&self) -> bool {
        while self.is_online() {
            let entries = self.inner.queue.lock().take_all();
            if entries.is_empty() {
                debug!("offline queue drained");
                return true;
            }
            if !self.replay_batch(entries).await {
                return false;
            }
        }
        true
    }

    async fn replay_batch(&self, entries: Vec<OfflineQueueEntry>) -> bool {
        info!("replaying {} queued sync operations", entries.len());

        let mut remaining = entries.into_iter();
        while let Some(entry) = remaining.next() {
            let result = match self.active() {
                Err(e) => Err(e),
                Ok(active) => match (entry.operation, &entry.payload) {
                    (QueueOperation::Push, Some(payload)) => self.push_now(active, payload.clone()).await,
                    (QueueOperation::Push, None) => Ok(()),
                    (QueueOperation::Pull, _) => {
                        let _guard = self.inner.pull_lock.lock().await;
                        self.pull_locked(active).await.map(|_| ())
                    }
                },
            };

            if let Err(e) = result {
                if matches!(e, SyncError::NotEnabled) {
                    debug!("sync disabled during replay, dropping queue");
                    return false;
                }
                let mut rest: Vec<_> = remaining.collect();
                if e.is_fatal() {
                    error!("dropping queued {:?} after fatal error: {e}", entry.operation);
                } else {
                    warn!("replay stopped at queued {:?}: {e}", entry.operation);
                    rest.insert(0, entry);
                }
                self.inner.queue.lock().requeue_front(rest);
                return false;
            }
        }
        true
    }

    // ── Listeners ──

    pub fn subscribe<F>(&self, listener: F) -> ListenerToken
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.inner.listeners.unsubscribe(token)
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.listeners.emit(&event);
    }

    // ── Queries ──

    pub fn state(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().is_enabled
    }

    pub fn status_report(&self) -> StatusReport {
        let state = self.inner.state.lock().clone();
        StatusReport {
            initialized: state.is_enabled,
            polling: self.inner.session.lock().is_some(),
            online: self.is_online(),
            status: state.status,
            sync_id: state.sync_id,
            last_pull: *self.inner.last_pull.lock(),
            last_sync_time: state.last_sync_time,
            offline_queue_len: self.inner.queue.lock().len(),
        }
    }

    /// Operations waiting for connectivity, oldest first.
    pub fn queued_operations(&self) -> Vec<OfflineQueueEntry> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// Stable id for this install, created on first use.
    pub async fn device_id(&self) -> String {
        let inner = &self.inner;
        inner
            .device_id
            .get_or_init(|| device::get_or_create(inner.store.as_ref(), &inner.rng, inner.clock.as_ref()))
            .await
            .clone()
    }

    /// Issues an invite code for the current group.
    pub async fn generate_invite(&self) -> SyncResult<InviteCode> {
        let phrase = self
            .inner
            .state
            .lock()
            .recovery_phrase
            .clone()
            .ok_or(SyncError::NotEnabled)?;
        self.inner.invites.generate(&phrase).await
    }

    pub fn invites(&self) -> &InviteCodec {
        &self.inner.invites
    }

    // ── State helpers ──

    fn active(&self) -> SyncResult<Active> {
        let state = self.inner.state.lock();
        match (&state.sync_id, state.is_enabled) {
            (Some(sync_id), true) => Ok(Active {
                epoch: self.inner.epoch.load(Ordering::SeqCst),
                sync_id: sync_id.clone(),
            }),
            _ => Err(SyncError::NotEnabled),
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_status(&self, status: SyncStatus) {
        let changed = {
            let mut state = self.inner.state.lock();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            self.emit(SyncEvent::StatusChanged(status));
        }
    }

    fn record_success(&self, timestamp: i64) {
        {
            let mut state = self.inner.state.lock();
            state.last_sync_time = Some(timestamp);
            state.last_error = None;
        }
        self.set_status(SyncStatus::Idle);
    }

    fn record_failure(&self, err: &SyncError) {
        error!("sync operation failed: {err}");
        self.inner.state.lock().last_error = Some(err.to_string());
        self.set_status(SyncStatus::Error);
        self.emit(SyncEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    // ── Session timers ──

    fn start_session(&self, epoch: u64) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (debounce_tx, debounce_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.inner);
        let config = &self.inner.config;

        tokio::spawn(debounce_loop(
            weak.clone(),
            debounce_rx,
            shutdown_rx.clone(),
            config.push_debounce(),
        ));
        tokio::spawn(poll_loop(weak.clone(), shutdown_rx.clone(), config.poll_interval()));
        tokio::spawn(network_loop(weak, shutdown_rx, config.network_check_interval()));

        let previous = self.inner.session.lock().replace(Session {
            shutdown: shutdown_tx,
            debounce_tx,
        });
        if let Some(old) = previous {
            let _ = old.shutdown.send(true);
        }
        debug!("sync session {epoch} started");
    }

    fn stop_session(&self) {
        if let Some(session) = self.inner.session.lock().take() {
            let _ = session.shutdown.send(true);
            debug!("sync session stopped");
        }
    }
}

async fn debounce_loop(
    weak: Weak<Inner>,
    mut payloads: mpsc::UnboundedReceiver<Value>,
    mut shutdown: watch::Receiver<bool>,
    quiet: Duration,
) {
    let mut pending: Option<Value> = None;
    let timer = tokio::time::sleep(quiet);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            next = payloads.recv() => match next {
                Some(payload) => {
                    pending = Some(payload);
                    timer.as_mut().reset(Instant::now() + quiet);
                }
                None => break,
            },
            _ = &mut timer, if pending.is_some() => {
                let Some(payload) = pending.take() else { continue };
                let Some(engine) = SyncEngine::from_weak(&weak) else { break };
                if let Err(e) = engine.push(payload).await {
                    debug!("debounced push did not complete: {e}");
                }
            }
        }
    }
    debug!("debounce task stopped");
}

async fn poll_loop(weak: Weak<Inner>, mut shutdown: watch::Receiver<bool>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(engine) = SyncEngine::from_weak(&weak) else { break };
                engine.poll_once().await;
            }
        }
    }
    debug!("poll task stopped");
}

async fn network_loop(weak: Weak<Inner>, mut shutdown: watch::Receiver<bool>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(engine) = SyncEngine::from_weak(&weak) else { break };
                let healthy = engine.check_health().await;
                engine.set_online(healthy).await;
            }
        }
    }
    debug!("network probe task stopped");
}

impl SyncEngine {
    /// One poll tick. Skipped while offline or while another pull runs.
    async fn poll_once(&self) {
        if !self.is_online() {
            return;
        }
        let Ok(active) = self.active() else { return };
        let Ok(_guard) = self.inner.pull_lock.try_lock() else {
            debug!("pull already in flight, skipping poll tick");
            return;
        };
        if let Err(e) = self.pull_locked(active).await {
            debug!("poll failed: {e}");
        }
    }
}
