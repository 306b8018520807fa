//! Token-based registry of event listeners.

use crate::types::SyncEvent;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerToken(u64);

/// Delivers [`SyncEvent`]s synchronously to every subscriber.
#[derive(Default)]
pub struct ListenerRegistry {
    next_token: AtomicU64,
    listeners: Mutex<BTreeMap<ListenerToken, Listener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerToken
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let token = ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(token, Arc::new(listener));
        token
    }

    /// Returns false if the token was not registered.
    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.listeners.lock().remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    /// Calls every listener in subscription order.
    ///
    /// The registry lock is not held during delivery, so listeners may
    /// subscribe or unsubscribe. A panicking listener is logged and skipped.
    pub fn emit(&self, event: &SyncEvent) {
        let snapshot: Vec<(ListenerToken, Listener)> = self
            .listeners
            .lock()
            .iter()
            .map(|(token, l)| (*token, Arc::clone(l)))
            .collect();

        for (token, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("sync listener {token:?} panicked while handling {event:?}");
            }
        }
    }
}
