//! Bounded queue of operations recorded while the device is offline.
//!
//! - Pushes are kept in insertion order, each carrying its own payload
//! - At most one pull is pending at a time
//! - Beyond capacity the oldest entry is evicted

use crate::types::{OfflineQueueEntry, QueueOperation};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::warn;

/// FIFO of operations awaiting connectivity.
#[derive(Debug)]
pub struct OfflineQueue {
    entries: VecDeque<OfflineQueueEntry>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Records a push of `payload`. Returns the evicted entry, if any.
    pub fn enqueue_push(&mut self, payload: Value, timestamp: i64) -> Option<OfflineQueueEntry> {
        self.enqueue(OfflineQueueEntry {
            operation: QueueOperation::Push,
            payload: Some(payload),
            timestamp,
        })
    }

    /// Records a pull unless one is already pending.
    pub fn enqueue_pull(&mut self, timestamp: i64) -> Option<OfflineQueueEntry> {
        if self.has_pending_pull() {
            return None;
        }
        self.enqueue(OfflineQueueEntry {
            operation: QueueOperation::Pull,
            payload: None,
            timestamp,
        })
    }

    fn enqueue(&mut self, entry: OfflineQueueEntry) -> Option<OfflineQueueEntry> {
        self.entries.push_back(entry);
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Option<OfflineQueueEntry> {
        let mut evicted = None;
        while self.entries.len() > self.capacity {
            evicted = self.entries.pop_front();
            if let Some(entry) = &evicted {
                warn!(
                    "offline queue full, dropping oldest {:?} queued at {}",
                    entry.operation, entry.timestamp
                );
            }
        }
        evicted
    }

    /// Takes every entry in insertion order, leaving the queue empty.
    pub fn take_all(&mut self) -> Vec<OfflineQueueEntry> {
        self.entries.drain(..).collect()
    }

    /// Puts unprocessed entries back ahead of anything queued since.
    pub fn requeue_front(&mut self, entries: Vec<OfflineQueueEntry>) {
        for entry in entries.into_iter().rev() {
            if entry.operation == QueueOperation::Pull && self.has_pending_pull() {
                continue;
            }
            self.entries.push_front(entry);
        }
        self.evict_overflow();
    }

    pub fn has_pending_pull(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.operation == QueueOperation::Pull)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &OfflineQueueEntry> {
        self.entries.iter()
    }
}
