//! Bounded in-memory offline queue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use contracts::SyncPayload;
use tracing::warn;

/// FIFO of payloads awaiting delivery. When full, new payloads are rejected
/// and counted as dropped.
#[derive(Debug)]
pub struct OfflineQueue {
    items: Mutex<VecDeque<SyncPayload>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, payload: SyncPayload) -> bool {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        if items.len() >= self.capacity {
            drop(items);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                detection_id = payload.detection_id,
                capacity = self.capacity,
                "Offline queue full, dropping payload"
            );
            return false;
        }
        items.push_back(payload);
        observability::record_offline_queue_depth(items.len());
        true
    }

    /// Take up to `n` payloads from the front
    pub fn pop_batch(&self, n: usize) -> Vec<SyncPayload> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let take = n.min(items.len());
        let batch: Vec<_> = items.drain(..take).collect();
        observability::record_offline_queue_depth(items.len());
        batch
    }

    /// Put a failed batch back at the front, preserving order. Payloads that
    /// no longer fit are dropped; returns how many.
    pub fn requeue(&self, batch: Vec<SyncPayload>) -> usize {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let room = self.capacity.saturating_sub(items.len());
        let overflow = batch.len().saturating_sub(room);
        for payload in batch.into_iter().take(room).rev() {
            items.push_front(payload);
        }
        observability::record_offline_queue_depth(items.len());
        drop(items);

        if overflow > 0 {
            self.dropped.fetch_add(overflow as u64, Ordering::Relaxed);
            warn!(overflow, "Offline queue full on requeue, dropping payloads");
        }
        overflow
    }

    /// Whether a payload for `detection_id` is already waiting
    pub fn contains(&self, detection_id: i64) -> bool {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.detection_id == detection_id)
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
