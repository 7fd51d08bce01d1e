//! Event sink counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SinkMetrics {
    events_received: AtomicU64,
    records_persisted: AtomicU64,
    insert_failures: AtomicU64,
    image_failures: AtomicU64,
    payloads_enqueued: AtomicU64,
    payloads_dropped: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_records_persisted(&self) {
        self.records_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_insert_failures(&self) {
        self.insert_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_image_failures(&self) {
        self.image_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_payloads_enqueued(&self) {
        self.payloads_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_payloads_dropped(&self) {
        self.payloads_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_persisted(&self) -> u64 {
        self.records_persisted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            records_persisted: self.records_persisted(),
            insert_failures: self.insert_failures.load(Ordering::Relaxed),
            image_failures: self.image_failures.load(Ordering::Relaxed),
            payloads_enqueued: self.payloads_enqueued.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkMetricsSnapshot {
    pub events_received: u64,
    pub records_persisted: u64,
    pub insert_failures: u64,
    pub image_failures: u64,
    pub payloads_enqueued: u64,
    pub payloads_dropped: u64,
}
