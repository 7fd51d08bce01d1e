//! Observer interfaces
//!
//! Observers are called synchronously and best-effort. A panicking observer
//! is logged and skipped; it never affects the caller or sibling observers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::{CameraStatus, DetectionRecord, ErrorInfo};

/// Notified for every persisted detection
pub trait EventObserver: Send + Sync {
    fn on_detection(&self, record: &DetectionRecord);
}

/// Notified on dashboard connectivity changes
pub trait ConnectionObserver: Send + Sync {
    fn on_connected(&self) {}

    fn on_disconnected(&self) {}

    fn on_error(&self, _error: &ErrorInfo) {}
}

/// Notified on camera lifecycle changes
pub trait CameraObserver: Send + Sync {
    fn on_status_change(&self, _camera_id: &str, _from: CameraStatus, _to: CameraStatus) {}

    fn on_permanent_failure(&self, _camera_id: &str, _reason: &str) {}
}

/// Registered observers of one kind
pub struct ObserverSet<O: ?Sized> {
    name: &'static str,
    observers: RwLock<Vec<Arc<O>>>,
}

impl<O: ?Sized + Send + Sync> ObserverSet<O> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, observer: Arc<O>) {
        self.observers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `f` on every observer outside the registry lock
    pub fn notify(&self, f: impl Fn(&O)) {
        let observers: Vec<Arc<O>> = self
            .observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| f(&observer))).is_err() {
                warn!(observers = self.name, "Observer panicked, ignoring");
            }
        }
    }
}

impl<O: ?Sized> std::fmt::Debug for ObserverSet<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet").field("name", &self.name).finish()
    }
}
