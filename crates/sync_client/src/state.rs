//! Connection state machine
//!
//! `Disconnected -> Connecting -> Connected`, with `Reconnecting` and `Error`
//! on repeated failures and `Offline` when no dashboard is configured.
//! Observers are notified after the state lock is released.

use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{
    unix_timestamp, ConnectionObserver, ConnectionRecord, ConnectionState, ErrorInfo,
    ObserverSet,
};
use tracing::{info, warn};

use crate::error::SyncError;

/// What a state transition requires observers to hear about
#[derive(Debug, Default)]
struct Notice {
    connected: bool,
    disconnected: bool,
    error: Option<ErrorInfo>,
}

#[derive(Debug)]
pub struct ConnectionTracker {
    record: Mutex<ConnectionRecord>,
    observers: ObserverSet<dyn ConnectionObserver>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            record: Mutex::new(ConnectionRecord::default()),
            observers: ObserverSet::new("connection"),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.observers.register(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn snapshot(&self) -> ConnectionRecord {
        self.lock().clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Force a state without touching failure bookkeeping
    pub fn set_state(&self, state: ConnectionState) -> ConnectionState {
        let previous = {
            let mut record = self.lock();
            std::mem::replace(&mut record.state, state)
        };
        self.log_transition(previous, state);
        previous
    }

    /// A request reached the dashboard and got a usable answer
    pub fn on_success(&self) {
        let previous = {
            let mut record = self.lock();
            record.consecutive_failures = 0;
            std::mem::replace(&mut record.state, ConnectionState::Connected)
        };
        self.log_transition(previous, ConnectionState::Connected);
        if previous != ConnectionState::Connected {
            self.emit(Notice {
                connected: true,
                ..Notice::default()
            });
        }
    }

    /// Record a failed attempt. A network failure while connected drops the
    /// connection.
    pub fn on_failure(&self, error: &SyncError) {
        let info = error.to_info();
        let (previous, next) = {
            let mut record = self.lock();
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            record.last_error = Some(info.clone());
            let previous = record.state;
            if previous == ConnectionState::Connected && error.is_network() {
                record.state = ConnectionState::Disconnected;
            }
            if matches!(error, SyncError::Authentication { .. }) {
                record.state = ConnectionState::Error;
            }
            (previous, record.state)
        };
        self.log_transition(previous, next);
        self.emit(Notice {
            disconnected: previous == ConnectionState::Connected
                && next != ConnectionState::Connected,
            error: Some(info),
            ..Notice::default()
        });
    }

    /// All attempts for a request failed
    pub fn mark_exhausted(&self) {
        let previous = self.set_state(ConnectionState::Error);
        if previous == ConnectionState::Connected {
            self.emit(Notice {
                disconnected: true,
                ..Notice::default()
            });
        }
    }

    /// Leave `Connected` (or any live state) and tell observers
    pub fn disconnect(&self) {
        let previous = self.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            self.emit(Notice {
                disconnected: true,
                ..Notice::default()
            });
        }
    }

    pub fn touch_heartbeat(&self) {
        self.lock().last_heartbeat_at = Some(unix_timestamp());
    }

    pub fn touch_health_check(&self) {
        self.lock().last_health_check_at = Some(unix_timestamp());
    }

    pub fn touch_sync(&self) {
        self.lock().last_sync_at = Some(unix_timestamp());
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn log_transition(&self, from: ConnectionState, to: ConnectionState) {
        if from == to {
            return;
        }
        observability::record_connection_state(to);
        match to {
            ConnectionState::Error | ConnectionState::Disconnected => {
                warn!(from = from.as_str(), to = to.as_str(), "Dashboard connection state changed")
            }
            _ => info!(
                from = from.as_str(),
                to = to.as_str(),
                "Dashboard connection state changed"
            ),
        }
    }

    fn emit(&self, notice: Notice) {
        if notice.connected {
            self.observers.notify(|o| o.on_connected());
        }
        if notice.disconnected {
            self.observers.notify(|o| o.on_disconnected());
        }
        if let Some(info) = &notice.error {
            self.observers.notify(|o| o.on_error(info));
        }
    }
}
