//! SyncClient - dashboard communication
//!
//! Every call goes through one request primitive that signs the body, applies
//! the retry policy and feeds the connection state machine. Three background
//! loops (heartbeat, health check, sync drain) share the client's
//! cancellation token.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use contracts::{
    unix_timestamp, CameraRoster, ConnectionObserver, ConnectionRecord, ConnectionState,
    DetectionRecord, DetectionStore, DeviceInfo, ErrorInfo, EventObserver, HeartbeatStats,
    PayloadQueue, SyncPayload, SystemTelemetry, TelemetryProvider,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncClientConfig;
use crate::error::{Result, SyncError};
use crate::queue::OfflineQueue;
use crate::signing::RequestSigner;
use crate::state::ConnectionTracker;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method, Transport};

const HEALTH_PATH: &str = "/health";
const REGISTER_PATH: &str = "/devices/register";
const HEARTBEAT_PATH: &str = "/devices/heartbeat";
const DETECTION_PATH: &str = "/devices/detections";
const BATCH_PATH: &str = "/devices/detections/batch";

const REGISTERED_KEY: &str = "registered";
const REGISTERED_AT_KEY: &str = "registered_at";

const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct SyncCounters {
    detections_seen: AtomicU64,
    detections_synced: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_failed: AtomicU64,
    immediate_sent: AtomicU64,
    immediate_failed: AtomicU64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

/// Counters exposed to the runtime
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub queue_depth: usize,
    pub queue_dropped: u64,
    pub detections_seen: u64,
    pub detections_synced: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_failed: u64,
    pub immediate_sent: u64,
    pub immediate_failed: u64,
}

/// Connection summary for status displays
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub configured: bool,
    pub environment: String,
    pub api_url: Option<String>,
    pub signed: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<ErrorInfo>,
    pub last_heartbeat_at: Option<f64>,
    pub last_health_check_at: Option<f64>,
    pub last_sync_at: Option<f64>,
    pub queue_depth: usize,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    device_id: &'a str,
    info: &'a DeviceInfo,
}

#[derive(Serialize)]
struct HeartbeatBody<'a> {
    device_id: &'a str,
    timestamp: f64,
    status: &'static str,
    info: &'a DeviceInfo,
    stats: HeartbeatStats,
}

#[derive(Serialize)]
struct BatchBody<'a> {
    device_id: &'a str,
    detections: &'a [SyncPayload],
}

pub struct SyncClient<T> {
    config: SyncClientConfig,
    transport: Arc<T>,
    signer: RequestSigner,
    tracker: ConnectionTracker,
    queue: OfflineQueue,
    store: Option<Arc<dyn DetectionStore>>,
    telemetry: Option<Arc<dyn TelemetryProvider>>,
    roster: Option<Arc<dyn CameraRoster>>,
    device_info: DeviceInfo,
    counters: SyncCounters,
    started_at: Instant,
    /// Latency is only probed once a heartbeat has gone through
    heartbeat_ok: AtomicBool,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncClient<HttpTransport> {
    /// Client over reqwest. An unconfigured dashboard still yields a client;
    /// it stays `Offline`.
    pub fn http(config: SyncClientConfig) -> Result<Self> {
        let base = config.api_url.clone().unwrap_or_default();
        let transport = HttpTransport::new(base, &config.profile)?;
        Ok(Self::new(config, Arc::new(transport)))
    }
}

impl<T: Transport + Sync + 'static> SyncClient<T> {
    pub fn new(config: SyncClientConfig, transport: Arc<T>) -> Self {
        let signer = RequestSigner::new(config.device_secret.as_deref());
        let queue = OfflineQueue::new(config.offline_queue_capacity);
        let device_info = DeviceInfo {
            device_id: config.device_id.clone(),
            name: config.device_id.clone(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            board_model: None,
        };
        Self {
            config,
            transport,
            signer,
            tracker: ConnectionTracker::new(),
            queue,
            store: None,
            telemetry: None,
            roster: None,
            device_info,
            counters: SyncCounters::default(),
            started_at: Instant::now(),
            heartbeat_ok: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn DetectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryProvider>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_roster(mut self, roster: Arc<dyn CameraRoster>) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_device_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = info;
        self
    }

    /// Stop the loops together with an outer token
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    pub fn config(&self) -> &SyncClientConfig {
        &self.config
    }

    pub fn register_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.tracker.register_observer(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========== Lifecycle ==========

    /// Probe the dashboard, restore the unsynced backlog and spawn the loops.
    /// Idempotent.
    #[instrument(name = "sync_client_start", skip_all, fields(device_id = %self.config.device_id))]
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Sync client already running");
            return;
        }

        if !self.config.is_configured() {
            self.tracker.set_state(ConnectionState::Offline);
            info!("Dashboard not configured, sync client offline");
            return;
        }

        self.tracker.set_state(ConnectionState::Connecting);
        if self.check_connection().await {
            if !self.is_registered().await {
                if let Err(e) = self.register_device().await {
                    warn!(error = %e, "Device registration failed");
                }
            }
        } else if self.tracker.state() == ConnectionState::Connecting {
            self.tracker.set_state(ConnectionState::Disconnected);
        }

        let restored = self.restore_backlog().await;
        if restored > 0 {
            info!(restored, "Unsynced detections queued for sync");
        }

        let handles = vec![
            tokio::spawn(Arc::clone(self).heartbeat_loop()),
            tokio::spawn(Arc::clone(self).health_loop()),
            tokio::spawn(Arc::clone(self).sync_loop()),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);

        info!(
            state = self.tracker.state().as_str(),
            environment = self.config.environment.as_str(),
            "Sync client started"
        );
    }

    /// Cancel the loops and wait for them. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                warn!("Sync loop did not stop in time, aborting");
                abort.abort();
            }
        }

        if self.tracker.state() != ConnectionState::Offline {
            self.tracker.disconnect();
        }
        info!(queued = self.queue.len(), "Sync client stopped");
    }

    // ========== Request primitive ==========

    /// Signed request with the profile's retry policy; exhausting retries
    /// puts the connection in `Error`.
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let attempts = self.config.profile.max_retries;
        self.execute(method, path, body, attempts, true).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        attempts: u32,
        escalate: bool,
    ) -> Result<Value> {
        if !self.config.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        let payload = match &body {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let attempts = attempts.max(1);

        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let sent = self.transport.send(self.build_request(method, path, &payload)).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            observability::record_http_request(
                path,
                sent.as_ref().ok().map(|r| r.status),
                latency_ms,
            );

            let error = match sent.and_then(decode_response) {
                Ok(value) => {
                    self.tracker.on_success();
                    return Ok(value);
                }
                Err(e) => e,
            };
            self.tracker.on_failure(&error);

            if !error.is_retryable() {
                debug!(path, error = %error, "Request failed, not retryable");
                return Err(error);
            }
            if attempt >= attempts {
                warn!(path, attempts, error = %error, "Request failed after all attempts");
                if escalate {
                    self.tracker.mark_exhausted();
                }
                return Err(error);
            }

            let delay = self.config.profile.retry.delay_for_attempt(attempt);
            debug!(
                path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn build_request(&self, method: Method, path: &str, payload: &str) -> HttpRequest {
        let timestamp = unix_timestamp() as i64;
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                "X-API-Key".to_string(),
                self.config.api_key.clone().unwrap_or_default(),
            ),
            ("X-Device-ID".to_string(), self.config.device_id.clone()),
            ("X-Timestamp".to_string(), timestamp.to_string()),
            ("X-Signature".to_string(), self.signer.sign(timestamp, payload)),
            (
                "X-Environment".to_string(),
                self.config.environment.as_str().to_string(),
            ),
        ];
        HttpRequest {
            method,
            path: path.to_string(),
            headers,
            body: (!payload.is_empty()).then(|| payload.to_string()),
        }
    }

    // ========== Operations ==========

    /// Single-attempt health probe
    pub async fn check_connection(&self) -> bool {
        self.execute(Method::Get, HEALTH_PATH, None, 1, false)
            .await
            .is_ok()
    }

    /// Probe `/health` and drive the connection state from the result
    #[instrument(name = "sync_health_check", skip_all)]
    pub async fn health_check(&self) -> bool {
        let previous = self.tracker.state();
        let healthy = self.check_connection().await;
        self.tracker.touch_health_check();
        if healthy {
            return true;
        }

        if self.tracker.state() == ConnectionState::Connected {
            self.tracker.disconnect();
        }
        let failures = self.tracker.consecutive_failures();
        if failures >= self.config.profile.max_retries || previous == ConnectionState::Error {
            self.tracker.set_state(ConnectionState::Reconnecting);
        }
        debug!(failures, state = self.tracker.state().as_str(), "Health check failed");
        false
    }

    pub async fn register_device(&self) -> Result<Value> {
        let body = serde_json::to_value(RegisterBody {
            device_id: &self.config.device_id,
            info: &self.device_info,
        })?;
        let response = self.request(Method::Post, REGISTER_PATH, Some(body)).await?;
        info!(device_id = %self.config.device_id, "Device registered with dashboard");

        if let Some(store) = self.store.clone() {
            let registered_at = unix_timestamp().to_string();
            let saved = tokio::task::spawn_blocking(move || {
                store.set_state(REGISTERED_KEY, "true")?;
                store.set_state(REGISTERED_AT_KEY, &registered_at)
            })
            .await;
            match saved {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to persist registration state"),
                Err(e) => warn!(error = %e, "Registration state task failed"),
            }
        }
        Ok(response)
    }

    async fn is_registered(&self) -> bool {
        let Some(store) = self.store.clone() else {
            return false;
        };
        let state = tokio::task::spawn_blocking(move || store.get_state(REGISTERED_KEY)).await;
        matches!(state, Ok(Ok(Some(value))) if value == "true")
    }

    pub async fn fetch_remote_config(&self) -> Result<Value> {
        let path = format!("/devices/{}/config", self.config.device_id);
        self.request(Method::Get, &path, None).await
    }

    #[instrument(name = "sync_heartbeat", skip_all)]
    pub async fn heartbeat(&self) -> Result<Value> {
        let latency_ms = if self.heartbeat_ok.load(Ordering::Relaxed) {
            self.measure_latency().await
        } else {
            None
        };

        let stats = HeartbeatStats {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            detection_count: self.counters.detections_seen.load(Ordering::Relaxed),
            system: self.sample_telemetry().await,
            cameras: self.roster.as_ref().map(|r| r.roster()).unwrap_or_default(),
            latency_ms,
        };
        let body = serde_json::to_value(HeartbeatBody {
            device_id: &self.config.device_id,
            timestamp: unix_timestamp(),
            status: "online",
            info: &self.device_info,
            stats,
        })?;

        match self.request(Method::Post, HEARTBEAT_PATH, Some(body)).await {
            Ok(response) => {
                self.heartbeat_ok.store(true, Ordering::Relaxed);
                self.tracker.touch_heartbeat();
                bump(&self.counters.heartbeats_sent, 1);
                Ok(response)
            }
            Err(e) => {
                bump(&self.counters.heartbeats_failed, 1);
                Err(e)
            }
        }
    }

    async fn measure_latency(&self) -> Option<f64> {
        let started = Instant::now();
        self.execute(Method::Get, HEALTH_PATH, None, 1, false)
            .await
            .ok()
            .map(|_| started.elapsed().as_secs_f64() * 1000.0)
    }

    async fn sample_telemetry(&self) -> Option<SystemTelemetry> {
        let telemetry = self.telemetry.clone()?;
        tokio::task::spawn_blocking(move || telemetry.sample())
            .await
            .ok()
            .flatten()
    }

    /// Send one batch from the offline queue. Returns how many payloads were
    /// delivered; a failed batch goes back to the front of the queue.
    #[instrument(name = "sync_drain", skip_all)]
    pub async fn sync_once(&self) -> Result<usize> {
        let batch = self.queue.pop_batch(self.config.batch_size);
        if batch.is_empty() {
            return Ok(0);
        }
        let size = batch.len();

        let body = serde_json::to_value(BatchBody {
            device_id: &self.config.device_id,
            detections: &batch,
        });
        let result = match body {
            Ok(body) => self.request(Method::Post, BATCH_PATH, Some(body)).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(_) => {
                let ids: Vec<i64> = batch.iter().map(|p| p.detection_id).collect();
                self.mark_synced(ids).await;
                bump(&self.counters.detections_synced, size as u64);
                bump(&self.counters.batches_sent, 1);
                self.tracker.touch_sync();
                observability::record_sync_batch(true, size);
                debug!(size, remaining = self.queue.len(), "Batch synced");
                Ok(size)
            }
            Err(e) => {
                let dropped = self.queue.requeue(batch);
                bump(&self.counters.batches_failed, 1);
                observability::record_sync_batch(false, size);
                warn!(size, dropped, error = %e, "Batch sync failed, requeued");
                Err(e)
            }
        }
    }

    /// Try to deliver one detection right away; on failure it is queued for
    /// the next batch. Returns whether it was delivered.
    pub async fn send_detection_immediate(&self, payload: SyncPayload) -> bool {
        let body = match serde_json::to_value(&payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to serialize detection");
                return false;
            }
        };
        match self.request(Method::Post, DETECTION_PATH, Some(body)).await {
            Ok(_) => {
                self.mark_synced(vec![payload.detection_id]).await;
                bump(&self.counters.immediate_sent, 1);
                bump(&self.counters.detections_synced, 1);
                true
            }
            Err(e) => {
                debug!(error = %e, detection_id = payload.detection_id, "Immediate send failed");
                bump(&self.counters.immediate_failed, 1);
                self.queue.push(payload);
                false
            }
        }
    }

    /// Queue unsynced rows from storage so a restart does not strand them.
    /// Rows whose payload is already queued are skipped.
    pub async fn restore_backlog(&self) -> usize {
        let Some(store) = self.store.clone() else {
            return 0;
        };
        let room = self.queue.capacity().saturating_sub(self.queue.len());
        if room == 0 {
            return 0;
        }

        let rows = tokio::task::spawn_blocking(move || store.query_unsynced(room)).await;
        let records: Vec<DetectionRecord> = match rows {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read unsynced backlog");
                return 0;
            }
            Err(e) => {
                warn!(error = %e, "Backlog task failed");
                return 0;
            }
        };

        let mut restored = 0;
        for record in records {
            let Some(id) = record.id else { continue };
            // the sink may have queued the row already
            if self.queue.contains(id) {
                continue;
            }
            if self.queue.push(record.to_payload(id, None)) {
                restored += 1;
            }
        }
        restored
    }

    async fn mark_synced(&self, ids: Vec<i64>) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let marked = tokio::task::spawn_blocking(move || store.mark_synced(&ids)).await;
        match marked {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to mark detections synced"),
            Err(e) => warn!(error = %e, "Mark-synced task failed"),
        }
    }

    // ========== Status ==========

    pub fn connection_record(&self) -> ConnectionRecord {
        self.tracker.snapshot()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let record = self.tracker.snapshot();
        ConnectionStatus {
            state: record.state,
            configured: self.config.is_configured(),
            environment: self.config.environment.as_str().to_string(),
            api_url: self.config.api_url.clone(),
            signed: self.signer.is_enabled(),
            consecutive_failures: record.consecutive_failures,
            last_error: record.last_error,
            last_heartbeat_at: record.last_heartbeat_at,
            last_health_check_at: record.last_health_check_at,
            last_sync_at: record.last_sync_at,
            queue_depth: self.queue.len(),
        }
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            state: self.tracker.state(),
            consecutive_failures: self.tracker.consecutive_failures(),
            queue_depth: self.queue.len(),
            queue_dropped: self.queue.dropped(),
            detections_seen: c.detections_seen.load(Ordering::Relaxed),
            detections_synced: c.detections_synced.load(Ordering::Relaxed),
            batches_sent: c.batches_sent.load(Ordering::Relaxed),
            batches_failed: c.batches_failed.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_failed: c.heartbeats_failed.load(Ordering::Relaxed),
            immediate_sent: c.immediate_sent.load(Ordering::Relaxed),
            immediate_failed: c.immediate_failed.load(Ordering::Relaxed),
        }
    }

    // ========== Loops ==========

    async fn heartbeat_loop(self: Arc<Self>) {
        let period = self.config.heartbeat_interval.max(MIN_LOOP_PERIOD);
        let mut ticker = interval_at(tokio::time::Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        debug!(error = %e, "Heartbeat failed");
                    }
                }
            }
        }
        debug!("Heartbeat loop stopped");
    }

    async fn health_loop(self: Arc<Self>) {
        // start() already probed once
        let period = self.config.profile.health_check_interval.max(MIN_LOOP_PERIOD);
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.health_check().await;
                }
            }
        }
        debug!("Health loop stopped");
    }

    async fn sync_loop(self: Arc<Self>) {
        let period = self.config.sync_period().max(MIN_LOOP_PERIOD);
        let mut ticker = interval_at(tokio::time::Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        debug!(error = %e, "Sync drain failed");
                    }
                }
            }
        }
        debug!("Sync loop stopped");
    }
}

impl<T: Transport + Sync + 'static> PayloadQueue for SyncClient<T> {
    fn enqueue(&self, payload: SyncPayload) -> bool {
        self.queue.push(payload)
    }
}

impl<T: Transport + Sync + 'static> EventObserver for SyncClient<T> {
    fn on_detection(&self, _record: &DetectionRecord) {
        bump(&self.counters.detections_seen, 1);
    }
}

fn decode_response(response: HttpResponse) -> Result<Value> {
    if !response.is_success() {
        return Err(SyncError::from_status(response.status, &response.body));
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(&response.body).map_err(|e| SyncError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockReply, MockTransport};
    use contracts::{BackoffPolicy, BoundingBox, ContractError};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<DetectionRecord>>,
        state: Mutex<Vec<(String, String)>>,
    }

    impl MemoryStore {
        fn synced_ids(&self) -> Vec<i64> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.synced)
                .filter_map(|r| r.id)
                .collect()
        }
    }

    impl DetectionStore for MemoryStore {
        fn insert(&self, record: &DetectionRecord) -> std::result::Result<i64, ContractError> {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() as i64 + 1;
            let mut record = record.clone();
            record.id = Some(id);
            rows.push(record);
            Ok(id)
        }

        fn query_unsynced(
            &self,
            limit: usize,
        ) -> std::result::Result<Vec<DetectionRecord>, ContractError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !r.synced)
                .take(limit)
                .cloned()
                .collect())
        }

        fn mark_synced(&self, ids: &[i64]) -> std::result::Result<usize, ContractError> {
            let mut rows = self.rows.lock().unwrap();
            let mut updated = 0;
            for row in rows.iter_mut().filter(|r| r.id.is_some_and(|id| ids.contains(&id))) {
                row.synced = true;
                updated += 1;
            }
            Ok(updated)
        }

        fn get_state(&self, key: &str) -> std::result::Result<Option<String>, ContractError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()))
        }

        fn set_state(&self, key: &str, value: &str) -> std::result::Result<(), ContractError> {
            let mut state = self.state.lock().unwrap();
            state.retain(|(k, _)| k != key);
            state.push((key.to_string(), value.to_string()));
            Ok(())
        }

        fn count(&self) -> std::result::Result<u64, ContractError> {
            Ok(self.rows.lock().unwrap().len() as u64)
        }
    }

    #[derive(Default)]
    struct Counts {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ConnectionObserver for Counts {
        fn on_connected(&self) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_disconnected(&self) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: &ErrorInfo) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config() -> SyncClientConfig {
        let mut config = SyncClientConfig::default();
        config.api_url = Some("http://dashboard.test/api".to_string());
        config.api_key = Some("key-123".to_string());
        config.device_id = "edge-1".to_string();
        config.device_secret = Some("device-secret".to_string());
        config.batch_size = 10;
        config.offline_queue_capacity = 100;
        config.profile.max_retries = 3;
        config.profile.retry =
            BackoffPolicy::new(Duration::from_millis(20), 2.0, Duration::from_millis(200));
        config
    }

    fn client(transport: &Arc<MockTransport>) -> Arc<SyncClient<MockTransport>> {
        Arc::new(SyncClient::new(config(), transport.clone()))
    }

    fn payload(id: i64) -> SyncPayload {
        SyncPayload {
            detection_id: id,
            device_id: "edge-1".to_string(),
            timestamp: id as f64,
            class_name: "tiger".to_string(),
            confidence: 0.9,
            bbox: [1.0, 2.0, 3.0, 4.0],
            image_base64: None,
        }
    }

    fn record(timestamp: f64) -> DetectionRecord {
        DetectionRecord {
            id: None,
            device_id: "edge-1".to_string(),
            timestamp,
            class_id: 1,
            class_name: "tiger".to_string(),
            confidence: 0.8,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            image_path: None,
            synced: false,
            created_at: timestamp,
        }
    }

    #[tokio::test]
    async fn test_requests_carry_signed_headers() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);

        client.register_device().await.unwrap();

        let request = &transport.requests_to(REGISTER_PATH)[0];
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.header("X-API-Key"), Some("key-123"));
        assert_eq!(request.header("X-Device-ID"), Some("edge-1"));
        assert_eq!(request.header("X-Environment"), Some("production"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));

        let timestamp: i64 = request.header("X-Timestamp").unwrap().parse().unwrap();
        let body = request.body.as_deref().unwrap();
        let expected = RequestSigner::new(Some("device-secret")).sign(timestamp, body);
        assert_eq!(request.header("X-Signature"), Some(expected.as_str()));

        let sent: Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["device_id"], "edge-1");
        assert_eq!(sent["info"]["device_id"], "edge-1");
    }

    #[tokio::test]
    async fn test_get_requests_sign_empty_body() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);

        client.fetch_remote_config().await.unwrap();

        let request = &transport.requests_to("/devices/edge-1/config")[0];
        assert!(request.body.is_none());
        let timestamp: i64 = request.header("X-Timestamp").unwrap().parse().unwrap();
        let expected = RequestSigner::new(Some("device-secret")).sign(timestamp, "");
        assert_eq!(request.header("X-Signature"), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_server_errors_retry_with_backoff() {
        let transport = Arc::new(MockTransport::default());
        transport
            .push(MockReply::Status(503, "busy".into()))
            .push(MockReply::Status(500, String::new()))
            .push(MockReply::ok(r#"{"ok":true}"#));
        let client = client(&transport);
        let counts = Arc::new(Counts::default());
        client.register_observer(counts.clone());

        let value = client.fetch_remote_config().await.unwrap();
        assert_eq!(value["ok"], true);

        let timeline = transport.timeline();
        assert_eq!(timeline.len(), 3);
        assert!(timeline[1] - timeline[0] >= Duration::from_millis(20));
        assert!(timeline[2] - timeline[1] >= Duration::from_millis(40));
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(counts.errors.load(Ordering::SeqCst), 2);
        assert_eq!(counts.connected.load(Ordering::SeqCst), 1);
        assert_eq!(client.connection_record().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let transport = Arc::new(MockTransport::new(MockReply::Status(401, String::new())));
        let client = client(&transport);
        let counts = Arc::new(Counts::default());
        client.register_observer(counts.clone());

        let err = client.fetch_remote_config().await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication { .. }));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(client.state(), ConnectionState::Error);
        assert_eq!(counts.errors.load(Ordering::SeqCst), 1);

        let last = client.connection_record().last_error.unwrap();
        assert_eq!(last.code, Some(401));
    }

    #[tokio::test]
    async fn test_client_errors_and_bad_json_are_not_retried() {
        let transport = Arc::new(MockTransport::default());
        transport
            .push(MockReply::Status(404, "missing".into()))
            .push(MockReply::ok("<html>"));
        let client = client(&transport);

        let err = client.fetch_remote_config().await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        let err = client.fetch_remote_config().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidResponse(_)));

        assert_eq!(transport.request_count(), 2);
        assert_ne!(client.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_object() {
        let transport = Arc::new(MockTransport::new(MockReply::ok("")));
        let client = client(&transport);
        let value = client.fetch_remote_config().await.unwrap();
        assert_eq!(value, Value::Object(Map::new()));
    }

    #[tokio::test]
    async fn test_exhausted_retries_enter_error() {
        let transport = Arc::new(MockTransport::new(MockReply::Network));
        let client = client(&transport);
        let counts = Arc::new(Counts::default());
        client.register_observer(counts.clone());

        assert!(!client.check_connection().await);
        assert_eq!(transport.request_count(), 1);

        client.tracker.on_success();
        let err = client.fetch_remote_config().await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(transport.request_count(), 4);
        assert_eq!(client.state(), ConnectionState::Error);
        assert_eq!(counts.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_client_stays_offline() {
        let transport = Arc::new(MockTransport::default());
        let mut config = config();
        config.api_key = None;
        let client = Arc::new(SyncClient::new(config, transport.clone()));

        client.start().await;
        assert_eq!(client.state(), ConnectionState::Offline);
        assert!(client.enqueue(payload(1)));
        assert!(matches!(
            client.fetch_remote_config().await,
            Err(SyncError::NotConfigured)
        ));

        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Offline);
        assert_eq!(transport.request_count(), 0);
        assert_eq!(client.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);
        let counts = Arc::new(Counts::default());
        client.register_observer(counts.clone());

        client.start().await;
        client.start().await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.requests_to(REGISTER_PATH).len(), 1);

        client.stop().await;
        client.stop().await;
        assert!(!client.is_running());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(counts.disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_skips_registration_when_stored() {
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(MemoryStore::default());
        store.set_state(REGISTERED_KEY, "true").unwrap();
        let client =
            Arc::new(SyncClient::new(config(), transport.clone()).with_store(store.clone()));

        client.start().await;
        client.stop().await;
        assert!(transport.requests_to(REGISTER_PATH).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_dashboard_starts_disconnected() {
        let transport = Arc::new(MockTransport::new(MockReply::Timeout));
        let client = client(&transport);

        client.start().await;
        assert_ne!(client.state(), ConnectionState::Connected);
        assert_ne!(client.state(), ConnectionState::Connecting);
        client.stop().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_health_check_transitions() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);
        let counts = Arc::new(Counts::default());
        client.register_observer(counts.clone());

        assert!(client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Connected);

        transport.set_fallback(MockReply::Status(502, String::new()));
        assert!(!client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(counts.disconnected.load(Ordering::SeqCst), 1);

        assert!(!client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        transport.set_fallback(MockReply::ok("{}"));
        assert!(client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(counts.connected.load(Ordering::SeqCst), 2);
        assert!(client.connection_status().last_health_check_at.is_some());
    }

    #[tokio::test]
    async fn test_health_check_from_error_reconnects() {
        let transport = Arc::new(MockTransport::new(MockReply::Status(401, String::new())));
        let client = client(&transport);
        let _ = client.fetch_remote_config().await;
        assert_eq!(client.state(), ConnectionState::Error);

        transport.set_fallback(MockReply::Network);
        assert!(!client.health_check().await);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn test_heartbeat_reports_latency_after_first_success() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);
        client.on_detection(&record(1.0));
        client.on_detection(&record(2.0));

        client.heartbeat().await.unwrap();
        client.heartbeat().await.unwrap();

        let beats = transport.requests_to(HEARTBEAT_PATH);
        assert_eq!(beats.len(), 2);
        assert_eq!(transport.requests_to(HEALTH_PATH).len(), 1);

        let first: Value = serde_json::from_str(beats[0].body.as_deref().unwrap()).unwrap();
        let second: Value = serde_json::from_str(beats[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(first["status"], "online");
        assert_eq!(first["device_id"], "edge-1");
        assert_eq!(first["stats"]["detection_count"], 2);
        assert!(first["stats"]["latency_ms"].is_null());
        assert!(second["stats"]["latency_ms"].is_number());
        assert_eq!(client.stats().heartbeats_sent, 2);
    }

    #[tokio::test]
    async fn test_sync_drains_in_batches_and_marks_synced() {
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(MemoryStore::default());
        for i in 0..25 {
            store.insert(&record(i as f64)).unwrap();
        }
        let client =
            Arc::new(SyncClient::new(config(), transport.clone()).with_store(store.clone()));

        assert_eq!(client.restore_backlog().await, 25);
        let mut sizes = Vec::new();
        loop {
            let sent = client.sync_once().await.unwrap();
            if sent == 0 {
                break;
            }
            sizes.push(sent);
        }

        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(transport.requests_to(BATCH_PATH).len(), 3);
        assert_eq!(store.synced_ids().len(), 25);

        let first = &transport.requests_to(BATCH_PATH)[0];
        let body: Value = serde_json::from_str(first.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["device_id"], "edge-1");
        assert_eq!(body["detections"].as_array().unwrap().len(), 10);
        assert_eq!(body["detections"][0]["detection_id"], 1);

        let stats = client.stats();
        assert_eq!(stats.batches_sent, 3);
        assert_eq!(stats.detections_synced, 25);
    }

    #[tokio::test]
    async fn test_restore_backlog_skips_queued_rows() {
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(MemoryStore::default());
        let first = store.insert(&record(1.0)).unwrap();
        store.insert(&record(2.0)).unwrap();
        let client =
            Arc::new(SyncClient::new(config(), transport.clone()).with_store(store.clone()));

        client.enqueue(record(1.0).to_payload(first, None));

        assert_eq!(client.restore_backlog().await, 1);
        assert_eq!(client.restore_backlog().await, 0);
        assert_eq!(client.queue().len(), 2);

        assert_eq!(client.sync_once().await.unwrap(), 2);
        let body: Value = serde_json::from_str(
            transport.requests_to(BATCH_PATH)[0].body.as_deref().unwrap(),
        )
        .unwrap();
        let ids: Vec<i64> = body["detections"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["detection_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_batch_is_requeued() {
        let transport = Arc::new(MockTransport::new(MockReply::Status(400, String::new())));
        let client = client(&transport);
        for id in 1..=3 {
            client.enqueue(payload(id));
        }

        assert!(client.sync_once().await.is_err());
        assert_eq!(client.queue().len(), 3);
        assert_eq!(client.stats().batches_failed, 1);

        transport.set_fallback(MockReply::ok("{}"));
        assert_eq!(client.sync_once().await.unwrap(), 3);
        assert!(client.queue().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_send_falls_back_to_queue() {
        let transport = Arc::new(MockTransport::default());
        transport.push(MockReply::Status(422, "bad".into()));
        let client = client(&transport);

        assert!(!client.send_detection_immediate(payload(1)).await);
        assert_eq!(client.queue().len(), 1);

        assert!(client.send_detection_immediate(payload(2)).await);
        assert_eq!(client.queue().len(), 1);
        assert_eq!(transport.requests_to(DETECTION_PATH).len(), 2);

        let stats = client.stats();
        assert_eq!(stats.immediate_sent, 1);
        assert_eq!(stats.immediate_failed, 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let transport = Arc::new(MockTransport::new(MockReply::Network));
        let mut config = config();
        config.profile.retry =
            BackoffPolicy::new(Duration::from_secs(30), 2.0, Duration::from_secs(60));
        let client = Arc::new(SyncClient::new(config, transport.clone()));

        client.start().await;
        let started = Instant::now();
        client.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_connection_status_summary() {
        let transport = Arc::new(MockTransport::default());
        let client = client(&transport);
        client.enqueue(payload(9));

        let status = client.connection_status();
        assert!(status.configured);
        assert!(status.signed);
        assert_eq!(status.environment, "production");
        assert_eq!(status.queue_depth, 1);
        assert_eq!(status.state, ConnectionState::Disconnected);
    }
}
