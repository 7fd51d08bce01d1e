//! CameraSupervisor - discovery, capture fan-out and recovery
//!
//! Each camera lives in its own slot behind its own lock. Blocking reads run
//! on the blocking pool; recovery runs as one background task per camera, so
//! a recovering camera never stalls its siblings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use contracts::{
    BackoffPolicy, CameraConfig, CameraKind, CameraObserver, CameraRoster, CameraSnapshot,
    CameraStatus, Frame, FrameSource, ObserverSet,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{CameraBackend, CaptureSettings};
use crate::device::{CameraDevice, CaptureOutcome};
use crate::error::{CameraError, Result};
use crate::probe::DeviceProbe;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub settings: CaptureSettings,
    pub fallback_usb: bool,
    pub simulated_fallback: bool,
    /// Preferred external index, tried before the others
    pub device_index: Option<u32>,
    pub max_cameras: u32,
    pub auto_recovery: bool,
    pub error_threshold: u32,
    pub max_recovery_attempts: u32,
    pub recovery_backoff: BackoffPolicy,
    /// Upper bound for joining recovery tasks on stop
    pub join_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&CameraConfig::default())
    }
}

impl From<&CameraConfig> for SupervisorConfig {
    fn from(config: &CameraConfig) -> Self {
        Self {
            settings: CaptureSettings::from(config),
            fallback_usb: config.fallback_usb,
            simulated_fallback: config.simulated_fallback,
            device_index: config.device_index,
            max_cameras: config.max_cameras.max(1),
            auto_recovery: config.auto_recovery,
            error_threshold: config.error_threshold,
            max_recovery_attempts: config.max_recovery_attempts,
            recovery_backoff: BackoffPolicy::doubling(
                Duration::from_millis(config.recovery_base_delay_ms),
                Duration::from_millis(config.recovery_max_delay_ms),
            ),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl SupervisorConfig {
    fn multi_camera(&self) -> bool {
        self.max_cameras > 1
    }
}

/// Supervisor counters
#[derive(Debug, Default)]
pub struct CameraMetrics {
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    recoveries_started: AtomicU64,
    recoveries_succeeded: AtomicU64,
    permanent_failures: AtomicU64,
}

impl CameraMetrics {
    pub fn snapshot(&self) -> CameraMetricsSnapshot {
        CameraMetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            recoveries_started: self.recoveries_started.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CameraMetricsSnapshot {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub recoveries_started: u64,
    pub recoveries_succeeded: u64,
    pub permanent_failures: u64,
}

/// Aggregate camera status for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStats {
    pub cameras: usize,
    pub running: usize,
    pub recovering: usize,
    pub failed: usize,
    pub metrics: CameraMetricsSnapshot,
}

#[derive(Clone)]
struct CameraSlot {
    id: String,
    device: Arc<Mutex<CameraDevice>>,
}

/// State shared with recovery tasks
struct Shared {
    config: SupervisorConfig,
    probe: Arc<dyn DeviceProbe>,
    observers: ObserverSet<dyn CameraObserver>,
    cancel: CancellationToken,
    metrics: CameraMetrics,
}

impl Shared {
    fn notify_transition(&self, camera_id: &str, from: CameraStatus, to: CameraStatus) {
        if from != to {
            debug!(camera_id, from = ?from, to = ?to, "Camera status changed");
            self.observers
                .notify(|o| o.on_status_change(camera_id, from, to));
        }
    }

    /// Candidate sources in discovery order
    fn candidates(&self, include_simulated: bool) -> Vec<(CameraKind, u32)> {
        let mut sources = vec![(CameraKind::Hardware, 0)];
        if self.config.fallback_usb {
            let mut externals = self.probe.external_indices();
            if let Some(preferred) = self.config.device_index {
                externals.retain(|&i| i != preferred);
                externals.insert(0, preferred);
            }
            sources.extend(externals.into_iter().map(|i| (CameraKind::Fallback, i)));
        }
        if include_simulated && self.config.simulated_fallback {
            sources.push((CameraKind::Simulated, 0));
        }
        sources
    }

    /// Open and verify one source
    fn open_verified(&self, kind: CameraKind, index: u32) -> Result<Box<dyn CameraBackend>> {
        let backend = self
            .probe
            .open(kind, index)
            .ok_or_else(|| CameraError::init_failed(kind.camera_id(index), "source not present"))?;
        CameraDevice::prepare_backend(backend, &self.config.settings)
    }

    /// First source that opens, in discovery order
    fn open_first(&self) -> Result<(CameraKind, u32, Box<dyn CameraBackend>)> {
        for (kind, index) in self.candidates(true) {
            match self.open_verified(kind, index) {
                Ok(backend) => return Ok((kind, index, backend)),
                Err(e) => debug!(kind = %kind, index, error = %e, "Camera source unavailable"),
            }
        }
        Err(CameraError::NoCameraAvailable)
    }

    /// Re-run discovery for a recovering camera
    ///
    /// A single camera may degrade to any source; in multi-camera mode each
    /// slot re-opens its own source.
    fn reopen(&self, kind: CameraKind, index: u32) -> Result<Box<dyn CameraBackend>> {
        if self.config.multi_camera() {
            self.open_verified(kind, index)
        } else {
            self.open_first().map(|(_, _, backend)| backend)
        }
    }
}

/// Owns every camera of the agent
pub struct CameraSupervisor {
    shared: Arc<Shared>,
    slots: Vec<CameraSlot>,
    recovery_tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl CameraSupervisor {
    /// Discover cameras with a private cancellation token
    pub fn discover(config: SupervisorConfig, probe: Arc<dyn DeviceProbe>) -> Result<Self> {
        Self::discover_with_token(config, probe, CancellationToken::new())
    }

    /// Discover cameras. Blocking: opens and probes devices.
    ///
    /// # Errors
    /// `NoCameraAvailable` when every source failed (including the simulated
    /// generator, if allowed).
    #[instrument(name = "camera_discover", skip_all, fields(max_cameras = config.max_cameras))]
    pub fn discover_with_token(
        config: SupervisorConfig,
        probe: Arc<dyn DeviceProbe>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            config,
            probe,
            observers: ObserverSet::new("camera"),
            cancel,
            metrics: CameraMetrics::default(),
        });

        let slots = if shared.config.multi_camera() {
            Self::discover_many(&shared)
        } else {
            Self::discover_one(&shared)?
        };
        if slots.is_empty() {
            return Err(CameraError::NoCameraAvailable);
        }

        info!(
            cameras = slots.len(),
            ids = ?slots.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "Camera discovery complete"
        );

        Ok(Self {
            shared,
            slots,
            recovery_tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        })
    }

    fn discover_one(shared: &Shared) -> Result<Vec<CameraSlot>> {
        let (kind, index, backend) = shared.open_first()?;
        if kind == CameraKind::Simulated {
            warn!("No physical camera available, using simulated source");
        }
        Ok(vec![Self::make_slot(shared, kind, index, backend)])
    }

    fn discover_many(shared: &Shared) -> Vec<CameraSlot> {
        let max = shared.config.max_cameras as usize;
        let mut slots = Vec::new();
        for (kind, index) in shared.candidates(false) {
            if slots.len() >= max {
                break;
            }
            match shared.open_verified(kind, index) {
                Ok(backend) => slots.push(Self::make_slot(shared, kind, index, backend)),
                Err(e) => debug!(kind = %kind, index, error = %e, "Camera source unavailable"),
            }
        }
        if slots.is_empty() && shared.config.simulated_fallback {
            warn!("No physical camera available, using simulated source");
            match shared.open_verified(CameraKind::Simulated, 0) {
                Ok(backend) => {
                    slots.push(Self::make_slot(shared, CameraKind::Simulated, 0, backend))
                }
                Err(e) => error!(error = %e, "Simulated camera failed to start"),
            }
        }
        slots
    }

    fn make_slot(
        shared: &Shared,
        kind: CameraKind,
        index: u32,
        backend: Box<dyn CameraBackend>,
    ) -> CameraSlot {
        let id = kind.camera_id(index);
        let mut device = CameraDevice::new(
            id.clone(),
            kind,
            index,
            shared.config.settings,
            shared.config.error_threshold,
        );
        device.install_backend(backend);
        shared.notify_transition(&id, CameraStatus::Uninitialized, CameraStatus::Ready);
        CameraSlot {
            id,
            device: Arc::new(Mutex::new(device)),
        }
    }

    /// Register a lifecycle observer
    pub fn register_observer(&self, observer: Arc<dyn CameraObserver>) {
        self.shared.observers.register(observer);
    }

    /// Camera ids in discovery order
    pub fn camera_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capture from one camera. `None` when unavailable or the read failed.
    pub async fn capture(&self, camera_id: &str) -> Option<Frame> {
        let Some(slot) = self.slots.iter().find(|s| s.id == camera_id) else {
            warn!(camera_id, "{}", CameraError::UnknownCamera(camera_id.to_string()));
            return None;
        };
        let read = read_slot(Arc::clone(&self.shared), slot.clone()).await;
        if read.needs_recovery {
            self.trigger_recovery(slot);
        }
        read.frame
    }

    /// Capture from the first discovered camera
    pub async fn capture_primary(&self) -> Option<Frame> {
        let id = self.slots.first()?.id.clone();
        self.capture(&id).await
    }

    /// One concurrent read per camera; failures are isolated and not retried
    pub async fn capture_all(&self) -> Vec<(String, Frame)> {
        if self.stopped.load(Ordering::Acquire) {
            return Vec::new();
        }

        let mut set = JoinSet::new();
        for (order, slot) in self.slots.iter().enumerate() {
            let shared = Arc::clone(&self.shared);
            let slot = slot.clone();
            set.spawn(async move { (order, read_slot(shared, slot).await) });
        }

        let mut reads = Vec::with_capacity(self.slots.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(read) => reads.push(read),
                Err(e) => warn!(error = %e, "Capture task failed"),
            }
        }
        reads.sort_by_key(|(order, _)| *order);

        let mut frames = Vec::with_capacity(reads.len());
        for (order, read) in reads {
            if read.needs_recovery {
                self.trigger_recovery(&self.slots[order]);
            }
            if let Some(frame) = read.frame {
                frames.push((self.slots[order].id.clone(), frame));
            }
        }
        frames
    }

    fn trigger_recovery(&self, slot: &CameraSlot) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        if !self.shared.config.auto_recovery {
            warn!(camera_id = %slot.id, "Auto recovery disabled, camera stays in error state");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let id = slot.id.clone();
        let device = Arc::clone(&slot.device);
        let handle = tokio::spawn(async move {
            recover(shared, id, device).await;
        });

        let mut tasks = lock(&self.recovery_tasks);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Current roster
    pub fn snapshots(&self) -> Vec<CameraSnapshot> {
        self.slots
            .iter()
            .map(|s| lock(&s.device).record().snapshot())
            .collect()
    }

    /// Status of one camera
    pub fn status(&self, camera_id: &str) -> Option<CameraStatus> {
        self.slots
            .iter()
            .find(|s| s.id == camera_id)
            .map(|s| lock(&s.device).status())
    }

    pub fn metrics(&self) -> CameraMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn stats(&self) -> SupervisorStats {
        let mut stats = SupervisorStats {
            cameras: self.slots.len(),
            metrics: self.metrics(),
            ..Default::default()
        };
        for slot in &self.slots {
            match lock(&slot.device).status() {
                CameraStatus::Ready | CameraStatus::Running => stats.running += 1,
                CameraStatus::Error | CameraStatus::Recovering => stats.recovering += 1,
                CameraStatus::PermanentlyFailed => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Stop recovery and release every device. Idempotent.
    #[instrument(name = "camera_supervisor_stop", skip(self))]
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Camera supervisor already stopped");
            return;
        }
        self.shared.cancel.cancel();

        let handles = std::mem::take(&mut *lock(&self.recovery_tasks));
        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.shared.config.join_timeout, handle)
                .await
                .is_err()
            {
                warn!("Recovery task did not stop in time, aborting");
                abort.abort();
            }
        }

        let slots = self.slots.clone();
        let released = tokio::task::spawn_blocking(move || {
            slots
                .iter()
                .map(|slot| {
                    let mut device = lock(&slot.device);
                    let before = device.status();
                    device.release();
                    (slot.id.clone(), before)
                })
                .collect::<Vec<_>>()
        })
        .await;

        match released {
            Ok(released) => {
                for (id, before) in released {
                    self.shared
                        .notify_transition(&id, before, CameraStatus::Disconnected);
                }
            }
            Err(e) => error!(error = %e, "Failed to release cameras"),
        }

        info!(cameras = self.slots.len(), "Camera supervisor stopped");
    }
}

impl CameraRoster for CameraSupervisor {
    fn roster(&self) -> Vec<CameraSnapshot> {
        self.snapshots()
    }
}

impl FrameSource for CameraSupervisor {
    fn name(&self) -> &str {
        "camera_supervisor"
    }

    async fn capture_cycle(&self) -> Vec<Frame> {
        if self.slots.len() == 1 {
            if self.stopped.load(Ordering::Acquire) {
                return Vec::new();
            }
            return self.capture_primary().await.into_iter().collect();
        }
        self.capture_all()
            .await
            .into_iter()
            .map(|(_, frame)| frame)
            .collect()
    }
}

impl Drop for CameraSupervisor {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

struct SlotRead {
    frame: Option<Frame>,
    needs_recovery: bool,
}

async fn read_slot(shared: Arc<Shared>, slot: CameraSlot) -> SlotRead {
    let device = Arc::clone(&slot.device);
    let joined = tokio::task::spawn_blocking(move || {
        let mut device = lock(&device);
        let before = device.status();
        let outcome = device.capture();
        (before, device.status(), outcome)
    })
    .await;

    let (before, after, outcome) = match joined {
        Ok(result) => result,
        Err(e) => {
            warn!(camera_id = %slot.id, error = %e, "Capture task panicked");
            return SlotRead {
                frame: None,
                needs_recovery: false,
            };
        }
    };
    shared.notify_transition(&slot.id, before, after);

    match outcome {
        CaptureOutcome::Captured(frame) => {
            shared.metrics.frames_captured.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("edge_agent_frames_captured_total", "camera_id" => slot.id.clone())
                .increment(1);
            SlotRead {
                frame: Some(frame),
                needs_recovery: false,
            }
        }
        CaptureOutcome::Unavailable => SlotRead {
            frame: None,
            needs_recovery: false,
        },
        CaptureOutcome::Failed {
            threshold_reached, ..
        } => {
            shared.metrics.capture_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("edge_agent_capture_failures_total", "camera_id" => slot.id.clone())
                .increment(1);
            SlotRead {
                frame: None,
                needs_recovery: threshold_reached,
            }
        }
    }
}

/// Recovery loop for one camera
#[instrument(name = "camera_recovery", skip(shared, device), fields(camera_id = %camera_id))]
async fn recover(shared: Arc<Shared>, camera_id: String, device: Arc<Mutex<CameraDevice>>) {
    let (kind, index) = {
        let mut device = lock(&device);
        if device.status() != CameraStatus::Error {
            return;
        }
        device.begin_recovery();
        (device.record().kind, device.record().index)
    };
    shared.notify_transition(&camera_id, CameraStatus::Error, CameraStatus::Recovering);
    shared.metrics.recoveries_started.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("edge_agent_camera_recoveries_total", "camera_id" => camera_id.clone())
        .increment(1);

    let max_attempts = shared.config.max_recovery_attempts;
    for attempt in 1..=max_attempts {
        let delay = shared.config.recovery_backoff.delay_for_attempt(attempt);
        info!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Camera recovery attempt scheduled"
        );
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("Camera recovery cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        lock(&device).note_recovery_attempt(attempt);
        let task_shared = Arc::clone(&shared);
        let reopened = tokio::task::spawn_blocking(move || task_shared.reopen(kind, index)).await;

        match reopened {
            Ok(Ok(mut backend)) => {
                let mut guard = lock(&device);
                if guard.status() != CameraStatus::Recovering {
                    // stopped while we were reopening
                    backend.release();
                    return;
                }
                guard.install_backend(backend);
                drop(guard);

                shared.metrics.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
                shared.notify_transition(&camera_id, CameraStatus::Recovering, CameraStatus::Ready);
                info!(attempt, "Camera recovered");
                return;
            }
            Ok(Err(e)) => warn!(attempt, error = %e, "Camera recovery attempt failed"),
            Err(e) => warn!(attempt, error = %e, "Camera recovery task panicked"),
        }
    }

    let failed = {
        let mut guard = lock(&device);
        if guard.status() == CameraStatus::Recovering {
            guard.mark_permanently_failed();
            true
        } else {
            false
        }
    };
    if failed {
        let err = CameraError::PermanentlyFailed {
            camera: camera_id.clone(),
            attempts: max_attempts,
        };
        error!(error = %err, "Camera permanently failed");
        shared.metrics.permanent_failures.fetch_add(1, Ordering::Relaxed);
        shared.notify_transition(
            &camera_id,
            CameraStatus::Recovering,
            CameraStatus::PermanentlyFailed,
        );
        let reason = err.to_string();
        shared
            .observers
            .notify(|o| o.on_permanent_failure(&camera_id, &reason));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
