//! ServiceRuntime - wires and supervises every component

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use camera::{CameraSupervisor, SupervisorConfig};
use contracts::{AgentConfig, DetectorSettings, DeviceInfo, PayloadQueue};
use detection::{DetectionPipeline, PipelineConfig};
use recorder::{EventSink, EventSinkConfig};
use sync_client::{SyncClient, SyncClientConfig, Transport};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::components::RuntimeComponents;
use crate::error::{Result, RuntimeError};
use crate::stats::RuntimeStats;

/// Lifecycle of the whole agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Startup failed; `start` may be retried
    Failed,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

/// Components built by one `start`
struct Active<T> {
    cancel: CancellationToken,
    supervisor: Option<Arc<CameraSupervisor>>,
    pipeline: Option<Arc<DetectionPipeline<CameraSupervisor>>>,
    sink: Arc<EventSink>,
    sync: Arc<SyncClient<T>>,
    tasks: Vec<JoinHandle<()>>,
    started_at: Instant,
}

pub struct ServiceRuntime<T> {
    config: AgentConfig,
    components: RuntimeComponents<T>,
    state: Mutex<ServiceState>,
    active: Mutex<Option<Active<T>>>,
    /// Serializes `start` and `stop`
    lifecycle: tokio::sync::Mutex<()>,
    /// Token of a `start` still in progress, so `stop` can interrupt it
    launching: Mutex<Option<CancellationToken>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<T: Transport + Sync + 'static> ServiceRuntime<T> {
    pub fn new(config: AgentConfig, components: RuntimeComponents<T>) -> Self {
        Self {
            config,
            components,
            state: Mutex::new(ServiceState::Stopped),
            active: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            launching: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> ServiceState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ServiceState) {
        let previous = std::mem::replace(&mut *lock(&self.state), state);
        if previous != state {
            info!(from = previous.as_str(), to = state.as_str(), "Service state changed");
        }
    }

    /// The dashboard client of the running (or last) start
    pub fn sync_client(&self) -> Option<Arc<SyncClient<T>>> {
        lock(&self.active).as_ref().map(|a| Arc::clone(&a.sync))
    }

    pub fn supervisor(&self) -> Option<Arc<CameraSupervisor>> {
        lock(&self.active).as_ref().and_then(|a| a.supervisor.clone())
    }

    /// Discover cameras and spawn every loop. Idempotent while running.
    ///
    /// # Errors
    /// Camera discovery failure or a failed blocking task; the runtime is
    /// left `Failed` with nothing running. A `stop` issued while starting
    /// tears down whatever was launched and yields [`RuntimeError::Cancelled`].
    #[instrument(name = "service_start", skip_all, fields(device_id = %self.config.device.id))]
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let cancel = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            match *state {
                ServiceState::Running | ServiceState::Starting => {
                    debug!(state = state.as_str(), "Service already started");
                    return Ok(());
                }
                ServiceState::Stopping => {
                    return Err(RuntimeError::InvalidState {
                        action: "start",
                        state: "stopping",
                    });
                }
                ServiceState::Stopped | ServiceState::Failed => *state = ServiceState::Starting,
            }
            *lock(&self.launching) = Some(cancel.clone());
        }
        info!("Service starting");

        let launched = self.launch(cancel.clone()).await;
        lock(&self.launching).take();

        match launched {
            Ok(mut active) if cancel.is_cancelled() => {
                warn!("Stop requested during startup, tearing down");
                self.set_state(ServiceState::Stopping);
                let tasks = std::mem::take(&mut active.tasks);
                self.teardown(tasks, active.supervisor.clone(), Arc::clone(&active.sync))
                    .await;
                *lock(&self.active) = Some(active);
                self.set_state(ServiceState::Stopped);
                Err(RuntimeError::Cancelled)
            }
            Ok(active) => {
                let tasks = active.tasks.len();
                *lock(&self.active) = Some(active);
                self.set_state(ServiceState::Running);
                info!(tasks, "Service running");
                Ok(())
            }
            Err(_) if cancel.is_cancelled() => {
                warn!("Stop requested during startup");
                self.set_state(ServiceState::Stopped);
                Err(RuntimeError::Cancelled)
            }
            Err(e) => {
                error!(error = %e, "Service failed to start");
                self.set_state(ServiceState::Failed);
                Err(e)
            }
        }
    }

    async fn launch(&self, cancel: CancellationToken) -> Result<Active<T>> {
        let supervisor = if self.config.camera.enabled {
            let supervisor_config = SupervisorConfig::from(&self.config.camera);
            let probe = Arc::clone(&self.components.probe);
            let token = cancel.child_token();
            let discovered = tokio::task::spawn_blocking(move || {
                CameraSupervisor::discover_with_token(supervisor_config, probe, token)
            })
            .await
            .map_err(|e| RuntimeError::Task(e.to_string()))??;
            Some(Arc::new(discovered))
        } else {
            warn!("Camera disabled, running dashboard sync only");
            None
        };

        let mut sync = SyncClient::new(
            SyncClientConfig::from(&self.config),
            Arc::clone(&self.components.transport),
        )
        .with_store(Arc::clone(&self.components.store))
        .with_device_info(self.device_info())
        .with_cancellation(&cancel);
        if let Some(telemetry) = &self.components.telemetry {
            sync = sync.with_telemetry(Arc::clone(telemetry));
        }
        if let Some(supervisor) = &supervisor {
            sync = sync.with_roster(supervisor.clone());
        }
        let sync = Arc::new(sync);

        // backlog restore must finish before the sink starts queueing
        sync.start().await;

        let queue: Arc<dyn PayloadQueue> = sync.clone();
        let sink = Arc::new(EventSink::new(
            EventSinkConfig::from(&self.config),
            Arc::clone(&self.components.store),
            self.components.images.clone(),
            Some(queue),
        ));
        sink.register_observer(sync.clone());

        let (events_tx, events_rx) =
            mpsc::channel(self.config.detection.event_queue_capacity.max(1));
        let mut tasks = Vec::new();

        let pipeline = match &supervisor {
            Some(supervisor) => {
                let detector = &self.components.detector;
                let settings = DetectorSettings::from(&self.config.detection);
                detector.configure(&settings);
                info!(
                    detector = detector.name(),
                    iou_threshold = settings.iou_threshold,
                    num_threads = settings.num_threads,
                    format = %self.config.camera.format,
                    "Detector configured"
                );
                let pipeline = Arc::new(DetectionPipeline::new(
                    Arc::clone(supervisor),
                    Arc::clone(&self.components.detector),
                    PipelineConfig::from(&self.config),
                ));
                tasks.extend(pipeline.start(events_tx, cancel.clone()).into_vec());
                Some(pipeline)
            }
            None => {
                drop(events_tx);
                None
            }
        };
        tasks.push(sink.spawn(events_rx, cancel.clone()));

        Ok(Active {
            cancel,
            supervisor,
            pipeline,
            sink,
            sync,
            tasks,
            started_at: Instant::now(),
        })
    }

    fn device_info(&self) -> DeviceInfo {
        let caps = self.components.probe.capabilities();
        DeviceInfo {
            device_id: self.config.device.id.clone(),
            name: self.config.device.name.clone(),
            platform: caps.os.clone(),
            arch: caps.arch.clone(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            board_model: caps.board_model.clone(),
        }
    }

    /// Cancel every loop, wait for them within the shutdown timeout (aborting
    /// the rest), release the cameras and stop the dashboard client.
    /// Idempotent.
    #[instrument(name = "service_stop", skip_all)]
    pub async fn stop(&self) {
        if let Some(launching) = lock(&self.launching).as_ref() {
            launching.cancel();
        }
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut state = lock(&self.state);
            match *state {
                ServiceState::Stopped | ServiceState::Stopping => return,
                ServiceState::Failed => {
                    *state = ServiceState::Stopped;
                    return;
                }
                ServiceState::Starting | ServiceState::Running => {
                    *state = ServiceState::Stopping;
                }
            }
        }
        info!("Service stopping");

        let taken = {
            let mut active = lock(&self.active);
            active.as_mut().map(|a| {
                (
                    a.cancel.clone(),
                    std::mem::take(&mut a.tasks),
                    a.supervisor.clone(),
                    Arc::clone(&a.sync),
                )
            })
        };

        if let Some((cancel, tasks, supervisor, sync)) = taken {
            cancel.cancel();
            self.teardown(tasks, supervisor, sync).await;
        }

        self.set_state(ServiceState::Stopped);
        info!("Service stopped");
    }

    /// Join the cancelled loops, then release cameras and the dashboard client
    async fn teardown(
        &self,
        tasks: Vec<JoinHandle<()>>,
        supervisor: Option<Arc<CameraSupervisor>>,
        sync: Arc<SyncClient<T>>,
    ) {
        let timeout = Duration::from_secs(self.config.system.shutdown_timeout_secs);
        join_all(tasks, timeout).await;

        if let Some(supervisor) = supervisor {
            supervisor.stop().await;
        }
        sync.stop().await;
    }

    /// Start, wait for Ctrl-C or SIGTERM, then stop
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Start, wait for `shutdown`, then stop
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        warn!("Shutdown requested");
        self.stop().await;
        Ok(())
    }

    pub fn stats(&self) -> RuntimeStats {
        let state = self.state();
        let active = lock(&self.active);
        let Some(active) = active.as_ref() else {
            return RuntimeStats {
                state,
                ..Default::default()
            };
        };
        RuntimeStats {
            state,
            uptime: active.started_at.elapsed(),
            cameras: active.supervisor.as_ref().map(|s| s.stats()),
            pipeline: active.pipeline.as_ref().map(|p| p.metrics()),
            detector_latency: active.pipeline.as_ref().map(|p| p.latency_summary()),
            sink: active.sink.metrics(),
            sync: active.sync.stats(),
        }
    }
}

/// Await every handle, sharing one deadline; stragglers are aborted
async fn join_all(tasks: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut aborted = 0usize;
    for handle in tasks {
        let abort = handle.abort_handle();
        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_panic() => error!(error = %e, "Task panicked"),
            Ok(Err(_)) => {}
            Err(_) => {
                abort.abort();
                aborted += 1;
            }
        }
    }
    if aborted > 0 {
        warn!(aborted, timeout_secs = timeout.as_secs_f64(), "Tasks aborted on shutdown");
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera::{PlatformCapabilities, SystemProbe};
    use contracts::{ConnectionState, Detection, Detector, DetectorError, Frame};
    use detection::NullDetector;
    use recorder::SqliteDetectionStore;
    use std::collections::HashSet;
    use sync_client::{HttpRequest, HttpResponse, MockReply, MockTransport};

    /// Reports one "person" on every frame
    struct PersonDetector;

    impl Detector for PersonDetector {
        fn name(&self) -> &str {
            "person"
        }

        fn detect(&self, frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(vec![Detection {
                class_id: 0,
                class_name: "person".to_string(),
                confidence: 0.9,
                bbox: [0.0, 0.0, frame.width as f32 / 2.0, frame.height as f32 / 2.0].into(),
                timestamp: frame.captured_at,
            }])
        }
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.device.id = "edge-test".to_string();
        config.camera.width = 32;
        config.camera.height = 24;
        config.camera.fps = 20.0;
        config.camera.simulated_fallback = true;
        config.alerts.cooldown_seconds = 3600.0;
        config.system.shutdown_timeout_secs = 2;
        config
    }

    /// Holds every health check for `delay`, keeping `start` in its
    /// connection phase
    struct SlowHealth {
        inner: Arc<MockTransport>,
        delay: Duration,
    }

    impl Transport for SlowHealth {
        async fn send(&self, request: HttpRequest) -> sync_client::Result<HttpResponse> {
            if request.path == "/health" {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.send(request).await
        }
    }

    /// Remembers the settings it was configured with
    #[derive(Default)]
    struct RecordingDetector {
        settings: std::sync::Mutex<Vec<DetectorSettings>>,
    }

    impl Detector for RecordingDetector {
        fn name(&self) -> &str {
            "recording"
        }

        fn detect(&self, _frame: &Frame) -> std::result::Result<Vec<Detection>, DetectorError> {
            Ok(Vec::new())
        }

        fn configure(&self, settings: &DetectorSettings) {
            self.settings.lock().unwrap().push(*settings);
        }
    }

    fn dashboard_config() -> AgentConfig {
        let mut config = config();
        config.dashboard.api_url = Some("http://dashboard.test".to_string());
        config.dashboard.api_key = Some("key".to_string());
        config
    }

    fn slow_health(delay: Duration) -> (Arc<MockTransport>, Arc<SlowHealth>) {
        let inner = Arc::new(MockTransport::new(MockReply::ok("{}")));
        let transport = Arc::new(SlowHealth {
            inner: inner.clone(),
            delay,
        });
        (inner, transport)
    }

    fn components<T>(transport: Arc<T>) -> RuntimeComponents<T> {
        RuntimeComponents {
            probe: Arc::new(SystemProbe::new(PlatformCapabilities::default())),
            detector: Arc::new(NullDetector),
            store: Arc::new(SqliteDetectionStore::open_in_memory().unwrap()),
            images: None,
            telemetry: None,
            transport,
        }
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let runtime = ServiceRuntime::new(config(), components(Arc::new(MockTransport::default())));
        assert_eq!(runtime.state(), ServiceState::Stopped);

        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert_eq!(runtime.state(), ServiceState::Running);
        assert_eq!(runtime.supervisor().unwrap().camera_ids(), vec!["simulated_0".to_string()]);
        assert_eq!(runtime.sync_client().unwrap().state(), ConnectionState::Offline);

        runtime.stop().await;
        runtime.stop().await;
        assert_eq!(runtime.state(), ServiceState::Stopped);
        assert_eq!(runtime.stats().state, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_detections_flow_to_storage_and_queue() {
        let transport = Arc::new(MockTransport::default());
        let runtime = ServiceRuntime::new(
            config(),
            components(transport).with_detector(Arc::new(PersonDetector)),
        );

        runtime.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        runtime.stop().await;

        let stats = runtime.stats();
        let pipeline = stats.pipeline.unwrap();
        assert!(pipeline.frames_processed >= 2, "{pipeline:?}");
        assert_eq!(pipeline.events_emitted, 1);
        assert!(pipeline.detections_suppressed >= 1);
        assert_eq!(stats.sink.records_persisted, 1);
        assert_eq!(stats.sync.detections_seen, 1);
        assert_eq!(stats.sync.queue_depth, 1);
    }

    #[tokio::test]
    async fn test_failed_discovery_leaves_runtime_failed() {
        let mut config = config();
        config.camera.simulated_fallback = false;
        let runtime = ServiceRuntime::new(config, components(Arc::new(MockTransport::default())));

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Camera(_)));
        assert_eq!(runtime.state(), ServiceState::Failed);

        runtime.stop().await;
        assert_eq!(runtime.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_camera_disabled_runs_sync_only() {
        let mut config = config();
        config.camera.enabled = false;
        config.dashboard.api_url = Some("http://dashboard.test".to_string());
        config.dashboard.api_key = Some("key".to_string());
        let transport = Arc::new(MockTransport::new(MockReply::ok("{}")));
        let runtime = ServiceRuntime::new(config, components(transport.clone()));

        runtime.start().await.unwrap();
        assert!(runtime.supervisor().is_none());
        assert_eq!(runtime.sync_client().unwrap().state(), ConnectionState::Connected);

        runtime.stop().await;
        assert!(runtime.stats().pipeline.is_none());
        assert!(!transport.requests_to("/health").is_empty());
    }

    #[tokio::test]
    async fn test_slow_dashboard_start_syncs_each_detection_once() {
        let mut config = dashboard_config();
        config.alerts.cooldown_seconds = 0.0;
        let (mock, transport) = slow_health(Duration::from_millis(300));
        let runtime = ServiceRuntime::new(
            config,
            components(transport).with_detector(Arc::new(PersonDetector)),
        );

        runtime.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        runtime.stop().await;

        let sync = runtime.sync_client().unwrap();
        while sync.sync_once().await.unwrap() > 0 {}

        let mut ids = Vec::new();
        for request in mock.requests_to("/devices/detections/batch") {
            let body: serde_json::Value =
                serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
            for detection in body["detections"].as_array().unwrap() {
                ids.push(detection["detection_id"].as_i64().unwrap());
            }
        }
        assert!(!ids.is_empty());
        let unique: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate submissions: {ids:?}");
        assert_eq!(runtime.stats().sink.records_persisted, ids.len() as u64);
    }

    #[tokio::test]
    async fn test_stop_while_starting_tears_down_launched_loops() {
        let (_, transport) = slow_health(Duration::from_millis(300));
        let runtime = ServiceRuntime::new(
            dashboard_config(),
            components(transport).with_detector(Arc::new(PersonDetector)),
        );

        let (started, _) = tokio::join!(runtime.start(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(runtime.state(), ServiceState::Starting);
            runtime.stop().await;
        });

        assert!(matches!(started, Err(RuntimeError::Cancelled)), "{started:?}");
        assert_eq!(runtime.state(), ServiceState::Stopped);
        assert!(!runtime.sync_client().unwrap().is_running());

        let frames = runtime.stats().pipeline.unwrap().frames_captured;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runtime.stats().pipeline.unwrap().frames_captured, frames);

        runtime.start().await.unwrap();
        assert_eq!(runtime.state(), ServiceState::Running);
        runtime.stop().await;
    }

    #[tokio::test]
    async fn test_detector_receives_configured_settings() {
        let mut config = config();
        config.detection.iou_threshold = 0.3;
        config.detection.num_threads = 2;
        config.camera.format = "GRAY8".to_string();
        let detector = Arc::new(RecordingDetector::default());
        let runtime = ServiceRuntime::new(
            config,
            components(Arc::new(MockTransport::default())).with_detector(detector.clone()),
        );

        runtime.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        runtime.stop().await;

        let settings = detector.settings.lock().unwrap().clone();
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].iou_threshold, 0.3);
        assert_eq!(settings[0].num_threads, 2);
        assert!(runtime.stats().pipeline.unwrap().frames_processed >= 1);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_signal() {
        let runtime = ServiceRuntime::new(config(), components(Arc::new(MockTransport::default())));
        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(runtime.state(), ServiceState::Stopped);
    }
}
