//! # Integration Tests
//!
//! Cross-crate scenarios, all without hardware or a live dashboard:
//! - configuration round trips through the loader
//! - frames -> pipeline -> sink -> SQLite -> sync queue
//! - dashboard retry classification and batched draining
//! - lifecycle idempotence of the supervisor, client and runtime

#[cfg(test)]
mod contract_tests {
    use contracts::{AgentConfig, BackoffPolicy, Environment};
    use std::time::Duration;

    #[test]
    fn test_default_config_survives_toml_round_trip() {
        let config = AgentConfig::default();
        let text = config_loader::ConfigLoader::to_toml(&config).unwrap();
        let parsed = config_loader::ConfigLoader::load_from_str(
            &text,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(parsed.device.id, config.device.id);
        assert_eq!(parsed.camera.max_cameras, config.camera.max_cameras);
        assert_eq!(parsed.dashboard.environment, Environment::Production);
    }

    #[test]
    fn test_backoff_caps_at_maximum() {
        let policy = BackoffPolicy::doubling(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use camera::{CameraSupervisor, PlatformCapabilities, SupervisorConfig, SystemProbe};
    use contracts::{
        BoundingBox, ConnectionState, Detection, DetectionEvent, DetectionStore, Detector,
        DetectorError, Frame, FrameSource, PayloadQueue, PixelFormat, SyncPayload,
    };
    use detection::{DetectionPipeline, PipelineConfig};
    use recorder::{EventSink, EventSinkConfig, SqliteDetectionStore};
    use sync_client::{MockReply, MockTransport, SyncClient, SyncClientConfig, SyncError};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Replays a fixed list of frames, one per cycle, then yields nothing
    struct ScriptedSource {
        frames: Mutex<VecDeque<Frame>>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Frame>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(frames.into()),
            })
        }

        fn remaining(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    impl FrameSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn capture_cycle(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().pop_front().into_iter().collect()
        }
    }

    /// One tiger on odd sequence numbers, nothing on even ones
    struct TigerStub;

    impl Detector for TigerStub {
        fn name(&self) -> &str {
            "tiger-stub"
        }

        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            if frame.sequence % 2 == 0 {
                return Ok(Vec::new());
            }
            Ok(vec![Detection {
                class_id: 1,
                class_name: "tiger".to_string(),
                confidence: 0.9,
                bbox: BoundingBox::from([10.0, 10.0, 50.0, 50.0]),
                timestamp: frame.captured_at,
            }])
        }
    }

    fn frame(camera_id: &str, sequence: u64, captured_at: f64) -> Frame {
        Frame {
            camera_id: camera_id.to_string(),
            sequence,
            width: 4,
            height: 4,
            format: PixelFormat::Rgb8,
            data: Bytes::from(vec![0u8; 48]),
            captured_at,
        }
    }

    fn pipeline_config(cooldown_seconds: f64) -> PipelineConfig {
        PipelineConfig {
            fps: 100.0,
            queue_capacity: 8,
            confidence_threshold: 0.5,
            target_classes: Vec::new(),
            cooldown_seconds,
        }
    }

    fn sync_config() -> SyncClientConfig {
        let mut config = SyncClientConfig::default();
        config.api_url = Some("http://dashboard.test/api".to_string());
        config.api_key = Some("key".to_string());
        config.device_id = "edge-e2e".to_string();
        config.device_secret = Some("secret".to_string());
        config.batch_size = 4;
        config.offline_queue_capacity = 64;
        config.profile.max_retries = 3;
        config.profile.retry = contracts::BackoffPolicy::new(
            Duration::from_millis(10),
            2.0,
            Duration::from_millis(100),
        );
        config
    }

    fn payload(id: i64) -> SyncPayload {
        SyncPayload {
            detection_id: id,
            device_id: "edge-e2e".to_string(),
            timestamp: id as f64,
            class_name: "tiger".to_string(),
            confidence: 0.9,
            bbox: [10.0, 10.0, 50.0, 50.0],
            image_base64: None,
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Frames 1..3 one second apart, tiger on 1 and 3, cooldown 5s:
    /// frame 1 emits, frame 3 is suppressed.
    #[tokio::test]
    async fn test_e2e_tiger_scenario_emits_once() {
        let source = ScriptedSource::new(vec![
            frame("usb_0", 1, 0.0),
            frame("usb_0", 2, 1.0),
            frame("usb_0", 3, 2.0),
        ]);
        let pipeline = Arc::new(DetectionPipeline::new(
            source.clone(),
            Arc::new(TigerStub),
            pipeline_config(5.0),
        ));

        let store = Arc::new(SqliteDetectionStore::open_in_memory().unwrap());
        let transport = Arc::new(MockTransport::default());
        let sync = Arc::new(
            SyncClient::new(sync_config(), transport.clone()).with_store(store.clone()),
        );
        let sink = Arc::new(EventSink::new(
            EventSinkConfig {
                device_id: "edge-e2e".to_string(),
                save_images: false,
                embed_images: false,
                max_image_kb: 100,
            },
            store.clone(),
            None,
            Some(sync.clone() as Arc<dyn PayloadQueue>),
        ));
        sink.register_observer(sync.clone());

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<DetectionEvent>(16);
        let tasks = pipeline.start(tx, cancel.clone());
        let sink_task = sink.spawn(rx, cancel.clone());

        wait_until(|| source.remaining() == 0 && pipeline.metrics().frames_processed == 3).await;
        wait_until(|| sink.metrics().records_persisted >= 1).await;
        cancel.cancel();
        for handle in tasks.into_vec() {
            handle.await.unwrap();
        }
        sink_task.await.unwrap();

        let metrics = pipeline.metrics();
        assert_eq!(metrics.frames_processed, 3);
        assert_eq!(metrics.events_emitted, 1);
        assert_eq!(metrics.detections_suppressed, 1);

        let rows = store.query_unsynced(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].class_name, "tiger");
        assert_eq!(rows[0].timestamp, 0.0);
        assert_eq!(rows[0].bbox.to_array(), [10.0, 10.0, 50.0, 50.0]);

        assert_eq!(sync.queue().len(), 1);
        assert_eq!(sync.sync_once().await.unwrap(), 1);
        assert!(store.query_unsynced(10).unwrap().is_empty());
        assert_eq!(transport.requests_to("/devices/detections/batch").len(), 1);
    }

    /// The cooldown is keyed by class only: a tiger seen by a second camera
    /// inside the window is suppressed as well.
    #[tokio::test]
    async fn test_e2e_cooldown_aliases_across_cameras() {
        let pipeline = DetectionPipeline::new(
            ScriptedSource::new(Vec::new()),
            Arc::new(TigerStub),
            pipeline_config(5.0),
        );

        assert!(pipeline.process_frame(frame("usb_0", 1, 0.0)).await.is_some());
        assert!(pipeline.process_frame(frame("usb_1", 1, 4.0)).await.is_none());
        assert!(pipeline.process_frame(frame("usb_1", 3, 6.0)).await.is_some());
        assert_eq!(pipeline.metrics().detections_suppressed, 1);
    }

    #[tokio::test]
    async fn test_e2e_retry_classification() {
        let transport = Arc::new(MockTransport::default());
        transport
            .push(MockReply::Status(502, String::new()))
            .push(MockReply::Timeout)
            .push(MockReply::ok(r#"{"accepted":true}"#));
        let client = Arc::new(SyncClient::new(sync_config(), transport.clone()));

        let value = client.fetch_remote_config().await.unwrap();
        assert_eq!(value["accepted"], true);
        assert_eq!(transport.request_count(), 3);
        assert_eq!(client.state(), ConnectionState::Connected);

        transport.set_fallback(MockReply::Status(401, String::new()));
        let err = client.fetch_remote_config().await.unwrap_err();
        assert!(matches!(err, SyncError::Authentication { .. }));
        assert_eq!(transport.request_count(), 4);
        assert_eq!(client.state(), ConnectionState::Error);

        transport.set_fallback(MockReply::Status(422, String::new()));
        let err = client.fetch_remote_config().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(transport.request_count(), 5);
    }

    /// N = 10, B = 4: three batch calls, and a failed batch loses nothing
    #[tokio::test]
    async fn test_e2e_offline_queue_batches_and_retains() {
        let transport = Arc::new(MockTransport::new(MockReply::Status(400, String::new())));
        let client = Arc::new(SyncClient::new(sync_config(), transport.clone()));
        for id in 1..=10 {
            assert!(client.enqueue(payload(id)));
        }

        assert!(client.sync_once().await.is_err());
        assert_eq!(client.queue().len(), 10);

        transport.set_fallback(MockReply::ok("{}"));
        let mut sizes = Vec::new();
        loop {
            let sent = client.sync_once().await.unwrap();
            if sent == 0 {
                break;
            }
            sizes.push(sent);
        }

        assert_eq!(sizes, vec![4, 4, 2]);
        let batches = transport.requests_to("/devices/detections/batch");
        assert_eq!(batches.len(), 4);
        let first: serde_json::Value =
            serde_json::from_str(batches[1].body.as_deref().unwrap()).unwrap();
        assert_eq!(first["detections"][0]["detection_id"], 1);
        assert!(client.queue().is_empty());
    }

    #[tokio::test]
    async fn test_e2e_stop_is_idempotent() {
        let mut camera = contracts::CameraConfig::default();
        camera.width = 16;
        camera.height = 12;
        camera.simulated_fallback = true;
        let probe = Arc::new(SystemProbe::new(PlatformCapabilities::default()));
        let supervisor = tokio::task::spawn_blocking(move || {
            CameraSupervisor::discover(SupervisorConfig::from(&camera), probe)
        })
        .await
        .unwrap()
        .unwrap();
        assert!(supervisor.capture_primary().await.is_some());

        supervisor.stop().await;
        supervisor.stop().await;
        assert!(supervisor.capture_all().await.is_empty());

        let transport = Arc::new(MockTransport::default());
        let client = Arc::new(SyncClient::new(sync_config(), transport.clone()));
        client.start().await;
        assert!(client.is_running());
        client.stop().await;
        client.stop().await;
        assert!(!client.is_running());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_e2e_runtime_persists_to_sqlite_file() {
        use runtime::{RuntimeComponents, ServiceRuntime, ServiceState};

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("detections.db");

        let mut config = contracts::AgentConfig::default();
        config.device.id = "edge-e2e".to_string();
        config.camera.width = 16;
        config.camera.height = 12;
        config.camera.fps = 20.0;
        config.camera.simulated_fallback = true;
        config.alerts.cooldown_seconds = 3600.0;
        config.system.shutdown_timeout_secs = 2;

        let store = Arc::new(SqliteDetectionStore::open(&db).unwrap());
        let components = RuntimeComponents {
            probe: Arc::new(SystemProbe::new(PlatformCapabilities::default())),
            detector: Arc::new(TigerStub),
            store: store.clone(),
            images: None,
            telemetry: None,
            transport: Arc::new(MockTransport::default()),
        };
        let runtime = ServiceRuntime::new(config, components);

        runtime.start().await.unwrap();
        wait_until(|| runtime.stats().sink.records_persisted >= 1).await;
        runtime.stop().await;
        runtime.stop().await;

        assert_eq!(runtime.state(), ServiceState::Stopped);
        assert_eq!(store.count().unwrap(), 1);
        drop(runtime);

        let reopened = SqliteDetectionStore::open(&db).unwrap();
        assert_eq!(reopened.query_unsynced(10).unwrap()[0].class_name, "tiger");
    }
}
