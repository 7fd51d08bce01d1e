//! Collaborators handed to the runtime

use std::sync::Arc;

use camera::{DeviceProbe, PlatformCapabilities, SystemProbe};
use contracts::{AgentConfig, DetectionStore, Detector, ImageStore, TelemetryProvider};
use detection::NullDetector;
use observability::SystemMonitor;
use recorder::{FsImageStore, SqliteDetectionStore};
use sync_client::{HttpTransport, SyncClientConfig};
use tracing::info;

use crate::error::Result;

/// Everything the runtime does not build itself. Tests swap in scripted
/// probes, in-memory stores and a mock transport.
pub struct RuntimeComponents<T> {
    pub probe: Arc<dyn DeviceProbe>,
    pub detector: Arc<dyn Detector>,
    pub store: Arc<dyn DetectionStore>,
    pub images: Option<Arc<dyn ImageStore>>,
    pub telemetry: Option<Arc<dyn TelemetryProvider>>,
    pub transport: Arc<T>,
}

impl RuntimeComponents<HttpTransport> {
    /// Host probe, SQLite store, image directory and reqwest transport as
    /// configured.
    ///
    /// Blocking: probes the host and opens the database.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let caps = PlatformCapabilities::detect();
        let store = SqliteDetectionStore::open(&config.storage.database_path)?;

        let images: Option<Arc<dyn ImageStore>> = if config.storage.save_images {
            let images =
                FsImageStore::new(&config.storage.images_path, config.storage.jpeg_quality)?;
            Some(Arc::new(images))
        } else {
            None
        };

        let sync_config = SyncClientConfig::from(config);
        let transport = HttpTransport::new(
            sync_config.api_url.clone().unwrap_or_default(),
            &sync_config.profile,
        )?;

        info!(
            database = %config.storage.database_path,
            images = config.storage.save_images,
            dashboard = sync_config.is_configured(),
            "Runtime components ready"
        );

        Ok(Self {
            probe: Arc::new(SystemProbe::new(caps)),
            detector: Arc::new(NullDetector),
            store: Arc::new(store),
            images,
            telemetry: Some(Arc::new(SystemMonitor::new())),
            transport: Arc::new(transport),
        })
    }
}

impl<T> RuntimeComponents<T> {
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }
}
