//! EventSink - persists detection events and forwards them for upload

use std::sync::Arc;

use contracts::{
    unix_timestamp, AgentConfig, Detection, DetectionEvent, DetectionRecord, DetectionStore,
    EventObserver, Frame, ImageStore, ObserverSet, PayloadQueue,
};
use observability::record_detection_persisted;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::{SinkMetrics, SinkMetricsSnapshot};

#[derive(Debug, Clone)]
pub struct EventSinkConfig {
    pub device_id: String,
    pub save_images: bool,
    /// Attach a bounded base64 snapshot to outbound payloads
    pub embed_images: bool,
    pub max_image_kb: usize,
}

impl From<&AgentConfig> for EventSinkConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            device_id: config.device.id.clone(),
            save_images: config.storage.save_images,
            embed_images: config.dashboard.embed_images,
            max_image_kb: config.dashboard.max_image_kb,
        }
    }
}

/// Consumes detection events: image -> row -> outbound queue -> observers.
///
/// Each detection is handled on its own; a failed insert drops that record
/// only, a failed image save stores the row without a path.
pub struct EventSink {
    config: EventSinkConfig,
    store: Arc<dyn DetectionStore>,
    images: Option<Arc<dyn ImageStore>>,
    queue: Option<Arc<dyn PayloadQueue>>,
    observers: ObserverSet<dyn EventObserver>,
    metrics: Arc<SinkMetrics>,
}

impl EventSink {
    pub fn new(
        config: EventSinkConfig,
        store: Arc<dyn DetectionStore>,
        images: Option<Arc<dyn ImageStore>>,
        queue: Option<Arc<dyn PayloadQueue>>,
    ) -> Self {
        Self {
            config,
            store,
            images,
            queue,
            observers: ObserverSet::new("event"),
            metrics: Arc::new(SinkMetrics::new()),
        }
    }

    pub fn register_observer(&self, observer: Arc<dyn EventObserver>) {
        self.observers.register(observer);
    }

    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Spawn the worker. It stops when `cancel` fires (after persisting
    /// whatever is already buffered) or when every sender is dropped.
    pub fn spawn(
        self: &Arc<Self>,
        rx: mpsc::Receiver<DetectionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).worker(rx, cancel))
    }

    #[instrument(name = "event_sink_worker", skip_all, fields(device_id = %self.config.device_id))]
    async fn worker(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<DetectionEvent>,
        cancel: CancellationToken,
    ) {
        debug!("Event sink worker started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.dispatch(event).await;
        }

        rx.close();
        while let Ok(event) = rx.try_recv() {
            self.dispatch(event).await;
        }

        info!(
            persisted = self.metrics.records_persisted(),
            "Event sink worker stopped"
        );
    }

    async fn dispatch(self: &Arc<Self>, event: DetectionEvent) {
        let sink = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || sink.handle_event(&event)).await {
            error!(error = %e, "Event handling panicked");
        }
    }

    /// Persist every detection of one event; returns how many rows were stored.
    ///
    /// Blocking: touches the image store and the database.
    pub fn handle_event(&self, event: &DetectionEvent) -> usize {
        self.metrics.inc_events_received();
        let mut stored = 0;
        for (index, detection) in event.detections.iter().enumerate() {
            if self.handle_detection(&event.frame, index, detection) {
                stored += 1;
            }
        }
        stored
    }

    fn handle_detection(&self, frame: &Frame, index: usize, detection: &Detection) -> bool {
        let image_path = self.save_image(frame, index, detection);

        let mut record = DetectionRecord {
            id: None,
            device_id: self.config.device_id.clone(),
            timestamp: detection.timestamp,
            class_id: detection.class_id,
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            image_path,
            synced: false,
            created_at: unix_timestamp(),
        };

        let id = match self.store.insert(&record) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.inc_insert_failures();
                record_detection_persisted(false);
                error!(
                    camera_id = %frame.camera_id,
                    class = %detection.class_name,
                    error = %e,
                    "Failed to persist detection"
                );
                return false;
            }
        };
        record.id = Some(id);
        self.metrics.inc_records_persisted();
        record_detection_persisted(true);
        info!(
            detection_id = id,
            class = %record.class_name,
            confidence = record.confidence,
            bbox = ?record.bbox.to_array(),
            "Detection stored"
        );

        self.forward(&record, id);
        self.observers.notify(|observer| observer.on_detection(&record));
        true
    }

    /// `index` is the detection's position in its event, so detections of
    /// one frame never share a file
    fn save_image(&self, frame: &Frame, index: usize, detection: &Detection) -> Option<String> {
        if !self.config.save_images {
            return None;
        }
        let images = self.images.as_ref()?;
        let label = format!("{}-{}-{}", frame.camera_id, frame.sequence, index);
        match images.save(frame, &label, &detection.class_name, Some(&detection.bbox)) {
            Ok(path) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                self.metrics.inc_image_failures();
                warn!(
                    camera_id = %frame.camera_id,
                    error = %e,
                    "Image save failed, storing detection without image"
                );
                None
            }
        }
    }

    fn forward(&self, record: &DetectionRecord, id: i64) {
        let Some(queue) = &self.queue else {
            return;
        };

        let image = if self.config.embed_images {
            self.embedded_image(record)
        } else {
            None
        };

        if queue.enqueue(record.to_payload(id, image)) {
            self.metrics.inc_payloads_enqueued();
        } else {
            self.metrics.inc_payloads_dropped();
            debug!(detection_id = id, "Outbound queue refused payload, left for backlog");
        }
    }

    fn embedded_image(&self, record: &DetectionRecord) -> Option<String> {
        let images = self.images.as_ref()?;
        let path = record.image_path.as_deref()?;
        match images.get_as_bounded_base64(std::path::Path::new(path), self.config.max_image_kb) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(path, error = %e, "Could not embed image");
                None
            }
        }
    }
}
