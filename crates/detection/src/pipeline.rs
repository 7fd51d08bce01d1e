//! DetectionPipeline - capture loop + processing loop

use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use contracts::{unix_timestamp, DetectionEvent, Detector, Frame, FrameSource};
use observability::{
    record_detection_latency_ms, record_detections_suppressed, record_event_emitted,
    record_frame_dropped, RunningStats, StatsSummary,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::{PipelineConfig, PipelineMetrics, PipelineMetricsSnapshot};
use crate::cooldown::CooldownFilter;
use crate::filter::DetectionFilter;

/// Handles of the two pipeline loops
pub struct PipelineTasks {
    pub capture: JoinHandle<()>,
    pub processing: JoinHandle<()>,
}

impl PipelineTasks {
    pub fn into_vec(self) -> Vec<JoinHandle<()>> {
        vec![self.capture, self.processing]
    }
}

/// Detection pipeline over any frame source.
///
/// Capture never blocks: a full work queue drops the newest frame, a full
/// event channel drops the event. Detector failures count as zero detections.
pub struct DetectionPipeline<S> {
    source: Arc<S>,
    detector: Arc<dyn Detector>,
    config: PipelineConfig,
    filter: DetectionFilter,
    cooldown: CooldownFilter,
    metrics: Arc<PipelineMetrics>,
    latency: Mutex<RunningStats>,
}

impl<S> DetectionPipeline<S>
where
    S: FrameSource + Sync + 'static,
{
    pub fn new(source: Arc<S>, detector: Arc<dyn Detector>, config: PipelineConfig) -> Self {
        let filter = DetectionFilter::new(config.confidence_threshold, &config.target_classes);
        let cooldown = CooldownFilter::new(config.cooldown_seconds);
        Self {
            source,
            detector,
            config,
            filter,
            cooldown,
            metrics: Arc::new(PipelineMetrics::new()),
            latency: Mutex::new(RunningStats::default()),
        }
    }

    /// Spawn the capture and processing loops.
    ///
    /// Both loops end when `cancel` fires; the processing loop also ends when
    /// the event receiver is dropped.
    #[instrument(
        name = "pipeline_start",
        skip_all,
        fields(source = %self.source.name(), detector = %self.detector.name())
    )]
    pub fn start(
        self: &Arc<Self>,
        events: mpsc::Sender<DetectionEvent>,
        cancel: CancellationToken,
    ) -> PipelineTasks {
        let (tx, rx) = bounded(self.config.queue_capacity);

        info!(
            fps = self.config.fps,
            queue_capacity = self.config.queue_capacity,
            cooldown_seconds = self.config.cooldown_seconds,
            "Detection pipeline starting"
        );

        let capture = tokio::spawn(Arc::clone(self).capture_loop(tx, cancel.clone()));
        let processing = tokio::spawn(Arc::clone(self).processing_loop(rx, events, cancel));

        PipelineTasks {
            capture,
            processing,
        }
    }

    async fn capture_loop(self: Arc<Self>, tx: Sender<Frame>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let frames = tokio::select! {
                _ = cancel.cancelled() => break,
                frames = self.source.capture_cycle() => frames,
            };

            if frames.is_empty() {
                PipelineMetrics::incr(&self.metrics.empty_cycles);
                trace!("No frame available this cycle");
                continue;
            }

            for frame in frames {
                if !self.offer(&tx, frame) {
                    debug!("Capture loop stopping, work queue closed");
                    return;
                }
            }
        }

        debug!("Capture loop stopped");
    }

    /// Hand a frame to the work queue. Returns false once the queue is closed.
    fn offer(&self, tx: &Sender<Frame>, frame: Frame) -> bool {
        PipelineMetrics::incr(&self.metrics.frames_captured);

        if !frame.is_well_formed() {
            PipelineMetrics::incr(&self.metrics.frames_dropped);
            record_frame_dropped("malformed");
            warn!(
                camera_id = %frame.camera_id,
                sequence = frame.sequence,
                len = frame.data.len(),
                expected = frame.expected_len(),
                "Dropping malformed frame"
            );
            return true;
        }

        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                PipelineMetrics::incr(&self.metrics.frames_dropped);
                record_frame_dropped("queue_full");
                trace!(
                    camera_id = %frame.camera_id,
                    sequence = frame.sequence,
                    "Work queue full, frame dropped"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    async fn processing_loop(
        self: Arc<Self>,
        rx: Receiver<Frame>,
        events: mpsc::Sender<DetectionEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(frame) => frame,
                    Err(_) => break,
                },
            };

            if let Some(event) = self.process_frame(frame).await {
                if !self.emit(&events, event) {
                    warn!("Event channel closed, processing loop stopping");
                    break;
                }
            }
        }

        debug!("Processing loop stopped");
    }

    /// Push an event without waiting. Returns false once the channel is closed.
    fn emit(&self, events: &mpsc::Sender<DetectionEvent>, event: DetectionEvent) -> bool {
        match events.try_send(event) {
            Ok(()) => {
                PipelineMetrics::incr(&self.metrics.events_emitted);
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                PipelineMetrics::incr(&self.metrics.events_dropped);
                warn!(
                    camera_id = %event.frame.camera_id,
                    detections = event.detections.len(),
                    "Event channel full, event dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Run one frame through detect -> filter -> cooldown.
    ///
    /// `None` when nothing survives. The cooldown clock is the frame's
    /// capture time.
    pub async fn process_frame(&self, frame: Frame) -> Option<DetectionEvent> {
        let started = Instant::now();

        let detector = Arc::clone(&self.detector);
        let input = frame.clone();
        let detections = match tokio::task::spawn_blocking(move || detector.detect(&input)).await
        {
            Ok(Ok(detections)) => detections,
            Ok(Err(e)) => {
                PipelineMetrics::incr(&self.metrics.detector_failures);
                warn!(
                    camera_id = %frame.camera_id,
                    sequence = frame.sequence,
                    detector = %e.detector,
                    error = %e.message,
                    "Detector failed, treating as no detections"
                );
                Vec::new()
            }
            Err(e) => {
                PipelineMetrics::incr(&self.metrics.detector_failures);
                warn!(
                    camera_id = %frame.camera_id,
                    sequence = frame.sequence,
                    error = %e,
                    "Detector panicked, treating as no detections"
                );
                Vec::new()
            }
        };

        PipelineMetrics::incr(&self.metrics.frames_processed);

        let candidates = self.filter.apply(detections);
        let (detections, suppressed) = self.cooldown.filter(candidates, frame.captured_at);

        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;
        record_detection_latency_ms(processing_ms);
        if let Ok(mut latency) = self.latency.lock() {
            latency.push(processing_ms);
        }

        if suppressed > 0 {
            PipelineMetrics::add(&self.metrics.detections_suppressed, suppressed as u64);
            record_detections_suppressed(suppressed);
            debug!(camera_id = %frame.camera_id, suppressed, "Detections in cooldown");
        }

        if detections.is_empty() {
            return None;
        }

        for detection in &detections {
            record_event_emitted(&detection.class_name);
            info!(
                camera_id = %frame.camera_id,
                class = %detection.class_name,
                confidence = detection.confidence,
                "Detection"
            );
        }

        Some(DetectionEvent {
            frame,
            detections,
            processing_ms,
            timestamp: unix_timestamp(),
        })
    }

    pub fn metrics(&self) -> PipelineMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Per-frame processing latency (ms)
    pub fn latency_summary(&self) -> StatsSummary {
        self.latency
            .lock()
            .map(|stats| stats.summary())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
