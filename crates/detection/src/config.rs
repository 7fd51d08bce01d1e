//! Pipeline configuration and metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use contracts::AgentConfig;

/// Shortest capture period; `tokio::time::interval` rejects a zero period
pub const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capture cycles per second
    pub fps: f64,

    /// Capture -> processing queue capacity
    pub queue_capacity: usize,

    pub confidence_threshold: f32,

    /// Empty = every class
    pub target_classes: Vec<String>,

    /// Per-class alert cooldown (seconds)
    pub cooldown_seconds: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for PipelineConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            fps: config.camera.fps,
            queue_capacity: config.detection.queue_capacity.max(1),
            confidence_threshold: config.detection.confidence_threshold,
            target_classes: config.detection.target_classes.clone(),
            cooldown_seconds: config.alerts.cooldown_seconds,
        }
    }
}

impl PipelineConfig {
    /// Period of the capture loop; non-positive fps falls back to 1 Hz and
    /// very high rates are capped at [`MIN_FRAME_INTERVAL`]
    pub fn frame_interval(&self) -> Duration {
        if self.fps.is_finite() && self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps).max(MIN_FRAME_INTERVAL)
        } else {
            Duration::from_secs(1)
        }
    }
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub frames_captured: AtomicU64,

    /// Dropped on work queue overflow or because they were malformed
    pub frames_dropped: AtomicU64,

    pub frames_processed: AtomicU64,

    pub detector_failures: AtomicU64,

    /// Detections removed by the cooldown
    pub detections_suppressed: AtomicU64,

    pub events_emitted: AtomicU64,

    /// Events lost because the event channel was full
    pub events_dropped: AtomicU64,

    /// Capture cycles that produced no frame
    pub empty_cycles: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            detections_suppressed: self.detections_suppressed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            empty_cycles: self.empty_cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub detector_failures: u64,
    pub detections_suppressed: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub empty_cycles: u64,
}
