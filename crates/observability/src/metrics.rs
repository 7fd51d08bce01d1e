//! Agent metrics
//!
//! Thin wrappers over the `metrics` macros so every crate reports under the
//! same names and labels. Without an installed recorder they are no-ops.

use contracts::ConnectionState;
use metrics::{counter, gauge, histogram};

/// Frame discarded before detection (`stage`: "queue_full", "malformed", ...)
pub fn record_frame_dropped(stage: &str) {
    counter!("edge_agent_frames_dropped_total", "stage" => stage.to_string()).increment(1);
}

/// Wall time spent inside the detector for one frame
pub fn record_detection_latency_ms(latency_ms: f64) {
    histogram!("edge_agent_detection_latency_ms").record(latency_ms);
}

pub fn record_event_emitted(class_name: &str) {
    counter!(
        "edge_agent_detections_emitted_total",
        "class" => class_name.to_string()
    )
    .increment(1);
}

/// Detections swallowed by the alert cooldown
pub fn record_detections_suppressed(count: usize) {
    if count > 0 {
        counter!("edge_agent_detections_suppressed_total").increment(count as u64);
    }
}

pub fn record_detection_persisted(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "edge_agent_detections_persisted_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// One batch upload attempt
pub fn record_sync_batch(success: bool, size: usize) {
    let status = if success { "success" } else { "failure" };
    counter!("edge_agent_sync_batches_total", "status" => status.to_string()).increment(1);
    if success {
        counter!("edge_agent_detections_synced_total").increment(size as u64);
    }
}

pub fn record_offline_queue_depth(depth: usize) {
    gauge!("edge_agent_offline_queue_depth").set(depth as f64);
}

/// Dashboard HTTP exchange. `status` is None for transport-level failures.
pub fn record_http_request(endpoint: &str, status: Option<u16>, latency_ms: f64) {
    let status = status.map_or_else(|| "error".to_string(), |code| code.to_string());
    counter!(
        "edge_agent_http_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);
    histogram!(
        "edge_agent_http_latency_ms",
        "endpoint" => endpoint.to_string()
    )
    .record(latency_ms);
}

/// Current dashboard connection state as a numeric gauge
pub fn record_connection_state(state: ConnectionState) {
    let code = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Reconnecting => 3.0,
        ConnectionState::Error => 4.0,
        ConnectionState::Offline => 5.0,
    };
    gauge!("edge_agent_connection_state").set(code);
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}
