//! Aggregated runtime statistics

use std::time::Duration;

use camera::SupervisorStats;
use detection::PipelineMetricsSnapshot;
use observability::StatsSummary;
use recorder::SinkMetricsSnapshot;
use sync_client::SyncStats;

use crate::service::ServiceState;

/// Counters of every component, read without stopping anything
#[derive(Debug, Clone, Default)]
pub struct RuntimeStats {
    pub state: ServiceState,
    pub uptime: Duration,
    /// `None` when the camera is disabled
    pub cameras: Option<SupervisorStats>,
    pub pipeline: Option<PipelineMetricsSnapshot>,
    /// Detector latency in milliseconds
    pub detector_latency: Option<StatsSummary>,
    pub sink: SinkMetricsSnapshot,
    pub sync: SyncStats,
}

impl RuntimeStats {
    /// Processed frames per second over the uptime
    pub fn fps(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        match &self.pipeline {
            Some(pipeline) if secs > 0.0 => pipeline.frames_processed as f64 / secs,
            _ => 0.0,
        }
    }

    /// Share of captured frames that never reached the detector, in percent
    pub fn drop_rate(&self) -> f64 {
        match &self.pipeline {
            Some(p) if p.frames_captured > 0 => {
                p.frames_dropped as f64 / p.frames_captured as f64 * 100.0
            }
            _ => 0.0,
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Edge Agent Statistics                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ State: {}", self.state.as_str());
        println!("   ├─ Uptime: {:.2}s", self.uptime.as_secs_f64());
        println!("   └─ FPS: {:.2}", self.fps());

        if let Some(cameras) = &self.cameras {
            println!("\n📷 Cameras");
            println!("   ├─ Total: {}", cameras.cameras);
            println!("   ├─ Running: {}", cameras.running);
            println!("   ├─ Recovering: {}", cameras.recovering);
            println!("   ├─ Failed: {}", cameras.failed);
            println!(
                "   └─ Recoveries: {} started, {} succeeded",
                cameras.metrics.recoveries_started, cameras.metrics.recoveries_succeeded
            );
        }

        if let Some(pipeline) = &self.pipeline {
            println!("\n🔍 Detection");
            println!("   ├─ Frames captured: {}", pipeline.frames_captured);
            println!(
                "   ├─ Frames dropped: {} ({:.2}%)",
                pipeline.frames_dropped,
                self.drop_rate()
            );
            println!("   ├─ Detector failures: {}", pipeline.detector_failures);
            println!("   ├─ Suppressed by cooldown: {}", pipeline.detections_suppressed);
            println!("   └─ Events emitted: {}", pipeline.events_emitted);
        }
        if let Some(latency) = &self.detector_latency {
            println!("   Detector latency (ms): {latency}");
        }

        println!("\n💾 Storage");
        println!("   ├─ Records persisted: {}", self.sink.records_persisted);
        println!("   ├─ Insert failures: {}", self.sink.insert_failures);
        println!("   └─ Image failures: {}", self.sink.image_failures);

        println!("\n🌐 Dashboard");
        println!("   ├─ Connection: {}", self.sync.state.as_str());
        println!("   ├─ Detections synced: {}", self.sync.detections_synced);
        println!(
            "   ├─ Batches: {} sent, {} failed",
            self.sync.batches_sent, self.sync.batches_failed
        );
        println!(
            "   ├─ Heartbeats: {} sent, {} failed",
            self.sync.heartbeats_sent, self.sync.heartbeats_failed
        );
        println!(
            "   └─ Offline queue: {} queued, {} dropped",
            self.sync.queue_depth, self.sync.queue_dropped
        );

        println!();
    }
}
