//! # Detection
//!
//! Capture -> detect -> filter -> cooldown.
//!
//! A capture loop pulls frames from a [`contracts::FrameSource`] at the
//! configured frame rate into a bounded work queue; a processing loop runs the
//! detector on the blocking pool, filters the results and emits one
//! [`contracts::DetectionEvent`] per frame that still has detections.

pub mod config;
pub mod cooldown;
pub mod filter;
pub mod null;
pub mod pipeline;

pub use config::{PipelineConfig, PipelineMetrics, PipelineMetricsSnapshot, MIN_FRAME_INTERVAL};
pub use cooldown::CooldownFilter;
pub use filter::DetectionFilter;
pub use null::NullDetector;
pub use pipeline::{DetectionPipeline, PipelineTasks};
