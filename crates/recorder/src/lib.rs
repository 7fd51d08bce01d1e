//! # Recorder
//!
//! Persists detection events and feeds the dashboard queue.
//!
//! - [`EventSink`]: worker consuming the pipeline's event channel
//! - [`SqliteDetectionStore`]: `detections` + `device_state` tables
//! - [`FsImageStore`]: dated JPEG snapshots with bounded base64 export

pub mod error;
pub mod images;
pub mod metrics;
pub mod sink;
pub mod store;

pub use error::{RecorderError, Result};
pub use images::FsImageStore;
pub use metrics::{SinkMetrics, SinkMetricsSnapshot};
pub use sink::{EventSink, EventSinkConfig};
pub use store::SqliteDetectionStore;
