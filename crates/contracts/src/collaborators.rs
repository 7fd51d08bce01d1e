//! Collaborator contracts
//!
//! Inference, storage and image persistence are external to the agent core.
//! These traits are the seams; concrete implementations live in the
//! `detection`, `recorder`, `observability` and `camera` crates.
//!
//! All methods are blocking. Async callers run them on the blocking pool.

use std::path::{Path, PathBuf};

use crate::{
    BoundingBox, CameraSnapshot, ContractError, Detection, DetectionRecord, DetectorError,
    DetectorSettings, Frame, SyncPayload, SystemTelemetry,
};

/// Object detector
pub trait Detector: Send + Sync {
    /// Detector name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Run inference on one frame
    ///
    /// # Errors
    /// Any failure; callers treat it as zero detections.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;

    /// Receive IoU threshold and thread count. Called once before the
    /// pipeline starts; detectors without such knobs ignore it.
    fn configure(&self, _settings: &DetectorSettings) {}
}

/// Relational detection storage
pub trait DetectionStore: Send + Sync {
    /// Insert a record, returning the assigned id
    fn insert(&self, record: &DetectionRecord) -> Result<i64, ContractError>;

    /// Oldest-first records not yet acknowledged by the dashboard
    fn query_unsynced(&self, limit: usize) -> Result<Vec<DetectionRecord>, ContractError>;

    /// Flag records as synced, returning the number updated
    fn mark_synced(&self, ids: &[i64]) -> Result<usize, ContractError>;

    /// Read a device state value
    fn get_state(&self, key: &str) -> Result<Option<String>, ContractError>;

    /// Write a device state value
    fn set_state(&self, key: &str, value: &str) -> Result<(), ContractError>;

    /// Total stored detections
    fn count(&self) -> Result<u64, ContractError>;
}

/// Image persistence
pub trait ImageStore: Send + Sync {
    /// Persist the frame, optionally annotated, returning where it was written
    fn save(
        &self,
        frame: &Frame,
        detection_id: &str,
        label: &str,
        bbox: Option<&BoundingBox>,
    ) -> Result<PathBuf, ContractError>;

    /// Base64 JPEG of a stored image no larger than `max_kb` when encoded
    fn get_as_bounded_base64(&self, path: &Path, max_kb: usize) -> Result<String, ContractError>;
}

/// Bounded outbound queue fed by the event sink
pub trait PayloadQueue: Send + Sync {
    /// Non-blocking. Returns false when the payload was dropped.
    fn enqueue(&self, payload: SyncPayload) -> bool;
}

/// Source of the camera roster reported by heartbeats
pub trait CameraRoster: Send + Sync {
    fn roster(&self) -> Vec<CameraSnapshot>;
}

/// Host resource sampler
pub trait TelemetryProvider: Send + Sync {
    /// `None` when the platform exposes nothing useful
    fn sample(&self) -> Option<SystemTelemetry>;
}
