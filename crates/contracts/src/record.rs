//! DetectionRecord - the persisted row

use serde::{Deserialize, Serialize};

use crate::{BoundingBox, SyncPayload};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Assigned by the store on insert
    pub id: Option<i64>,
    pub device_id: String,
    pub timestamp: f64,
    pub class_id: u32,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub image_path: Option<String>,
    pub synced: bool,
    pub created_at: f64,
}

impl DetectionRecord {
    /// Build the outbound payload for a stored record
    pub fn to_payload(&self, detection_id: i64, image_base64: Option<String>) -> SyncPayload {
        SyncPayload {
            detection_id,
            device_id: self.device_id.clone(),
            timestamp: self.timestamp,
            class_name: self.class_name.clone(),
            confidence: self.confidence,
            bbox: self.bbox.to_array(),
            image_base64,
        }
    }
}
