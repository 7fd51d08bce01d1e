//! Detection / DetectionEvent - DetectionPipeline output

use serde::{Deserialize, Serialize};

use crate::{DetectionConfig, Frame};

/// Axis-aligned box in pixel space, always x1 <= x2 and y1 <= y2
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// Build a box, swapping corners when given out of order
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// One classified, localized object instance found in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    /// 0.0 - 1.0
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Detection time (Unix seconds)
    pub timestamp: f64,
}

/// Inference knobs a detector receives before its first frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub num_threads: usize,
}

impl From<&DetectionConfig> for DetectorSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            num_threads: config.num_threads.max(1),
        }
    }
}

/// A frame paired with its surviving (post-cooldown) detections
///
/// Created once per frame, consumed exactly once by the event sink.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub frame: Frame,
    pub detections: Vec<Detection>,
    /// Detector + filtering latency
    pub processing_ms: f64,
    pub timestamp: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_normalizes_swapped_corners() {
        let bbox = BoundingBox::new(50.0, 60.0, 10.0, 20.0);
        assert_eq!(bbox.to_array(), [10.0, 20.0, 50.0, 60.0]);
        assert_eq!(bbox.width(), 40.0);
        assert_eq!(bbox.height(), 40.0);
    }

    #[test]
    fn test_detector_settings_from_config() {
        let config = DetectionConfig {
            iou_threshold: 0.3,
            num_threads: 0,
            ..Default::default()
        };
        let settings = DetectorSettings::from(&config);
        assert_eq!(settings.iou_threshold, 0.3);
        assert_eq!(settings.confidence_threshold, 0.5);
        assert_eq!(settings.num_threads, 1);
    }
}
