//! Confidence / target-class filtering

use std::collections::HashSet;

use contracts::Detection;

#[derive(Debug, Clone, Default)]
pub struct DetectionFilter {
    min_confidence: f32,
    /// Empty = accept every class
    target_classes: HashSet<String>,
}

impl DetectionFilter {
    pub fn new(min_confidence: f32, target_classes: &[String]) -> Self {
        Self {
            min_confidence,
            target_classes: target_classes.iter().cloned().collect(),
        }
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence >= self.min_confidence
            && (self.target_classes.is_empty()
                || self.target_classes.contains(&detection.class_name))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}
