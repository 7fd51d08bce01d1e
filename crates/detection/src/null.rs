//! Detector that never finds anything
//!
//! Keeps capture, recovery and heartbeats running on hosts without a model.

use contracts::{Detection, Detector, DetectorError, Frame};

#[derive(Debug, Clone, Copy, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn name(&self) -> &str {
        "null"
    }

    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        Ok(Vec::new())
    }
}
