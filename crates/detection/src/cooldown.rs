//! Per-class alert cooldown
//!
//! Keyed by class name only, so the same class seen by two cameras shares
//! one window.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use contracts::Detection;

#[derive(Debug, Default)]
pub struct CooldownFilter {
    cooldown_seconds: f64,
    last_emitted: Mutex<HashMap<String, f64>>,
}

impl CooldownFilter {
    pub fn new(cooldown_seconds: f64) -> Self {
        Self {
            cooldown_seconds: cooldown_seconds.max(0.0),
            last_emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Split `detections` observed at `now` into emitted and a suppressed count.
    ///
    /// A detection is suppressed when its class emitted less than the cooldown
    /// ago; otherwise it is emitted and restarts the window. Duplicates of one
    /// class inside a single frame collapse to the first.
    pub fn filter(&self, detections: Vec<Detection>, now: f64) -> (Vec<Detection>, usize) {
        let mut last_emitted = self.lock();
        let mut suppressed = 0;
        let mut emitted = Vec::with_capacity(detections.len());

        for detection in detections {
            let blocked = last_emitted
                .get(&detection.class_name)
                .is_some_and(|last| now - last < self.cooldown_seconds);
            if blocked {
                suppressed += 1;
            } else {
                last_emitted.insert(detection.class_name.clone(), now);
                emitted.push(detection);
            }
        }

        (emitted, suppressed)
    }

    pub fn last_emitted(&self, class_name: &str) -> Option<f64> {
        self.lock().get(class_name).copied()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, f64>> {
        self.last_emitted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::BoundingBox;

    fn tiger() -> Detection {
        Detection {
            class_id: 1,
            class_name: "tiger".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 50.0),
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_suppressed_inside_window_emitted_after() {
        let cooldown = CooldownFilter::new(5.0);

        let (emitted, suppressed) = cooldown.filter(vec![tiger()], 0.0);
        assert_eq!((emitted.len(), suppressed), (1, 0));

        let (emitted, suppressed) = cooldown.filter(vec![tiger()], 4.0);
        assert_eq!((emitted.len(), suppressed), (0, 1));

        let (emitted, suppressed) = cooldown.filter(vec![tiger()], 6.0);
        assert_eq!((emitted.len(), suppressed), (1, 0));
        assert_eq!(cooldown.last_emitted("tiger"), Some(6.0));
    }

    #[test]
    fn test_suppression_does_not_extend_window() {
        let cooldown = CooldownFilter::new(5.0);
        cooldown.filter(vec![tiger()], 0.0);
        cooldown.filter(vec![tiger()], 4.0);
        let (emitted, _) = cooldown.filter(vec![tiger()], 5.0);
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_duplicates_in_one_frame_collapse() {
        let cooldown = CooldownFilter::new(5.0);
        let (emitted, suppressed) = cooldown.filter(vec![tiger(), tiger()], 0.0);
        assert_eq!((emitted.len(), suppressed), (1, 1));
    }

    #[test]
    fn test_classes_are_independent() {
        let cooldown = CooldownFilter::new(5.0);
        let mut person = tiger();
        person.class_name = "person".to_string();

        cooldown.filter(vec![tiger()], 0.0);
        let (emitted, _) = cooldown.filter(vec![person], 1.0);
        assert_eq!(emitted.len(), 1);
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let cooldown = CooldownFilter::new(0.0);
        let (emitted, suppressed) = cooldown.filter(vec![tiger(), tiger()], 0.0);
        assert_eq!((emitted.len(), suppressed), (2, 0));
    }

    #[test]
    fn test_reset_forgets_history() {
        let cooldown = CooldownFilter::new(5.0);
        cooldown.filter(vec![tiger()], 0.0);
        cooldown.reset();
        assert_eq!(cooldown.last_emitted("tiger"), None);
    }
}
