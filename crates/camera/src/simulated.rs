//! Synthetic frame generator
//!
//! Always available, so the pipeline is never starved when no real device works.

use contracts::{CameraKind, PixelFormat};
use tracing::debug;

use crate::backend::{CameraBackend, CaptureSettings, RawImage};
use crate::error::{CameraError, Result};

/// Moving gradient pattern with an occasional scene change
pub struct SimulatedBackend {
    index: u32,
    settings: Option<CaptureSettings>,
    frame_count: u64,
    scene_state: u8,
}

impl SimulatedBackend {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            settings: None,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate(&mut self, width: u32, height: u32) -> Vec<u8> {
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(37);
        }

        let mut pixels = vec![0u8; width as usize * height as usize * 3];
        let shift = self.frame_count as usize;
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width as usize;
            let y = i / width as usize;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = self.scene_state;
        }
        pixels
    }
}

impl CameraBackend for SimulatedBackend {
    fn kind(&self) -> CameraKind {
        CameraKind::Simulated
    }

    fn describe(&self) -> String {
        format!("synthetic://{}", self.index)
    }

    fn init(&mut self, settings: &CaptureSettings) -> Result<()> {
        self.settings = Some(*settings);
        debug!(index = self.index, "Simulated camera ready");
        Ok(())
    }

    fn capture_once(&mut self) -> Result<RawImage> {
        let settings = self.settings.ok_or_else(|| {
            CameraError::capture_failed(self.describe(), "simulated camera not initialized")
        })?;
        let data = self.generate(settings.width, settings.height);
        Ok(RawImage {
            width: settings.width,
            height: settings.height,
            format: PixelFormat::Rgb8,
            data,
        })
    }

    fn release(&mut self) {
        self.settings = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_frames_have_requested_shape() {
        let mut backend = SimulatedBackend::new(0);
        backend
            .init(&CaptureSettings {
                width: 32,
                height: 16,
                ..Default::default()
            })
            .unwrap();
        let image = backend.capture_once().unwrap();
        assert_eq!(image.data.len(), 32 * 16 * 3);
    }

    #[test]
    fn test_capture_after_release_fails() {
        let mut backend = SimulatedBackend::new(0);
        backend.init(&CaptureSettings::default()).unwrap();
        backend.release();
        backend.release();
        assert!(backend.capture_once().is_err());
    }

    #[test]
    fn test_consecutive_frames_differ() {
        let mut backend = SimulatedBackend::new(0);
        backend
            .init(&CaptureSettings {
                width: 8,
                height: 8,
                ..Default::default()
            })
            .unwrap();
        let a = backend.capture_once().unwrap();
        let b = backend.capture_once().unwrap();
        assert_ne!(a.data, b.data);
    }
}
