//! CameraDevice - one camera's state machine
//!
//! `Uninitialized -> Initializing -> Ready -> Running <-> Error -> Recovering
//! -> Ready | PermanentlyFailed`, plus `Disconnected` on deliberate stop.
//! The device owns its backend exclusively.

use bytes::Bytes;
use contracts::{unix_timestamp, CameraKind, CameraRecord, CameraStatus, Frame, PixelFormat};
use tracing::{debug, info, warn};

use crate::backend::{CameraBackend, CaptureSettings, RawImage};
use crate::error::{CameraError, Result};

/// Result of one capture attempt
#[derive(Debug)]
pub enum CaptureOutcome {
    /// A well-formed frame
    Captured(Frame),
    /// Camera is recovering, failed or stopped; counters untouched
    Unavailable,
    /// The read failed. `threshold_reached` is true exactly once per error burst.
    Failed {
        error: CameraError,
        threshold_reached: bool,
    },
}

pub struct CameraDevice {
    record: CameraRecord,
    backend: Option<Box<dyn CameraBackend>>,
    settings: CaptureSettings,
    error_threshold: u32,
    next_sequence: u64,
}

impl CameraDevice {
    pub fn new(
        id: String,
        kind: CameraKind,
        index: u32,
        settings: CaptureSettings,
        error_threshold: u32,
    ) -> Self {
        let mut record = CameraRecord::new(kind, index);
        record.id = id;
        Self {
            record,
            backend: None,
            settings,
            error_threshold: error_threshold.max(1),
            next_sequence: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn status(&self) -> CameraStatus {
        self.record.status
    }

    pub fn record(&self) -> &CameraRecord {
        &self.record
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Open a backend and verify it with a probe read
    ///
    /// On failure the backend is released and returned error describes why.
    pub fn prepare_backend(
        mut backend: Box<dyn CameraBackend>,
        settings: &CaptureSettings,
    ) -> Result<Box<dyn CameraBackend>> {
        let probe = backend.init(settings).and_then(|()| backend.capture_once());
        match probe {
            Ok(image) => {
                check_shape(&backend.describe(), &image)?;
                Ok(backend)
            }
            Err(e) => {
                backend.release();
                Err(e)
            }
        }
    }

    /// `Uninitialized -> Initializing -> Ready` with a prepared backend
    pub fn initialize(&mut self, backend: Box<dyn CameraBackend>) -> Result<()> {
        self.record.status = CameraStatus::Initializing;
        match Self::prepare_backend(backend, &self.settings) {
            Ok(backend) => {
                self.install_backend(backend);
                Ok(())
            }
            Err(e) => {
                self.record.status = CameraStatus::Error;
                Err(e)
            }
        }
    }

    /// Adopt an already verified backend and go `Ready`
    pub fn install_backend(&mut self, backend: Box<dyn CameraBackend>) {
        if let Some(mut old) = self.backend.take() {
            old.release();
        }
        self.record.kind = backend.kind();
        info!(
            camera_id = %self.record.id,
            source = %backend.describe(),
            "Camera ready"
        );
        self.backend = Some(backend);
        self.record.consecutive_errors = 0;
        self.record.status = CameraStatus::Ready;
    }

    /// Read one frame
    pub fn capture(&mut self) -> CaptureOutcome {
        if !self.record.status.accepts_capture() {
            return CaptureOutcome::Unavailable;
        }
        let Some(backend) = self.backend.as_mut() else {
            return CaptureOutcome::Unavailable;
        };

        let result = backend
            .capture_once()
            .and_then(|image| check_shape(&self.record.id, &image).map(|()| image));

        match result {
            Ok(image) => {
                let frame = self.build_frame(image);
                self.record.consecutive_errors = 0;
                self.record.frames_captured += 1;
                self.record.last_capture_at = Some(frame.captured_at);
                if self.record.status == CameraStatus::Ready {
                    self.record.status = CameraStatus::Running;
                }
                CaptureOutcome::Captured(frame)
            }
            Err(error) => {
                self.record.consecutive_errors += 1;
                self.record.total_errors += 1;
                let threshold_reached = self.record.consecutive_errors >= self.error_threshold;
                if threshold_reached {
                    warn!(
                        camera_id = %self.record.id,
                        consecutive_errors = self.record.consecutive_errors,
                        error = %error,
                        "Camera error threshold reached"
                    );
                    self.record.status = CameraStatus::Error;
                } else {
                    debug!(
                        camera_id = %self.record.id,
                        consecutive_errors = self.record.consecutive_errors,
                        error = %error,
                        "Capture failed"
                    );
                }
                CaptureOutcome::Failed {
                    error,
                    threshold_reached,
                }
            }
        }
    }

    /// `Error -> Recovering`, releasing the device
    pub fn begin_recovery(&mut self) {
        self.release_backend();
        self.record.recovery_attempts = 0;
        self.record.status = CameraStatus::Recovering;
    }

    pub fn note_recovery_attempt(&mut self, attempt: u32) {
        self.record.recovery_attempts = attempt;
    }

    pub fn mark_permanently_failed(&mut self) {
        self.release_backend();
        self.record.status = CameraStatus::PermanentlyFailed;
    }

    /// Release hardware and go `Disconnected`. Idempotent.
    pub fn release(&mut self) {
        self.release_backend();
        self.record.status = CameraStatus::Disconnected;
    }

    fn release_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.release();
            debug!(camera_id = %self.record.id, "Camera backend released");
        }
    }

    fn build_frame(&mut self, image: RawImage) -> Frame {
        let (width, height, data) = rotate(
            image.width,
            image.height,
            image.format,
            image.data,
            self.settings.rotation,
        );
        let format = self.settings.format;
        let data = convert(image.format, format, data);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Frame {
            camera_id: self.record.id.clone(),
            sequence,
            width,
            height,
            format,
            data: Bytes::from(data),
            captured_at: unix_timestamp(),
        }
    }
}

impl Drop for CameraDevice {
    fn drop(&mut self) {
        self.release_backend();
    }
}

fn check_shape(camera: &str, image: &RawImage) -> Result<()> {
    let expected = image.width as usize * image.height as usize * image.format.bytes_per_pixel();
    if image.data.is_empty() || image.data.len() != expected {
        return Err(CameraError::MalformedFrame {
            camera: camera.to_string(),
            expected,
            actual: image.data.len(),
        });
    }
    Ok(())
}

/// Re-encode packed pixels from one layout to another
fn convert(from: PixelFormat, to: PixelFormat, data: Vec<u8>) -> Vec<u8> {
    use PixelFormat::{Bgr8, Gray8, Rgb8};

    // BT.601 luma, integer weights summing to 256
    let luma = |r: u8, g: u8, b: u8| ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8;
    match (from, to) {
        (Rgb8, Rgb8) | (Bgr8, Bgr8) | (Gray8, Gray8) => data,
        (Rgb8, Bgr8) | (Bgr8, Rgb8) => data
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        (Rgb8, Gray8) => data.chunks_exact(3).map(|px| luma(px[0], px[1], px[2])).collect(),
        (Bgr8, Gray8) => data.chunks_exact(3).map(|px| luma(px[2], px[1], px[0])).collect(),
        (Gray8, Rgb8) | (Gray8, Bgr8) => data.iter().flat_map(|&v| [v, v, v]).collect(),
    }
}

/// Rotate clockwise by a right angle
fn rotate(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
    degrees: u32,
) -> (u32, u32, Vec<u8>) {
    if !matches!(degrees, 90 | 180 | 270) {
        return (width, height, data);
    }
    let bpp = format.bytes_per_pixel();
    let (w, h) = (width as usize, height as usize);
    let pixel = |x: usize, y: usize| &data[(y * w + x) * bpp..(y * w + x + 1) * bpp];

    match degrees {
        90 => {
            let mut out = Vec::with_capacity(data.len());
            for y in 0..w {
                for x in 0..h {
                    out.extend_from_slice(pixel(y, h - 1 - x));
                }
            }
            (height, width, out)
        }
        180 => {
            let mut out = Vec::with_capacity(data.len());
            for y in (0..h).rev() {
                for x in (0..w).rev() {
                    out.extend_from_slice(pixel(x, y));
                }
            }
            (width, height, out)
        }
        _ => {
            let mut out = Vec::with_capacity(data.len());
            for y in 0..w {
                for x in 0..h {
                    out.extend_from_slice(pixel(w - 1 - y, x));
                }
            }
            (height, width, out)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Backend whose reads follow a script; `true` = good frame
    pub(crate) struct ScriptedBackend {
        pub script: Arc<Mutex<VecDeque<bool>>>,
        pub released: Arc<Mutex<u32>>,
        pub kind: CameraKind,
        settings: CaptureSettings,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<bool>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                released: Arc::new(Mutex::new(0)),
                kind: CameraKind::Fallback,
                settings: CaptureSettings::default(),
            }
        }
    }

    impl CameraBackend for ScriptedBackend {
        fn kind(&self) -> CameraKind {
            self.kind
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn init(&mut self, settings: &CaptureSettings) -> Result<()> {
            self.settings = *settings;
            Ok(())
        }

        fn capture_once(&mut self) -> Result<RawImage> {
            // an exhausted script keeps succeeding
            let ok = self.script.lock().unwrap().pop_front().unwrap_or(true);
            if !ok {
                return Err(CameraError::capture_failed("scripted", "scripted failure"));
            }
            Ok(RawImage {
                width: self.settings.width,
                height: self.settings.height,
                format: PixelFormat::Rgb8,
                data: vec![7; (self.settings.width * self.settings.height * 3) as usize],
            })
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() += 1;
        }
    }

    fn small() -> CaptureSettings {
        CaptureSettings {
            width: 4,
            height: 2,
            ..Default::default()
        }
    }

    fn ready_device(script: Vec<bool>, threshold: u32) -> CameraDevice {
        let mut device =
            CameraDevice::new("usb_0".into(), CameraKind::Fallback, 0, small(), threshold);
        // leading `true` is consumed by the probe read
        let mut full = vec![true];
        full.extend(script);
        device.initialize(Box::new(ScriptedBackend::new(full))).unwrap();
        device
    }

    #[test]
    fn test_initialize_then_first_capture_runs() {
        let mut device = ready_device(vec![], 10);
        assert_eq!(device.status(), CameraStatus::Ready);
        assert!(matches!(device.capture(), CaptureOutcome::Captured(_)));
        assert_eq!(device.status(), CameraStatus::Running);
    }

    #[test]
    fn test_failed_probe_leaves_error_and_releases() {
        let backend = ScriptedBackend::new(vec![false]);
        let released = backend.released.clone();
        let mut device = CameraDevice::new("usb_0".into(), CameraKind::Fallback, 0, small(), 10);
        assert!(device.initialize(Box::new(backend)).is_err());
        assert_eq!(device.status(), CameraStatus::Error);
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[test]
    fn test_failures_below_threshold_keep_running() {
        let mut device = ready_device(vec![true, false, false, true, false], 3);
        for _ in 0..5 {
            let _ = device.capture();
        }
        assert_eq!(device.status(), CameraStatus::Running);
        assert_eq!(device.record().consecutive_errors, 1);
        assert_eq!(device.record().total_errors, 3);
    }

    #[test]
    fn test_threshold_reported_exactly_once() {
        let mut device = ready_device(vec![false; 6], 3);
        let mut reached = 0;
        for _ in 0..6 {
            if let CaptureOutcome::Failed { threshold_reached: true, .. } = device.capture() {
                reached += 1;
            }
        }
        assert_eq!(reached, 1);
        assert_eq!(device.status(), CameraStatus::Error);
    }

    #[test]
    fn test_recovering_capture_is_unavailable_and_uncounted() {
        let mut device = ready_device(vec![], 3);
        device.begin_recovery();
        assert!(matches!(device.capture(), CaptureOutcome::Unavailable));
        assert_eq!(device.record().total_errors, 0);
    }

    #[test]
    fn test_sequence_survives_recovery() {
        let mut device = ready_device(vec![], 3);
        let CaptureOutcome::Captured(first) = device.capture() else {
            panic!("expected frame");
        };
        device.begin_recovery();
        let backend =
            CameraDevice::prepare_backend(Box::new(ScriptedBackend::new(vec![])), &small()).unwrap();
        device.install_backend(backend);
        let CaptureOutcome::Captured(second) = device.capture() else {
            panic!("expected frame");
        };
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = ScriptedBackend::new(vec![true]);
        let released = backend.released.clone();
        let mut device = CameraDevice::new("usb_0".into(), CameraKind::Fallback, 0, small(), 3);
        device.initialize(Box::new(backend)).unwrap();
        device.release();
        device.release();
        drop(device);
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[test]
    fn test_frames_use_configured_format() {
        let settings = CaptureSettings {
            format: PixelFormat::Gray8,
            ..small()
        };
        let mut device = CameraDevice::new("usb_0".into(), CameraKind::Fallback, 0, settings, 3);
        device.initialize(Box::new(ScriptedBackend::new(vec![true]))).unwrap();

        let CaptureOutcome::Captured(frame) = device.capture() else {
            panic!("expected frame");
        };
        assert_eq!(frame.format, PixelFormat::Gray8);
        assert_eq!(frame.data.len(), 4 * 2);
        assert!(frame.is_well_formed());
        assert!(frame.data.iter().all(|&v| v == 7));
    }

    #[test]
    fn test_convert_between_layouts() {
        let rgb = vec![255, 0, 0, 0, 0, 255];
        assert_eq!(
            convert(PixelFormat::Rgb8, PixelFormat::Bgr8, rgb.clone()),
            vec![0, 0, 255, 255, 0, 0]
        );
        assert_eq!(convert(PixelFormat::Rgb8, PixelFormat::Gray8, rgb), vec![76, 28]);
        assert_eq!(
            convert(PixelFormat::Gray8, PixelFormat::Bgr8, vec![9]),
            vec![9, 9, 9]
        );
    }

    #[test]
    fn test_rotate_90_swaps_dimensions() {
        // 2x1 gray image [a b] -> 1x2 [a; b]
        let (w, h, data) = rotate(2, 1, PixelFormat::Gray8, vec![1, 2], 90);
        assert_eq!((w, h), (1, 2));
        assert_eq!(data, vec![1, 2]);

        let (w, h, data) = rotate(2, 1, PixelFormat::Gray8, vec![1, 2], 270);
        assert_eq!((w, h), (1, 2));
        assert_eq!(data, vec![2, 1]);

        let (_, _, data) = rotate(2, 1, PixelFormat::Gray8, vec![1, 2], 180);
        assert_eq!(data, vec![2, 1]);
    }
}
