//! Camera backend capability interface
//!
//! One implementation per `CameraKind` source. Backends are blocking and are
//! only ever driven by their owning `CameraDevice`.

use contracts::{CameraKind, PixelFormat};

use crate::error::Result;

/// Requested capture geometry and output layout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Degrees clockwise, one of 0/90/180/270
    pub rotation: u32,
    /// Layout of emitted frames; backends may read another one
    pub format: PixelFormat,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 10.0,
            rotation: 0,
            format: PixelFormat::Rgb8,
        }
    }
}

impl From<&contracts::CameraConfig> for CaptureSettings {
    fn from(config: &contracts::CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
            rotation: config.rotation,
            // unknown names are rejected by config validation
            format: PixelFormat::from_name(&config.format).unwrap_or_default(),
        }
    }
}

/// Pixels as read from a device, before sequencing and rotation
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

/// A capture source
pub trait CameraBackend: Send {
    /// Source kind
    fn kind(&self) -> CameraKind;

    /// Human readable source description (device path, model, ...)
    fn describe(&self) -> String;

    /// Open and configure the device
    fn init(&mut self, settings: &CaptureSettings) -> Result<()>;

    /// Read exactly one image
    fn capture_once(&mut self) -> Result<RawImage>;

    /// Release device handles. Must be safe to call repeatedly.
    fn release(&mut self);
}
