//! Frame - CameraDevice output
//!
//! Immutable owned snapshot of one capture.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    #[default]
    Rgb8,
    Bgr8,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Gray8 => 1,
        }
    }

    /// Parse a configured format name such as "RGB888" or "GREY".
    /// Case-insensitive; `None` for layouts the agent cannot produce.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "RGB888" | "RGB24" | "RGB8" | "RGB" => Some(Self::Rgb8),
            "BGR888" | "BGR24" | "BGR8" | "BGR" => Some(Self::Bgr8),
            "GRAY8" | "GREY8" | "GRAY" | "GREY" | "Y8" => Some(Self::Gray8),
            _ => None,
        }
    }
}

/// One captured image plus metadata from a specific camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Source camera id
    pub camera_id: String,

    /// Per-camera sequence number, strictly increasing, survives recovery
    pub sequence: u64,

    /// Image width
    pub width: u32,

    /// Image height
    pub height: u32,

    /// Pixel format
    pub format: PixelFormat,

    /// Raw pixel buffer (zero-copy)
    pub data: Bytes,

    /// Capture time (Unix seconds)
    pub captured_at: f64,
}

impl Frame {
    /// Buffer length implied by the frame geometry
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Non-empty and correctly shaped
    pub fn is_well_formed(&self) -> bool {
        !self.data.is_empty() && self.data.len() == self.expected_len()
    }
}

/// Current wall-clock time as Unix seconds
pub fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
