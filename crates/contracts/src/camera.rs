//! Camera identity, status and roster records

use serde::{Deserialize, Serialize};

/// Closed set of camera source kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    /// Board-integrated camera (e.g. CSI ribbon)
    Hardware,
    /// Enumerated external device (USB)
    Fallback,
    /// Synthetic frame generator
    Simulated,
}

impl CameraKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Fallback => "usb",
            Self::Simulated => "simulated",
        }
    }

    /// Stable camera id `<kind>_<index>`
    pub fn camera_id(self, index: u32) -> String {
        format!("{}_{}", self.as_str(), index)
    }
}

impl std::fmt::Display for CameraKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-camera lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Error,
    Recovering,
    PermanentlyFailed,
    Disconnected,
}

impl CameraStatus {
    /// No further transitions expected
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::PermanentlyFailed | Self::Disconnected)
    }

    /// A capture may be attempted in this state
    pub fn accepts_capture(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

/// Mutable per-camera bookkeeping, owned by its device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRecord {
    pub id: String,
    pub kind: CameraKind,
    /// Device index for external cameras
    pub index: u32,
    pub status: CameraStatus,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub recovery_attempts: u32,
    pub frames_captured: u64,
    pub last_capture_at: Option<f64>,
}

impl CameraRecord {
    pub fn new(kind: CameraKind, index: u32) -> Self {
        Self {
            id: kind.camera_id(index),
            kind,
            index,
            status: CameraStatus::Uninitialized,
            consecutive_errors: 0,
            total_errors: 0,
            recovery_attempts: 0,
            frames_captured: 0,
            last_capture_at: None,
        }
    }

    /// Read-only projection for the heartbeat roster
    pub fn snapshot(&self) -> CameraSnapshot {
        CameraSnapshot {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            frames_captured: self.frames_captured,
            total_errors: self.total_errors,
            last_capture_at: self.last_capture_at,
        }
    }
}

/// Serializable roster entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSnapshot {
    pub id: String,
    pub kind: CameraKind,
    pub status: CameraStatus,
    pub frames_captured: u64,
    pub total_errors: u64,
    pub last_capture_at: Option<f64>,
}
