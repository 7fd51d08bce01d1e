//! Camera error types

use contracts::{ContractError, ErrorClass};
use thiserror::Error;

/// Camera specific error
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device could not be opened or configured
    #[error("failed to initialize camera '{camera}': {message}")]
    InitFailed { camera: String, message: String },

    /// A single read failed
    #[error("capture failed on camera '{camera}': {message}")]
    CaptureFailed { camera: String, message: String },

    /// Read succeeded but the buffer has the wrong shape
    #[error("malformed frame from camera '{camera}': expected {expected} bytes, got {actual}")]
    MalformedFrame {
        camera: String,
        expected: usize,
        actual: usize,
    },

    /// OS refused access to the device
    #[error("permission denied opening '{device}'")]
    PermissionDenied { device: String },

    /// No camera id matches
    #[error("unknown camera '{0}'")]
    UnknownCamera(String),

    /// Discovery exhausted every source
    #[error("no camera available (hardware, external and simulated sources exhausted)")]
    NoCameraAvailable,

    /// Recovery gave up
    #[error("camera '{camera}' permanently failed after {attempts} recovery attempts")]
    PermanentlyFailed { camera: String, attempts: u32 },

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl CameraError {
    pub fn init_failed(camera: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InitFailed {
            camera: camera.into(),
            message: message.into(),
        }
    }

    pub fn capture_failed(camera: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CaptureFailed {
            camera: camera.into(),
            message: message.into(),
        }
    }

    /// Handling class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::CaptureFailed { .. } | Self::MalformedFrame { .. } => ErrorClass::Recoverable,
            Self::InitFailed { .. } => ErrorClass::Recoverable,
            Self::PermissionDenied { .. }
            | Self::NoCameraAvailable
            | Self::PermanentlyFailed { .. } => ErrorClass::NonRecoverable,
            Self::UnknownCamera(_) | Self::Contract(_) => ErrorClass::Ignorable,
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, CameraError>;
