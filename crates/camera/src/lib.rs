//! # Camera
//!
//! Camera lifecycle management.
//!
//! Responsibilities:
//! - Discover cameras: hardware, then external devices, then a synthetic source
//! - Drive each camera's state machine and count capture errors
//! - Recover failed cameras with exponential backoff
//! - Release device handles on every exit path
//!
//! ## Feature Flags
//!
//! - `v4l2`: capture from `/dev/video*` through libv4l

pub mod backend;
pub mod device;
pub mod error;
pub mod probe;
pub mod simulated;
pub mod supervisor;

#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use backend::{CameraBackend, CaptureSettings, RawImage};
pub use device::{CameraDevice, CaptureOutcome};
pub use error::{CameraError, Result};
pub use probe::{DeviceProbe, PlatformCapabilities, SystemProbe, VideoDevice};
pub use simulated::SimulatedBackend;
pub use supervisor::{
    CameraMetricsSnapshot, CameraSupervisor, SupervisorConfig, SupervisorStats,
};

#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Backend;
