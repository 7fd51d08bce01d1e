//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the edge agent.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Wall-clock Unix timestamps (seconds, f64) everywhere
//! - `sequence` is per camera and only used for ordering/diagnostics

mod backoff;
mod camera;
mod collaborators;
mod config;
mod detection;
mod error;
mod frame;
mod observer;
mod record;
mod source;
mod sync;

pub use backoff::BackoffPolicy;
pub use camera::*;
pub use collaborators::*;
pub use config::*;
pub use detection::*;
pub use error::*;
pub use frame::*;
pub use observer::*;
pub use record::DetectionRecord;
pub use source::{FrameSource, LocalFrameSource};
pub use sync::*;
