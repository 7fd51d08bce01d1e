//! # Runtime
//!
//! Service lifecycle for the edge agent.
//!
//! [`ServiceRuntime`] wires the camera supervisor, detection pipeline, event
//! sink and dashboard client under one cancellation token, and tears them
//! down in order on stop.

pub mod components;
pub mod error;
pub mod service;
pub mod stats;

pub use components::RuntimeComponents;
pub use error::{Result, RuntimeError};
pub use service::{shutdown_signal, ServiceRuntime, ServiceState};
pub use stats::RuntimeStats;
