//! Layered error definitions
//!
//! Categorized by source: config / storage / image / detector

use thiserror::Error;

/// How a failure should be handled by the component that observed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff up to a cap
    Recoverable,
    /// Surfaced to observers, component enters a terminal-for-now state
    NonRecoverable,
    /// Logged, the unit of work is skipped
    Ignorable,
}

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Storage Errors =====
    /// Detection store failure
    #[error("storage error during '{operation}': {message}")]
    Storage { operation: String, message: String },

    /// Image store failure
    #[error("image store error for '{path}': {message}")]
    Image { path: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create storage error
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create image store error
    pub fn image(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Image {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Detector failure. The pipeline treats it as an empty detection list.
#[derive(Debug, Error)]
#[error("detector '{detector}' failed: {message}")]
pub struct DetectorError {
    pub detector: String,
    pub message: String,
}

impl DetectorError {
    pub fn new(detector: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            detector: detector.into(),
            message: message.into(),
        }
    }
}
