//! Sync client error types

use contracts::{unix_timestamp, ErrorClass, ErrorInfo};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 401 from the dashboard
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// 5xx from the dashboard
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Any other non-success status
    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    /// 2xx with a body that is not JSON
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("dashboard not configured")]
    NotConfigured,

    #[error("request cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Map a non-success HTTP status
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.chars().take(200).collect()
        };
        match status {
            401 => Self::Authentication { message },
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Server { .. } | Self::Network(_) | Self::Timeout => ErrorClass::Recoverable,
            Self::Authentication { .. } | Self::NotConfigured | Self::Serialization(_) => {
                ErrorClass::NonRecoverable
            }
            Self::Client { .. } | Self::InvalidResponse(_) | Self::Cancelled => {
                ErrorClass::Ignorable
            }
        }
    }

    /// Only network failures and 5xx are worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// The request never reached the server
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            message: self.to_string(),
            code: self.status(),
            timestamp: unix_timestamp(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            SyncError::from_status(401, ""),
            SyncError::Authentication { .. }
        ));
        assert!(SyncError::from_status(503, "busy").is_retryable());
        assert!(!SyncError::from_status(404, "").is_retryable());
        assert!(!SyncError::from_status(401, "").is_retryable());
        assert_eq!(SyncError::from_status(422, "").status(), Some(422));
    }

    #[test]
    fn test_network_errors_are_recoverable() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Network("refused".into()).is_network());
        assert_eq!(
            SyncError::InvalidResponse("x".into()).class(),
            ErrorClass::Ignorable
        );
    }

    #[test]
    fn test_error_info_carries_status() {
        let info = SyncError::from_status(500, "").to_info();
        assert_eq!(info.code, Some(500));
        assert!(info.message.contains("HTTP 500"));
    }
}
