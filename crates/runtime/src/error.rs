//! Runtime error types

use camera::CameraError;
use contracts::ContractError;
use recorder::RecorderError;
use sync_client::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("camera startup failed: {0}")]
    Camera(#[from] CameraError),

    #[error("storage setup failed: {0}")]
    Storage(#[from] RecorderError),

    #[error("dashboard client setup failed: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("startup cancelled by stop")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
