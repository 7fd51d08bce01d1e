//! Recorder error types

use contracts::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame buffer does not match its declared geometry
    #[error("frame {camera_id}#{sequence} is malformed")]
    MalformedFrame { camera_id: String, sequence: u64 },

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl RecorderError {
    pub fn malformed_frame(camera_id: impl Into<String>, sequence: u64) -> Self {
        Self::MalformedFrame {
            camera_id: camera_id.into(),
            sequence,
        }
    }

    /// Map into the storage flavour of the shared contract error
    pub fn into_storage(self, operation: &str) -> ContractError {
        match self {
            Self::Io(e) => ContractError::Io(e),
            other => ContractError::storage(operation, other.to_string()),
        }
    }

    /// Map into the image flavour of the shared contract error
    pub fn into_image(self, path: &str) -> ContractError {
        ContractError::image(path, self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecorderError>;
