use std::path::PathBuf;

use thiserror::Error;

use crate::icloud::error::ICloudError;

/// Per-file upload failures, classified for the retry loop.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Could not find or create album: {0}")]
    Album(String),

    #[error(transparent)]
    ICloud(#[from] ICloudError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UploadError {
    /// Only transient iCloud failures (rate limits, 5xx, network) are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::ICloud(e) => e.is_transient(),
            UploadError::NotFound(_) | UploadError::Album(_) | UploadError::Other(_) => false,
        }
    }
}
