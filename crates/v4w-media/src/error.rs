//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while preparing or running transcodes.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Transcoder not found: {0}")]
    TranscoderNotFound(String),

    #[error("No output formats selected")]
    NoOutputsSelected,

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create a transcoder-not-found error.
    pub fn transcoder_not_found(message: impl Into<String>) -> Self {
        Self::TranscoderNotFound(message.into())
    }
}
