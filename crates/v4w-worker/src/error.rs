//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker pool has been shut down")]
    ShutDown,

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Model error: {0}")]
    Model(#[from] v4w_models::ModelError),
}

impl WorkerError {
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::JobNotFound(id.to_string())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if the error came from an invalid state-machine edge.
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            WorkerError::Model(v4w_models::ModelError::InvalidTransition { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v4w_models::{FileState, ModelError};

    #[test]
    fn test_model_errors_convert() {
        let err: WorkerError = ModelError::InvalidTransition {
            from: FileState::Completed,
            to: FileState::Processing,
        }
        .into();
        assert!(err.is_invalid_transition());
        assert!(!WorkerError::ShutDown.is_invalid_transition());
        assert_eq!(
            WorkerError::job_not_found("abc").to_string(),
            "Job not found: abc"
        );
    }
}
