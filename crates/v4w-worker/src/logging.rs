//! Structured job logging.
//!
//! Every line carries the file id, the input's file name and the
//! operation, so log output for concurrent jobs can be told apart.

use tracing::{error, info, warn, Span};
use v4w_models::FileId;

/// Logger bound to one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    file_id: String,
    file_name: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a job and operation.
    ///
    /// # Arguments
    /// * `file_id` - Identifier of the tracked file
    /// * `file_name` - Display name of the input
    /// * `operation` - The type of operation (e.g. "transcode")
    pub fn new(file_id: &FileId, file_name: &str, operation: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span wrapping the job's task.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            file_id = %self.file_id,
            file_name = %self.file_name,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let id = FileId::new();
        let logger = JobLogger::new(&id, "clip.mov", "transcode");

        assert_eq!(logger.file_id(), id.to_string());
        assert_eq!(logger.file_name(), "clip.mov");
        assert_eq!(logger.operation(), "transcode");
    }

    #[test]
    fn test_span_is_created_without_subscriber() {
        let id = FileId::from_string("file-1");
        let logger = JobLogger::new(&id, "clip.mov", "transcode");
        let span = logger.create_span();
        let _entered = span.enter();
        logger.log_progress("inside span");
    }
}
