//! Prometheus metrics for the worker pool.
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use v4w_media::ProcessOutcome;
use v4w_models::{Encoding, FileState};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "v4w_jobs_submitted_total";
    pub const JOBS_FINISHED_TOTAL: &str = "v4w_jobs_finished_total";
    pub const JOBS_RUNNING: &str = "v4w_jobs_running";
    pub const JOBS_QUEUED: &str = "v4w_jobs_queued";
    pub const TRANSCODE_DURATION_SECONDS: &str = "v4w_transcode_duration_seconds";
    pub const CLEANUP_FAILURES_TOTAL: &str = "v4w_cleanup_failures_total";
}

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> WorkerResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))
}

/// Record a submitted file.
pub fn record_job_submitted(supported: bool) {
    let labels = [("supported", supported.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a file reaching a terminal state.
pub fn record_job_finished(state: FileState) {
    let labels = [("state", state.as_str().to_string())];
    counter!(names::JOBS_FINISHED_TOTAL, &labels).increment(1);
}

/// Update the running and queued gauges.
pub fn set_pool_gauges(running: usize, queued: usize) {
    gauge!(names::JOBS_RUNNING).set(running as f64);
    gauge!(names::JOBS_QUEUED).set(queued as f64);
}

/// Record one transcoder invocation.
pub fn record_transcode(encoding: Encoding, outcome: &ProcessOutcome) {
    let labels = [
        ("encoding", encoding.as_str().to_string()),
        ("success", outcome.is_success().to_string()),
    ];
    histogram!(names::TRANSCODE_DURATION_SECONDS, &labels).record(outcome.elapsed.as_secs_f64());
}

/// Record output files that could not be removed.
pub fn record_cleanup_failures(count: usize) {
    if count > 0 {
        counter!(names::CLEANUP_FAILURES_TOTAL).increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use v4w_media::ProcessExit;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_job_submitted(true);
        record_job_finished(FileState::Completed);
        set_pool_gauges(1, 2);
        record_cleanup_failures(0);
        record_transcode(
            Encoding::Mp4,
            &ProcessOutcome {
                destination: PathBuf::from("out.mp4"),
                exit: ProcessExit::Success,
                elapsed: Duration::from_millis(5),
            },
        );
    }

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::JOBS_SUBMITTED_TOTAL,
            names::JOBS_FINISHED_TOTAL,
            names::JOBS_RUNNING,
            names::JOBS_QUEUED,
            names::TRANSCODE_DURATION_SECONDS,
            names::CLEANUP_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("v4w_"));
        }
    }
}
