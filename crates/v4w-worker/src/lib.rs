//! Video transcoding orchestration engine.
//!
//! This crate provides:
//! - A bounded, FIFO worker pool for per-file jobs
//! - Per-job fan-out over output encodings with join-before-finalize
//! - Cancellation down to running transcoder processes, with output cleanup
//! - A single-writer status board with change broadcasts
//! - One-shot completion notification per batch
//! - Configuration, structured job logging and metrics

pub mod completion;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod reservations;
pub mod status;

pub use completion::{
    ChannelNotifier, CompletionDetector, CompletionEvent, NotificationSink, TracingNotifier,
};
pub use config::{video_settings_from_env, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use job::{Job, JobContext, JobOutcome};
pub use logging::JobLogger;
pub use pool::WorkerPool;
pub use reservations::PathReservations;
pub use status::StatusBoard;
