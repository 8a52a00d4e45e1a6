#![deny(unreachable_patterns)]
//! Transcoder plumbing for the Video 4 Web engine.
//!
//! This crate provides:
//! - Supported input type detection
//! - Collision-free output path planning
//! - FFmpeg argument building per encoding
//! - Transcoder executable resolution
//! - A process runner with forced termination and exactly-once outcome reporting
//! - Best-effort filesystem helpers for sizing and cleanup

pub mod command;
pub mod error;
pub mod formats;
pub mod fs_utils;
pub mod output_plan;
pub mod runner;

pub use command::{ArgumentBuilder, FfmpegArgumentBuilder, TranscodeCommand, TranscoderLocator};
pub use error::{MediaError, MediaResult};
pub use formats::{is_supported_video, DEFAULT_VIDEO_EXTENSIONS};
pub use fs_utils::{file_size, remove_if_exists, remove_outputs};
pub use output_plan::{OutputPlan, PlannedOutput};
pub use runner::{ProcessExit, ProcessHandle, ProcessOutcome, ProcessRunner, RunningProcess};
