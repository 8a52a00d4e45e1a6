//! Shared data models for the Video 4 Web transcoding engine.
//!
//! This crate provides Serde-serializable types for:
//! - Per-file status records and their lifecycle state machine
//! - Output encodings and compression levels
//! - The user preference set applied to each submission
//! - Display helpers for sizes and savings

pub mod encoding;
pub mod error;
pub mod file_status;
pub mod format;
pub mod settings;

// Re-export common types
pub use encoding::{CompressionLevel, Encoding, SCALE_WIDTHS};
pub use error::{ModelError, ModelResult};
pub use file_status::{FileId, FileState, FileStatus};
pub use format::{format_bytes, format_savings};
pub use settings::VideoSettings;
