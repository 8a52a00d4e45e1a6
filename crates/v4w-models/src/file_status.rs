//! Per-file status records.
//!
//! A [`FileStatus`] is created for every submitted input and moves through
//! the [`FileState`] machine:
//!
//! ```text
//! Queued -> Processing -> Completed | Failed | Cancelled
//! Queued -> Cancelled
//! Unsupported (initial and terminal)
//! ```
//!
//! Every mutation goes through a method that validates the transition, so a
//! terminal record can never be re-entered.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, ModelResult};
use crate::format::{format_bytes, format_savings};

/// Unique identifier for a submitted file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a submitted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Waiting for a free pool slot
    #[default]
    Queued,
    /// Outputs are being transcoded
    Processing,
    /// Every output was produced
    Completed,
    /// At least one output failed; all outputs were removed
    Failed,
    /// Cancelled by the caller; all outputs were removed
    Cancelled,
    /// Input is not a recognised video container
    Unsupported,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Queued => "queued",
            FileState::Processing => "processing",
            FileState::Completed => "completed",
            FileState::Failed => "failed",
            FileState::Cancelled => "cancelled",
            FileState::Unsupported => "unsupported",
        }
    }

    /// Human-readable label for status columns.
    pub fn label(&self) -> &'static str {
        match self {
            FileState::Queued => "Queued",
            FileState::Processing => "Processing",
            FileState::Completed => "Completed",
            FileState::Failed => "Failed",
            FileState::Cancelled => "Cancelled",
            FileState::Unsupported => "Unsupported format",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileState::Completed | FileState::Failed | FileState::Cancelled | FileState::Unsupported
        )
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: FileState) -> bool {
        matches!(
            (self, next),
            (FileState::Queued, FileState::Processing)
                | (FileState::Queued, FileState::Cancelled)
                | (FileState::Processing, FileState::Completed)
                | (FileState::Processing, FileState::Failed)
                | (FileState::Processing, FileState::Cancelled)
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status record for one submitted input file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FileStatus {
    /// Stable identifier assigned at submission
    pub id: FileId,
    /// File name, for display only
    pub file_name: String,
    /// Full path of the input
    pub input_path: PathBuf,
    /// Current lifecycle state
    pub state: FileState,
    /// Input size in bytes (0 until measured)
    pub original_size: u64,
    /// Sum of output sizes in bytes (0 until all outputs finish)
    pub output_size: u64,
    /// `original_size - output_size`; negative when outputs grew
    pub savings: i64,
    /// Outputs of a completed job
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
    /// Diagnostic text for a failed job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the file was submitted
    pub submitted_at: DateTime<Utc>,
    /// When the record last changed
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    original_size_recorded: bool,
}

impl FileStatus {
    /// Create a status record for a freshly submitted input.
    ///
    /// `supported` decides between the `Queued` and `Unsupported` initial states.
    pub fn new(input_path: impl AsRef<Path>, supported: bool) -> Self {
        let input_path = input_path.as_ref().to_path_buf();
        let file_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| input_path.to_string_lossy().into_owned());
        let now = Utc::now();
        Self {
            id: FileId::new(),
            file_name,
            input_path,
            state: if supported {
                FileState::Queued
            } else {
                FileState::Unsupported
            },
            original_size: 0,
            output_size: 0,
            savings: 0,
            outputs: Vec::new(),
            error: None,
            submitted_at: now,
            updated_at: now,
            original_size_recorded: false,
        }
    }

    /// Check if the file is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: FileState) -> ModelResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the measured input size. Allowed once, while processing.
    pub fn record_original_size(&mut self, bytes: u64) -> ModelResult<()> {
        if self.original_size_recorded {
            return Err(ModelError::SizeAlreadyRecorded("original_size"));
        }
        if self.state != FileState::Processing {
            return Err(ModelError::invalid_value(format!(
                "original size recorded in state {}",
                self.state
            )));
        }
        self.original_size = bytes;
        self.original_size_recorded = true;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark completed with the produced outputs and their combined size.
    pub fn complete(&mut self, outputs: Vec<PathBuf>, output_size: u64) -> ModelResult<()> {
        self.transition(FileState::Completed)?;
        self.output_size = output_size;
        self.savings = self.original_size as i64 - output_size as i64;
        self.outputs = outputs;
        Ok(())
    }

    /// Mark failed with a diagnostic message.
    pub fn fail(&mut self, reason: impl Into<String>) -> ModelResult<()> {
        self.transition(FileState::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Mark cancelled.
    pub fn cancel(&mut self) -> ModelResult<()> {
        self.transition(FileState::Cancelled)
    }

    pub fn original_size_formatted(&self) -> String {
        format_bytes(self.original_size)
    }

    pub fn output_size_formatted(&self) -> String {
        format_bytes(self.output_size)
    }

    pub fn savings_formatted(&self) -> String {
        format_savings(self.savings, self.original_size)
    }
}
