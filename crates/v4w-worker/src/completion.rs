//! Batch completion detection and notification.
//!
//! The detector is armed by every accepted submission and fires at most once
//! per armed cycle: when no job is queued or running and every record on the
//! board is terminal. A batch made only of unsupported files never arms it.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;
use v4w_models::{format_bytes, FileState, FileStatus};

/// Summary delivered when a batch finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    /// Sequence number of the armed cycle, starting at 1
    pub cycle: u64,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub unsupported: usize,
    /// Sum of savings over completed records
    pub bytes_saved: i64,
}

impl CompletionEvent {
    /// Summarize the board contents at completion time.
    pub fn from_statuses(cycle: u64, statuses: &[FileStatus]) -> Self {
        let mut event = Self {
            cycle,
            completed: 0,
            failed: 0,
            cancelled: 0,
            unsupported: 0,
            bytes_saved: 0,
        };
        for status in statuses {
            match status.state {
                FileState::Completed => {
                    event.completed += 1;
                    event.bytes_saved += status.savings;
                }
                FileState::Failed => event.failed += 1,
                FileState::Cancelled => event.cancelled += 1,
                FileState::Unsupported => event.unsupported += 1,
                FileState::Queued | FileState::Processing => {}
            }
        }
        event
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled + self.unsupported
    }
}

/// Receives batch completion events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &CompletionEvent);
}

/// Logs completion events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: &CompletionEvent) {
        let saved = if event.bytes_saved >= 0 {
            format_bytes(event.bytes_saved as u64)
        } else {
            format!("-{}", format_bytes(event.bytes_saved.unsigned_abs()))
        };
        info!(
            cycle = event.cycle,
            completed = event.completed,
            failed = event.failed,
            cancelled = event.cancelled,
            unsupported = event.unsupported,
            "Your videos are ready ({} saved)",
            saved
        );
    }
}

/// Forwards completion events to a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<CompletionEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, event: &CompletionEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Fires once per armed cycle.
#[derive(Debug, Default)]
pub struct CompletionDetector {
    armed: bool,
    cycle: u64,
}

impl CompletionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for a new submission. Arming an armed detector keeps the cycle.
    pub fn rearm(&mut self) {
        self.armed = true;
    }

    /// Stop firing until the next [`CompletionDetector::rearm`].
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Number of cycles that have fired.
    pub fn fired_cycles(&self) -> u64 {
        self.cycle
    }

    /// Check for completion, returning the cycle number when it fires.
    pub fn evaluate(&mut self, outstanding_jobs: usize, all_terminal: bool) -> Option<u64> {
        if !self.armed || outstanding_jobs > 0 || !all_terminal {
            return None;
        }
        self.armed = false;
        self.cycle += 1;
        Some(self.cycle)
    }
}
