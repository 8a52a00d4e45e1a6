//! Status board: the authoritative list of file records.
//!
//! The board is the only place records are mutated. Every accepted change is
//! published on a broadcast channel while the lock is held, so subscribers
//! see changes to one record in the order they were applied. A lagging
//! subscriber loses old events; [`StatusBoard::snapshot`] is always current.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;
use v4w_models::{FileId, FileState, FileStatus, ModelResult};

use crate::error::{WorkerError, WorkerResult};

struct BoardInner {
    records: Mutex<Vec<FileStatus>>,
    events: broadcast::Sender<FileStatus>,
}

/// Shared, ordered collection of [`FileStatus`] records.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl StatusBoard {
    /// Create an empty board whose broadcast buffer holds `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BoardInner {
                records: Mutex::new(Vec::new()),
                events,
            }),
        }
    }

    /// Append a new record and publish it.
    pub fn insert(&self, status: FileStatus) {
        let mut records = self.inner.records.lock();
        debug!(file_id = %status.id, state = %status.state, "Tracking {}", status.file_name);
        let _ = self.inner.events.send(status.clone());
        records.push(status);
    }

    pub fn get(&self, id: &FileId) -> Option<FileStatus> {
        self.inner
            .records
            .lock()
            .iter()
            .find(|s| &s.id == id)
            .cloned()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.inner.records.lock().iter().any(|s| &s.id == id)
    }

    /// All records in submission order.
    pub fn snapshot(&self) -> Vec<FileStatus> {
        self.inner.records.lock().clone()
    }

    /// Apply `change` to the record with `id`.
    ///
    /// The change runs on a copy and is committed only when it returns `Ok`,
    /// so a rejected transition leaves the record untouched.
    pub fn update<F>(&self, id: &FileId, change: F) -> WorkerResult<FileStatus>
    where
        F: FnOnce(&mut FileStatus) -> ModelResult<()>,
    {
        let mut records = self.inner.records.lock();
        let record = records
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| WorkerError::job_not_found(id))?;

        let mut next = record.clone();
        change(&mut next)?;
        *record = next.clone();
        let _ = self.inner.events.send(next.clone());
        Ok(next)
    }

    /// Move the record with `id` to `state`.
    pub fn transition(&self, id: &FileId, state: FileState) -> WorkerResult<FileStatus> {
        self.update(id, |status| status.transition(state))
    }

    /// Current state of the record with `id`.
    pub fn state_of(&self, id: &FileId) -> Option<FileState> {
        self.inner
            .records
            .lock()
            .iter()
            .find(|s| &s.id == id)
            .map(|s| s.state)
    }

    /// Whether every record is terminal. True for an empty board.
    pub fn all_terminal(&self) -> bool {
        self.inner.records.lock().iter().all(|s| s.is_terminal())
    }

    /// Drop terminal records, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut records = self.inner.records.lock();
        let before = records.len();
        records.retain(|s| !s.is_terminal());
        before - records.len()
    }

    /// Receive every subsequent record change.
    pub fn subscribe(&self) -> broadcast::Receiver<FileStatus> {
        self.inner.events.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.lock().is_empty()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(256)
    }
}
