//! Bounded FIFO worker pool.
//!
//! Jobs are admitted in submission order while a slot is free. The queue,
//! the running set and the completion detector live behind one lock, so the
//! detector always observes a consistent outstanding count no matter which
//! task finishes a job.
//!
//! Lock order is pool state, then job, then status board. No lock is held
//! across an await point.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn, Instrument};
use v4w_media::{is_supported_video, ArgumentBuilder, FfmpegArgumentBuilder, ProcessRunner};
use v4w_models::{FileId, FileState, FileStatus, VideoSettings};

use crate::completion::{CompletionDetector, CompletionEvent, NotificationSink, TracingNotifier};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::job::{Job, JobContext, JobOutcome};
use crate::metrics;
use crate::reservations::PathReservations;
use crate::status::StatusBoard;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Arc<Job>>,
    running: HashMap<FileId, Arc<Job>>,
    detector: CompletionDetector,
    shutting_down: bool,
}

impl PoolState {
    fn outstanding(&self) -> usize {
        self.queue.len() + self.running.len()
    }
}

struct PoolInner {
    config: WorkerConfig,
    ctx: JobContext,
    slots: Arc<Semaphore>,
    state: Mutex<PoolState>,
    idle: Notify,
    notifier: Arc<dyn NotificationSink>,
}

/// Worker pool handle. Cheap to clone.
///
/// Submitting spawns tokio tasks, so every method that may start a job must
/// be called from within a tokio runtime.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool with explicit collaborators.
    pub fn new(
        config: WorkerConfig,
        runner: ProcessRunner,
        arguments: Arc<dyn ArgumentBuilder>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let limit = config.max_concurrent_jobs;
        let config = config.with_max_concurrent_jobs(limit);
        info!(
            "Starting worker pool with {} concurrent job(s)",
            config.max_concurrent_jobs
        );
        let ctx = JobContext {
            board: StatusBoard::new(config.status_event_capacity),
            runner,
            arguments,
            reservations: PathReservations::new(),
        };
        Self {
            inner: Arc::new(PoolInner {
                slots: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                config,
                ctx,
                state: Mutex::new(PoolState::default()),
                idle: Notify::new(),
                notifier,
            }),
        }
    }

    /// Create a pool that runs FFmpeg and logs completion.
    pub fn from_config(config: WorkerConfig) -> Self {
        let runner = ProcessRunner::from_locator(&config.transcoder_locator());
        Self::new(
            config,
            runner,
            Arc::new(FfmpegArgumentBuilder),
            Arc::new(TracingNotifier),
        )
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn board(&self) -> &StatusBoard {
        &self.inner.ctx.board
    }

    /// Submit one input with the preference set current at this moment.
    ///
    /// Inputs with an unsupported extension get an `Unsupported` record and
    /// no job.
    pub fn submit(&self, input: impl AsRef<Path>, settings: VideoSettings) -> WorkerResult<FileId> {
        let input = input.as_ref();
        let supported = is_supported_video(input, &self.inner.config.supported_extensions);
        let status = FileStatus::new(input, supported);
        let id = status.id.clone();

        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return Err(WorkerError::ShutDown);
            }
            metrics::record_job_submitted(supported);
            self.inner.ctx.board.insert(status.clone());

            if !supported {
                info!(file_id = %id, "Skipping unsupported file {}", status.file_name);
                metrics::record_job_finished(FileState::Unsupported);
                return Ok(id);
            }

            state.detector.rearm();
            state.queue.push_back(Arc::new(Job::new(&status, settings)));
            debug!(file_id = %id, queued = state.queue.len(), "Queued {}", status.file_name);
        }

        self.admit();
        Ok(id)
    }

    /// Submit several inputs, all with the same preference set.
    pub fn submit_all<I, P>(&self, inputs: I, settings: &VideoSettings) -> WorkerResult<Vec<FileId>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        inputs
            .into_iter()
            .map(|input| self.submit(input, settings.clone()))
            .collect()
    }

    /// Cancel a queued or running job.
    ///
    /// Cancelling a file that already reached a terminal state is a no-op.
    pub fn cancel(&self, id: &FileId) -> WorkerResult<()> {
        let dequeued = {
            let mut state = self.inner.state.lock();
            let position = state.queue.iter().position(|job| job.id() == id);
            match position {
                Some(position) => state.queue.remove(position),
                None => {
                    if let Some(job) = state.running.get(id) {
                        job.cancel();
                        return Ok(());
                    }
                    None
                }
            }
        };

        match dequeued {
            Some(job) => {
                self.cancel_queued(&job);
                self.evaluate_completion();
                Ok(())
            }
            None if self.inner.ctx.board.contains(id) => {
                debug!(file_id = %id, "Cancel ignored, job already finished");
                Ok(())
            }
            None => Err(WorkerError::job_not_found(id)),
        }
    }

    /// Cancel every queued and running job and wait until all have finished.
    ///
    /// The pool rejects submissions afterwards and sends no completion
    /// notification.
    pub async fn shutdown_all(&self) {
        let (queued, running) = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;
            state.detector.disarm();
            let queued: Vec<Arc<Job>> = state.queue.drain(..).collect();
            let running: Vec<Arc<Job>> = state.running.values().cloned().collect();
            (queued, running)
        };
        info!(
            "Shutting down worker pool: {} queued, {} running",
            queued.len(),
            running.len()
        );

        for job in &queued {
            self.cancel_queued(job);
        }
        for job in &running {
            job.cancel();
        }

        self.evaluate_completion();
        self.wait_idle().await;
        info!("Worker pool shut down");
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().outstanding() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Ordered snapshot of every tracked file.
    pub fn statuses(&self) -> Vec<FileStatus> {
        self.inner.ctx.board.snapshot()
    }

    pub fn status(&self, id: &FileId) -> Option<FileStatus> {
        self.inner.ctx.board.get(id)
    }

    /// Receive every subsequent status change.
    pub fn subscribe(&self) -> broadcast::Receiver<FileStatus> {
        self.inner.ctx.board.subscribe()
    }

    /// Forget terminal records, returning how many were removed.
    pub fn clear_finished(&self) -> usize {
        self.inner.ctx.board.clear_finished()
    }

    /// Start queued jobs while slots are free.
    fn admit(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.queue.is_empty() {
                    None
                } else if let Ok(permit) = self.inner.slots.clone().try_acquire_owned() {
                    match state.queue.pop_front() {
                        Some(job) => {
                            state.running.insert(job.id().clone(), job.clone());
                            Some((job, permit))
                        }
                        None => None,
                    }
                } else {
                    None
                }
            };

            match next {
                Some((job, permit)) => self.spawn_job(job, permit),
                None => break,
            }
        }

        let state = self.inner.state.lock();
        metrics::set_pool_gauges(state.running.len(), state.queue.len());
    }

    fn spawn_job(&self, job: Arc<Job>, permit: OwnedSemaphorePermit) {
        let pool = self.clone();
        let span = job.logger().create_span();

        tokio::spawn(async move {
            let worker = {
                let job = job.clone();
                let ctx = pool.inner.ctx.clone();
                tokio::spawn(async move { job.run(&ctx).await }.instrument(span))
            };

            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(file_id = %job.id(), "Job task failed: {}", e);
                    job.abort(&pool.inner.ctx, format!("Job task failed: {}", e))
                        .await
                }
            };

            pool.finish(&job, outcome, permit);
        });
    }

    fn cancel_queued(&self, job: &Job) {
        job.cancel();
        match self.inner.ctx.board.update(job.id(), |status| status.cancel()) {
            Ok(_) => {
                info!(file_id = %job.id(), "Cancelled queued job");
                metrics::record_job_finished(FileState::Cancelled);
            }
            Err(e) => warn!(file_id = %job.id(), "Could not cancel queued job: {}", e),
        }
    }

    /// Retire a job, then hand its slot to the next queued one.
    fn finish(&self, job: &Job, outcome: JobOutcome, permit: OwnedSemaphorePermit) {
        metrics::record_job_finished(outcome.state);
        debug!(
            file_id = %outcome.id,
            state = %outcome.state,
            spawned = outcome.spawned,
            "Job finished"
        );

        self.inner.state.lock().running.remove(job.id());
        drop(permit);
        self.admit();
        self.evaluate_completion();
    }

    /// Fire the completion notification and wake idle waiters as needed.
    fn evaluate_completion(&self) {
        let (event, idle) = {
            let mut state = self.inner.state.lock();
            let outstanding = state.outstanding();
            let board = &self.inner.ctx.board;
            let event = state
                .detector
                .evaluate(outstanding, board.all_terminal())
                .map(|cycle| CompletionEvent::from_statuses(cycle, &board.snapshot()));
            (event, outstanding == 0)
        };

        if let Some(event) = event {
            info!(cycle = event.cycle, "All files finished");
            self.inner.notifier.notify(&event);
        }
        if idle {
            self.inner.idle.notify_waiters();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("WorkerPool")
            .field("max_concurrent_jobs", &self.inner.config.max_concurrent_jobs)
            .field("queued", &state.queue.len())
            .field("running", &state.running.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChannelNotifier;
    use std::time::Duration;
    use tempfile::TempDir;

    fn unavailable_pool(limit: usize) -> (WorkerPool, tokio::sync::mpsc::UnboundedReceiver<CompletionEvent>) {
        let (notifier, rx) = ChannelNotifier::new();
        let pool = WorkerPool::new(
            WorkerConfig::default().with_max_concurrent_jobs(limit),
            ProcessRunner::unavailable("no transcoder in tests"),
            Arc::new(FfmpegArgumentBuilder),
            Arc::new(notifier),
        );
        (pool, rx)
    }

    #[tokio::test]
    async fn test_launch_failure_fails_job() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"video").unwrap();
        let (pool, mut rx) = unavailable_pool(2);

        let id = pool.submit(&input, VideoSettings::default()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool.wait_idle())
            .await
            .unwrap();

        let status = pool.status(&id).unwrap();
        assert_eq!(status.state, FileState::Failed);
        assert!(status.error.unwrap().contains("no transcoder in tests"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.failed, 1);
        assert_eq!(event.cycle, 1);
    }

    #[tokio::test]
    async fn test_unsupported_only_batch_creates_no_job() {
        let (pool, mut rx) = unavailable_pool(1);

        let id = pool.submit("/docs/readme.txt", VideoSettings::default()).unwrap();

        assert_eq!(pool.status(&id).unwrap().state, FileState::Unsupported);
        assert!(pool.is_idle());
        pool.wait_idle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_cancel_and_submit_after_shutdown() {
        let (pool, _rx) = unavailable_pool(1);

        let err = pool.cancel(&FileId::from_string("missing")).unwrap_err();
        assert!(matches!(err, WorkerError::JobNotFound(_)));

        pool.shutdown_all().await;
        assert!(pool.is_shut_down());
        let err = pool.submit("/v/clip.mp4", VideoSettings::default()).unwrap_err();
        assert!(matches!(err, WorkerError::ShutDown));
    }

    #[tokio::test]
    async fn test_clear_finished_keeps_nothing_after_idle() {
        let (pool, _rx) = unavailable_pool(1);
        pool.submit("/v/a.txt", VideoSettings::default()).unwrap();
        pool.submit("/v/b.doc", VideoSettings::default()).unwrap();

        assert_eq!(pool.statuses().len(), 2);
        assert_eq!(pool.clear_finished(), 2);
        assert!(pool.statuses().is_empty());
    }
}
