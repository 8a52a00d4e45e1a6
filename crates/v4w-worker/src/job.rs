//! Per-file job: output fan-out, join, finalization and cancellation.
//!
//! A job launches one transcoder process per planned output and waits for
//! every one of them before deciding its own outcome. Live process handles
//! are registered under the same lock that carries the cancellation flag, so
//! a cancel either sees a handle and terminates it or prevents it from being
//! spawned at all.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use v4w_media::{
    file_size, remove_outputs, ArgumentBuilder, MediaError, OutputPlan, ProcessHandle,
    ProcessOutcome, ProcessRunner,
};
use v4w_models::{Encoding, FileId, FileState, FileStatus, VideoSettings};

use crate::logging::JobLogger;
use crate::metrics;
use crate::reservations::PathReservations;
use crate::status::StatusBoard;

/// Operation name used in job log lines.
const OPERATION: &str = "transcode";

/// Everything a job needs from the pool to run.
#[derive(Clone)]
pub struct JobContext {
    pub board: StatusBoard,
    pub runner: ProcessRunner,
    pub arguments: Arc<dyn ArgumentBuilder>,
    pub reservations: PathReservations,
}

/// Result of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub id: FileId,
    pub state: FileState,
    /// Number of processes launched
    pub spawned: usize,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct ProcessSet {
    cancelled: bool,
    finalized: bool,
    handles: Vec<ProcessHandle>,
    spawned: usize,
    /// Reserved destinations of the current plan
    destinations: Vec<PathBuf>,
}

/// One submitted file and the processes working on it.
pub struct Job {
    id: FileId,
    input: PathBuf,
    settings: VideoSettings,
    logger: JobLogger,
    processes: Mutex<ProcessSet>,
}

impl Job {
    /// Create a job for a freshly queued record.
    pub fn new(status: &FileStatus, settings: VideoSettings) -> Self {
        Self {
            id: status.id.clone(),
            input: status.input_path.clone(),
            settings,
            logger: JobLogger::new(&status.id, &status.file_name, OPERATION),
            processes: Mutex::new(ProcessSet::default()),
        }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn is_cancelled(&self) -> bool {
        self.processes.lock().cancelled
    }

    /// Number of processes launched so far.
    pub fn spawned_count(&self) -> usize {
        self.processes.lock().spawned
    }

    /// Number of launched processes that have not exited.
    pub fn live_process_count(&self) -> usize {
        self.processes
            .lock()
            .handles
            .iter()
            .filter(|h| !h.is_exited())
            .count()
    }

    /// Request cancellation and terminate every live process.
    ///
    /// Returns `false` when the job was already cancelled or finalized.
    pub fn cancel(&self) -> bool {
        let mut processes = self.processes.lock();
        if processes.cancelled || processes.finalized {
            return false;
        }
        processes.cancelled = true;

        let mut terminated = 0;
        for handle in &processes.handles {
            if handle.terminate() {
                terminated += 1;
            }
        }
        drop(processes);

        self.logger
            .log_progress(&format!("cancellation requested, {} process(es) terminated", terminated));
        true
    }

    /// Run the job to a terminal state.
    pub async fn run(&self, ctx: &JobContext) -> JobOutcome {
        if self.is_cancelled() {
            return self.cancel_before_start(ctx);
        }

        if let Err(e) = ctx.board.transition(&self.id, FileState::Processing) {
            self.logger.log_warning(&format!("not started: {}", e));
            let state = ctx.board.state_of(&self.id).unwrap_or(FileState::Cancelled);
            return self.outcome(state, None);
        }
        self.logger.log_start(&self.input.display().to_string());

        let original_size = match file_size(&self.input).await {
            Ok(size) => size,
            Err(e) => {
                self.logger.log_warning(&format!("could not measure input: {}", e));
                0
            }
        };
        if let Err(e) = ctx
            .board
            .update(&self.id, |s| s.record_original_size(original_size))
        {
            self.logger.log_warning(&format!("could not record input size: {}", e));
        }

        let encodings = self.settings.enabled_encodings();
        if encodings.is_empty() {
            return self
                .finish_failed(ctx, &[], MediaError::NoOutputsSelected.to_string())
                .await;
        }

        let plan = ctx.reservations.plan(&self.input, &encodings);
        self.processes.lock().destinations = plan.destinations();

        let outcome = match AssertUnwindSafe(self.transcode(ctx, &plan)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reason = format!("transcode panicked: {}", panic_message(&*panic));
                return self.abort(ctx, reason).await;
            }
        };
        self.release_plan(ctx);
        outcome
    }

    /// Tear the job down after its task failed unexpectedly.
    ///
    /// Terminates and waits for every launched process, removes the planned
    /// outputs unless the job already committed, frees its reservations and
    /// records `Failed`.
    pub async fn abort(&self, ctx: &JobContext, reason: String) -> JobOutcome {
        let (finalized, handles, destinations) = {
            let mut processes = self.processes.lock();
            processes.cancelled = true;
            for handle in &processes.handles {
                handle.terminate();
            }
            (
                processes.finalized,
                processes.handles.clone(),
                processes.destinations.clone(),
            )
        };
        join_all(handles.iter().map(|handle| handle.wait_exited())).await;

        if !finalized {
            self.cleanup(&destinations).await;
        }
        self.release_plan(ctx);
        self.logger.log_error(&reason);

        let result = ctx.board.update(&self.id, |status| {
            if status.state == FileState::Queued {
                status.transition(FileState::Processing)?;
            }
            status.fail(reason.clone())
        });
        if let Err(e) = result {
            self.logger.log_warning(&format!("could not mark failed: {}", e));
        }

        let state = ctx.board.state_of(&self.id).unwrap_or(FileState::Failed);
        self.outcome(state, Some(reason))
    }

    /// Free the plan's reservations and forget its process handles.
    fn release_plan(&self, ctx: &JobContext) {
        let destinations = {
            let mut processes = self.processes.lock();
            processes.handles.clear();
            std::mem::take(&mut processes.destinations)
        };
        ctx.reservations.release(&destinations);
    }

    /// Mark the job final unless a cancel got there first.
    fn try_finalize(&self) -> bool {
        let mut processes = self.processes.lock();
        if processes.cancelled {
            return false;
        }
        processes.finalized = true;
        true
    }

    async fn transcode(&self, ctx: &JobContext, plan: &OutputPlan) -> JobOutcome {
        let mut running = Vec::with_capacity(plan.len());
        for output in plan.outputs() {
            let args = ctx
                .arguments
                .build(&self.input, output.encoding, &self.settings);

            let mut processes = self.processes.lock();
            if processes.cancelled {
                break;
            }
            let process = ctx.runner.start(args, output.destination.clone());
            processes.handles.push(process.handle().clone());
            processes.spawned += 1;
            running.push((output.encoding, process));
        }
        self.logger
            .log_progress(&format!("{} of {} output(s) launched", running.len(), plan.len()));

        let results: Vec<(Encoding, ProcessOutcome)> = join_all(
            running
                .into_iter()
                .map(|(encoding, process)| async move { (encoding, process.wait().await) }),
        )
        .await;

        for (encoding, outcome) in &results {
            metrics::record_transcode(*encoding, outcome);
            if outcome.is_success() {
                self.logger
                    .log_progress(&format!("{} output finished in {:.1?}", encoding, outcome.elapsed));
            }
        }

        let destinations = plan.destinations();
        if self.is_cancelled() {
            return self.finish_cancelled(ctx, &destinations).await;
        }

        if let Some((_, failed)) = results.iter().find(|(_, o)| !o.is_success()) {
            return self.finish_failed(ctx, &destinations, failed.describe()).await;
        }

        let mut output_size = 0u64;
        for destination in &destinations {
            match file_size(destination).await {
                Ok(size) => output_size += size,
                Err(e) => {
                    let reason = format!("{}: output missing after success: {}", destination.display(), e);
                    return self.finish_failed(ctx, &destinations, reason).await;
                }
            }
        }

        // A cancel racing with this commit either lands first or is rejected.
        if !self.try_finalize() {
            return self.finish_cancelled(ctx, &destinations).await;
        }

        match ctx
            .board
            .update(&self.id, |s| s.complete(destinations.clone(), output_size))
        {
            Ok(status) => {
                self.logger.log_completion(&format!(
                    "{} -> {} ({})",
                    status.original_size_formatted(),
                    status.output_size_formatted(),
                    status.savings_formatted()
                ));
                self.outcome(FileState::Completed, None)
            }
            Err(e) => {
                self.logger.log_error(&format!("could not record completion: {}", e));
                let state = ctx.board.state_of(&self.id).unwrap_or(FileState::Failed);
                self.outcome(state, Some(e.to_string()))
            }
        }
    }

    fn cancel_before_start(&self, ctx: &JobContext) -> JobOutcome {
        match ctx.board.update(&self.id, |s| s.cancel()) {
            Ok(_) => self.logger.log_completion("cancelled before start"),
            Err(e) => {
                let already = ctx.board.state_of(&self.id) == Some(FileState::Cancelled);
                if !already {
                    self.logger.log_warning(&format!("could not mark cancelled: {}", e));
                }
            }
        }
        let state = ctx.board.state_of(&self.id).unwrap_or(FileState::Cancelled);
        self.outcome(state, None)
    }

    async fn finish_cancelled(&self, ctx: &JobContext, destinations: &[PathBuf]) -> JobOutcome {
        self.cleanup(destinations).await;
        if let Err(e) = ctx.board.update(&self.id, |s| s.cancel()) {
            self.logger.log_warning(&format!("could not mark cancelled: {}", e));
        }
        self.logger.log_completion("cancelled, outputs removed");
        self.outcome(FileState::Cancelled, None)
    }

    async fn finish_failed(&self, ctx: &JobContext, destinations: &[PathBuf], reason: String) -> JobOutcome {
        if !self.try_finalize() {
            return self.finish_cancelled(ctx, destinations).await;
        }
        self.cleanup(destinations).await;
        self.logger.log_error(&reason);
        if let Err(e) = ctx.board.update(&self.id, |s| s.fail(reason.clone())) {
            self.logger.log_warning(&format!("could not mark failed: {}", e));
        }
        self.outcome(FileState::Failed, Some(reason))
    }

    async fn cleanup(&self, destinations: &[PathBuf]) {
        let failed = remove_outputs(destinations).await;
        if !failed.is_empty() {
            self.logger
                .log_warning(&format!("{} output(s) could not be removed", failed.len()));
        }
        metrics::record_cleanup_failures(failed.len());
    }

    fn outcome(&self, state: FileState, error: Option<String>) -> JobOutcome {
        JobOutcome {
            id: self.id.clone(),
            state,
            spawned: self.spawned_count(),
            error,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Runs `script` through `/bin/sh -c`; `$1` is the destination.
    struct Script(&'static str);

    impl ArgumentBuilder for Script {
        fn build(&self, _input: &Path, _encoding: Encoding, _settings: &VideoSettings) -> Vec<String> {
            vec!["-c".to_string(), self.0.to_string(), "sh".to_string()]
        }
    }

    fn context(script: &'static str) -> JobContext {
        JobContext {
            board: StatusBoard::default(),
            runner: ProcessRunner::new("/bin/sh"),
            arguments: Arc::new(Script(script)),
            reservations: PathReservations::new(),
        }
    }

    fn queued(ctx: &JobContext, dir: &TempDir, settings: VideoSettings) -> Job {
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, vec![0u8; 1_000]).unwrap();
        let status = FileStatus::new(&input, true);
        ctx.board.insert(status.clone());
        Job::new(&status, settings)
    }

    fn outputs_in(dir: &TempDir) -> Vec<PathBuf> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().contains("_optimized_"))
            .collect()
    }

    #[tokio::test]
    async fn test_all_outputs_succeed() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf 0123456789 > "$1""#);
        let job = queued(&ctx, &dir, VideoSettings::default());

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Completed);
        assert_eq!(outcome.spawned, 2);
        let status = ctx.board.get(job.id()).unwrap();
        assert_eq!(status.original_size, 1_000);
        assert_eq!(status.output_size, 20);
        assert_eq!(status.savings, 980);
        assert_eq!(status.outputs.len(), 2);
        assert_eq!(outputs_in(&dir).len(), 2);
        assert!(ctx.reservations.is_empty());
        assert!(!job.cancel());
    }

    #[tokio::test]
    async fn test_one_failure_removes_every_output() {
        let dir = TempDir::new().unwrap();
        let ctx = context(
            r#"printf data > "$1"; case "$1" in *.webm) echo "encoder exploded" >&2; exit 1;; esac"#,
        );
        let job = queued(&ctx, &dir, VideoSettings::default());

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("encoder exploded"));
        assert!(outputs_in(&dir).is_empty());
        let status = ctx.board.get(job.id()).unwrap();
        assert_eq!(status.state, FileState::Failed);
        assert!(status.outputs.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_before_run_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf data > "$1""#);
        let job = queued(&ctx, &dir, VideoSettings::default());

        assert!(job.cancel());
        assert!(!job.cancel());
        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Cancelled);
        assert_eq!(outcome.spawned, 0);
        assert!(outputs_in(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_running_cleans_partial_outputs() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf partial > "$1"; exec sleep 30"#);
        let job = Arc::new(queued(&ctx, &dir, VideoSettings::default()));

        let runner = {
            let job = job.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { job.run(&ctx).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while job.live_process_count() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(job.cancel());

        let outcome = tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.state, FileState::Cancelled);
        assert_eq!(outcome.spawned, 2);
        assert!(outputs_in(&dir).is_empty());
        assert_eq!(job.live_process_count(), 0);
    }

    #[tokio::test]
    async fn test_no_encodings_fails_without_spawning() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf data > "$1""#);
        let job = queued(&ctx, &dir, VideoSettings::default().with_encodings(&[]));

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Failed);
        assert_eq!(outcome.spawned, 0);
        assert_eq!(
            ctx.board.get(job.id()).unwrap().error.as_deref(),
            Some("No output formats selected")
        );
    }

    /// Writes and lingers for MP4, panics while building the WebM arguments.
    struct PanicsOnWebm;

    impl ArgumentBuilder for PanicsOnWebm {
        fn build(&self, _input: &Path, encoding: Encoding, _settings: &VideoSettings) -> Vec<String> {
            match encoding {
                Encoding::Webm => panic!("no arguments for webm"),
                _ => vec![
                    "-c".to_string(),
                    r#"printf data > "$1"; exec sleep 30"#.to_string(),
                    "sh".to_string(),
                ],
            }
        }
    }

    #[tokio::test]
    async fn test_panic_during_fan_out_removes_outputs() {
        let dir = TempDir::new().unwrap();
        let ctx = JobContext {
            arguments: Arc::new(PanicsOnWebm),
            ..context("exit 0")
        };
        let job = queued(&ctx, &dir, VideoSettings::default());

        let outcome = tokio::time::timeout(Duration::from_secs(10), job.run(&ctx))
            .await
            .unwrap();

        assert_eq!(outcome.state, FileState::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("no arguments for webm"));
        assert_eq!(ctx.board.state_of(job.id()), Some(FileState::Failed));
        assert!(outputs_in(&dir).is_empty());
        assert!(ctx.reservations.is_empty());
        assert_eq!(job.live_process_count(), 0);
        assert!(!job.cancel());
    }

    #[tokio::test]
    async fn test_abort_queued_job_records_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf data > "$1""#);
        let job = queued(&ctx, &dir, VideoSettings::default());

        let outcome = job.abort(&ctx, "task died".to_string()).await;

        assert_eq!(outcome.state, FileState::Failed);
        assert_eq!(outcome.spawned, 0);
        let status = ctx.board.get(job.id()).unwrap();
        assert_eq!(status.error.as_deref(), Some("task died"));
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_failed_state() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"mkdir "$1"; exit 1"#);
        let job = queued(&ctx, &dir, VideoSettings::default().with_encodings(&[Encoding::Mp4]));

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Failed);
        let status = ctx.board.get(job.id()).unwrap();
        assert_eq!(status.state, FileState::Failed);
        assert!(status.error.as_deref().unwrap().contains("exited with status 1"));
        // The directory survives cleanup and is only reported.
        let leftovers = outputs_in(&dir);
        assert_eq!(leftovers.len(), 1);
        assert!(leftovers[0].is_dir());
        assert!(ctx.reservations.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_unstarted_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf data > "$1""#);
        let job = queued(&ctx, &dir, VideoSettings::default().with_encodings(&[]));
        ctx.board.transition(job.id(), FileState::Processing).unwrap();

        assert!(job.cancel());
        let outcome = job
            .finish_failed(&ctx, &[], MediaError::NoOutputsSelected.to_string())
            .await;

        assert_eq!(outcome.state, FileState::Cancelled);
        assert_eq!(outcome.error, None);
        assert_eq!(ctx.board.state_of(job.id()), Some(FileState::Cancelled));
    }

    #[tokio::test]
    async fn test_failed_job_rejects_cancel() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"exit 3"#);
        let job = queued(&ctx, &dir, VideoSettings::default());

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Failed);
        assert!(!job.cancel());
    }

    #[tokio::test]
    async fn test_missing_input_records_zero_size() {
        let dir = TempDir::new().unwrap();
        let ctx = context(r#"printf abc > "$1""#);
        let status = FileStatus::new(dir.path().join("gone.mov"), true);
        ctx.board.insert(status.clone());
        let job = Job::new(&status, VideoSettings::default().with_encodings(&[Encoding::Mp4]));

        let outcome = job.run(&ctx).await;

        assert_eq!(outcome.state, FileState::Completed);
        let status = ctx.board.get(job.id()).unwrap();
        assert_eq!(status.original_size, 0);
        assert_eq!(status.savings, -3);
        assert_eq!(status.savings_formatted(), "0%");
    }
}
