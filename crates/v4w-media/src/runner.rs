//! Transcoder process runner.
//!
//! [`ProcessRunner::start`] launches one subprocess and returns a
//! [`RunningProcess`]: a cloneable [`ProcessHandle`] for forced termination
//! plus a single-use outcome receiver. The handle exists before the child
//! has produced any output, and a termination request made at any point
//! after `start` returns is observed by the monitor task.
//!
//! Every invocation reports exactly one [`ProcessOutcome`], including launch
//! failures, which are reported without spawning anything.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::command::TranscoderLocator;

/// Stderr lines kept for diagnostics.
const DEFAULT_STDERR_TAIL_LINES: usize = 20;

/// How long to wait for output pipes to close once the process has exited.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
enum Program {
    Resolved(PathBuf),
    Unavailable(String),
}

/// How a subprocess ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited with status zero
    Success,
    /// Exited with a non-zero status or could not be waited on
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    /// Never started
    LaunchFailed(String),
    /// Killed on request
    Terminated,
}

/// Terminal report for one invocation.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub destination: PathBuf,
    pub exit: ProcessExit,
    pub elapsed: Duration,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.exit, ProcessExit::Success)
    }

    /// One-line diagnostic text.
    pub fn describe(&self) -> String {
        let target = self.destination.display();
        match &self.exit {
            ProcessExit::Success => format!("{}: completed", target),
            ProcessExit::Failed { exit_code, stderr } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string());
                let last_line = stderr.lines().last().unwrap_or("").trim();
                if last_line.is_empty() {
                    format!("{}: transcoder exited with status {}", target, code)
                } else {
                    format!(
                        "{}: transcoder exited with status {}: {}",
                        target, code, last_line
                    )
                }
            }
            ProcessExit::LaunchFailed(reason) => {
                format!("{}: failed to launch transcoder: {}", target, reason)
            }
            ProcessExit::Terminated => format!("{}: terminated", target),
        }
    }
}

/// Live handle to one subprocess.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: u64,
    pid: Option<u32>,
    destination: PathBuf,
    kill_tx: Arc<watch::Sender<bool>>,
    exited: watch::Receiver<bool>,
}

impl ProcessHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// OS process id, if the process was spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Resolves once the process has exited or was never spawned.
    pub async fn wait_exited(&self) {
        let mut exited = self.exited.clone();
        loop {
            let done = *exited.borrow_and_update();
            if done || exited.changed().await.is_err() {
                return;
            }
        }
    }

    /// Request forced termination without waiting for the exit.
    ///
    /// Returns `false` when the process has already exited or a request
    /// was already made.
    pub fn terminate(&self) -> bool {
        if self.is_exited() {
            return false;
        }
        let already_requested = self.kill_tx.send_replace(true);
        !already_requested
    }
}

/// A started invocation: its handle plus the pending outcome.
#[derive(Debug)]
pub struct RunningProcess {
    handle: ProcessHandle,
    outcome: oneshot::Receiver<ProcessOutcome>,
}

impl RunningProcess {
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> ProcessOutcome {
        let destination = self.handle.destination.clone();
        self.outcome.await.unwrap_or_else(|_| ProcessOutcome {
            destination,
            exit: ProcessExit::Failed {
                exit_code: None,
                stderr: "process monitor stopped before reporting".to_string(),
            },
            elapsed: Duration::ZERO,
        })
    }
}

/// Launches transcoder subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: Program,
    stderr_tail_lines: usize,
}

impl ProcessRunner {
    /// Create a runner for the given executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Program::Resolved(program.into()),
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }

    /// Create a runner whose every start reports a launch failure.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            program: Program::Unavailable(reason.into()),
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }

    /// Create a runner from the locator's resolution.
    pub fn from_locator(locator: &TranscoderLocator) -> Self {
        match locator.resolve() {
            Ok(path) => {
                info!("Using transcoder at {}", path.display());
                Self::new(path)
            }
            Err(e) => {
                warn!("Transcoder unavailable, every output will fail: {}", e);
                Self::unavailable(e.to_string())
            }
        }
    }

    /// Keep at most `lines` lines of stderr for diagnostics.
    pub fn with_stderr_tail_lines(mut self, lines: usize) -> Self {
        self.stderr_tail_lines = lines;
        self
    }

    /// Executable path, if resolved.
    pub fn program(&self) -> Option<&Path> {
        match &self.program {
            Program::Resolved(path) => Some(path),
            Program::Unavailable(_) => None,
        }
    }

    /// Launch `program args... destination`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, args: Vec<String>, destination: impl Into<PathBuf>) -> RunningProcess {
        let destination = destination.into();
        let id = NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let started = Instant::now();

        let program = match &self.program {
            Program::Resolved(path) => path,
            Program::Unavailable(reason) => {
                return launch_failed(id, destination, kill_tx, outcome_tx, outcome_rx, reason.clone());
            }
        };

        let mut full_args = args;
        full_args.push(destination.to_string_lossy().into_owned());
        debug!("Running transcoder: {} {}", program.display(), full_args.join(" "));

        let spawned = Command::new(program)
            .args(&full_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    "Failed to launch transcoder for output {}: {}",
                    destination.display(),
                    e
                );
                return launch_failed(id, destination, kill_tx, outcome_tx, outcome_rx, e.to_string());
            }
        };

        let handle = ProcessHandle {
            id,
            pid: child.id(),
            destination: destination.clone(),
            kill_tx: Arc::new(kill_tx),
            exited: exited_rx,
        };

        debug!(
            "Transcoder started for output {} (pid {:?})",
            destination.display(),
            handle.pid
        );

        tokio::spawn(monitor(
            child,
            kill_rx,
            exited_tx,
            outcome_tx,
            destination,
            self.stderr_tail_lines,
            started,
        ));

        RunningProcess {
            handle,
            outcome: outcome_rx,
        }
    }
}

fn launch_failed(
    id: u64,
    destination: PathBuf,
    kill_tx: watch::Sender<bool>,
    outcome_tx: oneshot::Sender<ProcessOutcome>,
    outcome_rx: oneshot::Receiver<ProcessOutcome>,
    reason: String,
) -> RunningProcess {
    let _ = outcome_tx.send(ProcessOutcome {
        destination: destination.clone(),
        exit: ProcessExit::LaunchFailed(reason),
        elapsed: Duration::ZERO,
    });
    RunningProcess {
        handle: ProcessHandle {
            id,
            pid: None,
            destination,
            kill_tx: Arc::new(kill_tx),
            exited: watch::channel(true).1,
        },
        outcome: outcome_rx,
    }
}

/// Wait for the child to exit or be killed, then report once.
async fn monitor(
    mut child: Child,
    mut kill_rx: watch::Receiver<bool>,
    exited_tx: watch::Sender<bool>,
    outcome_tx: oneshot::Sender<ProcessOutcome>,
    destination: PathBuf,
    stderr_tail_lines: usize,
    started: Instant,
) {
    let stdout_task = child.stdout.take().map(|mut stdout| {
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
        })
    });
    let stderr_task = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(collect_tail(stderr, stderr_tail_lines)));

    // Resolves to false if every handle is dropped without a request.
    let kill_requested = async {
        loop {
            let requested = *kill_rx.borrow_and_update();
            if requested {
                return true;
            }
            if kill_rx.changed().await.is_err() {
                return false;
            }
        }
    };

    let natural = tokio::select! {
        status = child.wait() => Some(status),
        true = kill_requested => None,
    };

    let terminated = natural.is_none();
    let status: std::io::Result<ExitStatus> = match natural {
        Some(status) => status,
        None => {
            debug!("Terminating transcoder for output {}", destination.display());
            if let Err(e) = child.start_kill() {
                debug!("Kill request failed for {}: {}", destination.display(), e);
            }
            child.wait().await
        }
    };
    exited_tx.send_replace(true);

    let mut stderr = String::new();
    if let Some(mut task) = stderr_task {
        match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await {
            Ok(Ok(tail)) => stderr = tail,
            Ok(Err(e)) => debug!("Stderr reader failed: {}", e),
            Err(_) => task.abort(),
        }
    }
    if let Some(mut task) = stdout_task {
        if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }
    }

    let exit = if terminated {
        ProcessExit::Terminated
    } else {
        match status {
            Ok(status) if status.success() => ProcessExit::Success,
            Ok(status) => ProcessExit::Failed {
                exit_code: status.code(),
                stderr,
            },
            Err(e) => ProcessExit::Failed {
                exit_code: None,
                stderr: e.to_string(),
            },
        }
    };

    match &exit {
        ProcessExit::Success => {
            debug!("Transcoder completed successfully for output {}", destination.display())
        }
        other => debug!(
            "Transcoder did not complete for output {}: {:?}",
            destination.display(),
            other
        ),
    }

    let _ = outcome_tx.send(ProcessOutcome {
        destination,
        exit,
        elapsed: started.elapsed(),
    });
}

/// Read lines until EOF, keeping the last `max_lines`.
async fn collect_tail<R>(reader: R, max_lines: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines);

    while let Ok(Some(line)) = lines.next_line().await {
        trace!("transcoder: {}", line);
        if max_lines == 0 {
            continue;
        }
        if tail.len() == max_lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    tail.into_iter().collect::<Vec<_>>().join("\n")
}
