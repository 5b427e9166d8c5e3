//! Verification run controller
//!
//! Runs the model checker once per target, one process at a time. Each run
//! moves `Pending -> Running -> {Completed | TimedOut | Crashed}`; an external
//! interrupt ends the current run and every later one as `Cancelled`.
//!
//! [`Interrupt`] is installed once at startup so a Ctrl-C at any point only
//! sets a flag; whoever is awaiting it unwinds through the normal drop path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Backend exit code when every property holds
pub const EXIT_SUCCESS: i32 = 0;
/// Backend exit code when some property fails
pub const EXIT_VERIFICATION_FAILED: i32 = 10;

/// Failure to start or talk to an external tool
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("backend I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("build failed: {0}")]
    Build(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Crashed,
    Cancelled,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::TimedOut => "timed out",
            RunState::Crashed => "crashed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// One backend invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub descriptor: String,
    pub unwind: u32,
}

/// Everything the backend printed, drained before the process was reaped
#[derive(Debug, Clone)]
pub struct BackendOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl BackendOutput {
    /// Exit codes other than success and verification failure
    pub fn is_anomalous_exit(&self) -> bool {
        !matches!(self.exit_code, Some(EXIT_SUCCESS | EXIT_VERIFICATION_FAILED))
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(BackendOutput),
    /// Process killed at the deadline; its partial output is discarded
    TimedOut { elapsed: Duration },
    Crashed(BackendError),
    Cancelled,
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed(_) => RunState::Completed,
            RunOutcome::TimedOut { .. } => RunState::TimedOut,
            RunOutcome::Crashed(_) => RunState::Crashed,
            RunOutcome::Cancelled => RunState::Cancelled,
        }
    }
}

/// Drives the backend over one compiled artifact
#[derive(Debug, Clone)]
pub struct Controller {
    backend: PathBuf,
    artifact: String,
    workdir: PathBuf,
    timeout: Duration,
    extra_args: Vec<String>,
    echo_output: bool,
}

impl Controller {
    pub fn new(backend: impl Into<PathBuf>, artifact: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            backend: backend.into(),
            artifact: artifact.into(),
            workdir: workdir.into(),
            timeout: Duration::from_millis(crate::config::DEFAULT_TIMEOUT_MS),
            extra_args: Vec::new(),
            echo_output: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Log the raw backend output of every run
    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Arguments passed to the backend for `request`
    pub fn arguments(&self, request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            self.artifact.clone(),
            "--function".to_string(),
            request.descriptor.clone(),
            "--unwind".to_string(),
            request.unwind.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args.push("--trace".to_string());
        args.push("--json-ui".to_string());
        args
    }

    /// Runs one target to completion, timeout or crash
    pub async fn run(&self, request: &RunRequest) -> RunOutcome {
        debug!(descriptor = %request.descriptor, state = %RunState::Pending, "queued");
        let started = Instant::now();

        let child = Command::new(&self.backend)
            .args(self.arguments(request))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(source) => {
                warn!(descriptor = %request.descriptor, error = %source, "backend did not start");
                return RunOutcome::Crashed(BackendError::Spawn {
                    program: self.backend.display().to_string(),
                    source,
                });
            }
        };
        debug!(
            descriptor = %request.descriptor,
            unwind = request.unwind,
            state = %RunState::Running,
            "backend started"
        );

        // wait_with_output drains both pipes before reaping; dropping the
        // future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(descriptor = %request.descriptor, error = %e, "backend I/O failed");
                return RunOutcome::Crashed(BackendError::Io(e));
            }
            Err(_) => {
                let elapsed = started.elapsed();
                warn!(
                    descriptor = %request.descriptor,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "backend timed out"
                );
                return RunOutcome::TimedOut { elapsed };
            }
        };

        let output = BackendOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
        };
        if output.is_anomalous_exit() {
            warn!(
                descriptor = %request.descriptor,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "backend exited with an unexpected status"
            );
        }
        if self.echo_output {
            info!(descriptor = %request.descriptor, "backend output:\n{}", output.stdout);
        }
        debug!(
            descriptor = %request.descriptor,
            exit_code = ?output.exit_code,
            elapsed_ms = output.elapsed.as_millis() as u64,
            state = %RunState::Completed,
            "backend finished"
        );
        RunOutcome::Completed(output)
    }

    /// Runs every request in order until `cancel` resolves
    ///
    /// The in-flight backend is killed on cancellation and the remaining
    /// requests are reported as cancelled without being started.
    pub async fn run_all_until<F: Future>(&self, requests: &[RunRequest], cancel: F) -> Vec<RunOutcome> {
        tokio::pin!(cancel);
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut cancelled = false;

        for request in requests {
            if cancelled {
                outcomes.push(RunOutcome::Cancelled);
                continue;
            }
            let outcome = tokio::select! {
                outcome = self.run(request) => outcome,
                _ = &mut cancel => {
                    warn!(descriptor = %request.descriptor, "interrupted, stopping verification");
                    cancelled = true;
                    RunOutcome::Cancelled
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Process-wide interrupt flag
#[derive(Debug, Clone)]
pub struct Interrupt {
    flag: watch::Receiver<bool>,
}

impl Interrupt {
    /// Replaces the default Ctrl-C behaviour for the rest of the process
    pub fn install() -> Self {
        let (tx, interrupt) = Self::channel();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("interrupted, cancelling verification");
                    tx.send_replace(true);
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
            }
            // keep the sender alive so the flag stays readable
            std::future::pending::<()>().await;
        });
        interrupt
    }

    /// Flag raised through the returned sender
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, flag) = watch::channel(false);
        (tx, Self { flag })
    }

    pub fn is_set(&self) -> bool {
        *self.flag.borrow()
    }

    /// Resolves once the flag is raised; never if its sender is gone
    pub async fn triggered(&self) {
        let mut flag = self.flag.clone();
        if flag.wait_for(|set| *set).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Controller running `script` through `sh`, so the script needs no
    /// executable bit
    fn controller(dir: &Path, script: &str) -> Controller {
        let path = dir.join("backend.sh");
        std::fs::write(&path, script).unwrap();
        Controller::new("/bin/sh", path.display().to_string(), dir)
    }

    fn request(descriptor: &str) -> RunRequest {
        RunRequest {
            descriptor: descriptor.into(),
            unwind: 5,
        }
    }

    #[test]
    fn test_arguments_order() {
        let c = Controller::new("jbmc", "T.class", "/tmp").with_extra_args(vec!["--no-assertions".into()]);
        assert_eq!(
            c.arguments(&request("T.f:()V")).join(" "),
            "T.class --function T.f:()V --unwind 5 --no-assertions --trace --json-ui"
        );
    }

    #[tokio::test]
    async fn test_completed_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), "echo \"$2 $4\"\nexit 10\n");
        match c.run(&request("T.f:()V")).await {
            RunOutcome::Completed(out) => {
                assert_eq!(out.stdout.trim(), "T.f:()V 5");
                assert_eq!(out.exit_code, Some(EXIT_VERIFICATION_FAILED));
                assert!(!out.is_anomalous_exit());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_backend() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), "echo partial\nsleep 5\n").with_timeout(Duration::from_millis(200));
        let outcome = c.run(&request("T.f:()V")).await;
        assert_eq!(outcome.state(), RunState::TimedOut);
    }

    #[tokio::test]
    async fn test_missing_backend_crashes() {
        let dir = tempfile::tempdir().unwrap();
        let c = Controller::new(dir.path().join("no-such-backend"), "T.class", dir.path());
        let outcome = c.run(&request("T.f:()V")).await;
        assert!(matches!(outcome, RunOutcome::Crashed(BackendError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_cancel_skips_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), "sleep 5\n");
        let requests = [request("T.a:()V"), request("T.b:()V")];
        let cancel = tokio::time::sleep(Duration::from_millis(100));
        let outcomes = c.run_all_until(&requests, cancel).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.state() == RunState::Cancelled));
    }

    #[tokio::test]
    async fn test_interrupt_cancels_in_flight_run() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), "sleep 5\n");
        let (tx, interrupt) = Interrupt::channel();
        assert!(!interrupt.is_set());

        let requests = [request("T.a:()V")];
        let raise = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_replace(true);
            std::future::pending::<()>().await
        };
        let outcomes = tokio::select! {
            outcomes = c.run_all_until(&requests, interrupt.triggered()) => outcomes,
            _ = raise => unreachable!(),
        };
        assert_eq!(outcomes[0].state(), RunState::Cancelled);
        assert!(interrupt.is_set());
    }

    #[tokio::test]
    async fn test_dropped_sender_never_triggers() {
        let (tx, interrupt) = Interrupt::channel();
        drop(tx);
        let fired = tokio::time::timeout(Duration::from_millis(50), interrupt.triggered()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_runs_are_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let c = controller(dir.path(), "echo $2 >> order.txt\n");
        let requests = [request("first"), request("second")];
        let outcomes = c.run_all_until(&requests, std::future::pending::<()>()).await;
        assert!(outcomes.iter().all(|o| o.state() == RunState::Completed));
        let order = std::fs::read_to_string(dir.path().join("order.txt")).unwrap();
        assert_eq!(order, "first\nsecond\n");
    }
}
