//! Upstream process supervisor.
//!
//! Owns at most one live transcoder process at a time:
//!
//! - `start` resolves the tool, purges stale output, spawns the process and
//!   runs a startup probe
//! - `stop` asks the process to exit, escalating to a kill after the grace window
//! - every process has a background watcher that reaps it and delivers exactly
//!   one [`ExitNotification`]
//!
//! The supervisor never restarts anything itself. Restart policy belongs to the
//! session coordinator.

pub mod artifacts;
pub mod command;
pub mod mock;
pub mod process;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

pub use process::{FfmpegSupervisor, TranscoderSettings};

/// Extra time allowed on top of the grace window for the kill to be reaped.
pub const KILL_MARGIN: Duration = Duration::from_secs(5);

/// Number of stderr lines kept per process.
pub const STDERR_TAIL_LINES: usize = 32;

/// Where the transcoder writes its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// HLS playlist and segments written into `dir`.
    Segmented {
        dir: PathBuf,
        segment_seconds: u32,
        list_size: u32,
    },
    /// MPEG-TS written to the process stdout.
    Continuous,
}

/// Supervisor start failures.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Transcoder '{0}' not found or not executable")]
    ToolNotFound(String),

    #[error("An upstream process is already running")]
    AlreadyRunning,

    #[error("Failed to prepare output: {0}")]
    Output(String),

    #[error("Failed to spawn transcoder: {0}")]
    Spawn(String),

    #[error("Transcoder exited during startup (exit code {exit_code:?})")]
    StartFailed {
        exit_code: Option<i32>,
        stderr_tail: Vec<String>,
    },
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited within the grace window.
    Graceful,
    /// Grace window elapsed; the process was killed and reaped.
    Killed,
    /// The process had already exited before the request arrived.
    AlreadyExited,
    /// The watcher did not confirm within grace + kill margin.
    Unconfirmed,
}

/// Delivered exactly once when a supervised process exits.
#[derive(Debug, Clone)]
pub struct ExitNotification {
    pub process_id: Uuid,
    pub generation: u64,
    pub exit_code: Option<i32>,
    pub success: bool,
    /// The exit followed a stop request.
    pub requested: bool,
    pub uptime: Duration,
    pub stderr_tail: Vec<String>,
}

/// Sent from a [`ProcessHandle`] to the process watcher.
#[derive(Debug)]
pub struct StopRequest {
    pub grace: Duration,
    pub done: oneshot::Sender<StopOutcome>,
}

/// Upstream stdout for the continuous transport.
pub type UpstreamOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Handle to one supervised process.
///
/// Dropping the handle without stopping tells the watcher to kill the process.
pub struct ProcessHandle {
    id: Uuid,
    pid: Option<u32>,
    generation: u64,
    started_at: Instant,
    control: Option<oneshot::Sender<StopRequest>>,
    exit_rx: Option<oneshot::Receiver<ExitNotification>>,
    output: Option<UpstreamOutput>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Assemble a handle from the watcher's channels.
    pub fn from_parts(
        pid: Option<u32>,
        generation: u64,
        control: oneshot::Sender<StopRequest>,
        exit_rx: oneshot::Receiver<ExitNotification>,
        output: Option<UpstreamOutput>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid,
            generation,
            started_at: Instant::now(),
            control: Some(control),
            exit_rx: Some(exit_rx),
            output,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Take the exit notification receiver. Returns `None` after the first call.
    pub fn watch(&mut self) -> Option<oneshot::Receiver<ExitNotification>> {
        self.exit_rx.take()
    }

    /// Take the process stdout (continuous transport only).
    pub fn take_output(&mut self) -> Option<UpstreamOutput> {
        self.output.take()
    }

    /// Ask the watcher to stop the process and wait for confirmation.
    ///
    /// Bounded by `grace` + [`KILL_MARGIN`].
    pub async fn terminate(mut self, grace: Duration) -> StopOutcome {
        let Some(control) = self.control.take() else {
            return StopOutcome::AlreadyExited;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if control
            .send(StopRequest {
                grace,
                done: done_tx,
            })
            .is_err()
        {
            // Watcher already gone: the process was reaped
            return StopOutcome::AlreadyExited;
        }

        match tokio::time::timeout(grace + KILL_MARGIN, done_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => StopOutcome::AlreadyExited,
            Err(_) => {
                error!(
                    target: "relay.supervisor",
                    process_id = %self.id,
                    generation = self.generation,
                    "Upstream stop was not confirmed within grace + kill margin"
                );
                StopOutcome::Unconfirmed
            }
        }
    }
}

/// Upstream process supervisor.
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Start a transcoder for `source_url` writing to `target`.
    async fn start(
        &self,
        source_url: &str,
        target: &OutputTarget,
        generation: u64,
    ) -> Result<ProcessHandle, StartError>;

    /// Stop a process. Always returns; escalation is logged, never surfaced.
    async fn stop(&self, handle: ProcessHandle, grace: Duration) -> StopOutcome {
        let process_id = handle.id();
        let generation = handle.generation();
        let outcome = handle.terminate(grace).await;
        if outcome == StopOutcome::Killed {
            warn!(
                target: "relay.supervisor",
                process_id = %process_id,
                generation,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "Upstream ignored SIGTERM, killed after grace period"
            );
            crate::observability::metrics::record_stop_escalation();
        }
        outcome
    }

    /// Number of processes currently live.
    fn live_count(&self) -> usize;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_without_watcher_reports_already_exited() {
        let (control_tx, control_rx) = oneshot::channel();
        let (_exit_tx, exit_rx) = oneshot::channel();
        drop(control_rx);

        let handle = ProcessHandle::from_parts(
            None,
            1,
            control_tx,
            exit_rx,
            None,
        );

        assert_eq!(
            handle.terminate(Duration::from_millis(10)).await,
            StopOutcome::AlreadyExited
        );
    }

    #[tokio::test]
    async fn test_terminate_forwards_grace_and_returns_outcome() {
        let (control_tx, control_rx) = oneshot::channel::<StopRequest>();
        let (_exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let req = control_rx.await.unwrap();
            assert_eq!(req.grace, Duration::from_millis(250));
            let _ = req.done.send(StopOutcome::Killed);
        });

        let handle = ProcessHandle::from_parts(
            Some(42),
            7,
            control_tx,
            exit_rx,
            None,
        );
        assert_eq!(handle.pid(), Some(42));
        assert_eq!(handle.generation(), 7);

        assert_eq!(
            handle.terminate(Duration::from_millis(250)).await,
            StopOutcome::Killed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_is_bounded_when_watcher_hangs() {
        let (control_tx, control_rx) = oneshot::channel::<StopRequest>();
        let (_exit_tx, exit_rx) = oneshot::channel();

        // Holds the request without ever answering
        let hold = tokio::spawn(async move {
            let req = control_rx.await;
            std::future::pending::<()>().await;
            drop(req);
        });

        let handle =
            ProcessHandle::from_parts(None, 1, control_tx, exit_rx, None);
        let outcome = handle.terminate(Duration::from_secs(1)).await;
        assert_eq!(outcome, StopOutcome::Unconfirmed);
        hold.abort();
    }

    #[test]
    fn test_watch_is_taken_once() {
        let (control_tx, _control_rx) = oneshot::channel();
        let (_exit_tx, exit_rx) = oneshot::channel();
        let mut handle =
            ProcessHandle::from_parts(None, 1, control_tx, exit_rx, None);

        assert!(handle.watch().is_some());
        assert!(handle.watch().is_none());
    }

    #[test]
    fn test_start_error_display() {
        let err = StartError::StartFailed {
            exit_code: Some(1),
            stderr_tail: vec!["Connection refused".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Transcoder exited during startup (exit code Some(1))"
        );
        assert_eq!(
            StartError::ToolNotFound("ffmpeg".to_string()).to_string(),
            "Transcoder 'ffmpeg' not found or not executable"
        );
    }
}
