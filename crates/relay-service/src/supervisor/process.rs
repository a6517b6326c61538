//! Real transcoder processes.
//!
//! `FfmpegSupervisor` spawns the transcoder with `tokio::process`, keeps the
//! last lines of its stderr, and hands the child to a watcher task that owns
//! it until it is reaped.

use super::{
    artifacts, command, ExitNotification, OutputTarget, ProcessHandle, StartError, StopOutcome,
    StopRequest, Supervisor, UpstreamOutput, STDERR_TAIL_LINES,
};
use crate::config::Config;
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How long the watcher waits for stderr to drain after the process exits.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Transcoder invocation settings.
#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    /// Executable name or path.
    pub tool: String,
    /// `PATH`-style list searched for a bare tool name.
    pub search_path: Option<OsString>,
    /// User agent for upstream requests.
    pub user_agent: String,
    /// Early-exit detection window. Zero disables the probe.
    pub startup_probe: Duration,
}

impl TranscoderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool: config.transcoder.clone(),
            search_path: config.transcoder_search_path.clone(),
            user_agent: config.user_agent.clone(),
            startup_probe: config.startup_probe,
        }
    }
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Reservation of the single live-process slot. Released on drop.
struct LiveSlot(Arc<AtomicUsize>);

impl LiveSlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Option<Self> {
        counter
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| {
                metrics::set_upstream_live(1);
                Self(Arc::clone(counter))
            })
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        let previous = self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::set_upstream_live(previous.saturating_sub(1));
    }
}

/// Supervisor that runs the configured transcoder as a child process.
pub struct FfmpegSupervisor {
    settings: TranscoderSettings,
    live: Arc<AtomicUsize>,
}

impl FfmpegSupervisor {
    pub fn new(settings: TranscoderSettings) -> Self {
        Self {
            settings,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Supervisor for FfmpegSupervisor {
    #[instrument(skip_all, name = "relay.supervisor.start", fields(generation = generation))]
    async fn start(
        &self,
        source_url: &str,
        target: &OutputTarget,
        generation: u64,
    ) -> Result<ProcessHandle, StartError> {
        let slot = LiveSlot::acquire(&self.live).ok_or(StartError::AlreadyRunning)?;

        let program =
            command::resolve_tool(&self.settings.tool, self.settings.search_path.as_deref())?;

        if let OutputTarget::Segmented { dir, .. } = target {
            artifacts::purge(dir)
                .await
                .map_err(|e| StartError::Output(format!("{}: {e}", dir.display())))?;
        }

        let args = command::build_args(&self.settings.user_agent, source_url, target);
        let stdout = match target {
            OutputTarget::Continuous => Stdio::piped(),
            OutputTarget::Segmented { .. } => Stdio::null(),
        };

        let started_at = Instant::now();
        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StartError::ToolNotFound(self.settings.tool.clone())
                } else {
                    StartError::Spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_reader(stderr, Arc::clone(&tail), generation));

        if !self.settings.startup_probe.is_zero() {
            match tokio::time::timeout(self.settings.startup_probe, child.wait()).await {
                Ok(Ok(status)) => {
                    drain_stderr(stderr_task).await;
                    let stderr_tail = snapshot(&tail);
                    warn!(
                        target: "relay.supervisor",
                        generation,
                        exit_code = ?status.code(),
                        stderr = %stderr_tail.join(" | "),
                        "Transcoder exited during startup probe"
                    );
                    return Err(StartError::StartFailed {
                        exit_code: status.code(),
                        stderr_tail,
                    });
                }
                Ok(Err(e)) => return Err(StartError::Spawn(e.to_string())),
                Err(_) => {}
            }
        }

        let output = child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as UpstreamOutput);

        let (control_tx, control_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let handle = ProcessHandle::from_parts(
            pid,
            generation,
            control_tx,
            exit_rx,
            output,
        );

        info!(
            target: "relay.supervisor",
            process_id = %handle.id(),
            pid = ?pid,
            generation,
            program = %program.display(),
            "Transcoder started"
        );

        tokio::spawn(watch_process(ProcessWatch {
            child,
            control_rx,
            exit_tx,
            process_id: handle.id(),
            generation,
            started_at,
            tail,
            stderr_task,
            slot,
        }));

        Ok(handle)
    }

    fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

fn spawn_stderr_reader(stderr: ChildStderr, tail: StderrTail, generation: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "relay.supervisor.stderr", generation, line = %line);
            let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

async fn drain_stderr(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
    }
}

fn snapshot(tail: &StderrTail) -> Vec<String> {
    tail.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .cloned()
        .collect()
}

/// Everything the watcher owns for one process.
struct ProcessWatch {
    child: Child,
    control_rx: oneshot::Receiver<StopRequest>,
    exit_tx: oneshot::Sender<ExitNotification>,
    process_id: Uuid,
    generation: u64,
    started_at: Instant,
    tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
    slot: LiveSlot,
}

enum WatchEvent {
    Exited(std::io::Result<ExitStatus>),
    /// `None` when the handle was dropped without a stop request.
    StopRequested(Option<StopRequest>),
}

async fn watch_process(mut watch: ProcessWatch) {
    let event = tokio::select! {
        status = watch.child.wait() => WatchEvent::Exited(status),
        request = &mut watch.control_rx => WatchEvent::StopRequested(request.ok()),
    };

    let (status, requested, done) = match event {
        WatchEvent::Exited(status) => (status, false, None),
        WatchEvent::StopRequested(Some(StopRequest { grace, done })) => {
            let (status, outcome) = terminate(&mut watch.child, grace).await;
            (status, true, Some((done, outcome)))
        }
        WatchEvent::StopRequested(None) => {
            let (status, _) = terminate(&mut watch.child, Duration::ZERO).await;
            (status, true, None)
        }
    };

    drain_stderr(watch.stderr_task.take()).await;

    // Release before confirming so the next start sees a free slot
    drop(watch.slot);

    if let Some((done, outcome)) = done {
        let _ = done.send(outcome);
    }

    let (exit_code, success) = match &status {
        Ok(status) => (status.code(), status.success()),
        Err(e) => {
            warn!(target: "relay.supervisor", error = %e, "Failed to reap transcoder");
            (None, false)
        }
    };

    let notification = ExitNotification {
        process_id: watch.process_id,
        generation: watch.generation,
        exit_code,
        success,
        requested,
        uptime: watch.started_at.elapsed(),
        stderr_tail: snapshot(&watch.tail),
    };

    if requested {
        info!(
            target: "relay.supervisor",
            process_id = %notification.process_id,
            generation = notification.generation,
            exit_code = ?exit_code,
            "Transcoder stopped"
        );
    } else {
        warn!(
            target: "relay.supervisor",
            process_id = %notification.process_id,
            generation = notification.generation,
            exit_code = ?exit_code,
            uptime_secs = notification.uptime.as_secs(),
            stderr = %notification.stderr_tail.join(" | "),
            "Transcoder exited unexpectedly"
        );
    }
    metrics::record_upstream_exit(requested, success);

    let _ = watch.exit_tx.send(notification);
}

/// SIGTERM, wait up to `grace`, then SIGKILL and reap.
async fn terminate(
    child: &mut Child,
    grace: Duration,
) -> (std::io::Result<ExitStatus>, StopOutcome) {
    if let Ok(Some(status)) = child.try_wait() {
        return (Ok(status), StopOutcome::AlreadyExited);
    }

    send_sigterm(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => (status, StopOutcome::Graceful),
        Err(_) => {
            let _ = child.start_kill();
            (child.wait().await, StopOutcome::Killed)
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // The child is not reaped yet, so its pid cannot have been recycled
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(target: "relay.supervisor", pid, error = %e, "SIGTERM delivery failed");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}
