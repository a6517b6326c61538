//! Scriptable supervisor for coordinator tests and the test harness.
//!
//! Each "process" is a task that waits for either a stop request or a crash
//! trigger. The mock enforces the same single-live-process rule as the real
//! supervisor and records the highest concurrency it ever saw.

use super::{
    ExitNotification, OutputTarget, ProcessHandle, StartError, StopOutcome, StopRequest,
    Supervisor, UpstreamOutput,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    starts: AtomicUsize,
    stops: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    start_failures: Mutex<VecDeque<StartError>>,
    crash_triggers: Mutex<HashMap<Uuid, (u64, oneshot::Sender<i32>)>>,
    started_sources: Mutex<Vec<String>>,
    output: Mutex<Option<Vec<u8>>>,
}

/// Mock supervisor.
#[derive(Clone, Default)]
pub struct MockSupervisor {
    state: Arc<MockState>,
    start_delay: Duration,
    stop_delay: Duration,
}

impl MockSupervisor {
    /// A supervisor whose starts succeed immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every start by `delay` (simulates the startup probe).
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Delay every stop confirmation by `delay`.
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Give every continuous-transport process this stdout content.
    pub fn with_output(self, data: Vec<u8>) -> Self {
        *lock(&self.state.output) = Some(data);
        self
    }

    /// Fail the next start with `error`. Queued failures are used in order.
    pub fn fail_next_start(&self, error: StartError) {
        lock(&self.state.start_failures).push_back(error);
    }

    /// Make the live process of `generation` exit on its own with `exit_code`.
    ///
    /// Returns false if no such process is live.
    pub fn crash(&self, generation: u64, exit_code: i32) -> bool {
        let mut triggers = lock(&self.state.crash_triggers);
        let key = triggers
            .iter()
            .find(|(_, (gen, _))| *gen == generation)
            .map(|(id, _)| *id);
        match key.and_then(|id| triggers.remove(&id)) {
            Some((_, trigger)) => trigger.send(exit_code).is_ok(),
            None => false,
        }
    }

    pub fn start_count(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live processes observed.
    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    /// Source URLs of every successful start, in order.
    pub fn started_sources(&self) -> Vec<String> {
        lock(&self.state.started_sources).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn start(
        &self,
        source_url: &str,
        target: &OutputTarget,
        generation: u64,
    ) -> Result<ProcessHandle, StartError> {
        self.state.starts.fetch_add(1, Ordering::SeqCst);

        if self
            .state
            .live
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Count the violation so tests can assert on it
            self.state.max_live.fetch_max(2, Ordering::SeqCst);
            return Err(StartError::AlreadyRunning);
        }
        self.state.max_live.fetch_max(1, Ordering::SeqCst);

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }

        let scripted = lock(&self.state.start_failures).pop_front();
        if let Some(error) = scripted {
            self.state.live.fetch_sub(1, Ordering::SeqCst);
            return Err(error);
        }

        let output = match target {
            OutputTarget::Continuous => lock(&self.state.output)
                .clone()
                .map(|data| Box::new(std::io::Cursor::new(data)) as UpstreamOutput),
            OutputTarget::Segmented { .. } => None,
        };

        let (control_tx, control_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (crash_tx, crash_rx) = oneshot::channel();

        let handle = ProcessHandle::from_parts(
            None,
            generation,
            control_tx,
            exit_rx,
            output,
        );

        lock(&self.state.crash_triggers).insert(handle.id(), (generation, crash_tx));
        lock(&self.state.started_sources).push(source_url.to_string());

        tokio::spawn(run_mock_process(
            Arc::clone(&self.state),
            handle.id(),
            generation,
            self.stop_delay,
            control_rx,
            crash_rx,
            exit_tx,
        ));

        Ok(handle)
    }

    fn live_count(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }
}

async fn run_mock_process(
    state: Arc<MockState>,
    process_id: Uuid,
    generation: u64,
    stop_delay: Duration,
    control_rx: oneshot::Receiver<StopRequest>,
    mut crash_rx: oneshot::Receiver<i32>,
    exit_tx: oneshot::Sender<ExitNotification>,
) {
    let started_at = Instant::now();

    let (exit_code, requested, done) = tokio::select! {
        request = control_rx => {
            state.stops.fetch_add(1, Ordering::SeqCst);
            if !stop_delay.is_zero() {
                tokio::time::sleep(stop_delay).await;
            }
            (Some(0), true, request.ok().map(|r| r.done))
        }
        Ok(code) = &mut crash_rx => (Some(code), false, None),
    };

    lock(&state.crash_triggers).remove(&process_id);
    state.live.fetch_sub(1, Ordering::SeqCst);

    if let Some(done) = done {
        let _ = done.send(StopOutcome::Graceful);
    }

    let _ = exit_tx.send(ExitNotification {
        process_id,
        generation,
        exit_code,
        success: exit_code == Some(0),
        requested,
        uptime: started_at.elapsed(),
        stderr_tail: Vec::new(),
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_live_process_enforced() {
        let mock = MockSupervisor::new();
        let target = OutputTarget::Continuous;

        let first = mock.start("a", &target, 1).await.unwrap();
        assert_eq!(mock.live_count(), 1);
        assert!(matches!(
            mock.start("b", &target, 2).await,
            Err(StartError::AlreadyRunning)
        ));

        let outcome = mock.stop(first, Duration::from_secs(1)).await;
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(mock.live_count(), 0);
        assert_eq!(mock.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_crash_delivers_unrequested_exit() {
        let mock = MockSupervisor::new();
        let mut handle = mock.start("a", &OutputTarget::Continuous, 3).await.unwrap();
        let exit_rx = handle.watch().unwrap();

        assert!(mock.crash(3, 1));
        let exit = exit_rx.await.unwrap();
        assert_eq!(exit.generation, 3);
        assert_eq!(exit.exit_code, Some(1));
        assert!(!exit.success);
        assert!(!exit.requested);
        assert_eq!(mock.live_count(), 0);

        // Nothing left to crash
        assert!(!mock.crash(3, 1));
    }

    #[tokio::test]
    async fn test_scripted_start_failure() {
        let mock = MockSupervisor::new();
        mock.fail_next_start(StartError::ToolNotFound("ffmpeg".to_string()));

        assert!(matches!(
            mock.start("a", &OutputTarget::Continuous, 1).await,
            Err(StartError::ToolNotFound(_))
        ));
        assert_eq!(mock.live_count(), 0);
        assert!(mock.start("a", &OutputTarget::Continuous, 2).await.is_ok());
        assert_eq!(mock.started_sources(), vec!["a".to_string()]);
    }
}
