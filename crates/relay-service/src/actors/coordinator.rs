//! `SessionCoordinator` - singleton actor that owns the streaming session.
//!
//! Every transition (select, stop, upstream exit, restart timer) is handled
//! inside one message loop, so switches are serialized and the process handle
//! is never shared. A request that arrives while a switch is in flight waits
//! in the mailbox and supersedes it by generation.
//!
//! # Channel switch
//!
//! 1. Resolve the channel (unknown id leaves the session untouched)
//! 2. Bump the generation
//! 3. Stop the current process and wait for confirmation
//! 4. Start the new process
//!
//! # Restart policy
//!
//! An unrequested exit of the current process moves the session to `Failed`
//! and schedules one retry after the backoff. The budget is one retry per
//! selection, refilled only when the crashed process had been stable.

use super::messages::{
    CoordinatorMessage, InternalEvent, SessionError, SessionState, SessionStatus,
};
use crate::catalog::{Channel, ChannelCatalog};
use crate::config::Config;
use crate::observability::metrics;
use crate::relay::{FanoutRelay, ViewerEvent};
use crate::supervisor::{ExitNotification, OutputTarget, ProcessHandle, Supervisor};

use chrono::Utc;
use common::types::ChannelId;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Mailbox size for coordinator requests.
const COORDINATOR_CHANNEL_BUFFER: usize = 32;

/// Buffered viewer events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Automatic restarts allowed per selection.
const RETRY_BUDGET: u8 = 1;

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub output_target: OutputTarget,
    pub stop_grace: Duration,
    pub restart_backoff: Duration,
    pub restart_stable_after: Duration,
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_target: config.output_target(),
            stop_grace: config.stop_grace,
            restart_backoff: config.restart_backoff,
            restart_stable_after: config.restart_stable_after,
        }
    }
}

/// Handle to the `SessionCoordinator`.
///
/// Cheap to clone. Status reads go through a `watch` channel and never wait
/// on the mailbox.
#[derive(Clone)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    status: watch::Receiver<SessionStatus>,
    events: broadcast::Sender<ViewerEvent>,
    cancel_token: CancellationToken,
}

impl SessionCoordinatorHandle {
    /// Switch the session to `channel_id`.
    pub async fn select_channel(&self, channel_id: ChannelId) -> Result<SessionStatus, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::SelectChannel {
                channel_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop the session. Succeeds without side effects when already idle.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Stop { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop any live process and exit the actor.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| SessionError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Current session snapshot.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Subscribe to viewer events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ViewerEvent> {
        self.events.subscribe()
    }

    /// Cancel the actor. The live process is stopped before it exits.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    cancel_token: CancellationToken,
    supervisor: Arc<dyn Supervisor>,
    catalog: Arc<dyn ChannelCatalog>,
    relay: FanoutRelay,
    config: CoordinatorConfig,
    status_tx: watch::Sender<SessionStatus>,
    events: broadcast::Sender<ViewerEvent>,
    state: SessionState,
    selected: Option<ChannelId>,
    generation: u64,
    /// Live process and the channel it was started for.
    process: Option<(ProcessHandle, Channel)>,
    /// Channel to relaunch while a retry is pending.
    failed_channel: Option<Channel>,
    retry_budget: u8,
    retry_timer: Option<JoinHandle<()>>,
}

impl SessionCoordinator {
    /// Spawn the coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        supervisor: Arc<dyn Supervisor>,
        catalog: Arc<dyn ChannelCatalog>,
        relay: FanoutRelay,
        config: CoordinatorConfig,
        cancel_token: CancellationToken,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::idle());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = Self {
            receiver,
            internal_tx,
            internal_rx,
            cancel_token: cancel_token.clone(),
            supervisor,
            catalog,
            relay,
            config,
            status_tx,
            events: events.clone(),
            state: SessionState::Idle,
            selected: None,
            generation: 0,
            process: None,
            failed_channel: None,
            retry_budget: RETRY_BUDGET,
            retry_timer: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionCoordinatorHandle {
            sender,
            status: status_rx,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "relay.actor.coordinator", "SessionCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.coordinator",
                        "SessionCoordinator received cancellation signal"
                    );
                    self.shutdown_session().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if self.handle_message(message).await.is_break() {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "relay.actor.coordinator",
                                "SessionCoordinator channel closed, exiting"
                            );
                            self.shutdown_session().await;
                            break;
                        }
                    }
                }

                Some(event) = self.internal_rx.recv() => {
                    self.handle_internal(event).await;
                }
            }
        }

        info!(
            target: "relay.actor.coordinator",
            generation = self.generation,
            "SessionCoordinator stopped"
        );
    }

    /// Returns `Break` once the coordinator should exit.
    async fn handle_message(&mut self, message: CoordinatorMessage) -> ControlFlow<()> {
        match message {
            CoordinatorMessage::SelectChannel {
                channel_id,
                respond_to,
            } => {
                let started = Instant::now();
                let result = self.handle_select(channel_id).await;
                let outcome = match &result {
                    Ok(_) => "success",
                    Err(e) => e.outcome(),
                };
                metrics::record_channel_switch(outcome, started.elapsed());
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Stop { respond_to } => {
                let result = self.handle_stop().await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Shutdown { respond_to } => {
                self.shutdown_session().await;
                let _ = respond_to.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::UpstreamExited(notification) => self.handle_exit(notification),
            InternalEvent::RetryDue { generation } => self.handle_retry(generation).await,
        }
    }

    async fn handle_select(&mut self, channel_id: ChannelId) -> Result<SessionStatus, SessionError> {
        let channel = self
            .catalog
            .get_channel(channel_id)
            .await
            .map_err(|e| SessionError::Catalog(e.to_string()))?
            .ok_or(SessionError::ChannelNotFound(channel_id))?;

        self.generation += 1;
        self.cancel_retry();
        self.stop_current().await;
        self.retry_budget = RETRY_BUDGET;

        info!(
            target: "relay.actor.coordinator",
            channel_id = %channel.id,
            generation = self.generation,
            "Switching channel"
        );

        match self.launch(&channel).await {
            Ok(()) => {
                self.selected = Some(channel.id);
                self.set_state(SessionState::Live);
                self.broadcast(ViewerEvent::channel_changed(
                    channel.id,
                    &channel.name,
                    self.generation,
                ));
                Ok(self.snapshot())
            }
            Err(e) => {
                warn!(
                    target: "relay.actor.coordinator",
                    channel_id = %channel.id,
                    generation = self.generation,
                    error = %e,
                    "Channel switch failed"
                );
                self.set_state(SessionState::Failed);
                Err(e)
            }
        }
    }

    async fn handle_stop(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Idle && self.selected.is_none() && self.process.is_none() {
            debug!(target: "relay.actor.coordinator", "Stop requested while idle");
            return Ok(());
        }

        self.generation += 1;
        self.cancel_retry();
        self.stop_current().await;
        self.selected = None;
        self.failed_channel = None;
        self.set_state(SessionState::Idle);
        metrics::record_session_stop();

        info!(
            target: "relay.actor.coordinator",
            generation = self.generation,
            "Session stopped"
        );
        self.broadcast(ViewerEvent::StreamStopped {
            message: "Stream stopped".to_string(),
        });

        Ok(())
    }

    fn handle_exit(&mut self, notification: ExitNotification) {
        let is_current = self
            .process
            .as_ref()
            .is_some_and(|(handle, _)| handle.id() == notification.process_id);

        if notification.requested || !is_current || notification.generation != self.generation {
            debug!(
                target: "relay.actor.coordinator",
                process_generation = notification.generation,
                generation = self.generation,
                requested = notification.requested,
                "Discarding exit notification"
            );
            return;
        }

        let Some((_handle, channel)) = self.process.take() else {
            return;
        };
        self.relay.detach();
        metrics::record_upstream_uptime(notification.uptime);

        warn!(
            target: "relay.actor.coordinator",
            channel_id = %channel.id,
            generation = self.generation,
            exit_code = ?notification.exit_code,
            uptime_secs = notification.uptime.as_secs(),
            stderr = ?notification.stderr_tail.last(),
            "Upstream exited unexpectedly"
        );

        if notification.uptime >= self.config.restart_stable_after {
            self.retry_budget = RETRY_BUDGET;
        }

        self.set_state(SessionState::Failed);

        if self.retry_budget > 0 {
            self.retry_budget -= 1;
            self.failed_channel = Some(channel);
            self.schedule_retry();
        } else {
            self.give_up(Some(channel.id), "Stream failed and could not be restarted");
        }
    }

    async fn handle_retry(&mut self, generation: u64) {
        self.retry_timer = None;

        if generation != self.generation
            || self.state != SessionState::Failed
            || self.process.is_some()
        {
            debug!(
                target: "relay.actor.coordinator",
                retry_generation = generation,
                generation = self.generation,
                "Discarding stale retry"
            );
            return;
        }
        let Some(channel) = self.failed_channel.take() else {
            return;
        };

        info!(
            target: "relay.actor.coordinator",
            channel_id = %channel.id,
            generation,
            "Restarting upstream"
        );

        match self.launch(&channel).await {
            Ok(()) => {
                metrics::record_upstream_restart("success");
                self.set_state(SessionState::Live);
                self.broadcast(ViewerEvent::channel_changed(
                    channel.id,
                    &channel.name,
                    self.generation,
                ));
            }
            Err(e) => {
                metrics::record_upstream_restart("failed");
                warn!(
                    target: "relay.actor.coordinator",
                    channel_id = %channel.id,
                    generation,
                    error = %e,
                    "Upstream restart failed"
                );
                self.set_state(SessionState::Failed);
                self.give_up(Some(channel.id), &e.client_message());
            }
        }
    }

    /// Start a process for `channel` under the current generation.
    async fn launch(&mut self, channel: &Channel) -> Result<(), SessionError> {
        self.set_state(SessionState::Starting);

        let mut handle = self
            .supervisor
            .start(&channel.url, &self.config.output_target, self.generation)
            .await?;

        if let Some(output) = handle.take_output() {
            self.relay.attach(self.generation, output);
        }

        if let Some(exit_rx) = handle.watch() {
            let internal_tx = self.internal_tx.clone();
            tokio::spawn(async move {
                if let Ok(notification) = exit_rx.await {
                    let _ = internal_tx.send(InternalEvent::UpstreamExited(notification));
                }
            });
        }

        info!(
            target: "relay.actor.coordinator",
            channel_id = %channel.id,
            generation = self.generation,
            process_id = %handle.id(),
            pid = ?handle.pid(),
            "Upstream live"
        );

        self.process = Some((handle, channel.clone()));
        Ok(())
    }

    /// Stop the live process, if any, and wait for confirmation.
    async fn stop_current(&mut self) {
        let Some((handle, channel)) = self.process.take() else {
            return;
        };

        self.set_state(SessionState::Stopping);
        self.relay.detach();

        let uptime = handle.uptime();
        let process_generation = handle.generation();
        let outcome = self.supervisor.stop(handle, self.config.stop_grace).await;
        metrics::record_upstream_uptime(uptime);

        info!(
            target: "relay.actor.coordinator",
            channel_id = %channel.id,
            process_generation,
            outcome = ?outcome,
            "Upstream stopped"
        );
    }

    async fn shutdown_session(&mut self) {
        self.cancel_retry();
        if self.process.is_none() {
            return;
        }
        self.generation += 1;
        self.stop_current().await;
        self.selected = None;
        self.failed_channel = None;
        self.set_state(SessionState::Idle);
    }

    fn schedule_retry(&mut self) {
        let generation = self.generation;
        let backoff = self.config.restart_backoff;
        let internal_tx = self.internal_tx.clone();

        debug!(
            target: "relay.actor.coordinator",
            generation,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Scheduling upstream restart"
        );

        self.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let _ = internal_tx.send(InternalEvent::RetryDue { generation });
        }));
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.failed_channel = None;
    }

    fn give_up(&mut self, channel_id: Option<ChannelId>, message: &str) {
        error!(
            target: "relay.actor.coordinator",
            channel_id = ?channel_id,
            generation = self.generation,
            "Upstream could not be recovered"
        );
        metrics::record_stream_error();
        self.broadcast(ViewerEvent::StreamError {
            channel_id,
            message: message.to_string(),
        });
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.status_tx.send_replace(self.snapshot());
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            selected_channel_id: self.selected,
            generation: self.generation,
            updated_at: Utc::now(),
        }
    }

    fn broadcast(&self, event: ViewerEvent) {
        let kind = event.kind();
        // Err only means no viewer is connected
        let receivers = self.events.send(event).unwrap_or(0);
        debug!(target: "relay.actor.coordinator", event = kind, receivers, "Event broadcast");
    }
}
