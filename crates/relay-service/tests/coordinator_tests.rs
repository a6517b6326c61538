//! Session coordinator tests.
//!
//! Drive the real `SessionCoordinator` against the mock supervisor and an
//! in-memory catalog. Restart timing runs on paused tokio time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::ChannelId;
use relay_service::actors::{
    CoordinatorConfig, SessionCoordinator, SessionCoordinatorHandle, SessionError, SessionState,
};
use relay_service::catalog::mock::MockCatalog;
use relay_service::relay::{FanoutRelay, ViewerEvent};
use relay_service::supervisor::mock::MockSupervisor;
use relay_service::supervisor::{OutputTarget, StartError, Supervisor};
use relay_test_utils::sample_channels;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

const BACKOFF: Duration = Duration::from_secs(2);
const STABLE_AFTER: Duration = Duration::from_secs(30);

fn spawn(supervisor: &MockSupervisor) -> SessionCoordinatorHandle {
    let (handle, _task) = SessionCoordinator::spawn(
        Arc::new(supervisor.clone()),
        Arc::new(MockCatalog::new(sample_channels())),
        FanoutRelay::new(16),
        CoordinatorConfig {
            output_target: OutputTarget::Continuous,
            stop_grace: Duration::from_millis(500),
            restart_backoff: BACKOFF,
            restart_stable_after: STABLE_AFTER,
        },
        CancellationToken::new(),
    );
    handle
}

async fn next_event(events: &mut broadcast::Receiver<ViewerEvent>) -> ViewerEvent {
    tokio::time::timeout(Duration::from_secs(60), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

#[tokio::test]
async fn test_interleaved_selects_never_overlap_processes() {
    let supervisor = MockSupervisor::new()
        .with_start_delay(Duration::from_millis(20))
        .with_stop_delay(Duration::from_millis(50));
    let coordinator = spawn(&supervisor);

    let (a, b, c) = tokio::join!(
        coordinator.select_channel(ChannelId(1)),
        coordinator.select_channel(ChannelId(2)),
        coordinator.select_channel(ChannelId(3)),
    );
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    assert_eq!(supervisor.max_live(), 1, "two upstream processes overlapped");
    assert_eq!(supervisor.start_count(), 3);
    assert_eq!(supervisor.stop_count(), 2);

    let status = coordinator.status();
    assert_eq!(status.state, SessionState::Live);
    assert_eq!(status.selected_channel_id, Some(ChannelId(3)));
    assert_eq!(status.generation, 3);
}

#[tokio::test]
async fn test_switch_waits_for_previous_stop() {
    let supervisor = MockSupervisor::new().with_stop_delay(Duration::from_millis(100));
    let coordinator = spawn(&supervisor);
    let mut events = coordinator.subscribe_events();

    coordinator.select_channel(ChannelId(1)).await.unwrap();
    let first = next_event(&mut events).await;
    assert!(matches!(
        first,
        ViewerEvent::ChannelChanged { channel_id: ChannelId(1), generation: 1, .. }
    ));

    let status = coordinator.select_channel(ChannelId(2)).await.unwrap();
    assert_eq!(status.generation, 2);
    assert_eq!(supervisor.stop_count(), 1);
    assert_eq!(supervisor.max_live(), 1);
    assert_eq!(
        supervisor.started_sources(),
        vec![
            "http://upstream.test/live/1.ts".to_string(),
            "http://upstream.test/live/2.ts".to_string(),
        ]
    );

    let second = next_event(&mut events).await;
    assert!(matches!(
        second,
        ViewerEvent::ChannelChanged { channel_id: ChannelId(2), generation: 2, ref channel_name, .. }
            if channel_name == "arte"
    ));
}

#[tokio::test]
async fn test_unknown_channel_leaves_session_untouched() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    let before = coordinator.select_channel(ChannelId(1)).await.unwrap();
    let mut events = coordinator.subscribe_events();

    let result = coordinator.select_channel(ChannelId(999)).await;
    assert!(matches!(result, Err(SessionError::ChannelNotFound(ChannelId(999)))));

    let after = coordinator.status();
    assert_eq!(after.state, SessionState::Live);
    assert_eq!(after.selected_channel_id, Some(ChannelId(1)));
    assert_eq!(after.generation, before.generation);
    assert_eq!(supervisor.start_count(), 1);
    assert_eq!(supervisor.stop_count(), 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_stop_while_idle_is_a_no_op() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);
    let mut events = coordinator.subscribe_events();

    coordinator.stop().await.unwrap();

    let status = coordinator.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.generation, 0);
    assert_eq!(supervisor.stop_count(), 0);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_stop_clears_selection_and_notifies_viewers() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(3)).await.unwrap();
    let mut events = coordinator.subscribe_events();
    coordinator.stop().await.unwrap();

    let status = coordinator.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.selected_channel_id, None);
    assert_eq!(status.generation, 2);
    assert_eq!(supervisor.live_count(), 0);

    assert_eq!(
        next_event(&mut events).await,
        ViewerEvent::StreamStopped {
            message: "Stream stopped".to_string()
        }
    );
}

#[tokio::test]
async fn test_failed_start_reports_without_selecting() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    supervisor.fail_next_start(StartError::ToolNotFound("ffmpeg".to_string()));
    let result = coordinator.select_channel(ChannelId(1)).await;
    assert!(matches!(result, Err(SessionError::ToolNotFound(_))));

    let status = coordinator.status();
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(status.selected_channel_id, None);
    assert!(!status.is_streaming());

    // The next selection works normally
    coordinator.select_channel(ChannelId(1)).await.unwrap();
    assert_eq!(coordinator.status().state, SessionState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_crash_is_retried_exactly_once() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(1)).await.unwrap();
    let mut events = coordinator.subscribe_events();

    assert!(supervisor.crash(1, 1));
    let restarted = next_event(&mut events).await;
    assert!(matches!(
        restarted,
        ViewerEvent::ChannelChanged { channel_id: ChannelId(1), generation: 1, .. }
    ));
    assert_eq!(supervisor.start_count(), 2);
    assert_eq!(coordinator.status().state, SessionState::Live);

    // Second crash of an unstable process spends no further retries
    assert!(supervisor.crash(1, 1));
    let gave_up = next_event(&mut events).await;
    assert!(matches!(
        gave_up,
        ViewerEvent::StreamError { channel_id: Some(ChannelId(1)), .. }
    ));

    tokio::time::sleep(BACKOFF * 10).await;
    assert_eq!(supervisor.start_count(), 2);
    assert_eq!(coordinator.status().state, SessionState::Failed);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_failed_retry_emits_one_stream_error() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(2)).await.unwrap();
    let mut events = coordinator.subscribe_events();

    supervisor.fail_next_start(StartError::StartFailed {
        exit_code: Some(1),
        stderr_tail: vec!["Connection refused".to_string()],
    });
    assert!(supervisor.crash(1, 1));

    let event = next_event(&mut events).await;
    assert!(matches!(
        event,
        ViewerEvent::StreamError { channel_id: Some(ChannelId(2)), ref message }
            if message == "Failed to start stream"
    ));

    tokio::time::sleep(BACKOFF * 10).await;
    assert_eq!(supervisor.start_count(), 2);
    assert_eq!(supervisor.live_count(), 0);
    assert_eq!(coordinator.status().state, SessionState::Failed);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_stable_process_earns_a_fresh_retry() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(1)).await.unwrap();
    let mut events = coordinator.subscribe_events();

    for expected_starts in [2, 3] {
        tokio::time::sleep(STABLE_AFTER + Duration::from_secs(1)).await;
        assert!(supervisor.crash(1, 137));
        let event = next_event(&mut events).await;
        assert!(matches!(event, ViewerEvent::ChannelChanged { .. }));
        assert_eq!(supervisor.start_count(), expected_starts);
    }
}

#[tokio::test(start_paused = true)]
async fn test_selection_cancels_pending_retry() {
    let supervisor = MockSupervisor::new();
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(1)).await.unwrap();
    assert!(supervisor.crash(1, 1));

    // Wait until the coordinator has seen the crash
    let mut status = coordinator.watch_status();
    status
        .wait_for(|s| s.state == SessionState::Failed)
        .await
        .unwrap();

    coordinator.select_channel(ChannelId(3)).await.unwrap();
    tokio::time::sleep(BACKOFF * 5).await;

    assert_eq!(
        supervisor.started_sources(),
        vec![
            "http://upstream.test/live/1.ts".to_string(),
            "http://upstream.test/live/3.ts".to_string(),
        ]
    );
    let current = coordinator.status();
    assert_eq!(current.state, SessionState::Live);
    assert_eq!(current.selected_channel_id, Some(ChannelId(3)));
}

#[tokio::test]
async fn test_exit_during_switch_is_not_restarted() {
    let supervisor = MockSupervisor::new().with_stop_delay(Duration::from_millis(100));
    let coordinator = spawn(&supervisor);

    coordinator.select_channel(ChannelId(1)).await.unwrap();

    let switching = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.select_channel(ChannelId(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    // The old process dies while its stop is still in progress
    let _ = supervisor.crash(1, 1);

    switching.await.unwrap().unwrap();
    tokio::time::sleep(BACKOFF + Duration::from_millis(500)).await;

    assert_eq!(supervisor.start_count(), 2);
    let status = coordinator.status();
    assert_eq!(status.state, SessionState::Live);
    assert_eq!(status.selected_channel_id, Some(ChannelId(2)));
    assert_eq!(status.generation, 2);
}

#[tokio::test]
async fn test_catalog_failure_is_reported() {
    let supervisor = MockSupervisor::new();
    let catalog = Arc::new(MockCatalog::new(sample_channels()));
    let (coordinator, _task) = SessionCoordinator::spawn(
        Arc::new(supervisor.clone()),
        catalog.clone(),
        FanoutRelay::new(16),
        CoordinatorConfig {
            output_target: OutputTarget::Continuous,
            stop_grace: Duration::from_millis(100),
            restart_backoff: BACKOFF,
            restart_stable_after: STABLE_AFTER,
        },
        CancellationToken::new(),
    );

    catalog.set_failing(true);
    let result = coordinator.select_channel(ChannelId(1)).await;
    assert!(matches!(result, Err(SessionError::Catalog(_))));
    assert_eq!(coordinator.status().state, SessionState::Idle);
    assert_eq!(supervisor.start_count(), 0);
    assert_eq!(catalog.lookup_count(), 1);
}
