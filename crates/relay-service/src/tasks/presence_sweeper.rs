//! Presence sweeper background task.
//!
//! Removes presence entries whose connections are closed and whose last
//! activity is older than the timeout, so an idle identity never outlives
//! timeout + one sweep interval even if nobody lists online users.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered.

use crate::presence::PresenceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Start the presence sweeper.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "relay.task.presence_sweeper")]
pub async fn start_presence_sweeper(
    registry: Arc<PresenceRegistry>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "relay.task.presence_sweeper",
        timeout_secs = registry.timeout().as_secs(),
        interval_secs = interval.as_secs(),
        "Starting presence sweeper task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = registry.sweep();
                if removed > 0 {
                    debug!(
                        target: "relay.task.presence_sweeper",
                        removed,
                        "Swept expired presence entries"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "relay.task.presence_sweeper",
                    "Presence sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "relay.task.presence_sweeper", "Presence sweeper task stopped");
}
