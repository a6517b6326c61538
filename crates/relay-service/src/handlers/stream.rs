//! Continuous transport endpoint (`GET /stream/live.ts`).
//!
//! Each request subscribes to the shared fan-out and streams MPEG-TS chunks of
//! the generation that was live when it connected. The response ends when the
//! session moves on (switch, stop, failure) so the player reconnects to the
//! new stream with fresh stream headers.

use crate::actors::SessionStatus;
use crate::config::Transport;
use crate::errors::RelayError;
use crate::observability::metrics;
use crate::relay::MediaChunk;
use crate::routes::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use common::types::UserIdentity;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Handler for GET /stream/live.ts
#[instrument(skip_all, name = "relay.stream.live", fields(user = %user))]
pub async fn live_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Result<Response, RelayError> {
    if state.config.transport != Transport::MpegTs {
        return Err(RelayError::NotFound(
            "Continuous stream is not enabled".to_string(),
        ));
    }

    let status = state.coordinator.watch_status();
    let generation = {
        let current = status.borrow();
        if !current.is_streaming() {
            return Err(RelayError::Unavailable(
                "No channel is live".to_string(),
            ));
        }
        current.generation
    };

    let feed = LiveFeed {
        chunks: state.relay.subscribe(),
        status,
        generation,
        shutdown: state.shutdown.clone(),
        _guard: SubscriberGuard::new(user),
    };

    let body = Body::from_stream(futures::stream::unfold(feed, |mut feed| async move {
        feed.next_chunk()
            .await
            .map(|data| (Ok::<Bytes, std::io::Error>(data), feed))
    }));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "video/mp2t"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response())
}

/// One viewer's view of the shared stream.
struct LiveFeed {
    chunks: broadcast::Receiver<MediaChunk>,
    status: watch::Receiver<SessionStatus>,
    generation: u64,
    shutdown: CancellationToken,
    _guard: SubscriberGuard,
}

impl LiveFeed {
    /// Next chunk of this feed's generation, or `None` when the feed is over.
    async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            tokio::select! {
                result = self.chunks.recv() => {
                    match result {
                        Ok(chunk) if chunk.generation == self.generation => return Some(chunk.data),
                        // Tail of an older process still in the channel
                        Ok(chunk) if chunk.generation < self.generation => {}
                        Ok(_) => return None,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(target: "relay.stream", skipped, "Stream subscriber lagged");
                            metrics::record_lagged("stream", skipped);
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }

                changed = self.status.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                    let moved_on = {
                        let status = self.status.borrow_and_update();
                        status.generation != self.generation || !status.is_streaming()
                    };
                    if moved_on {
                        return None;
                    }
                }

                () = self.shutdown.cancelled() => return None,
            }
        }
    }
}

/// Keeps the subscriber gauge in step with open responses.
struct SubscriberGuard {
    user: UserIdentity,
}

impl SubscriberGuard {
    fn new(user: UserIdentity) -> Self {
        metrics::stream_subscriber_added();
        debug!(target: "relay.stream", user = %user, "Stream subscriber attached");
        Self { user }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        metrics::stream_subscriber_removed();
        debug!(target: "relay.stream", user = %self.user, "Stream subscriber detached");
    }
}
