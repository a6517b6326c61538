//! Viewer WebSocket (`GET /ws`).
//!
//! On connect the viewer receives a `status` event, then every session event
//! the coordinator broadcasts. The connection drives presence: open counts as
//! connected, close as disconnected, and `{"type":"heartbeat"}` refreshes
//! last-seen.

use crate::observability::metrics;
use crate::relay::{ClientMessage, ViewerEvent};
use crate::routes::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Extension,
};
use common::types::UserIdentity;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, instrument, warn};

/// Handler for GET /ws
#[instrument(skip_all, name = "relay.viewer.upgrade", fields(user = %user))]
pub async fn viewer_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Response {
    ws.on_upgrade(move |socket| handle_viewer(socket, state, user))
}

async fn handle_viewer(socket: WebSocket, state: Arc<AppState>, user: UserIdentity) {
    state.presence.on_connect(&user);
    metrics::viewer_connected();
    info!(target: "relay.viewer", user = %user, "Viewer connected");

    // Subscribe before the snapshot so no event falls between the two
    let mut events = state.coordinator.subscribe_events();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let snapshot = ViewerEvent::status(&state.coordinator.status());
    if send_event(&mut ws_tx, &snapshot).await {
        loop {
            tokio::select! {
                result = events.recv() => {
                    match result {
                        Ok(event) => {
                            if !send_event(&mut ws_tx, &event).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "relay.viewer", user = %user, skipped, "Viewer lagged behind events");
                            metrics::record_lagged("events", skipped);
                            let snapshot = ViewerEvent::status(&state.coordinator.status());
                            if !send_event(&mut ws_tx, &snapshot).await {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }

                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::Heartbeat) => state.presence.on_heartbeat(&user),
                                Err(e) => {
                                    debug!(target: "relay.viewer", error = %e, "Ignoring unknown viewer message");
                                }
                            }
                        }
                        // Pings are answered by the protocol layer
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    }
                }

                () = state.shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    state.presence.on_disconnect(&user);
    metrics::viewer_disconnected();
    info!(target: "relay.viewer", user = %user, "Viewer disconnected");
}

/// Serialize and send one event. Returns false once the socket is gone.
async fn send_event(ws_tx: &mut SplitSink<WebSocket, Message>, event: &ViewerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => ws_tx.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(target: "relay.viewer", error = %e, event = event.kind(), "Failed to encode event");
            true
        }
    }
}
