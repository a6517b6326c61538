//! Presence handlers.
//!
//! - `GET /api/online_users` - Sorted identities currently online
//! - `POST /api/heartbeat` - Explicit keep-alive for clients without a socket
//!
//! The auth middleware already refreshes presence for every authenticated
//! request; the heartbeat handler exists so clients have a cheap endpoint to
//! call.

use crate::models::HeartbeatResponse;
use crate::routes::AppState;
use axum::{extract::State, Extension, Json};
use common::types::UserIdentity;
use std::sync::Arc;

/// Handler for GET /api/online_users
#[tracing::instrument(skip_all, name = "relay.presence.list")]
pub async fn online_users(State(state): State<Arc<AppState>>) -> Json<Vec<UserIdentity>> {
    Json(state.presence.list_online())
}

/// Handler for POST /api/heartbeat
#[tracing::instrument(skip_all, name = "relay.presence.heartbeat")]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Json<HeartbeatResponse> {
    state.presence.on_heartbeat(&user);
    Json(HeartbeatResponse { ok: true })
}

/// End the caller's idle grace period. Open viewer sockets still count.
#[tracing::instrument(skip_all, name = "relay.presence.logout")]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Json<HeartbeatResponse> {
    let tracked = state.presence.forget(&user);
    tracing::info!(target: "relay.presence", user = %user, tracked, "Viewer logged out");
    Json(HeartbeatResponse { ok: true })
}
