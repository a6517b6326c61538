//! Playback handlers.
//!
//! - `POST /api/play/:channel_id` - Switch the shared session to a channel
//! - `POST /api/stop` - Stop the shared session
//!
//! Both always answer 200 with `{success, message}`. Internal error detail is
//! logged and replaced with [`SessionError::client_message`].
//!
//! [`SessionError::client_message`]: crate::actors::SessionError::client_message

use crate::models::ActionResponse;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use common::types::{ChannelId, UserIdentity};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Handler for POST /api/play/:channel_id
#[instrument(
    skip_all,
    name = "relay.playback.play",
    fields(channel_id = %channel_id, user = %user)
)]
pub async fn play_channel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
    Path(channel_id): Path<ChannelId>,
) -> Json<ActionResponse> {
    match state.coordinator.select_channel(channel_id).await {
        Ok(status) => {
            info!(
                target: "relay.handlers.playback",
                channel_id = %channel_id,
                generation = status.generation,
                user = %user,
                "Channel selected"
            );
            Json(ActionResponse::ok(format!("Playing channel {channel_id}")))
        }
        Err(e) => {
            warn!(
                target: "relay.handlers.playback",
                channel_id = %channel_id,
                error = %e,
                "Channel selection failed"
            );
            Json(ActionResponse::failed(e.client_message()))
        }
    }
}

/// Handler for POST /api/stop
#[instrument(skip_all, name = "relay.playback.stop", fields(user = %user))]
pub async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<UserIdentity>,
) -> Json<ActionResponse> {
    match state.coordinator.stop().await {
        Ok(()) => Json(ActionResponse::ok("Stream stopped")),
        Err(e) => {
            warn!(target: "relay.handlers.playback", error = %e, "Stop failed");
            Json(ActionResponse::failed(e.client_message()))
        }
    }
}
