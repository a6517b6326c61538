//! Channel catalog handlers.
//!
//! - `GET /api/channels` - Every channel, sorted by name, with `selected` derived
//!   from the live session
//! - `GET /api/favorites` - Favorite channels only
//! - `POST /toggle_favorite` - Flip a channel's favorite flag
//!
//! Listing reads the catalog and the session snapshot; it never waits on the
//! coordinator mailbox.

use crate::catalog::{sort_by_name, CatalogError};
use crate::errors::RelayError;
use crate::models::{
    ChannelResponse, FavoriteResponse, ToggleFavoriteRequest, ToggleFavoriteResponse,
};
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, Json};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Handler for GET /api/channels
#[instrument(skip_all, name = "relay.channels.list")]
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ChannelResponse>>, RelayError> {
    let mut channels = state.catalog.list_channels().await?;
    sort_by_name(&mut channels);

    let selected = state.coordinator.status().selected_channel_id;
    Ok(Json(
        channels
            .into_iter()
            .map(|c| ChannelResponse::from_channel(c, selected))
            .collect(),
    ))
}

/// Handler for GET /api/favorites
#[instrument(skip_all, name = "relay.channels.favorites")]
pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FavoriteResponse>>, RelayError> {
    let mut channels = state.catalog.list_channels().await?;
    sort_by_name(&mut channels);

    Ok(Json(
        channels
            .into_iter()
            .filter(|c| c.favorite)
            .map(|c| FavoriteResponse {
                id: c.id,
                name: c.name,
            })
            .collect(),
    ))
}

/// Handler for POST /toggle_favorite
///
/// Always answers 200; failures are reported with `success: false`.
#[instrument(skip_all, name = "relay.channels.toggle_favorite")]
pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Json<ToggleFavoriteResponse> {
    let request: ToggleFavoriteRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(target: "relay.handlers.channels", error = %e, "Invalid request body");
            return Json(failure("Invalid request body"));
        }
    };

    let current = match state.catalog.get_channel(request.channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return Json(failure("Channel not found")),
        Err(e) => {
            warn!(target: "relay.handlers.channels", error = %e, "Catalog lookup failed");
            return Json(failure("The channel catalog is unavailable"));
        }
    };

    match state
        .catalog
        .set_favorite(current.id, !current.favorite)
        .await
    {
        Ok(updated) => {
            info!(
                target: "relay.handlers.channels",
                channel_id = %updated.id,
                favorite = updated.favorite,
                "Favorite toggled"
            );
            Json(ToggleFavoriteResponse {
                success: true,
                new_status: Some(updated.favorite),
                message: None,
            })
        }
        Err(CatalogError::NotFound(_)) => Json(failure("Channel not found")),
        Err(e) => {
            warn!(target: "relay.handlers.channels", error = %e, "Favorite update failed");
            Json(failure("The channel catalog is unavailable"))
        }
    }
}

fn failure(message: &str) -> ToggleFavoriteResponse {
    ToggleFavoriteResponse {
        success: false,
        new_status: None,
        message: Some(message.to_string()),
    }
}
