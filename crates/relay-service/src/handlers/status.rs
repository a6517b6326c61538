//! `GET /api/status` - session snapshot from the coordinator's watch channel.

use crate::models::StatusResponse;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Handler for GET /api/status
#[tracing::instrument(skip_all, name = "relay.status.get")]
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.coordinator.status().into())
}
