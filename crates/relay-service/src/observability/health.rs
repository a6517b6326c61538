//! Liveness and readiness probes.
//!
//! - `GET /health` answers as long as the HTTP server is serving
//! - `GET /ready` answers 200 only after startup finished, while the session
//!   coordinator is running and before the drain period starts
//!
//! The readiness body names the reason when the relay is not ready, and the
//! current session state when it is.

use crate::actors::SessionCoordinatorHandle;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Readiness inputs shared between `main` and the probe handlers.
#[derive(Default)]
pub struct HealthState {
    started: AtomicBool,
    draining: AtomicBool,
    coordinator: OnceLock<SessionCoordinatorHandle>,
}

/// Why `/ready` is failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReady {
    Starting,
    Draining,
    CoordinatorStopped,
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<NotReady>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'static str>,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch this coordinator; readiness fails once it is cancelled.
    ///
    /// Only the first call has an effect.
    pub fn attach_coordinator(&self, coordinator: SessionCoordinatorHandle) {
        let _ = self.coordinator.set(coordinator);
    }

    /// Startup finished and the listener is bound.
    pub fn mark_ready(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Graceful shutdown began. Readiness never recovers after this.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// `Ok` when ready, otherwise the first failing condition.
    pub fn readiness(&self) -> Result<(), NotReady> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(NotReady::Draining);
        }
        if !self.started.load(Ordering::SeqCst) {
            return Err(NotReady::Starting);
        }
        if self
            .coordinator
            .get()
            .is_some_and(SessionCoordinatorHandle::is_cancelled)
        {
            return Err(NotReady::CoordinatorStopped);
        }
        Ok(())
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness().is_ok()
    }
}

/// Router for `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    match state.readiness() {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessBody {
                status: "ready",
                reason: None,
                session: state.coordinator.get().map(|c| c.status().state.as_str()),
            }),
        ),
        Err(reason) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessBody {
                status: "not_ready",
                reason: Some(reason),
                session: None,
            }),
        ),
    }
}
