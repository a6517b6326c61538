//! HTTP routes for the Channel Relay.
//!
//! Defines the Axum router and application state.

use crate::actors::SessionCoordinatorHandle;
use crate::catalog::ChannelCatalog;
use crate::config::{Config, Transport};
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_auth, AuthState};
use crate::observability::{health_router, HealthState};
use crate::presence::PresenceRegistry;
use crate::relay::{hls_router, FanoutRelay};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the session coordinator actor.
    pub coordinator: SessionCoordinatorHandle,

    /// Channel catalog.
    pub catalog: Arc<dyn ChannelCatalog>,

    /// Online identities.
    pub presence: Arc<PresenceRegistry>,

    /// Continuous-transport fan-out.
    pub relay: FanoutRelay,

    /// Service configuration.
    pub config: Config,

    /// Cancelled when the server starts shutting down; ends long-lived
    /// viewer sockets and streams.
    pub shutdown: CancellationToken,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - liveness and readiness probes (public)
/// - `/metrics` - Prometheus metrics (public)
/// - `/api/*`, `/toggle_favorite`, `/ws` - viewer API (authenticated)
/// - `/stream/*` - HLS output directory or `/stream/live.ts` (authenticated)
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(
    state: Arc<AppState>,
    auth_state: Arc<AuthState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let public_routes = health_router(health_state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route("/api/channels", get(handlers::list_channels))
        .route("/api/favorites", get(handlers::list_favorites))
        .route("/api/play/:channel_id", post(handlers::play_channel))
        .route("/api/stop", post(handlers::stop_stream))
        .route("/api/status", get(handlers::get_status))
        .route("/api/online_users", get(handlers::online_users))
        .route("/api/heartbeat", post(handlers::heartbeat))
        .route("/api/logout", post(handlers::logout))
        .route("/toggle_favorite", post(handlers::toggle_favorite))
        .route("/ws", get(handlers::viewer_socket));

    let api_routes = match state.config.transport {
        Transport::Hls => api_routes.nest_service("/stream", hls_router(&state.config.output_dir)),
        Transport::MpegTs => api_routes.route("/stream/live.ts", get(handlers::live_stream)),
    };

    let protected_routes = api_routes
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    // 3. http_metrics_middleware - Record ALL responses (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
