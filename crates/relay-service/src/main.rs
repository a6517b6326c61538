//! Channel Relay
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the channel catalog
//! 4. Build the authenticator, supervisor and fan-out relay
//! 5. Spawn the session coordinator actor
//! 6. Create the presence registry and start its sweeper
//! 7. Serve HTTP until SIGINT/SIGTERM, then drain
//! 8. Shut the coordinator down (stops the live transcoder)

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use relay_service::actors::{CoordinatorConfig, SessionCoordinator};
use relay_service::auth::StaticTokenAuthenticator;
use relay_service::catalog::FileCatalog;
use relay_service::config::Config;
use relay_service::middleware::AuthState;
use relay_service::observability::{metrics::init_metrics_recorder, HealthState};
use relay_service::presence::PresenceRegistry;
use relay_service::relay::FanoutRelay;
use relay_service::routes::{self, AppState};
use relay_service::supervisor::{FfmpegSupervisor, TranscoderSettings};
use relay_service::tasks::start_presence_sweeper;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on coordinator shutdown (stop grace + kill margin fit inside).
const COORDINATOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,relay=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Channel Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        transport = config.transport.as_str(),
        transcoder = %config.transcoder,
        channels_file = %config.channels_file.display(),
        viewers = config.viewer_tokens.len(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());
    let root_token = CancellationToken::new();

    let catalog = Arc::new(FileCatalog::load(&config.channels_file).await.map_err(|e| {
        error!(error = %e, "Failed to load channel catalog");
        e
    })?);

    let authenticator = Arc::new(StaticTokenAuthenticator::new(config.viewer_tokens.clone()));
    let supervisor = Arc::new(FfmpegSupervisor::new(TranscoderSettings::from_config(
        &config,
    )));
    let relay = FanoutRelay::default();

    let (coordinator, coordinator_task) = SessionCoordinator::spawn(
        supervisor,
        catalog.clone(),
        relay.clone(),
        CoordinatorConfig::from_config(&config),
        root_token.child_token(),
    );
    health_state.attach_coordinator(coordinator.clone());
    info!("Session coordinator started");

    let presence = Arc::new(PresenceRegistry::new(config.presence_timeout));
    let sweeper_task = tokio::spawn(start_presence_sweeper(
        Arc::clone(&presence),
        config.presence_sweep,
        root_token.child_token(),
    ));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain = Duration::from_secs(config.drain_seconds);

    let auth_state = Arc::new(AuthState {
        authenticator,
        presence: Arc::clone(&presence),
    });
    let http_shutdown = root_token.child_token();
    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        catalog,
        presence: Arc::clone(&presence),
        relay,
        config,
        shutdown: http_shutdown.clone(),
    });

    let app = routes::build_routes(state, auth_state, Arc::clone(&health_state), metrics_handle);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
        e
    })?;
    info!("Channel Relay listening on {}", addr);
    health_state.mark_ready();

    let shutdown_health = Arc::clone(&health_state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;

        // Stop routing new viewers here before draining
        shutdown_health.begin_drain();
        drain_period(drain).await;

        // Close long-lived sockets and streams so serve can return
        http_shutdown.cancel();
    })
    .await?;

    info!("HTTP server stopped, shutting down session");

    match tokio::time::timeout(COORDINATOR_SHUTDOWN_TIMEOUT, coordinator.shutdown()).await {
        Ok(Ok(())) => info!("Session coordinator shut down"),
        Ok(Err(e)) => warn!(error = %e, "Session coordinator shutdown error"),
        Err(_) => warn!("Session coordinator shutdown timed out"),
    }

    root_token.cancel();
    if let Err(e) = coordinator_task.await {
        warn!(error = %e, "Session coordinator task ended abnormally");
    }
    if let Err(e) = sweeper_task.await {
        warn!(error = %e, "Presence sweeper task ended abnormally");
    }

    info!("Channel Relay shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn drain_period(drain: Duration) {
    if drain.is_zero() {
        info!("Skipping drain period (RELAY_DRAIN_SECONDS=0)");
        return;
    }
    warn!("Draining connections for {} seconds...", drain.as_secs());
    tokio::time::sleep(drain).await;
    info!("Drain period complete");
}
