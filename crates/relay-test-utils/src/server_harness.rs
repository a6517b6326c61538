//! Test server harness for end-to-end tests.
//!
//! Provides `TestRelayServer` for spawning real relay routers in tests.

use crate::fixtures::{sample_channels, test_vars};
use common::types::{ChannelId, UserIdentity};
use metrics_exporter_prometheus::PrometheusBuilder;
use relay_service::actors::{CoordinatorConfig, SessionCoordinator, SessionCoordinatorHandle};
use relay_service::auth::StaticTokenAuthenticator;
use relay_service::catalog::mock::MockCatalog;
use relay_service::config::Config;
use relay_service::middleware::AuthState;
use relay_service::observability::HealthState;
use relay_service::presence::PresenceRegistry;
use relay_service::relay::FanoutRelay;
use relay_service::routes::{self, AppState};
use relay_service::supervisor::mock::MockSupervisor;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Test harness for spawning the Channel Relay in end-to-end tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_status_requires_auth() -> Result<()> {
///     let server = TestRelayServer::spawn().await?;
///     let response = reqwest::get(format!("{}/api/status", server.url())).await?;
///     assert_eq!(response.status(), 401);
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    config: Config,
    supervisor: MockSupervisor,
    catalog: Arc<MockCatalog>,
    coordinator: SessionCoordinatorHandle,
    presence: Arc<PresenceRegistry>,
    relay: FanoutRelay,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
    _scratch: TempDir,
    handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn with the sample catalog, HLS transport and a default mock supervisor.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(MockSupervisor::new(), HashMap::new()).await
    }

    /// Spawn with a prepared supervisor and configuration overrides.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Serve the real router with the real auth middleware
    /// - Use `supervisor` instead of spawning transcoders
    pub async fn spawn_with(
        supervisor: MockSupervisor,
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let scratch = tempfile::tempdir()?;
        let output_dir = scratch.path().join("stream");
        std::fs::create_dir_all(&output_dir)?;

        let mut vars = test_vars(&scratch.path().join("channels.json"), &output_dir);
        vars.extend(overrides);
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let cancel_token = CancellationToken::new();
        let catalog = Arc::new(MockCatalog::new(sample_channels()));
        let relay = FanoutRelay::new(64);

        let (coordinator, _task) = SessionCoordinator::spawn(
            Arc::new(supervisor.clone()),
            catalog.clone(),
            relay.clone(),
            CoordinatorConfig::from_config(&config),
            cancel_token.child_token(),
        );

        let presence = Arc::new(PresenceRegistry::new(config.presence_timeout));
        let auth_state = Arc::new(AuthState {
            authenticator: Arc::new(StaticTokenAuthenticator::new(config.viewer_tokens.clone())),
            presence: Arc::clone(&presence),
        });
        let health = Arc::new(HealthState::new());
        health.attach_coordinator(coordinator.clone());
        health.mark_ready();

        let state = Arc::new(AppState {
            coordinator: coordinator.clone(),
            catalog: catalog.clone(),
            presence: Arc::clone(&presence),
            relay: relay.clone(),
            config: config.clone(),
            shutdown: cancel_token.child_token(),
        });

        // Not installed globally; each server renders its own empty registry
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, auth_state, Arc::clone(&health), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            supervisor,
            catalog,
            coordinator,
            presence,
            relay,
            health,
            cancel_token,
            _scratch: scratch,
            handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// HLS output directory served at `/stream`.
    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    pub fn supervisor(&self) -> &MockSupervisor {
        &self.supervisor
    }

    pub fn catalog(&self) -> &MockCatalog {
        &self.catalog
    }

    pub fn coordinator(&self) -> &SessionCoordinatorHandle {
        &self.coordinator
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Fan-out relay shared with `/stream/live.ts` subscribers.
    pub fn relay(&self) -> &FanoutRelay {
        &self.relay
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Whether `name` is currently considered online.
    pub fn is_online(&self, name: &str) -> bool {
        UserIdentity::new(name)
            .map(|user| self.presence.is_online(&user))
            .unwrap_or(false)
    }

    /// Select a channel directly through the coordinator.
    pub async fn select(&self, id: i64) -> anyhow::Result<()> {
        self.coordinator
            .select_channel(ChannelId(id))
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("select failed: {}", e))
    }

    /// Authenticated GET as `token`.
    pub async fn get(&self, path: &str, token: &str) -> reqwest::Result<reqwest::Response> {
        reqwest::Client::new()
            .get(format!("{}{}", self.url(), path))
            .bearer_auth(token)
            .send()
            .await
    }

    /// Authenticated POST with an optional JSON body as `token`.
    pub async fn post(
        &self,
        path: &str,
        token: &str,
        body: Option<serde_json::Value>,
    ) -> reqwest::Result<reqwest::Response> {
        let request = reqwest::Client::new()
            .post(format!("{}{}", self.url(), path))
            .bearer_auth(token);
        let request = match body {
            Some(body) => request.json(&body),
            None => request,
        };
        request.send().await
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::ALICE_TOKEN;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestRelayServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");

        Ok(())
    }

    #[tokio::test]
    async fn test_server_authenticates_with_fixture_tokens() -> Result<(), anyhow::Error> {
        let server = TestRelayServer::spawn().await?;

        let response = server.get("/api/status", ALICE_TOKEN).await?;
        assert_eq!(response.status(), 200);
        assert!(server.is_online("alice"));
        assert!(!server.is_online("bob"));

        Ok(())
    }
}
