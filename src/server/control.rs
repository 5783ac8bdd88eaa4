use super::handlers::{
    health_handler, list_streams_handler, start_stream_handler, stop_stream_handler,
};
use crate::config::ServerConfig;
use crate::error::{Result, ServerError, WorkerError};
use crate::session::SessionManager;
use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for the Axum handlers
#[derive(Clone)]
pub struct ServerState {
    pub(crate) manager: SessionManager,
}

/// Build the control router
pub fn router(manager: SessionManager) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/start-stream", post(start_stream_handler))
        .route("/stop-stream", post(stop_stream_handler))
        .route("/streams", get(list_streams_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(ServerState { manager })
}

/// HTTP control surface for starting and stopping camera sessions
pub struct ControlServer {
    pub(crate) config: ServerConfig,
    pub(crate) manager: SessionManager,
    shutdown: CancellationToken,
}

impl ControlServer {
    pub fn new(config: ServerConfig, manager: SessionManager) -> Self {
        Self {
            config,
            manager,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the server gracefully when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown token is cancelled
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.ip, self.config.port);
        info!("Starting control server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                address: addr.clone(),
                source: e,
            })?;

        info!("Control server listening on {}", addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router(self.manager.clone()))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| ServerError::ServeFailed {
                details: format!("Server error: {}", e),
            })?;

        info!("Control server stopped");
        Ok(())
    }
}

/// Control server builder
pub struct ControlServerBuilder {
    config: Option<ServerConfig>,
    manager: Option<SessionManager>,
}

impl ControlServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            manager: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn manager(mut self, manager: SessionManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn build(self) -> Result<ControlServer> {
        let config = self.config.ok_or_else(|| {
            WorkerError::component("control_server", "Server configuration is required")
        })?;

        let manager = self.manager.ok_or_else(|| {
            WorkerError::component("control_server", "Session manager is required")
        })?;

        Ok(ControlServer::new(config, manager))
    }
}

impl Default for ControlServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
