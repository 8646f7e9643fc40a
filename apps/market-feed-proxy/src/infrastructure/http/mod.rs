//! HTTP Server
//!
//! One `axum` listener serving the forwarding gateway alongside health and
//! Prometheus endpoints.
//!
//! # Endpoints
//!
//! - `GET /proxy?url=<target>` - Forward to an upstream market data API
//! - `OPTIONS /proxy` - CORS preflight
//! - `GET /health` - JSON health status, including the stream connection
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ForwardingGateway, StreamConnectionManager};

pub use handlers::{HealthResponse, HealthStatus, StreamStatus};

/// Shared state for all handlers.
pub struct AppState {
    gateway: ForwardingGateway,
    stream: Option<Arc<StreamConnectionManager>>,
    version: String,
    started_at: Instant,
}

impl AppState {
    /// Create handler state. `stream` is reported by `/health` when present.
    #[must_use]
    pub fn new(
        gateway: ForwardingGateway,
        stream: Option<Arc<StreamConnectionManager>>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            stream,
            version: version.into(),
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/proxy",
            get(handlers::proxy_handler).options(handlers::preflight_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/healthz", get(handlers::liveness_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(state)
}

/// Gateway HTTP server.
pub struct GatewayServer {
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;
        tracing::info!(addr = %local, "Gateway listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
