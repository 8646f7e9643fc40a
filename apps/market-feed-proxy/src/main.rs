//! Market Feed Proxy Binary
//!
//! Starts the forwarding gateway and, when `STREAM_URL` is set, one managed
//! stream connection.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Provider keys
//! - `INDIAN_API_KEY`: Sent as `X-Api-Key` to `indianapi.in`
//! - `FINNHUB_API_KEY`: Sent as `X-Finnhub-Token` to `finnhub.io`
//! - `ALPHA_VANTAGE_API_KEY`: Sent as `apikey` query parameter to `alphavantage.co`
//!
//! ## Optional
//! - `GATEWAY_PORT`: HTTP port (default: 8080)
//! - `GATEWAY_CREDENTIAL_PRECEDENCE`: caller-first | injected-first (default: caller-first)
//! - `GATEWAY_MISSING_CREDENTIAL`: reject | send-empty (default: reject)
//! - `GATEWAY_UPSTREAM_TIMEOUT_SECS`: Outbound timeout (default: none)
//! - `GATEWAY_CREDENTIAL_RULES_FILE`: JSON file with extra credential rules
//! - `STREAM_URL`: WebSocket endpoint (default: none, stream disabled)
//! - `STREAM_ENABLED`: Enable the stream (default: true)
//! - `STREAM_THROTTLE_MS`: Minimum spacing between deliveries (default: 1000)
//! - `STREAM_RECONNECT_DELAY_INITIAL_MS`: First reconnect delay (default: 3000)
//! - `STREAM_RECONNECT_DELAY_MAX_SECS`: Reconnect delay cap (default: 30)
//! - `STREAM_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `STREAM_RECONNECT_JITTER`: Jitter factor 0..1 (default: 0)
//! - `STREAM_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-feed-proxy)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_feed_proxy::application::services::{
    ForwardingGateway, StreamConnectionManager, StreamManagerConfig,
};
use market_feed_proxy::domain::credentials::CredentialRouter;
use market_feed_proxy::domain::streaming::StreamSnapshot;
use market_feed_proxy::domain::without_query;
use market_feed_proxy::infrastructure::http::{AppState, GatewayServer};
use market_feed_proxy::infrastructure::telemetry;
use market_feed_proxy::infrastructure::upstream::ReqwestUpstreamClient;
use market_feed_proxy::infrastructure::websocket::WebSocketTransport;
use market_feed_proxy::{ProxyConfig, init_metrics};
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Err only if a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        otel_exporting = telemetry_guard.is_exporting(),
        "Starting Market Feed Proxy"
    );

    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let rules = config.load_credential_rules()?;
    let router = CredentialRouter::from_env(
        rules,
        config.gateway.precedence,
        config.gateway.missing_credential,
    );

    let client = ReqwestUpstreamClient::new(config.gateway.upstream_timeout)?;
    let gateway = ForwardingGateway::new(Arc::new(client), router);
    log_credential_rules(gateway.router());

    let stream = if config.stream.url.is_some() {
        let manager = Arc::new(
            StreamConnectionManager::start(
                Arc::new(WebSocketTransport::new()),
                StreamManagerConfig::from(&config.stream),
                config.stream.stream_config(),
            )
            .await,
        );

        let deliveries = manager.subscribe();
        let log_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            log_deliveries(deliveries, log_shutdown).await;
        });

        Some(manager)
    } else {
        tracing::info!("STREAM_URL not set, stream disabled");
        None
    };

    let state = Arc::new(AppState::new(
        gateway,
        stream.clone(),
        env!("CARGO_PKG_VERSION"),
    ));
    let server = GatewayServer::new(config.server.port, state, shutdown_token.clone());

    let server_shutdown = shutdown_token.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Gateway server error");
            server_shutdown.cancel();
        }
    });

    tracing::info!("Market feed proxy ready");

    await_shutdown(shutdown_token).await;

    if let Some(manager) = &stream {
        manager.teardown().await;
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task)
        .await
        .is_err()
    {
        tracing::warn!("Gateway server did not stop before the shutdown timeout");
    }

    tracing::info!("Market feed proxy stopped");
    Ok(())
}

/// Log each delivered stream message until shutdown.
async fn log_deliveries(mut rx: watch::Receiver<StreamSnapshot>, shutdown: CancellationToken) {
    let mut last = rx.borrow().data.clone();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let snapshot = rx.borrow_and_update().clone();
        if snapshot.data != last {
            if let Some(message) = &snapshot.data {
                tracing::debug!(
                    symbol = message.symbol.as_deref().unwrap_or("-"),
                    event = message.event_type.as_deref().unwrap_or("-"),
                    price = message.price.as_deref().unwrap_or("-"),
                    "Stream message delivered"
                );
            }
            last = snapshot.data;
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        port = config.server.port,
        upstream_timeout_secs = config.gateway.upstream_timeout.map(|t| t.as_secs()),
        stream_enabled = config.stream.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = config.stream.url.as_deref().map_or("-", without_query),
        throttle_ms = config.stream.throttle_interval.as_millis(),
        reconnect_initial_ms = config.stream.reconnect_delay_initial.as_millis(),
        "Stream settings"
    );
}

/// Log which provider keys are configured, never their values.
fn log_credential_rules(router: &CredentialRouter) {
    tracing::info!(
        precedence = router.precedence().as_str(),
        missing_credential = router.missing_policy().as_str(),
        "Credential routing"
    );
    for resolved in router.rules() {
        let rule = resolved.rule();
        if resolved.has_value() {
            tracing::info!(domain = %rule.url_contains, env_var = %rule.env_var, "Credential rule active");
        } else {
            tracing::warn!(domain = %rule.url_contains, env_var = %rule.env_var, "Credential not configured");
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT) or an internal cancel.
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
