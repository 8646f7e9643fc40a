#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Feed Proxy - Credential-Injecting Gateway and Stream Manager
//!
//! A small service that lets a browser dashboard reach third-party market
//! data APIs without holding their keys, plus a reconnecting, throttled
//! client for one streaming feed.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and policies
//!   - `credentials`: Rule table, precedence and the first-match router
//!   - `forwarding`: Proxy request/response, error envelope, response policy
//!   - `streaming`: Stream messages, connection state, delivery throttle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream HTTP client and stream transport interfaces
//!   - `services`: Forwarding gateway, stream connection manager, backoff
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: `reqwest` client
//!   - `websocket`: `tokio-tungstenite` transport
//!   - `http`: `axum` server for `/proxy`, health and metrics
//!   - `config`, `telemetry`, `metrics`
//!
//! # Data Flow
//!
//! ```text
//! Dashboard ──GET /proxy?url=──► Gateway ──+credentials──► Upstream REST API
//!           ◄──JSON + CORS──────         ◄──────────────
//!
//! Upstream WS ──► StreamConnectionManager ──throttle──► watch::Receiver<StreamSnapshot>
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::credentials::{
    CredentialPrecedence, CredentialRouter, CredentialRule, InboundCredentials,
    MissingCredentialPolicy,
};
pub use domain::forwarding::{ErrorEnvelope, GatewayError, ProxyRequest, ProxyResponse};
pub use domain::streaming::{ConnectionState, StreamConfig, StreamMessage, StreamSnapshot};

// Services
pub use application::services::{
    ForwardingGateway, ReconnectConfig, StreamConnectionManager, StreamManagerConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, GatewaySettings, ProxyConfig, ServerSettings, StreamSettings,
};

// HTTP server
pub use infrastructure::http::{AppState, GatewayServer, ServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
