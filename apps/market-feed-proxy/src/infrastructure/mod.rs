//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the ports defined in the application layer,
//! plus the process-level concerns around them.

/// Configuration loaded from the environment.
pub mod config;

/// HTTP server for the gateway, health and metrics.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing and OpenTelemetry integration.
pub mod telemetry;

/// `reqwest` upstream client.
pub mod upstream;

/// `tokio-tungstenite` stream transport.
pub mod websocket;
