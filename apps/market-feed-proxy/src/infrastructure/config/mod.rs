//! Configuration Module
//!
//! Environment-driven settings for the gateway, the stream manager and the
//! HTTP server.

mod settings;

pub use settings::{ConfigError, GatewaySettings, ProxyConfig, ServerSettings, StreamSettings};
