//! Domain Layer - Core types and pure policies.
//!
//! Nothing in this layer performs I/O. Credential routing, the forwarding
//! response policy and the delivery throttle are all plain functions over
//! owned data.

/// Credential rules and the first-match router.
pub mod credentials;

/// Gateway request/response types and the upstream response policy.
pub mod forwarding;

/// Streaming message, connection state and throttle types.
pub mod streaming;

/// The URL without its query string or fragment, safe to log.
#[must_use]
pub fn without_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}
