//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement, following the
//! Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`UpstreamClient`]: one outbound HTTP GET to a market data REST API
//! - [`StreamTransport`]: opens streaming sessions to a market data feed

use async_trait::async_trait;

// =============================================================================
// Upstream HTTP
// =============================================================================

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Absolute target URL as given by the caller.
    pub url: String,
    /// Headers to send, in order.
    pub headers: Vec<(String, String)>,
    /// Query parameters appended to `url`.
    pub query: Vec<(String, String)>,
}

impl OutboundRequest {
    /// Look up a header value by name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Upstream reply with the body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body as text.
    pub body: String,
}

/// Outbound call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamFetchError {
    /// DNS, TCP, TLS, timeout or body read failure.
    #[error("{0}")]
    Network(String),
    /// The request could not be built (bad URL, bad header value).
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

/// Performs outbound GET requests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Send one GET request. No retries.
    async fn get(&self, request: OutboundRequest) -> Result<UpstreamResponse, UpstreamFetchError>;
}

// =============================================================================
// Streaming Transport
// =============================================================================

/// Events a live session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The transport failed; the session should be closed.
    Error(String),
    /// The peer closed the session or the stream ended.
    Closed,
}

/// Failures opening a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The URL was rejected before any I/O. Not retried.
    #[error("invalid stream URL: {0}")]
    InvalidUrl(String),
    /// Connecting or the handshake failed.
    #[error("connection failed: {0}")]
    Connect(String),
}

impl TransportError {
    /// Whether a reconnection attempt makes sense.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect(_))
    }
}

/// One open streaming session.
#[async_trait]
pub trait TransportSession: Send {
    /// Wait for the next event.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the session. Safe to call on an already closed session.
    async fn close(&mut self);
}

/// Opens streaming sessions.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a session to `url`. Success means the open event has fired.
    async fn open(&self, url: &str) -> Result<Box<dyn TransportSession>, TransportError>;
}
