//! Forwarding Types
//!
//! Request, response and error types for the forwarding gateway, plus the
//! ordered policy that turns an upstream reply into a gateway response.

use serde::Serialize;
use serde_json::Value;

use super::credentials::{CredentialError, InboundCredentials};

/// Maximum characters of a non-JSON upstream body echoed back on a 502.
pub const INVALID_PAYLOAD_SNIPPET_CHARS: usize = 200;

/// Headers attached to successful responses and preflight replies.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Methods",
        "GET, POST, PUT, DELETE, OPTIONS",
    ),
    (
        "Access-Control-Allow-Headers",
        "Content-Type, Authorization, X-Api-Key",
    ),
];

// =============================================================================
// Request
// =============================================================================

/// A validated inbound proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    target_url: String,
    inbound: InboundCredentials,
}

impl ProxyRequest {
    /// Build a request from the raw `url` query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::MissingParameter`] if `url` is absent or empty.
    pub fn new(url: Option<String>, inbound: InboundCredentials) -> Result<Self, GatewayError> {
        match url {
            Some(target_url) if !target_url.is_empty() => Ok(Self {
                target_url,
                inbound,
            }),
            _ => Err(GatewayError::MissingParameter),
        }
    }

    /// Upstream URL to forward to.
    #[must_use]
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Credentials the caller supplied.
    #[must_use]
    pub const fn inbound(&self) -> &InboundCredentials {
        &self.inbound
    }
}

// =============================================================================
// Response
// =============================================================================

/// A gateway response, built once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    status: u16,
    body: Value,
    cors: bool,
}

impl ProxyResponse {
    /// Successful upstream JSON, always answered as 200 with CORS headers.
    #[must_use]
    pub const fn success(body: Value) -> Self {
        Self {
            status: 200,
            body,
            cors: true,
        }
    }

    /// Structured upstream error, passed through without CORS headers.
    #[must_use]
    pub const fn passthrough(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            cors: false,
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// JSON body.
    #[must_use]
    pub const fn body(&self) -> &Value {
        &self.body
    }

    /// Whether the fixed CORS header set is attached.
    #[must_use]
    pub const fn has_cors(&self) -> bool {
        self.cors
    }

    /// Split into parts.
    #[must_use]
    pub fn into_parts(self) -> (u16, Value, bool) {
        (self.status, self.body, self.cors)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// JSON error envelope returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    /// Short error description.
    pub error: String,
    /// Extra detail, e.g. the underlying error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Gateway failures. Every variant is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The `url` query parameter is missing.
    #[error("URL parameter is required")]
    MissingParameter,

    /// The matched credential rule has no value configured.
    #[error("missing upstream credential: {env_var}")]
    MissingCredential {
        /// Variable that should hold the credential.
        env_var: String,
    },

    /// DNS, TCP, TLS or timeout failure on the outbound call.
    #[error("network request failed: {0}")]
    NetworkFailure(String),

    /// Upstream replied non-OK with a body that is not JSON.
    #[error("upstream error: {status}")]
    UpstreamError {
        /// Upstream status code.
        status: u16,
        /// Raw upstream body.
        body: String,
    },

    /// Upstream replied OK with a body that is not JSON.
    #[error("invalid JSON response from upstream")]
    InvalidUpstreamPayload {
        /// Leading characters of the body.
        snippet: String,
    },

    /// Anything else, e.g. a malformed target URL.
    #[error("internal proxy error: {0}")]
    InternalProxyError(String),
}

impl GatewayError {
    /// HTTP status returned for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::MissingParameter => 400,
            Self::MissingCredential { .. }
            | Self::NetworkFailure(_)
            | Self::InternalProxyError(_) => 500,
            Self::UpstreamError { status, .. } => *status,
            Self::InvalidUpstreamPayload { .. } => 502,
        }
    }

    /// Metric label for this error.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::MissingParameter => "missing_parameter",
            Self::MissingCredential { .. } => "missing_credential",
            Self::NetworkFailure(_) => "network_failure",
            Self::UpstreamError { .. } => "upstream_error",
            Self::InvalidUpstreamPayload { .. } => "invalid_upstream_payload",
            Self::InternalProxyError(_) => "internal_error",
        }
    }

    /// Envelope sent to the caller.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        let (error, details) = match self {
            Self::MissingParameter => ("URL parameter is required".to_string(), None),
            Self::MissingCredential { env_var } => (
                "Missing upstream credential".to_string(),
                Some(format!("{env_var} is not set")),
            ),
            Self::NetworkFailure(msg) => ("Network request failed".to_string(), Some(msg.clone())),
            Self::UpstreamError { status, body } => {
                (format!("Upstream error: {status}"), Some(body.clone()))
            }
            Self::InvalidUpstreamPayload { snippet } => (
                "Invalid JSON response from upstream".to_string(),
                Some(snippet.clone()),
            ),
            Self::InternalProxyError(msg) => ("Internal Proxy Error".to_string(), Some(msg.clone())),
        };
        ErrorEnvelope { error, details }
    }
}

impl From<CredentialError> for GatewayError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Missing { env_var } => Self::MissingCredential { env_var },
        }
    }
}

// =============================================================================
// Response Policy
// =============================================================================

/// Whether a status counts as OK (2xx).
#[must_use]
pub const fn is_ok_status(status: u16) -> bool {
    status >= 200 && status < 300
}

/// Apply the ordered response policy to a fully-read upstream reply.
///
/// # Errors
///
/// Returns [`GatewayError::UpstreamError`] or
/// [`GatewayError::InvalidUpstreamPayload`] when the body is not JSON.
pub fn classify_upstream(status: u16, body: String) -> Result<ProxyResponse, GatewayError> {
    match serde_json::from_str::<Value>(&body) {
        Err(_) if !is_ok_status(status) => Err(GatewayError::UpstreamError { status, body }),
        Err(_) => Err(GatewayError::InvalidUpstreamPayload {
            snippet: body.chars().take(INVALID_PAYLOAD_SNIPPET_CHARS).collect(),
        }),
        Ok(json) if !is_ok_status(status) => Ok(ProxyResponse::passthrough(status, json)),
        Ok(json) => Ok(ProxyResponse::success(json)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn request_requires_url() {
        assert_eq!(
            ProxyRequest::new(None, InboundCredentials::none()).unwrap_err(),
            GatewayError::MissingParameter
        );
        assert_eq!(
            ProxyRequest::new(Some(String::new()), InboundCredentials::none()).unwrap_err(),
            GatewayError::MissingParameter
        );
        let req =
            ProxyRequest::new(Some("https://x.io".into()), InboundCredentials::none()).unwrap();
        assert_eq!(req.target_url(), "https://x.io");
    }

    #[test]
    fn ok_json_is_success_with_cors() {
        let resp = classify_upstream(200, r#"{"c":187.2}"#.to_string()).unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), &json!({"c": 187.2}));
        assert!(resp.has_cors());
    }

    #[test]
    fn other_2xx_json_is_answered_as_200() {
        let resp = classify_upstream(201, r#"{"id":7}"#.to_string()).unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.body(), &json!({"id": 7}));
        assert!(resp.has_cors());
    }

    #[test]
    fn non_ok_json_passes_through() {
        let resp = classify_upstream(429, r#"{"error":"API limit reached"}"#.to_string()).unwrap();
        assert_eq!(resp.status(), 429);
        assert_eq!(resp.body(), &json!({"error": "API limit reached"}));
        assert!(!resp.has_cors());
    }

    #[test]
    fn non_ok_text_is_upstream_error_with_full_body() {
        let body = "x".repeat(500);
        let err = classify_upstream(503, body.clone()).unwrap_err();
        assert_eq!(err, GatewayError::UpstreamError { status: 503, body });
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn ok_text_is_invalid_payload_truncated() {
        let body = "<html>".repeat(100);
        let err = classify_upstream(200, body).unwrap_err();
        assert_eq!(err.status_code(), 502);
        let envelope = err.envelope();
        assert_eq!(envelope.error, "Invalid JSON response from upstream");
        assert_eq!(envelope.details.unwrap().chars().count(), 200);
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let body = "é".repeat(300);
        let GatewayError::InvalidUpstreamPayload { snippet } =
            classify_upstream(200, body).unwrap_err()
        else {
            panic!("expected invalid payload");
        };
        assert_eq!(snippet.chars().count(), 200);
    }

    #[test]
    fn empty_ok_body_is_invalid_payload() {
        let err = classify_upstream(204, String::new()).unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[test_case(GatewayError::MissingParameter, 400, "URL parameter is required" ; "missing parameter")]
    #[test_case(GatewayError::NetworkFailure("dns".into()), 500, "Network request failed" ; "network failure")]
    #[test_case(GatewayError::InvalidUpstreamPayload { snippet: "<".into() }, 502, "Invalid JSON response from upstream" ; "invalid payload")]
    #[test_case(GatewayError::InternalProxyError("bad url".into()), 500, "Internal Proxy Error" ; "internal error")]
    #[test_case(GatewayError::MissingCredential { env_var: "FINNHUB_API_KEY".into() }, 500, "Missing upstream credential" ; "missing credential")]
    #[test_case(GatewayError::UpstreamError { status: 404, body: "nope".into() }, 404, "Upstream error: 404" ; "upstream error")]
    fn error_status_and_envelope(err: GatewayError, status: u16, message: &str) {
        assert_eq!(err.status_code(), status);
        assert_eq!(err.envelope().error, message);
    }

    #[test]
    fn missing_parameter_envelope_has_no_details() {
        let json = serde_json::to_value(GatewayError::MissingParameter.envelope()).unwrap();
        assert_eq!(json, json!({"error": "URL parameter is required"}));
    }

    #[test]
    fn network_failure_envelope_carries_details() {
        let json =
            serde_json::to_value(GatewayError::NetworkFailure("connection refused".into()).envelope())
                .unwrap();
        assert_eq!(
            json,
            json!({"error": "Network request failed", "details": "connection refused"})
        );
    }

    #[test]
    fn cors_header_set_is_fixed() {
        assert_eq!(CORS_HEADERS[0], ("Access-Control-Allow-Origin", "*"));
        assert!(CORS_HEADERS[1].1.contains("OPTIONS"));
        assert!(CORS_HEADERS[2].1.contains("X-Api-Key"));
    }
}
