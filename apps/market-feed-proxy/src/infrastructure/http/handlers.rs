//! Request handlers.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::application::services::StreamConnectionManager;
use crate::domain::credentials::{API_KEY_HEADER, InboundCredentials};
use crate::domain::forwarding::{CORS_HEADERS, GatewayError, ProxyRequest, ProxyResponse};
use crate::domain::streaming::{ConnectionState, StreamMessage};
use crate::infrastructure::metrics::{self, get_metrics_handle};

// =============================================================================
// Proxy
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct ProxyParams {
    url: Option<String>,
}

pub(super) async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ProxyParams>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let url = params.ok().and_then(|Query(params)| params.url);
    let inbound = InboundCredentials::new(
        header_str(&headers, AUTHORIZATION.as_str()),
        header_str(&headers, API_KEY_HEADER),
    );

    let result = match ProxyRequest::new(url, inbound) {
        Ok(request) => AssertUnwindSafe(state.gateway.forward(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!(error = %message, "Proxy handler panicked");
                Err(GatewayError::InternalProxyError(message))
            }),
        Err(e) => {
            tracing::warn!("Proxy request without url parameter");
            Err(e)
        }
    };

    match result {
        Ok(response) => {
            metrics::record_request(if response.has_cors() {
                "ok"
            } else {
                "upstream_status"
            });
            render_response(response)
        }
        Err(e) => {
            metrics::record_request(e.outcome());
            e.into_response()
        }
    }
}

pub(super) async fn preflight_handler() -> Response {
    let mut response = StatusCode::OK.into_response();
    apply_cors(response.headers_mut());
    response
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn render_response(response: ProxyResponse) -> Response {
    let (status, body, cors) = response.into_parts();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, Json(body)).into_response();
    if cors {
        apply_cors(response.headers_mut());
    }
    response
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
        (status, Json(self.envelope())).into_response()
    }
}

fn apply_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// Health
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Stream connection, absent when no stream is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamStatus>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Gateway up and the stream, if enabled, connected.
    Healthy,
    /// Gateway up but the enabled stream is not connected.
    Degraded,
}

/// Stream connection status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Consumer enable flag.
    pub enabled: bool,
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the transport is open.
    pub connected: bool,
    /// Symbol of the last delivered message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_symbol: Option<String>,
    /// Price of the last delivered message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_price: Option<Decimal>,
    /// Event time of the last delivered message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_time: Option<i64>,
}

pub(super) async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stream = match &state.stream {
        Some(manager) => Some(stream_status(manager).await),
        None => None,
    };

    let response = HealthResponse {
        status: determine_health_status(stream.as_ref()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream,
    };
    (StatusCode::OK, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn stream_status(manager: &StreamConnectionManager) -> StreamStatus {
    let enabled = manager.config().await.active_url().is_some();
    let snapshot = manager.snapshot();
    StreamStatus {
        enabled,
        state: snapshot.connection,
        connected: snapshot.is_connected(),
        last_symbol: snapshot.data.as_ref().and_then(|m| m.symbol.clone()),
        last_price: snapshot.data.as_ref().and_then(StreamMessage::price_decimal),
        last_event_time: snapshot.data.as_ref().and_then(|m| m.event_time),
    }
}

fn determine_health_status(stream: Option<&StreamStatus>) -> HealthStatus {
    match stream {
        Some(stream) if stream.enabled && !stream.connected => HealthStatus::Degraded,
        _ => HealthStatus::Healthy,
    }
}
