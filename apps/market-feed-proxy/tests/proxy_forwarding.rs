//! Forwarding gateway HTTP tests.
//!
//! Requests go through the real router and `reqwest` client to a `wiremock`
//! upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use market_feed_proxy::application::ports::{
    OutboundRequest, UpstreamClient, UpstreamFetchError, UpstreamResponse,
};
use market_feed_proxy::application::services::USER_AGENT;
use market_feed_proxy::infrastructure::upstream::ReqwestUpstreamClient;
use market_feed_proxy::{
    AppState, CredentialPrecedence, CredentialRouter, CredentialRule, ForwardingGateway,
    MissingCredentialPolicy, router,
};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN_VAR: &str = "TEST_UPSTREAM_TOKEN";

// =============================================================================
// Helpers
// =============================================================================

fn app_with(rules: Vec<CredentialRule>, vars: &[(&str, &str)]) -> Router {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let credentials = CredentialRouter::new(
        rules,
        |key| vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()),
        CredentialPrecedence::CallerFirst,
        MissingCredentialPolicy::Reject,
    );
    let client = ReqwestUpstreamClient::new(Some(Duration::from_secs(5))).unwrap();
    let gateway = ForwardingGateway::new(Arc::new(client), credentials);
    router(Arc::new(AppState::new(gateway, None, "test")))
}

fn app() -> Router {
    app_with(vec![], &[])
}

fn proxy_uri(target: &str) -> String {
    let url = reqwest::Url::parse_with_params("http://gateway/proxy", &[("url", target)]).unwrap();
    format!("/proxy?{}", url.query().unwrap())
}

async fn get(app: Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
    get_with_headers(app, uri, &[]).await
}

async fn get_with_headers(
    app: Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = app
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .expect("request should succeed");

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("should read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body should be JSON")
    };
    (status, headers, body)
}

// =============================================================================
// Request validation
// =============================================================================

/// Upstream client that only counts calls.
#[derive(Default)]
struct CountingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl UpstreamClient for CountingClient {
    async fn get(&self, _request: OutboundRequest) -> Result<UpstreamResponse, UpstreamFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UpstreamResponse {
            status: 200,
            body: "{}".to_string(),
        })
    }
}

#[tokio::test]
async fn missing_url_is_400_without_upstream_call() {
    let client = Arc::new(CountingClient::default());
    let credentials = CredentialRouter::new(
        vec![],
        |_| None,
        CredentialPrecedence::CallerFirst,
        MissingCredentialPolicy::Reject,
    );
    let gateway = ForwardingGateway::new(Arc::clone(&client) as Arc<dyn UpstreamClient>, credentials);
    let app = router(Arc::new(AppState::new(gateway, None, "test")));

    for uri in ["/proxy", "/proxy?url=", "/proxy?target=https%3A%2F%2Ffinnhub.io%2Fapi"] {
        let (status, _, body) = get(app.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body, json!({"error": "URL parameter is required"}), "{uri}");
    }
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);

    let (status, _, _) = get(app, &proxy_uri("https://api.example.com/v1/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_url_is_400() {
    let (status, _, body) = get(app(), "/proxy?url=").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "URL parameter is required");
}

#[tokio::test]
async fn malformed_target_is_internal_error() {
    let (status, _, body) = get(app(), &proxy_uri("not a url")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal Proxy Error");
    assert!(body["details"].is_string());
}

// =============================================================================
// Response policy
// =============================================================================

#[tokio::test]
async fn ok_json_is_returned_with_cors() {
    let server = MockServer::start().await;
    let payload = json!({"c": 189.84, "h": 190.32, "l": 188.19, "symbol": "AAPL"});
    Mock::given(method("GET"))
        .and(path("/api/v1/quote"))
        .and(query_param("symbol", "AAPL"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let target = format!("{}/api/v1/quote?symbol=AAPL", server.uri());
    let (status, headers, body) = get(app(), &proxy_uri(&target)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, payload);
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(
        headers["access-control-allow-methods"],
        "GET, POST, PUT, DELETE, OPTIONS"
    );
    assert_eq!(
        headers["access-control-allow-headers"],
        "Content-Type, Authorization, X-Api-Key"
    );
}

#[tokio::test]
async fn browser_user_agent_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(|req: &wiremock::Request| {
            req.headers
                .get("user-agent")
                .is_some_and(|v| v == USER_AGENT)
        })
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let (status, _, _) = get(app(), &proxy_uri(&server.uri())).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn json_error_passes_through_without_cors() {
    let server = MockServer::start().await;
    let payload = json!({"error": "You don't have access to this resource."});
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(payload.clone()))
        .mount(&server)
        .await;

    let (status, headers, body) = get(app(), &proxy_uri(&server.uri())).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, payload);
    assert!(headers.get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn ok_non_json_is_502_with_truncated_details() {
    let server = MockServer::start().await;
    let html = format!("<html>{}</html>", "x".repeat(500));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html.clone()))
        .mount(&server)
        .await;

    let (status, _, body) = get(app(), &proxy_uri(&server.uri())).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Invalid JSON response from upstream");
    let details = body["details"].as_str().unwrap();
    assert_eq!(details.chars().count(), 200);
    assert!(html.starts_with(details));
}

#[tokio::test]
async fn error_non_json_keeps_upstream_status_and_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let (status, _, body) = get(app(), &proxy_uri(&server.uri())).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        body,
        json!({"error": "Upstream error: 503", "details": "Service Unavailable"})
    );
}

#[tokio::test]
async fn unreachable_upstream_is_network_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (status, _, body) = get(app(), &proxy_uri(&format!("http://{addr}/quote"))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Network request failed");
    assert!(body["details"].is_string());
}

// =============================================================================
// Credentials
// =============================================================================

#[tokio::test]
async fn matching_rule_injects_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-finnhub-token", "fh-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = vec![CredentialRule::header("127.0.0.1", "X-Finnhub-Token", TOKEN_VAR)];
    let app = app_with(rules, &[(TOKEN_VAR, "fh-secret")]);
    let (status, _, body) = get(app, &proxy_uri(&format!("{}/quote", server.uri()))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn matching_rule_injects_query_param() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("function", "GLOBAL_QUOTE"))
        .and(query_param("apikey", "av-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = vec![CredentialRule::query_param("127.0.0.1", "apikey", TOKEN_VAR)];
    let app = app_with(rules, &[(TOKEN_VAR, "av-secret")]);
    let target = format!("{}/query?function=GLOBAL_QUOTE", server.uri());
    let (status, _, _) = get(app, &proxy_uri(&target)).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn caller_headers_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer caller"))
        .and(header("x-api-key", "caller-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let (status, _, _) = get_with_headers(
        app(),
        &proxy_uri(&server.uri()),
        &[("Authorization", "Bearer caller"), ("X-Api-Key", "caller-key")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn caller_header_beats_rule_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-api-key", "caller-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let rules = vec![CredentialRule::header("127.0.0.1", "X-Api-Key", TOKEN_VAR)];
    let app = app_with(rules, &[(TOKEN_VAR, "server-key")]);
    let (status, _, _) = get_with_headers(
        app,
        &proxy_uri(&server.uri()),
        &[("X-Api-Key", "caller-key")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_credential_is_500_without_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let rules = vec![CredentialRule::header("127.0.0.1", "X-Api-Key", TOKEN_VAR)];
    let app = app_with(rules, &[]);
    let (status, _, body) = get(app, &proxy_uri(&server.uri())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Missing upstream credential");
    assert_eq!(body["details"], format!("{TOKEN_VAR} is not set"));
}

// =============================================================================
// Preflight and health
// =============================================================================

#[tokio::test]
async fn preflight_returns_cors_headers() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/proxy")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert_eq!(
        response.headers()["access-control-allow-headers"],
        "Content-Type, Authorization, X-Api-Key"
    );
}

#[tokio::test]
async fn health_reports_healthy_without_stream() {
    let (status, _, body) = get(app(), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "test");
    assert!(body.get("stream").is_none());
}

#[tokio::test]
async fn liveness_is_ok() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
