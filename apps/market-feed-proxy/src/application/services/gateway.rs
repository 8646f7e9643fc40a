//! Forwarding Gateway
//!
//! Stateless handler for `GET /proxy?url=...`: resolves credentials, makes
//! one outbound GET and normalizes the reply.

use std::sync::Arc;

use crate::application::ports::{OutboundRequest, UpstreamClient, UpstreamFetchError};
use crate::domain::credentials::CredentialRouter;
use crate::domain::forwarding::{GatewayError, ProxyRequest, ProxyResponse, classify_upstream};
use crate::domain::without_query;

/// Browser User-Agent sent upstream; some providers reject bare clients.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Accept header sent upstream.
pub const ACCEPT_JSON: &str = "application/json";

/// Forwards requests to upstream market data APIs.
///
/// Holds only immutable state, so one instance serves all requests
/// concurrently.
#[derive(Clone)]
pub struct ForwardingGateway {
    client: Arc<dyn UpstreamClient>,
    router: Arc<CredentialRouter>,
}

impl ForwardingGateway {
    /// Create a gateway.
    #[must_use]
    pub fn new(client: Arc<dyn UpstreamClient>, router: CredentialRouter) -> Self {
        Self {
            client,
            router: Arc::new(router),
        }
    }

    /// Credential router in use.
    #[must_use]
    pub fn router(&self) -> &CredentialRouter {
        &self.router
    }

    /// Forward one request.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] for every failure mode; callers render it
    /// as a JSON envelope.
    #[tracing::instrument(
        name = "proxy_forward",
        skip_all,
        fields(
            request_id = %uuid::Uuid::new_v4(),
            target_host = %without_query(request.target_url()),
        )
    )]
    pub async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, GatewayError> {
        let credentials = self
            .router
            .resolve(request.target_url(), request.inbound())
            .inspect_err(|e| tracing::warn!(error = %e, "Credential resolution failed"))?;

        let mut headers = vec![
            ("User-Agent".to_string(), USER_AGENT.to_string()),
            ("Accept".to_string(), ACCEPT_JSON.to_string()),
        ];
        headers.extend(credentials.headers);

        let outbound = OutboundRequest {
            url: request.target_url().to_string(),
            headers,
            query: credentials.query_param.into_iter().collect(),
        };

        tracing::info!("Proxying request");

        let upstream = self.client.get(outbound).await.map_err(|e| {
            tracing::error!(error = %e, "Upstream request failed");
            match e {
                UpstreamFetchError::Network(msg) => GatewayError::NetworkFailure(msg),
                UpstreamFetchError::InvalidRequest(msg) => GatewayError::InternalProxyError(msg),
            }
        })?;

        let status = upstream.status;
        let result = classify_upstream(status, upstream.body);

        match &result {
            Ok(response) if !response.has_cors() => {
                tracing::warn!(status, "Upstream returned structured error");
            }
            Ok(_) => tracing::debug!(status, "Upstream request succeeded"),
            Err(e) => tracing::error!(status, error = %e, "Upstream returned non-JSON body"),
        }

        result
    }
}
