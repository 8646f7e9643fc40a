//! Upstream HTTP Client
//!
//! `reqwest` adapter for [`UpstreamClient`]. One GET per call, no retries.
//! Error messages never include the target URL, since its query string may
//! carry provider keys.

use std::error::Error as _;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Url};

use crate::application::ports::{
    OutboundRequest, UpstreamClient, UpstreamFetchError, UpstreamResponse,
};
use crate::infrastructure::metrics;

/// Outbound client for market data REST APIs.
#[derive(Debug, Clone)]
pub struct ReqwestUpstreamClient {
    client: Client,
}

impl ReqwestUpstreamClient {
    /// Create a client. `timeout` of `None` keeps the platform default.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Option<Duration>) -> Result<Self, UpstreamFetchError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| UpstreamFetchError::Network(describe(e)))?;
        Ok(Self { client })
    }

    fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, UpstreamFetchError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                UpstreamFetchError::InvalidRequest(format!("invalid header name {name}: {e}"))
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| {
                UpstreamFetchError::InvalidRequest(format!("invalid value for header {name}: {e}"))
            })?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn get(&self, request: OutboundRequest) -> Result<UpstreamResponse, UpstreamFetchError> {
        let url = Url::parse(&request.url)
            .map_err(|e| UpstreamFetchError::InvalidRequest(format!("invalid target URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(UpstreamFetchError::InvalidRequest(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut builder = self
            .client
            .get(url)
            .headers(Self::build_headers(&request.headers)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamFetchError::Network(describe(e)))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamFetchError::Network(describe(e)))?;
        metrics::record_upstream_duration(started.elapsed());

        Ok(UpstreamResponse { status, body })
    }
}

/// Flatten a reqwest error and its sources, without the URL.
fn describe(error: reqwest::Error) -> String {
    let error = error.without_url();
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
