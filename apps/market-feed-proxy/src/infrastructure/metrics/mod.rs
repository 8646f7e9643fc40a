//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - **Gateway**: proxied requests by outcome, upstream latency
//! - **Stream**: messages by delivery result, reconnects, connection gauge
//!
//! Exposed at `/metrics` on the gateway port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");
            register_metrics();
            handle
        })
        .clone()
}

/// Handle for rendering, `None` before [`init_metrics`].
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "market_feed_proxy_requests_total",
        "Proxied requests by outcome"
    );
    describe_histogram!(
        "market_feed_proxy_upstream_duration_seconds",
        "Time from sending the upstream request to reading its body"
    );
    describe_counter!(
        "market_feed_proxy_stream_messages_total",
        "Stream messages by delivery result"
    );
    describe_counter!(
        "market_feed_proxy_stream_reconnects_total",
        "Scheduled stream reconnection attempts"
    );
    describe_gauge!(
        "market_feed_proxy_stream_connected",
        "1 while the stream transport is open"
    );
}

/// What happened to an inbound stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMessageResult {
    /// Handed to the consumer.
    Delivered,
    /// Dropped by the throttle.
    Throttled,
    /// Not a valid event.
    Invalid,
}

impl StreamMessageResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Throttled => "throttled",
            Self::Invalid => "invalid",
        }
    }
}

/// Record a proxied request outcome (`ok`, `upstream_status`, or an error label).
pub fn record_request(outcome: &'static str) {
    counter!("market_feed_proxy_requests_total", "outcome" => outcome).increment(1);
}

/// Record upstream round-trip time.
pub fn record_upstream_duration(duration: Duration) {
    histogram!("market_feed_proxy_upstream_duration_seconds").record(duration.as_secs_f64());
}

/// Record a stream message.
pub fn record_stream_message(result: StreamMessageResult) {
    counter!(
        "market_feed_proxy_stream_messages_total",
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record a scheduled reconnection.
pub fn record_stream_reconnect() {
    counter!("market_feed_proxy_stream_reconnects_total").increment(1);
}

/// Update the connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!("market_feed_proxy_stream_connected").set(if connected { 1.0 } else { 0.0 });
}
