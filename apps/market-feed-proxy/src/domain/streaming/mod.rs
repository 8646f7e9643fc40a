//! Market Data Streaming Types
//!
//! Core types for the streaming side: the pushed message, the connection
//! state exposed to consumers, and the delivery throttle.

use std::str::FromStr;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Messages
// =============================================================================

/// A market data event pushed by the streaming feed.
///
/// Field names follow the exchange wire format (`e`, `E`, `s`, `p`, `q`).
/// Every known field is optional so acks and ticker frames still decode.
/// Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Event type, e.g. `trade` or `aggTrade`.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Event time in milliseconds since the epoch.
    #[serde(rename = "E", default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<i64>,
    /// Instrument symbol.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Price as sent by the feed.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    /// Quantity as sent by the feed.
    #[serde(rename = "q", default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stream message decode errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamMessageError {
    /// Payload is not a JSON object or a known field has the wrong type.
    #[error("invalid stream message: {0}")]
    Json(#[from] serde_json::Error),
}

impl StreamMessage {
    /// Decode a text frame.
    ///
    /// Combined-stream envelopes (`{"stream": ..., "data": {...}}`) are
    /// unwrapped first.
    ///
    /// # Errors
    ///
    /// Returns [`StreamMessageError`] if the frame is not a valid event.
    pub fn parse(text: &str) -> Result<Self, StreamMessageError> {
        let value: Value = serde_json::from_str(text)?;
        let payload = match value {
            Value::Object(mut map) if map.contains_key("stream") => {
                map.remove("data").unwrap_or(Value::Object(map))
            }
            other => other,
        };
        Ok(serde_json::from_value(payload)?)
    }

    /// Price with decimal precision, if present and well formed.
    #[must_use]
    pub fn price_decimal(&self) -> Option<Decimal> {
        self.price.as_deref().and_then(|p| Decimal::from_str(p).ok())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No live transport.
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport is open.
    Connected,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// What a consumer sees: the last delivered message and the connection state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSnapshot {
    /// Last delivered message, `None` before the first delivery.
    pub data: Option<StreamMessage>,
    /// Current connection state.
    pub connection: ConnectionState,
}

impl StreamSnapshot {
    /// Whether the transport is open. `false` means stale data, retrying.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

/// Consumer-owned inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Feed URL; `None` disables the connection.
    pub url: Option<String>,
    /// Gate; `false` disables the connection.
    pub enabled: bool,
}

impl StreamConfig {
    /// Enabled configuration for a URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            enabled: true,
        }
    }

    /// Configuration that never connects.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            url: None,
            enabled: false,
        }
    }

    /// Same URL, different gate.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// URL to connect to, if the configuration is active.
    #[must_use]
    pub fn active_url(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.url.as_deref().filter(|u| !u.is_empty())
    }
}

// =============================================================================
// Throttle
// =============================================================================

/// Admits at most one delivery per interval and drops the rest.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_delivered: Option<Instant>,
}

impl Throttle {
    /// Create a throttle.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_delivered: None,
        }
    }

    /// Decide whether a message arriving at `now` is delivered.
    ///
    /// The first message after construction or [`reset`](Self::reset) is
    /// always admitted; afterwards strictly more than `interval` must have
    /// elapsed since the last admitted message.
    pub fn admit(&mut self, now: Instant) -> bool {
        let admitted = self
            .last_delivered
            .is_none_or(|last| now.saturating_duration_since(last) > self.interval);
        if admitted {
            self.last_delivered = Some(now);
        }
        admitted
    }

    /// Forget the last delivery so the next message goes through.
    pub const fn reset(&mut self) {
        self.last_delivered = None;
    }
}
