//! Stream Connection Manager
//!
//! Owns one logical streaming connection: connect, receive, throttle,
//! disconnect, reconnect and teardown.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnected ──(backoff)──► Connecting ...
//!                      │                              ▲
//!                      └──────── connect failed ──────┘
//! ```
//!
//! Each active configuration runs in one worker task that owns the transport
//! session, the throttle and the backoff policy. Changing the configuration
//! or tearing down cancels the worker and waits for it, so the old session is
//! closed before a new one is opened and a cancelled reconnect timer never
//! fires. Dropping the manager cancels and aborts the worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{StreamTransport, TransportEvent, TransportSession};
use crate::domain::streaming::{
    ConnectionState, StreamConfig, StreamMessage, StreamSnapshot, Throttle,
};
use crate::domain::without_query;
use crate::infrastructure::metrics::{self, StreamMessageResult};

/// Default spacing between delivered messages.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Tuning for the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamManagerConfig {
    /// Minimum spacing between delivered messages.
    pub throttle_interval: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectConfig,
}

impl Default for StreamManagerConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            reconnect: ReconnectConfig::default(),
        }
    }
}

struct ActiveConnection {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    config: StreamConfig,
    active: Option<ActiveConnection>,
}

/// Owns one streaming connection and publishes [`StreamSnapshot`]s.
pub struct StreamConnectionManager {
    transport: Arc<dyn StreamTransport>,
    settings: StreamManagerConfig,
    state: Arc<watch::Sender<StreamSnapshot>>,
    inner: Mutex<Inner>,
}

impl StreamConnectionManager {
    /// Create an idle manager. Nothing connects until [`reconfigure`](Self::reconfigure).
    #[must_use]
    pub fn new(transport: Arc<dyn StreamTransport>, settings: StreamManagerConfig) -> Self {
        let (state, _) = watch::channel(StreamSnapshot::default());
        Self {
            transport,
            settings,
            state: Arc::new(state),
            inner: Mutex::new(Inner {
                config: StreamConfig::disabled(),
                active: None,
            }),
        }
    }

    /// Create a manager and apply `config` immediately.
    pub async fn start(
        transport: Arc<dyn StreamTransport>,
        settings: StreamManagerConfig,
        config: StreamConfig,
    ) -> Self {
        let manager = Self::new(transport, settings);
        manager.reconfigure(config).await;
        manager
    }

    /// Apply new consumer inputs.
    ///
    /// An unchanged configuration is a no-op. Otherwise the current
    /// connection is torn down and, if the new configuration is enabled with
    /// a URL, a fresh one starts from `Disconnected`.
    pub async fn reconfigure(&self, config: StreamConfig) {
        let mut inner = self.inner.lock().await;
        if inner.config == config {
            return;
        }

        inner.config = StreamConfig::disabled();
        Self::stop(&mut inner).await;
        self.publish_connection(ConnectionState::Disconnected);

        if let Some(url) = config.active_url() {
            tracing::info!(url = without_query(url), "Starting stream connection");
            inner.active = Some(self.spawn_worker(url.to_string()));
        } else {
            tracing::debug!(enabled = config.enabled, "Stream connection disabled");
        }
        inner.config = config;
    }

    /// Close the live transport and cancel any pending reconnection.
    ///
    /// The configuration is cleared, so a later [`reconfigure`](Self::reconfigure)
    /// with the same inputs connects again.
    pub async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        inner.config = StreamConfig::disabled();
        Self::stop(&mut inner).await;
        self.publish_connection(ConnectionState::Disconnected);
    }

    /// Current configuration.
    pub async fn config(&self) -> StreamConfig {
        self.inner.lock().await.config.clone()
    }

    /// Current data and connection state.
    #[must_use]
    pub fn snapshot(&self) -> StreamSnapshot {
        self.state.borrow().clone()
    }

    /// Last delivered message.
    #[must_use]
    pub fn data(&self) -> Option<StreamMessage> {
        self.state.borrow().data.clone()
    }

    /// Whether the transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().connection
    }

    /// Watch for deliveries and state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.state.subscribe()
    }

    fn spawn_worker(&self, url: String) -> ActiveConnection {
        let cancel = CancellationToken::new();
        let worker = ConnectionWorker {
            transport: Arc::clone(&self.transport),
            url,
            throttle: Throttle::new(self.settings.throttle_interval),
            policy: ReconnectPolicy::new(self.settings.reconnect.clone()),
            state: Arc::clone(&self.state),
            cancel: cancel.clone(),
        };
        ActiveConnection {
            cancel,
            task: tokio::spawn(worker.run()),
        }
    }

    // Keeps the handle until the worker exits; an abandoned call leaves the
    // wait to the next one.
    async fn stop(inner: &mut Inner) {
        let Some(active) = inner.active.as_mut() else {
            return;
        };
        active.cancel.cancel();
        let joined = (&mut active.task).await;
        inner.active = None;
        if let Err(e) = joined
            && e.is_panic()
        {
            tracing::error!(error = %e, "Stream worker panicked");
        }
    }

    fn publish_connection(&self, connection: ConnectionState) {
        publish_connection(&self.state, connection);
    }
}

impl Drop for StreamConnectionManager {
    fn drop(&mut self) {
        if let Some(active) = self.inner.get_mut().active.take() {
            active.cancel.cancel();
            active.task.abort();
        }
    }
}

fn publish_connection(state: &watch::Sender<StreamSnapshot>, connection: ConnectionState) {
    state.send_if_modified(|snap| {
        if snap.connection == connection {
            return false;
        }
        snap.connection = connection;
        true
    });
    metrics::set_stream_connected(connection == ConnectionState::Connected);
}

// =============================================================================
// Worker
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Dropped,
}

struct ConnectionWorker {
    transport: Arc<dyn StreamTransport>,
    url: String,
    throttle: Throttle,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<StreamSnapshot>>,
    cancel: CancellationToken,
}

impl ConnectionWorker {
    async fn run(mut self) {
        let cancel = self.cancel.clone();

        loop {
            publish_connection(&self.state, ConnectionState::Connecting);

            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                opened = self.transport.open(&self.url) => opened,
            };

            match opened {
                Ok(mut session) => {
                    self.policy.reset();
                    self.throttle.reset();
                    publish_connection(&self.state, ConnectionState::Connected);
                    tracing::info!(url = without_query(&self.url), "Connected to stream");

                    let end = self.pump(session.as_mut()).await;
                    session.close().await;
                    publish_connection(&self.state, ConnectionState::Disconnected);

                    if end == SessionEnd::Cancelled {
                        break;
                    }
                    tracing::warn!(url = without_query(&self.url), "Stream disconnected");
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(url = without_query(&self.url), error = %e, "Stream connection rejected");
                    break;
                }
                Err(e) => {
                    publish_connection(&self.state, ConnectionState::Disconnected);
                    tracing::warn!(url = without_query(&self.url), error = %e, "Stream connection failed");
                }
            }

            let Some(delay) = self.policy.next_delay() else {
                tracing::error!(
                    attempts = self.policy.attempt_count(),
                    "Maximum stream reconnection attempts reached"
                );
                break;
            };

            tracing::info!(
                attempt = self.policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to stream"
            );
            metrics::record_stream_reconnect();

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        publish_connection(&self.state, ConnectionState::Disconnected);
    }

    async fn pump(&mut self, session: &mut dyn TransportSession) -> SessionEnd {
        let cancel = self.cancel.clone();
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionEnd::Cancelled,
                event = session.next_event() => event,
            };

            match event {
                TransportEvent::Message(text) => self.on_message(&text),
                TransportEvent::Error(e) => {
                    tracing::warn!(error = %e, "Stream transport error");
                    return SessionEnd::Dropped;
                }
                TransportEvent::Closed => return SessionEnd::Dropped,
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        let message = match StreamMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse stream message");
                metrics::record_stream_message(StreamMessageResult::Invalid);
                return;
            }
        };

        if !self.throttle.admit(Instant::now().into_std()) {
            metrics::record_stream_message(StreamMessageResult::Throttled);
            return;
        }

        self.state.send_modify(|snap| snap.data = Some(message));
        metrics::record_stream_message(StreamMessageResult::Delivered);
    }
}
