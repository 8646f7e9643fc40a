//! WebSocket Transport
//!
//! `tokio-tungstenite` adapter for [`StreamTransport`]. Text frames become
//! [`TransportEvent::Message`]; UTF-8 binary frames are treated the same way.
//! Ping/pong is answered by tungstenite while reading.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    StreamTransport, TransportError, TransportEvent, TransportSession,
};
use crate::domain::without_query;

/// Opens WebSocket sessions (`ws://` and `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportSession>, TransportError> {
        let request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        tracing::debug!(url = without_query(url), "Opening WebSocket");

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                WsError::Url(err) => TransportError::InvalidUrl(err.to_string()),
                other => TransportError::Connect(other.to_string()),
            })?;

        Ok(Box::new(WebSocketSession {
            stream,
            closed: false,
        }))
    }
}

struct WebSocketSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl TransportSession for WebSocketSession {
    async fn next_event(&mut self) -> TransportEvent {
        if self.closed {
            return TransportEvent::Closed;
        }

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Message(text),
                    Err(_) => tracing::trace!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Server sent close frame");
                    self.closed = true;
                    return TransportEvent::Closed;
                }
                Some(Ok(_)) => {
                    // Ping, pong and raw frames
                }
                Some(Err(e)) => return TransportEvent::Error(e.to_string()),
                None => {
                    tracing::info!("WebSocket stream ended");
                    self.closed = true;
                    return TransportEvent::Closed;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
