//! WebSocket transport implementation.
//!
//! This module dials the gateway with tokio-tungstenite and carries one JSON
//! frame per text message.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tether_protocol::{codec, Frame};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, warn};

use crate::endpoint::Endpoint;
use crate::traits::{Connection, Connector, FrameSink, FrameSource, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: codec::MAX_FRAME_SIZE,
        }
    }
}

/// Dials the gateway over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with a custom configuration.
    #[must_use]
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        let url = endpoint.url();
        debug!(url = %url, "Dialing gateway");

        let (stream, response) = connect_async(url.as_str()).await.map_err(|e| {
            warn!(url = %url, error = %e, "WebSocket handshake failed");
            TransportError::ConnectionRefused(e.to_string())
        })?;

        debug!(url = %url, status = %response.status(), "WebSocket handshake completed");

        let (sink, source) = stream.split();
        Ok(Connection::new(
            Box::new(WebSocketSink { sink, closed: false }),
            Box::new(WebSocketSource {
                source,
                max_message_size: self.config.max_message_size,
            }),
        ))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let text = codec::encode(frame)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => {
                    TransportError::ConnectionClosed
                }
                other => TransportError::SendFailed(other.to_string()),
            })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    source: SplitStream<WsStream>,
    max_message_size: usize,
}

impl WebSocketSource {
    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::Protocol(
                tether_protocol::ProtocolError::FrameTooLarge(len),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(codec::decode(&text)?));
                }
                Some(Ok(Message::Binary(data))) => {
                    // Some gateways send JSON in binary messages
                    self.check_size(data.len())?;
                    return Ok(Some(codec::decode_bytes(&data)?));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                    // tungstenite queues the pong reply itself
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    debug!("Connection closed");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
