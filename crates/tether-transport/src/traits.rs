//! Transport abstraction traits for Tether.
//!
//! A [`Connector`] dials the gateway and yields a [`Connection`] split into a
//! write half and a read half, so the client can wait on inbound frames while
//! still writing outbound ones.

use crate::endpoint::Endpoint;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_protocol::Frame;
use thiserror::Error;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one physical connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate the next connection ID for this process.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{n}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The gateway could not be reached.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// The endpoint description is unusable.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tether_protocol::ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the connection can keep going after this error.
    ///
    /// A single malformed frame does not poison the socket.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// Dials the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError>;

    /// Get the transport name (e.g., "websocket", "memory").
    fn name(&self) -> &'static str;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a frame to the gateway.
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame from the gateway.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// An established connection, split into halves.
pub struct Connection {
    /// Connection identifier, used in logs.
    pub id: ConnectionId,
    /// Outbound half.
    pub sink: Box<dyn FrameSink>,
    /// Inbound half.
    pub source: Box<dyn FrameSource>,
}

impl Connection {
    /// Assemble a connection from its halves.
    #[must_use]
    pub fn new(sink: Box<dyn FrameSink>, source: Box<dyn FrameSource>) -> Self {
        Self {
            id: ConnectionId::generate(),
            sink,
            source,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}
