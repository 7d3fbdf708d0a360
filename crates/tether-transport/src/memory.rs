//! In-process transport.
//!
//! [`pair`] returns a [`MemoryConnector`] for the client side and a
//! [`MemoryGateway`] that plays the gateway: it accepts one
//! [`MemorySession`] per successful connect, sees every frame the client
//! sends and can inject frames back. Dropping a session disconnects the
//! client. Frames pass through the real codec in both directions.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tether_protocol::{codec, Frame};
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::traits::{Connection, Connector, FrameSink, FrameSource, TransportError};

#[derive(Debug)]
struct Shared {
    accepting: AtomicBool,
    attempts: AtomicUsize,
}

/// Create a connected connector/gateway pair.
#[must_use]
pub fn pair() -> (MemoryConnector, MemoryGateway) {
    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        accepting: AtomicBool::new(true),
        attempts: AtomicUsize::new(0),
    });

    (
        MemoryConnector {
            sessions: sessions_tx,
            shared: Arc::clone(&shared),
        },
        MemoryGateway {
            sessions: sessions_rx,
            shared,
        },
    )
}

/// Client side of the in-process transport.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    sessions: mpsc::UnboundedSender<MemorySession>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionRefused(format!(
                "{endpoint} is not accepting connections"
            )));
        }

        let (to_gateway_tx, to_gateway_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

        let session = MemorySession {
            endpoint: endpoint.clone(),
            inbound: to_gateway_rx,
            outbound: to_client_tx,
        };
        self.sessions
            .send(session)
            .map_err(|_| TransportError::ConnectionRefused("gateway dropped".into()))?;

        debug!(endpoint = %endpoint, "Memory connection established");

        Ok(Connection::new(
            Box::new(MemorySink {
                tx: Some(to_gateway_tx),
            }),
            Box::new(MemorySource { rx: to_client_rx }),
        ))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Gateway side of the in-process transport.
#[derive(Debug)]
pub struct MemoryGateway {
    sessions: mpsc::UnboundedReceiver<MemorySession>,
    shared: Arc<Shared>,
}

impl MemoryGateway {
    /// Wait for the next client connection.
    ///
    /// Returns `None` once every connector has been dropped.
    pub async fn accept(&mut self) -> Option<MemorySession> {
        self.sessions.recv().await
    }

    /// Refuse (`false`) or allow (`true`) future connects.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Number of connect attempts seen so far, refused ones included.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted client connection, seen from the gateway.
#[derive(Debug)]
pub struct MemorySession {
    endpoint: Endpoint,
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl MemorySession {
    /// The endpoint the client dialed.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client side has gone away.
    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let text = codec::encode(&frame)?;
        self.outbound
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send raw text to the client, bypassing the encoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the client side has gone away.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next frame from the client.
    ///
    /// Returns `None` once the client has closed its side.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            let text = self.inbound.recv().await?;
            if let Ok(frame) = codec::decode(&text) {
                return Some(frame);
            }
        }
    }

    /// Take the next frame from the client if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        while let Ok(text) = self.inbound.try_recv() {
            if let Ok(frame) = codec::decode(&text) {
                return Some(frame);
            }
        }
        None
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        let text = codec::encode(frame)?;
        tx.send(text).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.rx.recv().await {
            Some(text) => Ok(Some(codec::decode(&text)?)),
            None => Ok(None),
        }
    }
}
