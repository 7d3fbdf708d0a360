//! # tether-transport
//!
//! Transport abstraction layer for the Tether realtime client.
//!
//! - **WebSocket** - The production transport (`websocket` feature, on by default)
//! - **Memory** - An in-process gateway for tests and embedding
//!
//! ## Transport Abstraction
//!
//! All transports implement [`Connector`] and hand back a [`Connection`]
//! split into a [`FrameSink`] and a [`FrameSource`], allowing the client to be
//! protocol-agnostic.
//!
//! ```rust,ignore
//! use tether_transport::{Connector, Endpoint};
//!
//! async fn first_frame(connector: &dyn Connector, endpoint: &Endpoint) {
//!     let mut conn = connector.connect(endpoint).await.unwrap();
//!     while let Ok(Some(frame)) = conn.source.recv().await {
//!         // Process frame
//!     }
//! }
//! ```

pub mod endpoint;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use endpoint::Endpoint;
pub use traits::{Connection, ConnectionId, Connector, FrameSink, FrameSource, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
