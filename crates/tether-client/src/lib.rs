//! # tether-client
//!
//! Authenticated pub/sub client for a realtime gateway.
//!
//! One persistent connection carries every topic subscription. This crate
//! provides:
//!
//! - **Client** - Connection lifecycle, authentication and the public API
//! - **Registry** - Topic → channel and handle → topic bookkeeping
//! - **Channel** - Per-topic state machine and dispatch task
//! - **Dispatch** - Panic-isolated fan-out of a payload to its handlers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  commands  ┌─────────────┐  frames  ┌─────────────┐
//! │   Client    │───────────▶│   Driver    │◀────────▶│   Gateway   │
//! └─────────────┘            └─────────────┘          └─────────────┘
//!        │                          │
//!        ▼                          ▼
//! ┌─────────────┐  deliver   ┌─────────────┐
//! │  Registry   │───────────▶│TopicChannel │──▶ handlers
//! └─────────────┘            └─────────────┘
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
mod driver;
pub mod error;
pub mod event;
pub mod handle;
pub mod metrics;
pub mod reconnect;
pub mod registry;

pub use channel::ChannelState;
pub use client::{Client, Credential};
pub use config::ClientConfig;
pub use dispatch::{DispatchReport, Handler, HandlerResult};
pub use error::{ClientError, HandlerError};
pub use event::ClientEvent;
pub use handle::HandleId;
pub use reconnect::ReconnectConfig;
pub use registry::{Registry, RegistryStats};
pub use tether_protocol::{Event, Payload};
pub use tether_transport::Endpoint;
