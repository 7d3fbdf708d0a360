//! # tether-protocol
//!
//! Wire protocol definitions for the Tether realtime client.
//!
//! This crate defines the JSON text frames exchanged with the messaging
//! gateway, the codec that turns them into WebSocket text, best-effort
//! decoding of topic payloads, and topic naming rules.
//!
//! ## Frame Types
//!
//! - `Authenticate` / `Deauthenticate` - Bind or drop a bearer credential
//! - `Subscribe` / `Unsubscribe` - Topic channel membership
//! - `Publish` / `Message` - Outbound and inbound topic payloads
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use tether_protocol::{codec, Frame, Payload};
//!
//! let frame = Frame::message("/user/42", r#"{"type":"ping"}"#);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//!
//! if let Frame::Message { payload, .. } = decoded {
//!     assert_eq!(Payload::decode(&payload).kind(), Some("ping"));
//! }
//! ```

pub mod codec;
pub mod frames;
pub mod payload;
pub mod topic;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Frame, FrameKind};
pub use payload::{Event, Payload};
pub use topic::validate_topic;
