//! Frame types for the Tether gateway protocol.
//!
//! Every WebSocket text message exchanged with the gateway is one JSON object
//! tagged by its `event` field. Topic payloads travel as opaque UTF-8 text;
//! decoding them is the job of [`crate::payload`].

use serde::{Deserialize, Serialize};

/// Frame kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Authenticate,
    Authenticated,
    AuthenticationFailed,
    Deauthenticate,
    Subscribe,
    Subscribed,
    SubscribeRejected,
    Unsubscribe,
    Publish,
    Message,
    Error,
    Ping,
    Pong,
}

impl FrameKind {
    /// The wire name of this frame kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Authenticate => "authenticate",
            FrameKind::Authenticated => "authenticated",
            FrameKind::AuthenticationFailed => "authentication_failed",
            FrameKind::Deauthenticate => "deauthenticate",
            FrameKind::Subscribe => "subscribe",
            FrameKind::Subscribed => "subscribed",
            FrameKind::SubscribeRejected => "subscribe_rejected",
            FrameKind::Unsubscribe => "unsubscribe",
            FrameKind::Publish => "publish",
            FrameKind::Message => "message",
            FrameKind::Error => "error",
            FrameKind::Ping => "ping",
            FrameKind::Pong => "pong",
        }
    }

    /// Whether frames of this kind are sent by the client.
    #[must_use]
    pub fn is_outbound(&self) -> bool {
        matches!(
            self,
            FrameKind::Authenticate
                | FrameKind::Deauthenticate
                | FrameKind::Subscribe
                | FrameKind::Unsubscribe
                | FrameKind::Publish
                | FrameKind::Ping
                | FrameKind::Pong
        )
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Frame {
    /// Present a bearer credential on the connection.
    Authenticate {
        /// Bearer token.
        token: String,
    },

    /// The gateway accepted the presented credential.
    Authenticated,

    /// The gateway rejected the presented credential.
    AuthenticationFailed {
        /// Human-readable reason.
        reason: String,
    },

    /// Drop the credential bound to the connection.
    Deauthenticate,

    /// Open a channel for a topic.
    Subscribe {
        /// Topic name.
        topic: String,
    },

    /// Subscribe acknowledgment for one topic.
    Subscribed {
        /// Topic name.
        topic: String,
    },

    /// The gateway refused to open a topic.
    SubscribeRejected {
        /// Topic name.
        topic: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Close the channel for a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },

    /// Publish a payload to a topic.
    Publish {
        /// Target topic.
        topic: String,
        /// UTF-8 payload, conventionally JSON.
        payload: String,
    },

    /// Inbound payload delivered on a subscribed topic.
    Message {
        /// Source topic.
        topic: String,
        /// UTF-8 payload, conventionally JSON.
        payload: String,
    },

    /// Gateway-side error not tied to a specific request.
    Error {
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame kind.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Authenticate { .. } => FrameKind::Authenticate,
            Frame::Authenticated => FrameKind::Authenticated,
            Frame::AuthenticationFailed { .. } => FrameKind::AuthenticationFailed,
            Frame::Deauthenticate => FrameKind::Deauthenticate,
            Frame::Subscribe { .. } => FrameKind::Subscribe,
            Frame::Subscribed { .. } => FrameKind::Subscribed,
            Frame::SubscribeRejected { .. } => FrameKind::SubscribeRejected,
            Frame::Unsubscribe { .. } => FrameKind::Unsubscribe,
            Frame::Publish { .. } => FrameKind::Publish,
            Frame::Message { .. } => FrameKind::Message,
            Frame::Error { .. } => FrameKind::Error,
            Frame::Ping { .. } => FrameKind::Ping,
            Frame::Pong { .. } => FrameKind::Pong,
        }
    }

    /// The topic this frame refers to, if any.
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        match self {
            Frame::Subscribe { topic }
            | Frame::Subscribed { topic }
            | Frame::SubscribeRejected { topic, .. }
            | Frame::Unsubscribe { topic }
            | Frame::Publish { topic, .. }
            | Frame::Message { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// Create a new Authenticate frame.
    #[must_use]
    pub fn authenticate(token: impl Into<String>) -> Self {
        Frame::Authenticate {
            token: token.into(),
        }
    }

    /// Create a new AuthenticationFailed frame.
    #[must_use]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Frame::AuthenticationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            topic: topic.into(),
        }
    }

    /// Create a new Subscribed frame.
    #[must_use]
    pub fn subscribed(topic: impl Into<String>) -> Self {
        Frame::Subscribed {
            topic: topic.into(),
        }
    }

    /// Create a new SubscribeRejected frame.
    #[must_use]
    pub fn subscribe_rejected(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Frame::SubscribeRejected {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            topic: topic.into(),
        }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Frame::Publish {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Message frame.
    #[must_use]
    pub fn message(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Frame::Message {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
