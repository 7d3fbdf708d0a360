//! Client error types.

use tether_transport::TransportError;
use thiserror::Error;

/// Error returned by a subscriber callback.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport is not connected.
    #[error("Not connected to the gateway")]
    NotConnected,

    /// `connect` was called while a connection driver is already running.
    #[error("Client is already connected or connecting")]
    AlreadyConnected,

    /// `connect` was called outside a Tokio runtime.
    #[error("No Tokio runtime available to drive the connection")]
    NoRuntime,

    /// The gateway rejected the credential.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A pending request lost its connection before the gateway replied.
    #[error("Request interrupted before the gateway replied")]
    Interrupted,

    /// Invalid topic name.
    #[error("Invalid topic name: {0}")]
    InvalidTopic(&'static str),

    /// Payload could not be serialized.
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ClientError {
    /// Whether retrying after a reconnect may succeed.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::Interrupted | ClientError::Transport(_)
        )
    }
}
