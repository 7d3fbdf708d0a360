//! Lifecycle events.

use std::time::Duration;

/// Something observable happened on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The transport connected.
    Connected {
        /// Connection identifier.
        connection: String,
    },
    /// A connect attempt failed.
    ConnectFailed {
        /// Transport error description.
        error: String,
    },
    /// The transport disconnected. Tracked topics are kept.
    Disconnected {
        /// Why the connection ended, if known.
        reason: Option<String>,
    },
    /// The driver will retry after `delay`.
    Reconnecting {
        /// Retry number since the last successful connect.
        attempt: u32,
        /// Wait before the retry.
        delay: Duration,
    },
    /// The gateway accepted the credential.
    Authenticated,
    /// The gateway rejected the credential.
    AuthenticationFailed {
        /// Rejection reason.
        reason: String,
    },
    /// The gateway refused to open a topic; the topic was dropped.
    SubscribeRejected {
        /// Topic name.
        topic: String,
        /// Rejection reason.
        reason: String,
    },
    /// The driver stopped and will not reconnect.
    Stopped,
}
