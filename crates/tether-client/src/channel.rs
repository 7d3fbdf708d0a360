//! Per-topic channel state machine.
//!
//! ```text
//!             begin_open           acknowledge
//! Unopened ─────────────▶ Opening ─────────────▶ Open
//!     ▲                      │                    │
//!     └────── suspend ───────┴────────────────────┘
//!
//! any state ── close ──▶ Closed (terminal)
//! ```
//!
//! A channel owns the dispatch task of its topic while `Open`. Leaving `Open`
//! aborts that task, so nothing is dispatched for a topic that is not open.

use crate::dispatch::{self, Handler, HandlerSet};
use crate::handle::HandleId;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Lifecycle state of a topic channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Tracked, but no subscribe request is outstanding on the gateway.
    Unopened,
    /// Subscribe sent, waiting for the gateway's acknowledgment.
    Opening,
    /// Acknowledged; messages are dispatched.
    Open,
    /// Terminal.
    Closed,
}

impl ChannelState {
    /// Whether the gateway holds (or is about to hold) a channel for this topic.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, ChannelState::Opening | ChannelState::Open)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Unopened => "unopened",
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Channel state machine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The requested transition is not allowed from the current state.
    #[error("Invalid transition for {topic}: {from} -> {to}")]
    InvalidTransition {
        /// Topic name.
        topic: String,
        /// Current state.
        from: ChannelState,
        /// Requested state.
        to: ChannelState,
    },
}

/// One topic subscription instance.
pub struct TopicChannel {
    topic: String,
    state: ChannelState,
    handlers: HandlerSet,
    inbox: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

impl TopicChannel {
    /// Create an unopened channel with no handlers.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: ChannelState::Unopened,
            handlers: Arc::new(RwLock::new(BTreeMap::new())),
            inbox: None,
            task: None,
        }
    }

    /// Get the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Get the number of attached handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no handlers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriber_count() == 0
    }

    /// Handles attached to this channel, in registration order.
    #[must_use]
    pub fn handle_ids(&self) -> Vec<HandleId> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Attach a handler.
    pub fn attach(&mut self, id: HandleId, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handler);
    }

    /// Detach a handler. Returns `true` if it was attached.
    pub fn detach(&mut self, id: HandleId) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Mark a subscribe request as sent.
    ///
    /// `Unopened` and `Opening` move to `Opening`. An `Open` channel stays open
    /// while the subscribe is re-affirmed after authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel is closed.
    pub fn begin_open(&mut self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Unopened | ChannelState::Opening => {
                self.transition(ChannelState::Opening);
                Ok(())
            }
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(self.invalid(ChannelState::Opening)),
        }
    }

    /// Apply the gateway's subscribe acknowledgment and start dispatching.
    ///
    /// Must be called from within a Tokio runtime. A repeated acknowledgment
    /// for an open channel is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if no subscribe is outstanding.
    pub fn acknowledge(&mut self) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Opening => {
                let (tx, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(dispatch::run(
                    self.topic.clone(),
                    rx,
                    Arc::clone(&self.handlers),
                ));
                self.inbox = Some(tx);
                self.task = Some(task);
                self.transition(ChannelState::Open);
                Ok(())
            }
            ChannelState::Open => Ok(()),
            _ => Err(self.invalid(ChannelState::Open)),
        }
    }

    /// Forget the gateway-side channel after the connection dropped.
    ///
    /// Returns `true` if the channel was live.
    pub fn suspend(&mut self) -> bool {
        if !self.state.is_live() {
            return false;
        }
        self.stop_dispatch();
        self.transition(ChannelState::Unopened);
        true
    }

    /// Close the channel for good.
    ///
    /// Returns `true` on the first call only.
    pub fn close(&mut self) -> bool {
        if self.state == ChannelState::Closed {
            return false;
        }
        self.stop_dispatch();
        self.transition(ChannelState::Closed);
        true
    }

    /// Queue a raw payload for dispatch.
    ///
    /// Returns `false` if the channel is not open.
    pub fn deliver(&self, raw: String) -> bool {
        if self.state != ChannelState::Open {
            return false;
        }
        match &self.inbox {
            Some(inbox) => inbox.send(raw).is_ok(),
            None => false,
        }
    }

    fn stop_dispatch(&mut self) {
        self.inbox = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn transition(&mut self, to: ChannelState) {
        if self.state != to {
            trace!(topic = %self.topic, from = %self.state, to = %to, "Channel transition");
        }
        if to == ChannelState::Closed {
            debug!(topic = %self.topic, "Channel closed");
        }
        self.state = to;
    }

    fn invalid(&self, to: ChannelState) -> ChannelError {
        ChannelError::InvalidTransition {
            topic: self.topic.clone(),
            from: self.state,
            to,
        }
    }
}

impl Drop for TopicChannel {
    fn drop(&mut self) {
        self.stop_dispatch();
    }
}

impl fmt::Debug for TopicChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicChannel")
            .field("topic", &self.topic)
            .field("state", &self.state)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
