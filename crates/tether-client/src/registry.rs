//! Subscription registry.
//!
//! Maps topic names to their [`TopicChannel`] and subscriber handles back to
//! their topic. A topic is tracked exactly as long as at least one handle is
//! attached to it; the channel is closed when the last handle leaves.

use crate::channel::{ChannelState, TopicChannel};
use crate::dispatch::Handler;
use crate::error::ClientError;
use crate::handle::HandleId;
use crate::metrics;
use dashmap::DashMap;
use tether_protocol::validate_topic;
use tracing::{debug, trace};

/// Result of registering a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// The new subscriber handle.
    pub handle: HandleId,
    /// Whether this registration created the topic.
    pub created: bool,
}

/// Result of removing a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    /// Topic the handle belonged to.
    pub topic: String,
    /// Channel state before the removal; `Closed` is reported via `closed`.
    pub previous: ChannelState,
    /// Whether the removal emptied the topic and closed its channel.
    pub closed: bool,
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of tracked topics.
    pub topic_count: usize,
    /// Number of open channels.
    pub open_count: usize,
    /// Number of subscriber handles.
    pub handle_count: usize,
}

/// Topic name → channel, handle → topic name.
#[derive(Debug, Default)]
pub struct Registry {
    topics: DashMap<String, TopicChannel>,
    handles: DashMap<HandleId, String>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` against `topic`, creating the topic if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid.
    pub fn subscribe(&self, topic: &str, handler: Handler) -> Result<Registration, ClientError> {
        validate_topic(topic).map_err(ClientError::InvalidTopic)?;

        let handle = HandleId::next();
        let mut created = false;

        let mut entry = self.topics.entry(topic.to_string()).or_insert_with(|| {
            debug!(topic = %topic, "Tracking new topic");
            created = true;
            TopicChannel::new(topic)
        });
        entry.attach(handle, handler);
        self.handles.insert(handle, topic.to_string());

        debug!(
            topic = %topic,
            handle = %handle,
            subscribers = entry.subscriber_count(),
            "Subscribed"
        );
        drop(entry);

        if created {
            metrics::set_active_topics(self.topics.len());
        }

        Ok(Registration { handle, created })
    }

    /// Remove a handle. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: HandleId) -> Option<Removal> {
        let (_, topic) = self.handles.remove(&handle)?;

        let previous = {
            let mut entry = self.topics.get_mut(&topic)?;
            entry.detach(handle);
            debug!(
                topic = %topic,
                handle = %handle,
                subscribers = entry.subscriber_count(),
                "Unsubscribed"
            );
            entry.state()
        };

        let closed = match self.topics.remove_if(&topic, |_, channel| channel.is_empty()) {
            Some((_, mut channel)) => {
                let closed = channel.close();
                if closed {
                    metrics::record_channel_closed();
                }
                metrics::set_active_topics(self.topics.len());
                debug!(topic = %topic, "Dropped empty topic");
                closed
            }
            None => false,
        };

        Some(Removal {
            topic,
            previous,
            closed,
        })
    }

    /// Mark a subscribe as sent for `topic`.
    ///
    /// Returns `false` if the topic is not tracked.
    pub fn begin_open(&self, topic: &str) -> bool {
        match self.topics.get_mut(topic) {
            Some(mut channel) => channel.begin_open().is_ok(),
            None => false,
        }
    }

    /// Move an `Unopened` topic to `Opening`.
    ///
    /// Returns `true` only for the caller that made the transition, so that
    /// exactly one subscribe is sent for it.
    pub fn claim_open(&self, topic: &str) -> bool {
        match self.topics.get_mut(topic) {
            Some(mut channel) if channel.state() == ChannelState::Unopened => {
                channel.begin_open().is_ok()
            }
            _ => false,
        }
    }

    /// Reopen a topic after authentication.
    ///
    /// `Unopened` moves to `Opening` and an `Open` channel is re-affirmed.
    /// Returns `false` for a topic whose subscribe is still outstanding.
    pub fn reopen(&self, topic: &str) -> bool {
        match self.topics.get_mut(topic) {
            Some(mut channel) if channel.state() != ChannelState::Opening => {
                channel.begin_open().is_ok()
            }
            _ => false,
        }
    }

    /// Apply a subscribe acknowledgment.
    ///
    /// Returns `true` if the channel transitioned to `Open`.
    pub fn acknowledge(&self, topic: &str) -> bool {
        let Some(mut channel) = self.topics.get_mut(topic) else {
            return false;
        };
        let was_open = channel.state() == ChannelState::Open;
        match channel.acknowledge() {
            Ok(()) if !was_open => {
                metrics::record_channel_opened();
                true
            }
            Ok(()) => false,
            Err(e) => {
                debug!(error = %e, "Ignoring acknowledgment");
                false
            }
        }
    }

    /// Close and drop a topic the gateway refused to open.
    ///
    /// Its handles are orphaned. Returns the orphaned handles, or `None` if
    /// the topic was not tracked.
    pub fn reject(&self, topic: &str) -> Option<Vec<HandleId>> {
        let (_, mut channel) = self.topics.remove(topic)?;
        let orphaned = channel.handle_ids();
        if channel.close() {
            metrics::record_channel_closed();
        }
        for handle in &orphaned {
            self.handles.remove(handle);
        }
        metrics::set_active_topics(self.topics.len());
        Some(orphaned)
    }

    /// Queue a raw payload for an open topic.
    ///
    /// Returns `false` if the topic is not tracked or not open.
    pub fn deliver(&self, topic: &str, raw: String) -> bool {
        match self.topics.get(topic) {
            Some(channel) => channel.deliver(raw),
            None => {
                trace!(topic = %topic, "No subscription for topic");
                false
            }
        }
    }

    /// Suspend every live channel after the connection dropped.
    ///
    /// Returns the number of channels suspended.
    pub fn suspend_all(&self) -> usize {
        self.topics
            .iter_mut()
            .map(|mut channel| channel.suspend())
            .filter(|suspended| *suspended)
            .count()
    }

    /// Close every channel and forget every topic and handle.
    ///
    /// Returns the topics whose channel was live on the gateway.
    pub fn clear(&self) -> Vec<String> {
        let names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        let mut live = Vec::new();

        for name in names {
            if let Some((_, mut channel)) = self.topics.remove(&name) {
                if channel.state().is_live() {
                    live.push(name);
                }
                if channel.close() {
                    metrics::record_channel_closed();
                }
            }
        }
        self.handles.clear();
        metrics::set_active_topics(0);

        debug!(closed = live.len(), "Registry cleared");
        live
    }

    /// Get the state of a topic's channel.
    #[must_use]
    pub fn state(&self, topic: &str) -> Option<ChannelState> {
        self.topics.get(topic).map(|c| c.state())
    }

    /// Check if a topic is tracked.
    #[must_use]
    pub fn contains_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Check if a handle is registered.
    #[must_use]
    pub fn contains_handle(&self, handle: HandleId) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Topic a handle is registered against.
    #[must_use]
    pub fn topic_of(&self, handle: HandleId) -> Option<String> {
        self.handles.get(&handle).map(|t| t.clone())
    }

    /// Get the subscriber count for a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|c| c.subscriber_count())
            .unwrap_or(0)
    }

    /// Get all tracked topic names.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            topic_count: self.topics.len(),
            open_count: self
                .topics
                .iter()
                .filter(|c| c.state() == ChannelState::Open)
                .count(),
            handle_count: self.handles.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerResult;
    use std::sync::Arc;
    use tether_protocol::Payload;

    fn noop() -> Handler {
        Arc::new(|_: &Payload| -> HandlerResult { Ok(()) })
    }

    #[test]
    fn test_registry_subscribe_unsubscribe() {
        let registry = Registry::new();

        let reg = registry.subscribe("/user/42", noop()).unwrap();
        assert!(reg.created);
        assert!(registry.contains_topic("/user/42"));
        assert_eq!(registry.subscriber_count("/user/42"), 1);
        assert_eq!(registry.state("/user/42"), Some(ChannelState::Unopened));

        let removal = registry.unsubscribe(reg.handle).unwrap();
        assert!(removal.closed);
        assert_eq!(removal.topic, "/user/42");
        // Topic should be dropped with its last handle
        assert!(!registry.contains_topic("/user/42"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shared_topic_reference_counting() {
        let registry = Registry::new();

        let h1 = registry.subscribe("/user/42", noop()).unwrap();
        let h2 = registry.subscribe("/user/42", noop()).unwrap();
        assert!(h1.created);
        assert!(!h2.created);
        assert_ne!(h1.handle, h2.handle);
        assert_eq!(registry.topics(), vec!["/user/42".to_string()]);

        let removal = registry.unsubscribe(h1.handle).unwrap();
        assert!(!removal.closed);
        assert!(registry.contains_topic("/user/42"));

        let removal = registry.unsubscribe(h2.handle).unwrap();
        assert!(removal.closed);
        assert!(!registry.contains_topic("/user/42"));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = Registry::new();
        let reg = registry.subscribe("/t", noop()).unwrap();

        assert!(registry.unsubscribe(reg.handle).is_some());
        assert!(registry.unsubscribe(reg.handle).is_none());
        assert!(registry.unsubscribe(HandleId::next()).is_none());
    }

    #[test]
    fn test_registry_invalid_topic() {
        let registry = Registry::new();

        assert!(matches!(
            registry.subscribe("", noop()),
            Err(ClientError::InvalidTopic(_))
        ));
        assert!(registry.subscribe("/has space", noop()).is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_open_lifecycle_and_delivery_gate() {
        let registry = Registry::new();
        let reg = registry.subscribe("/t", noop()).unwrap();

        assert!(!registry.deliver("/t", "early".into()));
        assert!(registry.begin_open("/t"));
        assert_eq!(registry.state("/t"), Some(ChannelState::Opening));
        assert!(!registry.deliver("/t", "early".into()));

        assert!(registry.acknowledge("/t"));
        assert!(!registry.acknowledge("/t"));
        assert_eq!(registry.state("/t"), Some(ChannelState::Open));
        assert!(registry.deliver("/t", "hello".into()));

        let removal = registry.unsubscribe(reg.handle).unwrap();
        assert_eq!(removal.previous, ChannelState::Open);
        assert!(!registry.deliver("/t", "late".into()));
        assert!(!registry.acknowledge("/t"));
        assert!(!registry.begin_open("/t"));
    }

    #[test]
    fn test_claim_open_is_exclusive() {
        let registry = Registry::new();
        registry.subscribe("/t", noop()).unwrap();

        assert!(registry.claim_open("/t"));
        assert!(!registry.claim_open("/t"));
        assert_eq!(registry.state("/t"), Some(ChannelState::Opening));
        assert!(!registry.claim_open("/missing"));
    }

    #[tokio::test]
    async fn test_reopen_skips_outstanding_subscribe() {
        let registry = Registry::new();
        registry.subscribe("/idle", noop()).unwrap();
        registry.subscribe("/pending", noop()).unwrap();
        registry.subscribe("/open", noop()).unwrap();
        registry.claim_open("/pending");
        registry.claim_open("/open");
        registry.acknowledge("/open");

        assert!(registry.reopen("/idle"));
        assert_eq!(registry.state("/idle"), Some(ChannelState::Opening));
        assert!(!registry.reopen("/pending"));
        assert!(registry.reopen("/open"));
        assert_eq!(registry.state("/open"), Some(ChannelState::Open));
        assert!(!registry.reopen("/missing"));
    }

    #[tokio::test]
    async fn test_suspend_all_keeps_topics() {
        let registry = Registry::new();
        registry.subscribe("/a", noop()).unwrap();
        registry.subscribe("/b", noop()).unwrap();
        registry.begin_open("/a");
        registry.acknowledge("/a");
        registry.begin_open("/b");

        assert_eq!(registry.suspend_all(), 2);
        assert_eq!(registry.state("/a"), Some(ChannelState::Unopened));
        assert_eq!(registry.state("/b"), Some(ChannelState::Unopened));
        assert_eq!(registry.stats().topic_count, 2);
    }

    #[tokio::test]
    async fn test_clear_reports_live_topics() {
        let registry = Registry::new();
        let a = registry.subscribe("/a", noop()).unwrap();
        registry.subscribe("/b", noop()).unwrap();
        registry.begin_open("/a");
        registry.acknowledge("/a");

        let live = registry.clear();
        assert_eq!(live, vec!["/a".to_string()]);
        assert!(registry.is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());

        // Orphaned handles are gone; unsubscribing them is a no-op.
        assert!(!registry.contains_handle(a.handle));
        assert!(registry.unsubscribe(a.handle).is_none());
    }

    #[test]
    fn test_reject_orphans_handles() {
        let registry = Registry::new();
        let a = registry.subscribe("/secret", noop()).unwrap();
        let b = registry.subscribe("/secret", noop()).unwrap();
        registry.begin_open("/secret");

        let orphaned = registry.reject("/secret").unwrap();
        assert_eq!(orphaned, vec![a.handle, b.handle]);
        assert!(!registry.contains_topic("/secret"));
        assert!(registry.topic_of(a.handle).is_none());
        assert!(registry.reject("/secret").is_none());

        // A later subscribe creates a fresh instance.
        let c = registry.subscribe("/secret", noop()).unwrap();
        assert!(c.created);
        assert_eq!(registry.state("/secret"), Some(ChannelState::Unopened));
    }

    #[test]
    fn test_registry_stats() {
        let registry = Registry::new();

        registry.subscribe("/a", noop()).unwrap();
        registry.subscribe("/a", noop()).unwrap();
        registry.subscribe("/b", noop()).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.topic_count, 2);
        assert_eq!(stats.handle_count, 3);
        assert_eq!(stats.open_count, 0);
    }
}
