//! Metrics instrumentation for the client.
//!
//! Uses the `metrics` facade; nothing is recorded unless the embedding
//! application installs a recorder (the `tether` binary installs the
//! Prometheus exporter).

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tether_connections_total";
    pub const CONNECTED: &str = "tether_connected";
    pub const RECONNECTS_TOTAL: &str = "tether_reconnects_total";
    pub const MESSAGES_RECEIVED_TOTAL: &str = "tether_messages_received_total";
    pub const MESSAGES_DISPATCHED_TOTAL: &str = "tether_messages_dispatched_total";
    pub const DECODE_FALLBACKS_TOTAL: &str = "tether_decode_fallbacks_total";
    pub const HANDLER_FAILURES_TOTAL: &str = "tether_handler_failures_total";
    pub const CHANNELS_OPENED_TOTAL: &str = "tether_channels_opened_total";
    pub const CHANNELS_CLOSED_TOTAL: &str = "tether_channels_closed_total";
    pub const TOPICS_ACTIVE: &str = "tether_topics_active";
}

/// Describe every client metric to the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of successful gateway connections"
    );
    metrics::describe_gauge!(names::CONNECTED, "1 while connected to the gateway");
    metrics::describe_counter!(names::RECONNECTS_TOTAL, "Total number of reconnect attempts");
    metrics::describe_counter!(
        names::MESSAGES_RECEIVED_TOTAL,
        "Total number of topic messages received from the gateway"
    );
    metrics::describe_counter!(
        names::MESSAGES_DISPATCHED_TOTAL,
        "Total number of successful handler invocations"
    );
    metrics::describe_counter!(
        names::DECODE_FALLBACKS_TOTAL,
        "Payloads delivered raw because they were not JSON"
    );
    metrics::describe_counter!(names::HANDLER_FAILURES_TOTAL, "Handler errors and panics");
    metrics::describe_counter!(names::CHANNELS_OPENED_TOTAL, "Topic channels acknowledged");
    metrics::describe_counter!(names::CHANNELS_CLOSED_TOTAL, "Topic channels closed");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Topics tracked by the registry");
}

pub(crate) fn record_connected() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTED).set(1.0);
}

pub(crate) fn record_disconnected() {
    gauge!(names::CONNECTED).set(0.0);
}

pub(crate) fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

pub(crate) fn record_message_received() {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(1);
}

pub(crate) fn record_dispatched(count: usize) {
    counter!(names::MESSAGES_DISPATCHED_TOTAL).increment(count as u64);
}

pub(crate) fn record_decode_fallback() {
    counter!(names::DECODE_FALLBACKS_TOTAL).increment(1);
}

pub(crate) fn record_handler_failure(kind: &'static str) {
    counter!(names::HANDLER_FAILURES_TOTAL, "kind" => kind).increment(1);
}

pub(crate) fn record_channel_opened() {
    counter!(names::CHANNELS_OPENED_TOTAL).increment(1);
}

pub(crate) fn record_channel_closed() {
    counter!(names::CHANNELS_CLOSED_TOTAL).increment(1);
}

pub(crate) fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}
