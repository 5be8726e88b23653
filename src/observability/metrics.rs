//! Transport metrics.
//!
//! # Metrics
//! - `transport_connections_accepted_total` (counter): inbound connections accepted
//! - `transport_active_connections` (gauge): open sockets, by direction
//! - `transport_messages_received_total` (counter): messages decoded
//! - `transport_messages_sent_total` (counter): messages written by batches
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! embedding process installs a recorder.

pub fn connection_accepted() {
    ::metrics::counter!("transport_connections_accepted_total").increment(1);
}

pub fn connection_opened(direction: &'static str) {
    ::metrics::gauge!("transport_active_connections", "direction" => direction).increment(1.0);
}

pub fn connection_closed(direction: &'static str) {
    ::metrics::gauge!("transport_active_connections", "direction" => direction).decrement(1.0);
}

pub fn message_received() {
    ::metrics::counter!("transport_messages_received_total").increment(1);
}

pub fn messages_sent(count: usize) {
    ::metrics::counter!("transport_messages_sent_total").increment(count as u64);
}
