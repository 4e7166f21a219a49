//! Topic classification.

use crate::config::Topics;

/// Which handler an inbound message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SensorReading,
    Control,
    RelayEcho,
    Alert,
    Unhandled,
}

/// Classifies `topic` against the known topic roots.
///
/// Priority order is sensor, control, relay echo, alerts; the first match wins. A root
/// matches the topic itself or anything below it, never a sibling that merely shares
/// a string prefix (`sensors/dht1` does not match `sensors/dht10`).
pub fn classify(topic: &str, topics: &Topics) -> Route {
    if is_under(topic, &topics.sensors_root) {
        Route::SensorReading
    } else if is_under(topic, &topics.controls_root) {
        Route::Control
    } else if is_under(topic, &topics.relay_state) {
        Route::RelayEcho
    } else if is_under(topic, &topics.alerts) {
        Route::Alert
    } else {
        Route::Unhandled
    }
}

fn is_under(topic: &str, root: &str) -> bool {
    match topic.strip_prefix(root) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Last path segment of a topic, e.g. the sensor id in `home/sensors/dht1`.
pub fn last_segment(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or(topic)
}
