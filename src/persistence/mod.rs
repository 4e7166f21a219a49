//! # Persistence Module
//!
//! ## Why This Module Exists
//! Every sensor reading and every discrete event (alerts, button presses) the data manager
//! sees ends up in an append-only history. This module defines the records and the
//! [`Store`] seam the manager writes through; [`sqlite_store::SqliteStore`] is the
//! production backend.
//!
//! ## Key Abstractions
//! - **Insert-only history**: no update or delete path exists; rows get a surrogate `id`
//!   assigned by the store and are never touched again
//! - **Opaque details**: an event's `details` is a serialized document stored verbatim
//! - **Row-level atomicity**: each insert is one statement; the manager does not wrap a
//!   reading and its companion alert in a transaction
//!
//! ## Error Handling Strategy
//! Store failures surface as [`StoreError`]. The caller decides what a failure means;
//! the manager logs and carries on with the message's other side effects.

pub mod sqlite_store;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use sqlite_store::SqliteStore;

/// Wire and storage format of every timestamp: UTC, second precision.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

/// One temperature/humidity sample from a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Alert,
    Control,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Alert => "ALERT",
            EventType::Control => "CONTROL",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALERT" => Ok(EventType::Alert),
            "CONTROL" => Ok(EventType::Control),
            other => Err(StoreError::Corrupt(format!("unknown event type {:?}", other))),
        }
    }
}

/// A discrete occurrence: an alert raised by the manager or a control message received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub kind: EventType,
    /// Serialized structured payload, not interpreted by the store
    pub details: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub id: i64,
    pub reading: Reading,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub event: Event,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Backend(#[from] sqlx::Error),

    #[error("Store operation timed out")]
    Timeout,

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Append-only history of readings and events.
///
/// Implementations must accept concurrent callers; every `record_*` call is atomic on its own.
#[async_trait]
pub trait Store: Send + Sync {
    /// Creates the tables if they don't exist yet. Idempotent.
    async fn prepare(&self) -> Result<(), StoreError>;

    async fn record_reading(&self, reading: &Reading) -> Result<i64, StoreError>;

    async fn record_event(&self, event: &Event) -> Result<i64, StoreError>;

    /// Newest first.
    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError>;

    /// Newest first, optionally restricted to one event type.
    async fn recent_events(
        &self,
        kind: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_have_second_precision() {
        let ts = now();
        let formatted = format_ts(&ts);
        assert!(formatted.ends_with('Z'));
        assert_eq!(formatted.len(), "2024-01-01T00:00:00Z".len());
        assert_eq!(parse_ts(&formatted).unwrap(), ts);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(EventType::Alert.to_string(), "ALERT");
        assert_eq!("CONTROL".parse::<EventType>().unwrap(), EventType::Control);
        assert!("ACTION".parse::<EventType>().is_err());
    }
}
