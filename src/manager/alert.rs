//! High-temperature alerts.
//!
//! An alert is published on the alerts topic and recorded as an `ALERT` event. The two
//! side effects are independent: either may fail without affecting the other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};

use super::error::{bounded_publish, bounded_store};
use crate::mqtt::Publisher;
use crate::persistence::{Event, EventType, Store};

pub const ALERT_SOURCE: &str = "DataManager";

/// Alert payload as it appears on the bus and in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub level: String,
    pub reason: String,
    pub value: f64,
    #[serde(with = "ts_seconds_str")]
    pub ts: DateTime<Utc>,
}

impl Alert {
    pub fn temp_high(value: f64, ts: DateTime<Utc>) -> Self {
        Alert {
            level: "ALARM".to_string(),
            reason: "TEMP_HIGH".to_string(),
            value,
            ts,
        }
    }
}

/// What happened to one alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertOutcome {
    pub published: bool,
    pub recorded: bool,
}

#[derive(Debug, Clone)]
pub struct AlertEmitter {
    topic: String,
    io_timeout: Duration,
}

impl AlertEmitter {
    pub fn new(topic: impl Into<String>, io_timeout: Duration) -> Self {
        Self {
            topic: topic.into(),
            io_timeout,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn emit(
        &self,
        alert: &Alert,
        publisher: &dyn Publisher,
        store: &dyn Store,
    ) -> AlertOutcome {
        let details = match serde_json::to_string(alert) {
            Ok(details) => details,
            Err(e) => {
                error!("Failed to serialize alert {:?}: {}", alert, e);
                return AlertOutcome::default();
            }
        };

        let mut outcome = AlertOutcome::default();

        match bounded_publish(
            self.io_timeout,
            publisher.publish(&self.topic, details.clone().into_bytes()),
        )
        .await
        {
            Ok(()) => outcome.published = true,
            Err(e) => error!("Failed to publish alert on {}: {}", self.topic, e),
        }

        let event = Event {
            timestamp: alert.ts,
            source: ALERT_SOURCE.to_string(),
            kind: EventType::Alert,
            details,
        };
        match bounded_store(self.io_timeout, store.record_event(&event)).await {
            Ok(_) => outcome.recorded = true,
            Err(e) => error!("Failed to record alert event: {}", e),
        }

        if !outcome.published || !outcome.recorded {
            warn!("Alert {} at {} only partially delivered: {:?}", alert.reason, alert.value, outcome);
        }
        outcome
    }
}

/// Second-precision UTC timestamps as `YYYY-MM-DDTHH:MM:SSZ` strings.
mod ts_seconds_str {
    use crate::persistence::{format_ts, parse_ts};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_ts(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_ts(&raw).map_err(serde::de::Error::custom)
    }
}
