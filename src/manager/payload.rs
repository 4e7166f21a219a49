//! Inbound payload shapes.
//!
//! Devices publish JSON. Numeric fields are accepted as JSON numbers or numeric
//! strings; anything non-finite is rejected.

use serde::Deserialize;

use super::error::HandlerError;
use super::router::last_segment;
use crate::mqtt::InboundMessage;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn finite(&self) -> Option<f64> {
        let value = match self {
            Numeric::Number(n) => *n,
            Numeric::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

#[derive(Debug, Deserialize)]
struct RawSensor {
    #[serde(default)]
    sensor_id: Option<String>,
    temperature: Numeric,
    humidity: Numeric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorPayload {
    pub sensor_id: String,
    pub temperature: f64,
    pub humidity: f64,
}

impl SensorPayload {
    /// Parses a sensor message; the sensor id falls back to the topic's last segment.
    pub fn parse(msg: &InboundMessage) -> Result<Self, HandlerError> {
        let raw: RawSensor = serde_json::from_slice(&msg.payload)
            .map_err(|e| HandlerError::malformed(&msg.topic, e))?;

        let temperature = raw.temperature.finite().ok_or_else(|| {
            HandlerError::malformed(&msg.topic, "temperature is not a finite number")
        })?;
        let humidity = raw
            .humidity
            .finite()
            .ok_or_else(|| HandlerError::malformed(&msg.topic, "humidity is not a finite number"))?;

        let sensor_id = match raw.sensor_id {
            Some(id) if !id.is_empty() => id,
            _ => last_segment(&msg.topic).to_string(),
        };

        Ok(SensorPayload {
            sensor_id,
            temperature,
            humidity,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEcho {
    #[serde(default)]
    relay_id: Option<String>,
    on: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EchoPayload {
    pub on: bool,
}

impl EchoPayload {
    /// Parses a relay state echo. An echo naming a different relay is rejected.
    pub fn parse(msg: &InboundMessage, relay_id: &str) -> Result<Self, HandlerError> {
        let raw: RawEcho = serde_json::from_slice(&msg.payload)
            .map_err(|e| HandlerError::malformed(&msg.topic, e))?;

        if let Some(id) = raw.relay_id {
            if id != relay_id {
                return Err(HandlerError::malformed(
                    &msg.topic,
                    format!("echo for relay {:?}, expected {:?}", id, relay_id),
                ));
            }
        }
        Ok(EchoPayload { on: raw.on })
    }
}

/// Control payloads are opaque: any JSON document, stored as the device sent it.
pub fn parse_control(msg: &InboundMessage) -> Result<String, HandlerError> {
    let text = std::str::from_utf8(&msg.payload)
        .map_err(|e| HandlerError::malformed(&msg.topic, e))?;
    serde_json::from_str::<serde::de::IgnoredAny>(text)
        .map_err(|e| HandlerError::malformed(&msg.topic, e))?;
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage::new(topic, payload.as_bytes().to_vec())
    }

    #[test]
    fn sensor_payload_with_numbers() {
        let p = SensorPayload::parse(&msg(
            "home/sensors/dht1",
            r#"{"sensor_id":"dht1","temperature":30.5,"humidity":41.2}"#,
        ))
        .unwrap();
        assert_eq!(p.sensor_id, "dht1");
        assert_eq!(p.temperature, 30.5);
        assert_eq!(p.humidity, 41.2);
    }

    #[test]
    fn sensor_payload_accepts_numeric_strings_and_defaults_id() {
        let p = SensorPayload::parse(&msg(
            "home/sensors/dht7",
            r#"{"temperature":"29.5","humidity":40}"#,
        ))
        .unwrap();
        assert_eq!(p.sensor_id, "dht7");
        assert_eq!(p.temperature, 29.5);
        assert_eq!(p.humidity, 40.0);
    }

    #[test]
    fn sensor_payload_missing_temperature_is_malformed() {
        let err = SensorPayload::parse(&msg("home/sensors/dht1", r#"{"humidity":40}"#)).unwrap_err();
        match err {
            HandlerError::Malformed { topic, reason } => {
                assert_eq!(topic, "home/sensors/dht1");
                assert!(reason.contains("temperature"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn sensor_payload_rejects_garbage() {
        for payload in [
            "not json",
            r#"{"temperature":null,"humidity":40}"#,
            r#"{"temperature":"hot","humidity":40}"#,
            r#"{"temperature":"NaN","humidity":40}"#,
            r#"{"temperature":30,"humidity":"inf"}"#,
        ] {
            assert!(
                matches!(
                    SensorPayload::parse(&msg("home/sensors/dht1", payload)),
                    Err(HandlerError::Malformed { .. })
                ),
                "accepted {}",
                payload
            );
        }
    }

    #[test]
    fn echo_requires_on_and_matching_relay() {
        let topic = "home/actuators/relay1/state";
        assert!(EchoPayload::parse(&msg(topic, r#"{"relay_id":"relay1","on":true}"#), "relay1")
            .unwrap()
            .on);
        assert!(!EchoPayload::parse(&msg(topic, r#"{"on":false}"#), "relay1").unwrap().on);
        assert!(EchoPayload::parse(&msg(topic, r#"{"relay_id":"relay1"}"#), "relay1").is_err());
        assert!(EchoPayload::parse(&msg(topic, r#"{"on":"yes"}"#), "relay1").is_err());
        assert!(EchoPayload::parse(&msg(topic, r#"{"relay_id":"relay2","on":true}"#), "relay1").is_err());
    }

    #[test]
    fn control_payload_is_kept_verbatim() {
        let raw = r#"{"state":"pressed","button_id":"button1","extra":{"z":1,"a":2}}"#;
        let details = parse_control(&msg("home/controls/button1", &format!("  {}\n", raw))).unwrap();
        assert_eq!(details, raw);
        assert!(parse_control(&msg("home/controls/button1", "pressed")).is_err());
        assert!(parse_control(&msg("home/controls/button1", r#"{"state":"#)).is_err());
    }

    #[test]
    fn control_payload_must_be_utf8() {
        let bad = InboundMessage::new("home/controls/button1", vec![0xff, 0xfe, b'{', b'}']);
        assert!(matches!(parse_control(&bad), Err(HandlerError::Malformed { .. })));
    }
}
