//! # MQTT Transport Adapter
//!
//! Gives the data manager its view of the bus: a connection to the broker, a
//! subscription set derived from the configured topics, a serial stream of inbound
//! messages and a way to publish.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings and client id for one connection
//! ├── message_manager.rs  - Inbound message type, Publisher seam, transport errors
//! └── mqtt_handler.rs     - rumqttc connection, receive pump and connection status
//! ```
//!
//! ## Delivery Model
//!
//! Inbound publishes are not handled in a callback. The receive pump pushes them into a
//! bounded `tokio::mpsc` channel and the manager drains that channel one message at a
//! time, so handling never runs concurrently with itself. A full channel back-pressures
//! the pump, which in turn stops polling the broker.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use message_manager::{InboundMessage, Publisher, TransportError};
pub use mqtt_handler::{ConnectionState, MqttHandler, MqttStatus};
