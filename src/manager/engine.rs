//! Data manager with statum state machine for its lifecycle
//!
//! Consumes every inbound bus message, persists the history, drives the relay and
//! raises alerts. Messages are handled strictly one at a time; each dispatch runs to
//! completion (at most a few bounded store writes and publishes) before the next one
//! is taken off the channel.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//! ```
//!
//! # Dispatch
//!
//! ```text
//! InboundMessage ──► router::classify ──┬─► sensor  ──► Store + AlertEmitter + HysteresisController
//!                                       ├─► control ──► Store (CONTROL event)
//!                                       ├─► echo    ──► RelayControlState (no command)
//!                                       ├─► alerts  ──► observed only
//!                                       └─► other   ──► logged
//! ```

use chrono::SubsecRound;
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::alert::{Alert, AlertEmitter, AlertOutcome};
use super::error::{bounded_publish, bounded_store, HandlerError, ManagerError};
use super::hysteresis::{HysteresisController, RelayCommand, RelayControlState};
use super::payload::{parse_control, EchoPayload, SensorPayload};
use super::router::{classify, Route};
use crate::config::{Config, Topics};
use crate::mqtt::{InboundMessage, Publisher, TransportError};
use crate::persistence::{Event, EventType, Reading, Store};

pub const CONTROL_SOURCE: &str = "button";

/// Settings the manager needs at runtime, resolved once from the loaded config.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub relay_id: String,
    pub temp_on: f64,
    pub temp_off: f64,
    /// Bound for each store write and each publish
    pub io_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            relay_id: config.relay.relay_id.clone(),
            temp_on: config.relay.temp_on,
            temp_off: config.relay.temp_off,
            io_timeout: config.storage.io_timeout(),
        }
    }
}

/// Running counters, broadcast after every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStatus {
    pub messages_handled: u64,
    pub readings_stored: u64,
    pub events_stored: u64,
    pub alerts_raised: u64,
    pub commands_sent: u64,
    pub echoes_applied: u64,
    pub malformed: u64,
    pub failures: u64,
}

/// Result of handling a sensor reading.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadingOutcome {
    /// Row id, `None` if the insert failed
    pub reading_id: Option<i64>,
    /// Present when the reading was at or above the upper threshold
    pub alert: Option<AlertOutcome>,
    /// Present only when a command was published and committed
    pub command: Option<RelayCommand>,
    /// A command was due but its publish failed
    pub command_failed: bool,
}

/// What a single dispatch did.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Reading(ReadingOutcome),
    Control { event_id: i64 },
    Echo { on: bool, changed: bool },
    AlertObserved,
    Unhandled,
}

/// States for the data manager lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum DataManagerState {
    Initializing, // Collaborators wired, thresholds validated
    Configured,   // Schema ready
    Active,       // Consuming messages
    Deactivating, // Loop left, releasing resources
    Deactivated,  // Done
}

#[machine]
pub struct DataManager<S: DataManagerState> {
    name: String,
    inbound: mpsc::Receiver<InboundMessage>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn Store>,
    topics: Topics,
    settings: ManagerSettings,
    controller: HysteresisController,
    alerts: AlertEmitter,
    relay: RelayControlState,
    relay_tx: watch::Sender<RelayControlState>,
    status: ManagerStatus,
    status_tx: watch::Sender<ManagerStatus>,
}

impl<S: DataManagerState> DataManager<S> {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn relay_state(&self) -> &RelayControlState {
        &self.relay
    }

    pub fn status(&self) -> &ManagerStatus {
        &self.status
    }

    pub fn watch_relay(&self) -> watch::Receiver<RelayControlState> {
        self.relay_tx.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ManagerStatus> {
        self.status_tx.subscribe()
    }
}

impl DataManager<Initializing> {
    /// Wires the collaborators. Rejects thresholds that would leave no hysteresis band.
    pub fn create(
        name: String,
        inbound: mpsc::Receiver<InboundMessage>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn Store>,
        topics: Topics,
        settings: ManagerSettings,
    ) -> Result<Self, ManagerError> {
        info!("Initializing data manager: {}", name);

        let controller = HysteresisController::new(settings.temp_on, settings.temp_off)
            .inspect_err(|e| error!("Rejecting configuration: {}", e))?;

        let relay = RelayControlState::new(settings.relay_id.clone());
        let (relay_tx, _) = watch::channel(relay.clone());
        let (status_tx, _) = watch::channel(ManagerStatus::default());
        let alerts = AlertEmitter::new(topics.alerts.clone(), settings.io_timeout);

        Ok(Self::new(
            name,
            inbound,
            publisher,
            store,
            topics,
            settings,
            controller,
            alerts,
            relay,
            relay_tx,
            ManagerStatus::default(),
            status_tx,
        ))
    }

    /// Prepares the store schema.
    pub async fn configure(self) -> Result<DataManager<Configured>, ManagerError> {
        info!("Configuring data manager: {}", self.name);

        bounded_store(self.settings.io_timeout, self.store.prepare())
            .await
            .inspect_err(|e| error!("Failed to prepare store: {}", e))?;

        debug!(
            "Relay {} switches ON at >= {} and OFF at <= {}",
            self.settings.relay_id,
            self.controller.temp_on(),
            self.controller.temp_off()
        );
        Ok(self.transition())
    }
}

impl DataManager<Configured> {
    pub fn activate(self) -> DataManager<Active> {
        // No reconciliation with the physical relay: the flag stays OFF until a
        // crossing reading or an echo says otherwise.
        info!(
            "Activating data manager: {} (relay {} assumed OFF until resynchronized)",
            self.name, self.relay.relay_id
        );
        self.transition()
    }
}

impl DataManager<Active> {
    /// Handles one message. Never panics on bad input; the error says what went wrong.
    pub async fn dispatch(&mut self, msg: &InboundMessage) -> Result<Dispatch, HandlerError> {
        self.status.messages_handled += 1;

        let result = match classify(&msg.topic, &self.topics) {
            Route::SensorReading => self.handle_reading(msg).await.map(Dispatch::Reading),
            Route::Control => self.handle_control(msg).await,
            Route::RelayEcho => self.handle_echo(msg),
            Route::Alert => {
                debug!("Alert observed on {}: {}", msg.topic, msg.payload_text());
                Ok(Dispatch::AlertObserved)
            }
            Route::Unhandled => {
                info!("Unhandled topic: {}", msg.topic);
                Ok(Dispatch::Unhandled)
            }
        };

        match &result {
            Err(HandlerError::Malformed { .. }) => self.status.malformed += 1,
            Err(_) => self.status.failures += 1,
            Ok(_) => {}
        }
        self.status_tx.send_replace(self.status.clone());
        result
    }

    async fn handle_reading(&mut self, msg: &InboundMessage) -> Result<ReadingOutcome, HandlerError> {
        let controller = self.controller;
        let payload = SensorPayload::parse(msg)?;
        let timestamp = msg.received_at.trunc_subsecs(0);
        let mut outcome = ReadingOutcome::default();

        let reading = Reading {
            timestamp,
            sensor_id: payload.sensor_id,
            temperature: payload.temperature,
            humidity: payload.humidity,
        };
        match bounded_store(self.settings.io_timeout, self.store.record_reading(&reading)).await {
            Ok(id) => {
                self.status.readings_stored += 1;
                outcome.reading_id = Some(id);
            }
            Err(e) => {
                // alerting and relay control still run on the same value
                error!("Failed to store reading from {}: {}", reading.sensor_id, e);
                self.status.failures += 1;
            }
        }

        if controller.is_high(reading.temperature) {
            let alert = Alert::temp_high(reading.temperature, timestamp);
            let result = self
                .alerts
                .emit(&alert, self.publisher.as_ref(), self.store.as_ref())
                .await;
            self.status.alerts_raised += 1;
            if result.recorded {
                self.status.events_stored += 1;
            }
            if !result.published || !result.recorded {
                self.status.failures += 1;
            }
            outcome.alert = Some(result);
        }

        if let Some(command) = controller.decide(&self.relay, reading.temperature) {
            match self.send_command(&command).await {
                Ok(()) => outcome.command = Some(command),
                Err(e) => {
                    error!(
                        "Failed to send relay command {} -> {}: {}",
                        command.relay_id,
                        on_off(command.on),
                        e
                    );
                    self.status.failures += 1;
                    outcome.command_failed = true;
                }
            }
        }

        debug!(
            "Reading {} T={} H={} stored={:?}",
            reading.sensor_id, reading.temperature, reading.humidity, outcome.reading_id
        );
        Ok(outcome)
    }

    /// Publishes the command and, only once it is out, commits it to the local flag.
    async fn send_command(&mut self, command: &RelayCommand) -> Result<(), TransportError> {
        let payload = serde_json::json!({ "relay_id": command.relay_id, "on": command.on })
            .to_string()
            .into_bytes();
        bounded_publish(
            self.settings.io_timeout,
            self.publisher.publish(&self.topics.relay_set, payload),
        )
        .await?;

        self.relay.commit(command);
        self.relay_tx.send_replace(self.relay.clone());
        self.status.commands_sent += 1;
        info!("Relay {} -> {}", command.relay_id, on_off(command.on));
        Ok(())
    }

    async fn handle_control(&mut self, msg: &InboundMessage) -> Result<Dispatch, HandlerError> {
        let details = parse_control(msg)?;
        let event = Event {
            timestamp: msg.received_at.trunc_subsecs(0),
            source: CONTROL_SOURCE.to_string(),
            kind: EventType::Control,
            details,
        };
        let event_id = bounded_store(self.settings.io_timeout, self.store.record_event(&event)).await?;
        self.status.events_stored += 1;
        debug!("Control event stored: {}", event.details);
        Ok(Dispatch::Control { event_id })
    }

    fn handle_echo(&mut self, msg: &InboundMessage) -> Result<Dispatch, HandlerError> {
        let echo = EchoPayload::parse(msg, &self.relay.relay_id)?;
        let changed = self.relay.apply_echo(echo.on);
        self.relay_tx.send_replace(self.relay.clone());
        self.status.echoes_applied += 1;
        if changed {
            info!("Relay state echoed -> {} (local view corrected)", on_off(echo.on));
        } else {
            debug!("Relay state echoed -> {}", on_off(echo.on));
        }
        Ok(Dispatch::Echo {
            on: echo.on,
            changed,
        })
    }

    /// Main consumption loop
    ///
    /// Runs until the shutdown signal fires or the inbound channel closes. Handler
    /// errors are logged and never end the loop.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> DataManager<Deactivating> {
        info!("Starting message loop for: {}", self.name);

        loop {
            let msg = tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for: {}", self.name);
                    break;
                }
                msg = self.inbound.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        info!("Inbound channel closed for: {}", self.name);
                        break;
                    }
                },
            };

            match self.dispatch(&msg).await {
                Ok(outcome) => debug!("Handled {}: {:?}", msg.topic, outcome),
                Err(e @ HandlerError::Malformed { .. }) => {
                    warn!("Dropping message {:?}: {} (payload: {})", msg.topic, e, msg.payload_text());
                }
                Err(e) => error!("Error handling message on {}: {}", msg.topic, e),
            }
        }

        info!("Transitioning to Deactivating state: {}", self.name);
        self.transition()
    }

    pub fn deactivate(self) -> DataManager<Deactivating> {
        info!("Deactivating data manager: {}", self.name);
        self.transition()
    }
}

impl DataManager<Deactivating> {
    /// Closes the inbound channel and the store.
    pub async fn shutdown(mut self) -> DataManager<Deactivated> {
        info!("Shutting down data manager: {}", self.name);
        self.inbound.close();
        self.store.close().await;
        info!(
            "Data manager stopped: {} ({:?}, relay {})",
            self.name,
            self.status,
            on_off(self.relay.on)
        );
        self.transition()
    }
}

impl DataManager<Deactivated> {}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}
