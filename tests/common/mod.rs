//! Test doubles for the bus and the store.

#![allow(dead_code)]

use async_trait::async_trait;
use datamanager::config::{Config, Topics};
use datamanager::manager::{Active, DataManager, Initializing, ManagerSettings};
use datamanager::mqtt::{InboundMessage, Publisher, TransportError};
use datamanager::persistence::{
    Event, EventType, Reading, SqliteStore, Store, StoreError, StoredEvent, StoredReading,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Records every publish; can be switched into a failing mode.
#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<(String, serde_json::Value)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, serde_json::Value)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<serde_json::Value> {
        self.sent()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let value = serde_json::from_slice(&payload).expect("manager publishes JSON");
        self.sent.lock().unwrap().push((topic.to_string(), value));
        Ok(())
    }
}

/// Wraps a real store and fails writes while `failing` is set.
pub struct FlakyStore {
    inner: SqliteStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Backend(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn prepare(&self) -> Result<(), StoreError> {
        self.inner.prepare().await
    }

    async fn record_reading(&self, reading: &Reading) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.record_reading(reading).await
    }

    async fn record_event(&self, event: &Event) -> Result<i64, StoreError> {
        self.check()?;
        self.inner.record_event(event).await
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError> {
        self.inner.recent_readings(limit).await
    }

    async fn recent_events(
        &self,
        kind: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.inner.recent_events(kind, limit).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// A bus whose publishes never complete.
pub struct HangingPublisher;

#[async_trait]
impl Publisher for HangingPublisher {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
        std::future::pending().await
    }
}

/// A real store whose writes never complete. Schema setup and reads go through.
pub struct HangingStore {
    inner: SqliteStore,
}

impl HangingStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
        }
    }
}

#[async_trait]
impl Store for HangingStore {
    async fn prepare(&self) -> Result<(), StoreError> {
        self.inner.prepare().await
    }

    async fn record_reading(&self, _reading: &Reading) -> Result<i64, StoreError> {
        std::future::pending().await
    }

    async fn record_event(&self, _event: &Event) -> Result<i64, StoreError> {
        std::future::pending().await
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError> {
        self.inner.recent_readings(limit).await
    }

    async fn recent_events(
        &self,
        kind: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.inner.recent_events(kind, limit).await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

/// Settings with a short I/O bound, for the hanging doubles.
pub fn fast_timeout_settings() -> ManagerSettings {
    ManagerSettings {
        io_timeout: Duration::from_millis(50),
        ..ManagerSettings::default()
    }
}

pub fn topics() -> Topics {
    Config::default().topics()
}

pub fn reading_msg(temperature: f64) -> InboundMessage {
    InboundMessage::new(
        "home/sensors/dht1",
        serde_json::json!({ "sensor_id": "dht1", "temperature": temperature, "humidity": 45.0 })
            .to_string(),
    )
}

pub fn echo_msg(on: bool) -> InboundMessage {
    InboundMessage::new(
        "home/actuators/relay1/state",
        serde_json::json!({ "relay_id": "relay1", "on": on }).to_string(),
    )
}

pub fn button_msg(state: &str) -> InboundMessage {
    InboundMessage::new(
        "home/controls/button1",
        serde_json::json!({ "button_id": "button1", "state": state }).to_string(),
    )
}

/// An active manager plus its collaborators. The inbound sender is kept alive so the
/// channel stays open while tests call `dispatch` directly.
pub struct Harness {
    pub manager: DataManager<Active>,
    pub publisher: Arc<RecordingPublisher>,
    pub store: Arc<FlakyStore>,
    pub inbound: mpsc::Sender<InboundMessage>,
}

/// Runs a manager through create, configure and activate on the given collaborators.
pub async fn active_manager(
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn Store>,
    settings: ManagerSettings,
) -> (DataManager<Active>, mpsc::Sender<InboundMessage>) {
    let (inbound, inbound_rx) = mpsc::channel(16);
    let manager = DataManager::<Initializing>::create(
        "DataManager".to_string(),
        inbound_rx,
        publisher,
        store,
        topics(),
        settings,
    )
    .unwrap()
    .configure()
    .await
    .unwrap()
    .activate();
    (manager, inbound)
}

pub async fn harness() -> Harness {
    harness_on(Arc::new(FlakyStore::new().await)).await
}

/// Like [`harness`] but on an existing store, e.g. to simulate a process restart.
pub async fn harness_on(store: Arc<FlakyStore>) -> Harness {
    let publisher = Arc::new(RecordingPublisher::default());
    let (manager, inbound) =
        active_manager(publisher.clone(), store.clone(), ManagerSettings::default()).await;

    Harness {
        manager,
        publisher,
        store,
        inbound,
    }
}
