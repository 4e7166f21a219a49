//! SQLite backend for the [`Store`] trait, built on `sqlx`.

use super::{
    format_ts, parse_ts, Event, EventType, Reading, Store, StoreError, StoredEvent, StoredReading,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

const CREATE_READINGS: &str = "
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    sensor_id TEXT,
    temperature REAL,
    humidity REAL
)";

const CREATE_EVENTS: &str = "
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts TEXT NOT NULL,
    source TEXT,
    type TEXT,
    details TEXT
)";

#[derive(Clone)]
pub struct SqliteStore {
    inner: sqlx::SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if missing) the database behind `url`, e.g. `sqlite://smart_home.db`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!("Opened SQLite store at {}", url);
        Ok(Self { inner: pool })
    }

    /// Private in-memory database. One connection that never expires, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { inner: pool })
    }

    pub fn inner(&self) -> &sqlx::SqlitePool {
        &self.inner
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn prepare(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_READINGS).execute(&self.inner).await?;
        sqlx::query(CREATE_EVENTS).execute(&self.inner).await?;
        debug!("Schema ready");
        Ok(())
    }

    async fn record_reading(&self, reading: &Reading) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO readings (ts, sensor_id, temperature, humidity) VALUES (?, ?, ?, ?)",
        )
        .bind(format_ts(&reading.timestamp))
        .bind(&reading.sensor_id)
        .bind(reading.temperature)
        .bind(reading.humidity)
        .execute(&self.inner)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn record_event(&self, event: &Event) -> Result<i64, StoreError> {
        let result =
            sqlx::query("INSERT INTO events (ts, source, type, details) VALUES (?, ?, ?, ?)")
                .bind(format_ts(&event.timestamp))
                .bind(&event.source)
                .bind(event.kind.as_str())
                .bind(&event.details)
                .execute(&self.inner)
                .await?;
        Ok(result.last_insert_rowid())
    }

    async fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>, StoreError> {
        let rows: Vec<(i64, String, Option<String>, Option<f64>, Option<f64>)> = sqlx::query_as(
            "SELECT id, ts, sensor_id, temperature, humidity FROM readings ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.inner)
        .await?;

        rows.into_iter()
            .map(|(id, ts, sensor_id, temperature, humidity)| {
                Ok(StoredReading {
                    id,
                    reading: Reading {
                        timestamp: parse_ts(&ts)?,
                        sensor_id: sensor_id.unwrap_or_default(),
                        temperature: temperature.unwrap_or(f64::NAN),
                        humidity: humidity.unwrap_or(f64::NAN),
                    },
                })
            })
            .collect()
    }

    async fn recent_events(
        &self,
        kind: Option<EventType>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<(i64, String, Option<String>, Option<String>, Option<String>)> = match kind {
            Some(kind) => {
                sqlx::query_as(
                    "SELECT id, ts, source, type, details FROM events WHERE type = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(kind.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.inner)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, ts, source, type, details FROM events ORDER BY id DESC LIMIT ?",
                )
                .bind(i64::from(limit))
                .fetch_all(&self.inner)
                .await?
            }
        };

        rows.into_iter()
            .map(|(id, ts, source, kind, details)| {
                Ok(StoredEvent {
                    id,
                    event: Event {
                        timestamp: parse_ts(&ts)?,
                        source: source.unwrap_or_default(),
                        kind: kind.unwrap_or_default().parse()?,
                        details: details.unwrap_or_default(),
                    },
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.inner.close().await;
        info!("SQLite store closed");
    }
}
