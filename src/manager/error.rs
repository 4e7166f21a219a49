//! Error definitions for the data manager core

use crate::mqtt::TransportError;
use crate::persistence::StoreError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Outcome of handling a single inbound message.
///
/// The run loop logs these and moves on; none of them stop consumption.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload is not valid JSON, or a required field is missing or of the wrong type
    #[error("Malformed message on {topic}: {reason}")]
    Malformed { topic: String, reason: String },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Publish failure: {0}")]
    Publish(#[from] TransportError),
}

impl HandlerError {
    pub fn malformed(topic: &str, reason: impl ToString) -> Self {
        HandlerError::Malformed {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Lifecycle errors of the data manager itself
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Invalid thresholds: temp_off ({off}) must be below temp_on ({on})")]
    InvalidThresholds { on: f64, off: f64 },

    #[error("Store could not be prepared: {0}")]
    Store(#[from] StoreError),

    #[error("Thread error: {0}")]
    ThreadError(String),
}

/// Runs a store call under `limit`, turning an elapsed deadline into [`StoreError::Timeout`].
pub async fn bounded_store<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout)?
}

/// Runs a publish under `limit`, turning an elapsed deadline into [`TransportError::Timeout`].
pub async fn bounded_publish<F>(limit: Duration, fut: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout)?
}
