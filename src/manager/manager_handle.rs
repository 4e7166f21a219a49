//! Handle for running the data manager in a tokio task
//!
//! Wires the manager through its lifecycle (create, configure, activate), spawns the
//! message loop and gives the caller watchers for the relay state and the counters
//! plus a graceful shutdown.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::{DataManager, Initializing, ManagerSettings, ManagerStatus};
use super::error::ManagerError;
use super::hysteresis::RelayControlState;
use crate::config::Topics;
use crate::mqtt::{InboundMessage, Publisher};
use crate::persistence::Store;

#[derive(Debug)]
pub struct DataManagerHandle {
    pub name: String,

    task_handle: Option<JoinHandle<ManagerStatus>>,

    shutdown_tx: Option<oneshot::Sender<()>>,

    relay_rx: watch::Receiver<RelayControlState>,

    status_rx: watch::Receiver<ManagerStatus>,
}

impl DataManagerHandle {
    /// Configures and activates a manager, then spawns its message loop.
    ///
    /// Fails without spawning anything if the thresholds are invalid or the store
    /// cannot be prepared.
    pub async fn start(
        name: String,
        inbound: mpsc::Receiver<InboundMessage>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn Store>,
        topics: Topics,
        settings: ManagerSettings,
    ) -> Result<Self, ManagerError> {
        let manager = DataManager::<Initializing>::create(
            name.clone(),
            inbound,
            publisher,
            store,
            topics,
            settings,
        )?
        .configure()
        .await?;
        let active = manager.activate();

        let relay_rx = active.watch_relay();
        let status_rx = active.watch_status();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task_name = name.clone();
        let task_handle = tokio::spawn(async move {
            debug!("Spawning running data manager: {}", task_name);
            let deactivating = active.run_until_shutdown(shutdown_rx).await;
            let status = deactivating.status().clone();
            deactivating.shutdown().await;
            status
        });

        info!("Data manager running: {}", name);
        Ok(Self {
            name,
            task_handle: Some(task_handle),
            shutdown_tx: Some(shutdown_tx),
            relay_rx,
            status_rx,
        })
    }

    pub fn relay_state(&self) -> watch::Receiver<RelayControlState> {
        self.relay_rx.clone()
    }

    pub fn status(&self) -> watch::Receiver<ManagerStatus> {
        self.status_rx.clone()
    }

    /// Signals the loop to stop and waits for it; returns the final counters.
    pub async fn shutdown(&mut self) -> Result<ManagerStatus, ManagerError> {
        debug!("Sending shutdown signal to data manager: {}", self.name);

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                warn!("Data manager task already terminated: {}", self.name);
            }
        }
        self.join().await
    }

    /// Waits for the loop to end on its own, i.e. when the inbound channel closes.
    pub async fn join(&mut self) -> Result<ManagerStatus, ManagerError> {
        match self.task_handle.take() {
            Some(handle) => match handle.await {
                Ok(status) => {
                    debug!("Data manager task completed: {}", self.name);
                    Ok(status)
                }
                Err(e) => {
                    error!("Data manager task panicked: {} - {}", self.name, e);
                    Err(ManagerError::ThreadError(format!(
                        "Data manager task panicked: {}",
                        e
                    )))
                }
            },
            None => {
                debug!("Data manager already shut down: {}", self.name);
                Ok(self.status_rx.borrow().clone())
            }
        }
    }
}
