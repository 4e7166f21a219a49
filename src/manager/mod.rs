//! # Data Manager
//!
//! The one component with state that matters: it consumes all telemetry, keeps the relay's
//! on/off view, writes the history and publishes commands and alerts.
//!
//! ## Module Architecture
//!
//! ```text
//! manager/
//! ├── router.rs          - Topic classification, first match wins
//! ├── payload.rs         - Sensor / control / echo payload parsing
//! ├── hysteresis.rs      - Relay state and the two-threshold controller
//! ├── alert.rs           - Alert payload and emitter (publish + ALERT event)
//! ├── engine.rs          - Lifecycle state machine and per-message dispatch
//! ├── manager_handle.rs  - Task spawning and graceful shutdown
//! └── error.rs           - Handler and lifecycle errors, I/O deadlines
//! ```
//!
//! ## Ownership of the relay flag
//!
//! `RelayControlState` lives inside the active manager and is only touched by its dispatch
//! path, which handles one message at a time. Other tasks observe it through a `watch`
//! channel and never write it.
//!
//! ## Restart behaviour
//!
//! The flag starts OFF on every start and is not rebuilt from the event log. Until a reading
//! crosses a threshold or the actuator echoes its state, the local view may disagree with the
//! physical relay.

pub mod alert;
pub mod engine;
pub mod error;
pub mod hysteresis;
pub mod manager_handle;
pub mod payload;
pub mod router;

pub use alert::{Alert, AlertEmitter, AlertOutcome};
pub use engine::{
    Active, DataManager, Deactivated, Dispatch, Initializing, ManagerSettings, ManagerStatus,
    ReadingOutcome,
};
pub use error::{HandlerError, ManagerError};
pub use hysteresis::{HysteresisController, RelayCommand, RelayControlState};
pub use manager_handle::DataManagerHandle;
pub use router::{classify, Route};
