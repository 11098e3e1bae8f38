//! Error types for the simulation
//!
//! Worker loops deal with cancellation and timeouts themselves; everything
//! that reaches a caller as a `SimulationError` either stopped the run or
//! prevented it from starting.

//-----------------------------------------------------------------------------
// Error Types
//-----------------------------------------------------------------------------

use batchline_sync::SyncError;
use thiserror::Error;

/// Main error type for the simulation crate.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// The configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A synchronization primitive failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Reading a config file or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config or report (de)serialization failed.
    #[error("Serialization/Deserialization error: {0}")]
    Serialization(String),

    /// A worker task panicked or could not be joined.
    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed { worker: String, reason: String },

    /// The controller is gone, so commands can no longer be delivered.
    #[error("Control channel closed")]
    ControlChannelClosed,
}

impl From<toml::de::Error> for SimulationError {
    fn from(err: toml::de::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for SimulationError {
    fn from(err: toml::ser::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SimulationError {
    fn from(err: serde_json::Error) -> Self {
        SimulationError::Serialization(err.to_string())
    }
}

/// Result type alias for simulation operations.
pub type SimulationResult<T> = Result<T, SimulationError>;
