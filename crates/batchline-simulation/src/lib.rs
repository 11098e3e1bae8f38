//! Batchline Simulation
//!
//! Chefs produce orders into a bounded queue, deliverers consume them and
//! book the income, and every worker meets the others at a barrier after
//! each batch. An operator can pause either side, close a batch, ask for
//! status and shut the run down.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use batchline_simulation::{Command, ObserverRegistry, SimulationConfig, WorkerCoordinator};
//!
//! # async fn demo() -> batchline_simulation::SimulationResult<()> {
//! let running = WorkerCoordinator::new(SimulationConfig::default(), ObserverRegistry::new())?
//!     .start()?;
//! running.handle().send(Command::PauseDelivery).await?;
//! let report = running.shutdown().await?;
//! println!("income: {}", report.total());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod error;
pub mod observer;
pub mod order;
pub mod randomness;
pub mod worker;

pub use config::{BatchMode, SimulationConfig};
pub use control::{Command, ControlHandle, UnknownCommand};
pub use coordinator::{RunningSimulation, SimulationReport, WorkerCoordinator};
pub use error::{SimulationError, SimulationResult};
pub use observer::{
    CallbackObserver, ChannelObserver, EventFilter, EventKind, EventType, MemoryObserver, Observer,
    ObserverRegistry, SimulationEvent, StatusSnapshot,
};
pub use order::{format_cents, Order, OrderGenerator};
pub use randomness::SeededRng;
pub use worker::{BatchQuota, WorkerId, WorkerRole, WorkerState, WorkerSummary};
