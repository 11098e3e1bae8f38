// Purpose: Starts the worker pools and the controller, and shuts a run down cleanly.
//
// The coordinator owns one queue, one barrier and one ledger per run. Workers
// and the controller reach them through a shared WorkerContext. Shutdown
// cancels the run token, closes the queue, breaks the barrier and then
// checks that every produced order is either consumed or still queued.

use std::collections::BTreeMap;
use std::sync::Arc;

use batchline_sync::{shared_barrier, shared_ledger, shared_queue, SyncError, SyncResult};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{BatchMode, SimulationConfig};
use crate::control::{Command, ControlHandle};
use crate::error::{SimulationError, SimulationResult};
use crate::observer::{EventKind, ObserverRegistry, StatusSnapshot};
use crate::order::format_cents;
use crate::randomness::SeededRng;
use crate::worker::{Worker, WorkerContext, WorkerId, WorkerSummary};

const COMMAND_BUFFER: usize = 32;

/// Outcome of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub produced: u64,
    pub consumed: u64,
    /// Orders still queued at shutdown
    pub residual: usize,
    /// Completed batch cycles
    pub batches: u64,
    /// Cumulative income per menu item, in cents
    pub income: BTreeMap<String, u64>,
    pub total_cents: u64,
    pub workers: Vec<WorkerSummary>,
}

impl SimulationReport {
    pub fn total(&self) -> String {
        format_cents(self.total_cents)
    }
}

/// Builds and starts a simulation run
pub struct WorkerCoordinator {
    config: SimulationConfig,
    observers: ObserverRegistry,
}

impl WorkerCoordinator {
    /// Validate `config` and prepare a run reporting to `observers`
    pub fn new(config: SimulationConfig, observers: ObserverRegistry) -> SimulationResult<Self> {
        config.validate()?;
        Ok(Self { config, observers })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Spawn every worker and the controller on the current tokio runtime
    pub fn start(self) -> SimulationResult<RunningSimulation> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(SimulationError::Configuration(
                "a simulation must be started inside a tokio runtime".to_string(),
            ));
        }

        let config = self.config;
        let rng = match config.seed {
            Some(seed) => SeededRng::new(seed),
            None => SeededRng::from_entropy(),
        };
        let seed = rng.seed();

        let ctx = Arc::new(WorkerContext::new(
            &config,
            shared_queue(config.capacity)?,
            shared_barrier(config.barrier_participants())?,
            shared_ledger(),
            self.observers,
        ));

        info!(
            seed,
            chefs = config.chefs,
            deliverers = config.deliverers,
            capacity = config.capacity,
            batch_size = config.batch_size,
            mode = ?config.batch_mode,
            "simulation starting"
        );
        ctx.observers.notify(EventKind::SimulationStarted {
            seed,
            chefs: config.chefs,
            deliverers: config.deliverers,
            capacity: config.capacity,
            batch_size: config.batch_size,
            batch_mode: config.batch_mode,
        });

        let mut workers = Vec::with_capacity(config.workers());
        for index in 1..=config.chefs {
            let worker = Worker::chef(index, rng.fork(index as u64), ctx.clone());
            workers.push((worker.id(), tokio::spawn(worker.run())));
        }
        for index in 1..=config.deliverers {
            let stream = (config.chefs + index) as u64;
            let worker = Worker::deliverer(index, rng.fork(stream), ctx.clone());
            workers.push((worker.id(), tokio::spawn(worker.run())));
        }

        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
        let handle = ControlHandle::new(sender, ctx.cancel.clone());
        let controller = Controller {
            ctx: ctx.clone(),
            commands: receiver,
            batch_mode: config.batch_mode,
        };
        let controller = tokio::spawn(controller.run());

        Ok(RunningSimulation {
            seed,
            handle,
            ctx,
            workers,
            controller,
        })
    }
}

/// A started run
pub struct RunningSimulation {
    seed: u64,
    handle: ControlHandle,
    ctx: Arc<WorkerContext>,
    workers: Vec<(WorkerId, JoinHandle<SimulationResult<WorkerSummary>>)>,
    controller: JoinHandle<SimulationResult<()>>,
}

impl RunningSimulation {
    /// Seed the run was started with
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// A handle for sending commands to this run
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        status_of(&self.ctx)
    }

    /// Request shutdown and wait for it to finish
    pub async fn shutdown(self) -> SimulationResult<SimulationReport> {
        self.handle.request_shutdown();
        self.join().await
    }

    /// Wait until the run is cancelled, then tear it down
    ///
    /// Returns the first worker or controller failure if there was one,
    /// otherwise a report checked for conservation of orders.
    pub async fn join(self) -> SimulationResult<SimulationReport> {
        self.ctx.cancel.cancelled().await;
        debug!("tearing down simulation");
        self.ctx.queue.close();
        self.ctx.barrier.cancel();

        let mut failure: Option<SimulationError> = None;

        match self.controller.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => failure = Some(err),
            Err(join_err) => {
                failure = Some(SimulationError::WorkerFailed {
                    worker: "controller".to_string(),
                    reason: join_err.to_string(),
                })
            }
        }

        let (ids, handles): (Vec<_>, Vec<_>) = self.workers.into_iter().unzip();
        let mut summaries = Vec::with_capacity(ids.len());
        for (id, joined) in ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(summary)) => summaries.push(summary),
                Ok(Err(err)) => {
                    failure.get_or_insert(err);
                }
                Err(join_err) => {
                    failure.get_or_insert(SimulationError::WorkerFailed {
                        worker: id.to_string(),
                        reason: join_err.to_string(),
                    });
                }
            }
        }
        if let Some(err) = failure {
            error!(error = %err, "simulation failed");
            return Err(err);
        }

        let produced = self.ctx.counters.produced();
        let consumed = self.ctx.counters.consumed();
        let residual = self.ctx.queue.len();
        self.ctx.queue.check_invariants()?;
        if produced != consumed + residual as u64 {
            return Err(SyncError::InvariantViolation(format!(
                "{} orders produced but {} consumed and {} still queued",
                produced, consumed, residual
            ))
            .into());
        }

        let report = SimulationReport {
            seed: self.seed,
            produced,
            consumed,
            residual,
            batches: self.ctx.barrier.generation(),
            income: self.ctx.ledger.snapshot()?,
            total_cents: self.ctx.ledger.total()?,
            workers: summaries,
        };

        info!(
            produced,
            consumed,
            residual,
            batches = report.batches,
            total = %report.total(),
            "simulation stopped"
        );
        self.ctx.observers.notify(EventKind::SimulationStopped {
            produced,
            consumed,
            residual,
        });
        Ok(report)
    }
}

fn status_of(ctx: &WorkerContext) -> StatusSnapshot {
    let stats = ctx.queue.stats();
    StatusSnapshot {
        queue_len: stats.len,
        capacity: stats.capacity,
        production_paused: stats.enqueue_paused,
        delivery_paused: stats.dequeue_paused,
        batch: ctx.barrier.generation(),
        waiting: ctx.barrier.arrived(),
        participants: ctx.barrier.participants(),
        produced: ctx.counters.produced(),
        consumed: ctx.counters.consumed(),
    }
}

/// Applies operator commands; in manual mode also the extra barrier participant
struct Controller {
    ctx: Arc<WorkerContext>,
    commands: mpsc::Receiver<Command>,
    batch_mode: BatchMode,
}

impl Controller {
    async fn run(mut self) -> SimulationResult<()> {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => return Ok(()),
                command = self.commands.recv() => command,
            };

            let Some(command) = command else {
                // Every handle is gone; only the token can end the run now
                self.ctx.cancel.cancelled().await;
                return Ok(());
            };

            match self.apply(command).await {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Ok(()),
                Err(err) => {
                    error!(error = %err, "controller aborting run");
                    self.ctx.cancel.cancel();
                    return Err(err.into());
                }
            }
        }
    }

    async fn apply(&self, command: Command) -> SyncResult<()> {
        info!(%command, "applying command");
        let queue = &self.ctx.queue;
        let mut status = None;

        match command {
            Command::PauseProduction => queue.pause_enqueue(),
            Command::ResumeProduction => queue.resume_enqueue(),
            Command::PauseDelivery => queue.pause_dequeue(),
            Command::ResumeDelivery => queue.resume_dequeue(),
            Command::SummarizeBatch => return self.summarize().await,
            Command::Status => {
                let snapshot = status_of(&self.ctx);
                info!(
                    queued = snapshot.queue_len,
                    capacity = snapshot.capacity,
                    batch = snapshot.batch,
                    waiting = snapshot.waiting,
                    produced = snapshot.produced,
                    consumed = snapshot.consumed,
                    "status"
                );
                status = Some(snapshot);
            }
            Command::Shutdown => self.ctx.cancel.cancel(),
        }

        self.ctx
            .observers
            .notify(EventKind::ControlApplied { command, status });
        Ok(())
    }

    // Arriving while workers are still busy would block the controller and
    // leave pause and resume unanswered, so only the last missing
    // participant may arrive.
    async fn summarize(&self) -> SyncResult<()> {
        let barrier = &self.ctx.barrier;

        if self.batch_mode == BatchMode::Automatic {
            warn!("batches close on their own in automatic mode");
            self.ctx.observers.notify(EventKind::ControlApplied {
                command: Command::SummarizeBatch,
                status: None,
            });
            return Ok(());
        }

        if barrier.participants_remaining() != 1 {
            let waiting = barrier.arrived();
            let participants = barrier.participants();
            info!(waiting, participants, "workers still busy, batch stays open");
            self.ctx
                .observers
                .notify(EventKind::BatchSummaryDeferred {
                    waiting,
                    participants,
                });
            return Ok(());
        }

        self.ctx.observers.notify(EventKind::ControlApplied {
            command: Command::SummarizeBatch,
            status: None,
        });
        if barrier.arrive(&self.ctx.cancel).await? {
            self.ctx.publish_batch("operator")?;
        }
        Ok(())
    }
}
