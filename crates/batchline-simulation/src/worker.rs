// Purpose: Chef and deliverer worker loops, their identities and batch quotas.
//
// A worker repeats: wait at the barrier once its quota is used up, make one
// bounded queue attempt, then rest for a random delay. Every wait observes
// the run's cancellation token.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use batchline_sync::{
    CancellationToken, SharedBoundedQueue, SharedCycleBarrier, SharedLedger, SyncError, SyncResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::SimulationConfig;
use crate::error::{SimulationError, SimulationResult};
use crate::observer::{EventKind, ObserverRegistry};
use crate::order::{format_cents, Order, OrderGenerator};
use crate::randomness::SeededRng;

/// Which side of the queue a worker serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Produces orders
    Chef,
    /// Consumes orders
    Deliverer,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Chef => write!(f, "Chef"),
            WorkerRole::Deliverer => write!(f, "Deliverer"),
        }
    }
}

/// Identity of one worker, numbered from 1 within its role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId {
    pub role: WorkerRole,
    pub index: usize,
}

impl WorkerId {
    pub fn chef(index: usize) -> Self {
        Self {
            role: WorkerRole::Chef,
            index,
        }
    }

    pub fn deliverer(index: usize) -> Self {
        Self {
            role: WorkerRole::Deliverer,
            index,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.index)
    }
}

/// Where a worker is in its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Running,
    WaitingAtBarrier,
    Cancelled,
}

/// Orders a worker still has to handle in the current batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchQuota {
    batch_size: u32,
    remaining: u32,
}

impl BatchQuota {
    pub fn new(batch_size: u32) -> Self {
        Self {
            batch_size,
            remaining: batch_size,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Count one handled order
    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    /// Start a new batch
    pub fn reset(&mut self) {
        self.remaining = self.batch_size;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }
}

/// Orders moved through the queue over a whole run
#[derive(Debug, Default)]
pub struct RunCounters {
    produced: AtomicU64,
    consumed: AtomicU64,
}

impl RunCounters {
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    fn record_produced(&self) {
        self.produced.fetch_add(1, Ordering::SeqCst);
    }

    fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Everything the workers and the controller of one run share
pub(crate) struct WorkerContext {
    pub queue: SharedBoundedQueue<Order>,
    pub barrier: SharedCycleBarrier,
    pub ledger: SharedLedger<u64>,
    pub observers: ObserverRegistry,
    pub cancel: CancellationToken,
    pub counters: RunCounters,
    pub operation_timeout: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub batch_size: u32,
}

impl WorkerContext {
    pub fn new(
        config: &SimulationConfig,
        queue: SharedBoundedQueue<Order>,
        barrier: SharedCycleBarrier,
        ledger: SharedLedger<u64>,
        observers: ObserverRegistry,
    ) -> Self {
        Self {
            queue,
            barrier,
            ledger,
            observers,
            cancel: CancellationToken::new(),
            counters: RunCounters::default(),
            operation_timeout: config.operation_timeout(),
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            batch_size: config.batch_size,
        }
    }

    /// Announce the batch that the barrier just released
    pub fn publish_batch(&self, published_by: &str) -> SyncResult<()> {
        let batch = self.barrier.generation();
        let income = self.ledger.snapshot()?;
        let total_cents = self.ledger.total()?;
        info!(batch, published_by, total = %format_cents(total_cents), "batch completed");
        self.observers.notify(EventKind::BatchCompleted {
            batch,
            published_by: published_by.to_string(),
            income,
            total_cents,
        });
        Ok(())
    }
}

/// What a worker did before it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    /// Orders prepared or delivered
    pub handled: u64,
    /// Batches this worker completed
    pub batches: u64,
}

enum Duty {
    Prepare(OrderGenerator),
    Deliver,
}

/// One chef or deliverer task
pub(crate) struct Worker {
    id: WorkerId,
    duty: Duty,
    state: WorkerState,
    quota: BatchQuota,
    rng: SeededRng,
    handled: u64,
    batches: u64,
    ctx: Arc<WorkerContext>,
}

impl Worker {
    /// A chef draws its orders and its delays from separate streams
    pub fn chef(index: usize, rng: SeededRng, ctx: Arc<WorkerContext>) -> Self {
        let orders = OrderGenerator::new(rng.fork(0));
        Self::new(WorkerId::chef(index), Duty::Prepare(orders), rng.fork(1), ctx)
    }

    pub fn deliverer(index: usize, rng: SeededRng, ctx: Arc<WorkerContext>) -> Self {
        Self::new(WorkerId::deliverer(index), Duty::Deliver, rng.fork(1), ctx)
    }

    fn new(id: WorkerId, duty: Duty, rng: SeededRng, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id,
            duty,
            state: WorkerState::Running,
            quota: BatchQuota::new(ctx.batch_size),
            rng,
            handled: 0,
            batches: 0,
            ctx,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Work until cancelled
    ///
    /// Cancellation is the normal way out. An invariant violation cancels
    /// the whole run and is returned.
    pub async fn run(mut self) -> SimulationResult<WorkerSummary> {
        debug!(worker = %self.id, "started working");
        let outcome = self.work().await;
        self.state = WorkerState::Cancelled;

        let summary = WorkerSummary {
            worker: self.id,
            handled: self.handled,
            batches: self.batches,
        };
        match outcome {
            Err(SyncError::Cancelled) => {
                info!(worker = %self.id, state = ?self.state, handled = self.handled, "stopped working");
                self.ctx.observers.notify(EventKind::WorkerStopped {
                    worker: self.id,
                    handled: self.handled,
                });
                Ok(summary)
            }
            Err(err) => {
                error!(worker = %self.id, error = %err, "aborting run");
                self.ctx.cancel.cancel();
                Err(SimulationError::Sync(err))
            }
            Ok(()) => Ok(summary),
        }
    }

    async fn work(&mut self) -> SyncResult<()> {
        loop {
            if self.ctx.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if self.quota.is_exhausted() {
                self.wait_for_batch().await?;
            }

            let attempt = match &mut self.duty {
                Duty::Prepare(orders) => {
                    let order = orders.next_order();
                    prepare(&self.ctx, self.id, order).await
                }
                Duty::Deliver => deliver(&self.ctx, self.id).await,
            };
            match attempt {
                Ok(()) => {
                    self.quota.consume();
                    self.handled += 1;
                }
                Err(err) if err.is_timeout() => {
                    debug!(worker = %self.id, "queue attempt timed out");
                }
                Err(err) => return Err(err),
            }

            self.rest().await?;
        }
    }

    async fn wait_for_batch(&mut self) -> SyncResult<()> {
        self.state = WorkerState::WaitingAtBarrier;
        let batch = self.ctx.barrier.generation() + 1;
        debug!(worker = %self.id, state = ?self.state, batch, "waiting for batch to close");
        self.ctx.observers.notify(EventKind::WorkerWaiting {
            worker: self.id,
            batch,
        });

        if self.ctx.barrier.arrive(&self.ctx.cancel).await? {
            self.ctx.publish_batch(&self.id.to_string())?;
        }

        self.batches += 1;
        self.quota.reset();
        self.state = WorkerState::Running;
        Ok(())
    }

    async fn rest(&mut self) -> SyncResult<()> {
        let delay = self
            .rng
            .duration_between(self.ctx.min_delay..=self.ctx.max_delay);
        tokio::select! {
            biased;
            _ = self.ctx.cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

async fn prepare(ctx: &WorkerContext, worker: WorkerId, order: Order) -> SyncResult<()> {
    let prepared = order.clone();
    ctx.queue
        .try_enqueue(order, ctx.operation_timeout, &ctx.cancel)
        .await?;
    ctx.counters.record_produced();

    debug!(worker = %worker, "Prepared {}.", prepared);
    ctx.observers.notify(EventKind::OrderPrepared {
        worker,
        order: prepared,
    });
    Ok(())
}

async fn deliver(ctx: &WorkerContext, worker: WorkerId) -> SyncResult<()> {
    let order = ctx
        .queue
        .try_dequeue(ctx.operation_timeout, &ctx.cancel)
        .await?;
    ctx.counters.record_consumed();
    ctx.ledger.add(order.category(), order.price_cents)?;

    debug!(worker = %worker, "Delivered {}", order);
    ctx.observers.notify(EventKind::OrderDelivered { worker, order });
    Ok(())
}
