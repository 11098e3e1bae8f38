// Bounded FIFO queue with pausable producers and consumers
//
// Two counting semaphores track free slots and ready items, a short mutex
// section guards the backing VecDeque, and one gate per direction lets an
// operator stall production or consumption independently of capacity.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EnqueueError, SyncError, SyncResult};
use crate::gate::Gate;

/// A bounded queue that can be cloned and shared between workers
pub type SharedBoundedQueue<T> = Arc<BoundedQueue<T>>;

/// Create a shared bounded queue
pub fn shared<T>(capacity: usize) -> SyncResult<SharedBoundedQueue<T>> {
    Ok(Arc::new(BoundedQueue::new(capacity)?))
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub capacity: usize,
    pub len: usize,
    pub available_items: usize,
    pub available_capacity: usize,
    pub enqueue_paused: bool,
    pub dequeue_paused: bool,
    pub closed: bool,
}

/// Fixed-capacity FIFO buffer shared by producer and consumer pools
///
/// `available_items + available_capacity == capacity` whenever no caller
/// is between acquiring a permit and finishing its critical section.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    /// The buffered items, head first
    items: Mutex<VecDeque<T>>,
    /// Maximum number of resident items
    capacity: usize,
    /// Items that may be taken
    available_items: Semaphore,
    /// Free slots that may be filled
    available_capacity: Semaphore,
    /// Producers wait here while production is paused
    produce_gate: Gate,
    /// Consumers wait here while consumption is paused
    consume_gate: Gate,
    /// Fired by `close` to unwind blocked callers
    closed: CancellationToken,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items
    pub fn new(capacity: usize) -> SyncResult<Self> {
        if capacity == 0 {
            return Err(SyncError::InvalidArgument(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(SyncError::InvalidArgument(format!(
                "queue capacity {} exceeds {}",
                capacity,
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            available_items: Semaphore::new(0),
            available_capacity: Semaphore::new(capacity),
            produce_gate: Gate::default(),
            consume_gate: Gate::default(),
            closed: CancellationToken::new(),
        })
    }

    /// Insert at the tail, waiting as long as it takes
    ///
    /// Waits for the produce gate first, then for a free slot. Only fails
    /// once the queue is closed or an invariant breaks; the item is handed
    /// back in both cases.
    pub async fn enqueue(&self, item: T) -> Result<(), EnqueueError<T>> {
        if let Err(kind) = self.produce_gate.wait_open(&self.closed).await {
            return Err(EnqueueError::new(item, kind));
        }
        let permit = match self.available_capacity.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(EnqueueError::new(item, SyncError::Cancelled)),
        };
        self.push_back(item, permit)
    }

    /// Remove from the head, waiting as long as it takes
    pub async fn dequeue(&self) -> SyncResult<T> {
        self.consume_gate.wait_open(&self.closed).await?;
        let permit = self
            .available_items
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        self.pop_front(permit)
    }

    /// Insert at the tail if a slot frees up within `timeout`
    ///
    /// The slot wait is bounded by `timeout` and `cancel`; on failure the
    /// item comes back untouched and no counter moves. Once a slot is held
    /// the produce gate is waited without a deadline: a paused queue stalls
    /// producers rather than turning them into drops. Cancellation during
    /// that wait gives the slot back.
    pub async fn try_enqueue(
        &self,
        item: T,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), EnqueueError<T>> {
        let permit = match self
            .acquire_within(&self.available_capacity, timeout, cancel)
            .await
        {
            Ok(permit) => permit,
            Err(kind) => return Err(EnqueueError::new(item, kind)),
        };
        if let Err(kind) = self.wait_gate(&self.produce_gate, cancel).await {
            return Err(EnqueueError::new(item, kind));
        }
        self.push_back(item, permit)
    }

    /// Remove from the head if an item shows up within `timeout`
    ///
    /// Mirrors `try_enqueue`: the item wait is bounded, the consume gate
    /// wait is only cancellable, and a failure leaves the queue unchanged.
    pub async fn try_dequeue(&self, timeout: Duration, cancel: &CancellationToken) -> SyncResult<T> {
        let permit = self
            .acquire_within(&self.available_items, timeout, cancel)
            .await?;
        self.wait_gate(&self.consume_gate, cancel).await?;
        self.pop_front(permit)
    }

    /// Stall producers until `resume_enqueue`
    pub fn pause_enqueue(&self) {
        debug!("enqueue paused");
        self.produce_gate.close();
    }

    /// Let producers through again
    pub fn resume_enqueue(&self) {
        debug!("enqueue resumed");
        self.produce_gate.open();
    }

    /// Stall consumers until `resume_dequeue`
    pub fn pause_dequeue(&self) {
        debug!("dequeue paused");
        self.consume_gate.close();
    }

    /// Let consumers through again
    pub fn resume_dequeue(&self) {
        debug!("dequeue resumed");
        self.consume_gate.open();
    }

    pub fn is_enqueue_paused(&self) -> bool {
        !self.produce_gate.is_open()
    }

    pub fn is_dequeue_paused(&self) -> bool {
        !self.consume_gate.is_open()
    }

    /// Release every blocked caller with `Cancelled`
    ///
    /// Subsequent operations fail with `Cancelled` as well. Buffered items
    /// stay in place and can still be counted with `len`.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        debug!(len = self.len(), "closing queue");
        self.closed.cancel();
        self.available_items.close();
        self.available_capacity.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident items
    pub fn len(&self) -> usize {
        self.lock_items().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items not yet claimed by a consumer
    pub fn available_items(&self) -> usize {
        self.available_items.available_permits()
    }

    /// Slots not yet claimed by a producer
    pub fn available_capacity(&self) -> usize {
        self.available_capacity.available_permits()
    }

    /// Snapshot of all counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.capacity,
            len: self.len(),
            available_items: self.available_items(),
            available_capacity: self.available_capacity(),
            enqueue_paused: self.is_enqueue_paused(),
            dequeue_paused: self.is_dequeue_paused(),
            closed: self.is_closed(),
        }
    }

    /// Verify the resident count against the capacity bound
    pub fn check_invariants(&self) -> SyncResult<()> {
        let items = self.lock_items()?;
        if items.len() > self.capacity {
            return Err(SyncError::InvariantViolation(format!(
                "{} items resident in a queue of capacity {}",
                items.len(),
                self.capacity
            )));
        }
        Ok(())
    }

    async fn acquire_within<'a>(
        &'a self,
        semaphore: &'a Semaphore,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SyncResult<SemaphorePermit<'a>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            _ = self.closed.cancelled() => Err(SyncError::Cancelled),
            acquired = tokio::time::timeout(timeout, semaphore.acquire()) => match acquired {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(SyncError::Cancelled),
                Err(_) => Err(SyncError::TimedOut(timeout)),
            },
        }
    }

    async fn wait_gate(&self, gate: &Gate, cancel: &CancellationToken) -> SyncResult<()> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(SyncError::Cancelled),
            opened = gate.wait_open(cancel) => opened,
        }
    }

    fn lock_items(&self) -> SyncResult<MutexGuard<'_, VecDeque<T>>> {
        self.items.lock().map_err(|_| SyncError::poisoned("queue storage"))
    }

    // The slot permit is consumed and an item permit published while the
    // storage lock is held, so no other caller sees them disagree.
    fn push_back(&self, item: T, permit: SemaphorePermit<'_>) -> Result<(), EnqueueError<T>> {
        let mut items = match self.lock_items() {
            Ok(items) => items,
            Err(kind) => return Err(EnqueueError::new(item, kind)),
        };
        if items.len() >= self.capacity {
            let kind = SyncError::InvariantViolation(format!(
                "slot granted but {} of {} slots already filled",
                items.len(),
                self.capacity
            ));
            return Err(EnqueueError::new(item, kind));
        }
        items.push_back(item);
        permit.forget();
        self.available_items.add_permits(1);
        Ok(())
    }

    fn pop_front(&self, permit: SemaphorePermit<'_>) -> SyncResult<T> {
        let mut items = self.lock_items()?;
        let item = items.pop_front().ok_or_else(|| {
            SyncError::InvariantViolation("item granted but the queue is empty".to_string())
        })?;
        permit.forget();
        self.available_capacity.add_permits(1);
        Ok(item)
    }
}
