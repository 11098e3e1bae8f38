// Batchline synchronization primitives
//
// This crate provides the building blocks shared by producer and consumer
// worker pools: a pausable bounded queue, a cyclic batch barrier and a
// concurrent ledger. All waits are async and observe a cancellation token.

pub mod error;          // Error taxonomy for every suspension point
pub mod gate;           // Open/closed pause signal
pub mod bounded_queue;  // Bounded FIFO with pause gates
pub mod cycle_barrier;  // Reusable rendezvous with generations
pub mod ledger;         // Category totals

pub use error::{EnqueueError, SyncError, SyncResult};
pub use gate::Gate;
pub use bounded_queue::{BoundedQueue, QueueStats, SharedBoundedQueue};
pub use cycle_barrier::{CycleBarrier, SharedCycleBarrier};
pub use ledger::{Ledger, SharedLedger};

pub use tokio_util::sync::CancellationToken;

/// Create a new shared bounded queue
pub fn shared_queue<T>(capacity: usize) -> SyncResult<SharedBoundedQueue<T>> {
    bounded_queue::shared(capacity)
}

/// Create a new shared cycle barrier
pub fn shared_barrier(participants: usize) -> SyncResult<SharedCycleBarrier> {
    cycle_barrier::shared(participants)
}

/// Create a new shared ledger
pub fn shared_ledger<V>() -> SharedLedger<V>
where
    V: Copy + Default + std::ops::AddAssign,
{
    std::sync::Arc::new(Ledger::new())
}
