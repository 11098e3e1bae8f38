// Cyclic barrier for batch rendezvous
//
// All participants must arrive before any of them proceeds. The barrier
// then resets and serves the next cycle; a generation counter keeps
// arrivals for cycle N+1 apart from stragglers still waking from cycle N.
//
// Cancellation policy: a participant that is cancelled before or while
// waiting will never arrive, so the barrier breaks. Every current waiter
// is released with `Cancelled` and every later arrival fails the same way.
// A broken barrier never releases a cycle below its participant count.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};

/// A barrier that can be cloned and shared between participants
pub type SharedCycleBarrier = Arc<CycleBarrier>;

/// Create a shared barrier for `participants` participants
pub fn shared(participants: usize) -> SyncResult<SharedCycleBarrier> {
    Ok(Arc::new(CycleBarrier::new(participants)?))
}

/// What waiters observe when the barrier state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase {
    generation: u64,
    broken: bool,
}

#[derive(Debug)]
struct BarrierState {
    /// Arrivals in the current generation
    arrived: usize,
    /// Completed cycles
    generation: u64,
    /// Set once any participant cancels
    broken: bool,
}

/// Reusable rendezvous point for a fixed number of participants
#[derive(Debug)]
pub struct CycleBarrier {
    participants: usize,
    state: Mutex<BarrierState>,
    phase: watch::Sender<Phase>,
}

impl CycleBarrier {
    /// Create a barrier for `participants` participants
    pub fn new(participants: usize) -> SyncResult<Self> {
        if participants == 0 {
            return Err(SyncError::InvalidArgument(
                "barrier needs at least one participant".to_string(),
            ));
        }
        let (phase, _) = watch::channel(Phase {
            generation: 0,
            broken: false,
        });
        Ok(Self {
            participants,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            phase,
        })
    }

    /// Arrive and wait for the rest of the cycle
    ///
    /// Returns `Ok(true)` for the participant whose arrival released the
    /// cycle, so it can do the post-cycle work exactly once, and `Ok(false)`
    /// for everybody else. Cancellation breaks the barrier.
    pub async fn arrive(&self, cancel: &CancellationToken) -> SyncResult<bool> {
        if cancel.is_cancelled() {
            self.cancel();
            return Err(SyncError::Cancelled);
        }

        let (generation, mut rx) = {
            let mut state = self.lock_state()?;
            if state.broken {
                return Err(SyncError::Cancelled);
            }

            state.arrived += 1;
            if state.arrived == self.participants {
                state.arrived = 0;
                state.generation += 1;
                self.phase.send_replace(Phase {
                    generation: state.generation,
                    broken: false,
                });
                debug!(generation = state.generation, "barrier released");
                return Ok(true);
            }

            trace!(
                arrived = state.arrived,
                participants = self.participants,
                "waiting at barrier"
            );
            // Subscribing under the lock means the release cannot slip in
            // between reading the generation and starting to watch it.
            (state.generation, self.phase.subscribe())
        };

        let phase = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            changed = rx.wait_for(|phase| phase.generation != generation || phase.broken) => {
                changed.ok().map(|phase| *phase)
            }
        };

        match phase {
            Some(phase) if phase.generation != generation => Ok(false),
            Some(_) => Err(SyncError::Cancelled),
            None => self.leave(generation),
        }
    }

    // A cancelled waiter whose cycle was released anyway counts as released;
    // otherwise it breaks the barrier. Decided under the state lock so a
    // concurrent release cannot be broken after the fact.
    fn leave(&self, generation: u64) -> SyncResult<bool> {
        let mut state = self.recover_state();
        if state.generation != generation {
            return Ok(false);
        }
        self.break_locked(&mut state);
        Err(SyncError::Cancelled)
    }

    /// Break the barrier, releasing all waiters with `Cancelled`
    pub fn cancel(&self) {
        let mut state = self.recover_state();
        self.break_locked(&mut state);
    }

    fn recover_state(&self) -> MutexGuard<'_, BarrierState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn break_locked(&self, state: &mut BarrierState) {
        if state.broken {
            return;
        }
        state.broken = true;
        self.phase.send_replace(Phase {
            generation: state.generation,
            broken: true,
        });
        debug!(
            generation = state.generation,
            arrived = state.arrived,
            "barrier broken"
        );
    }

    pub fn is_broken(&self) -> bool {
        self.lock_state().map(|state| state.broken).unwrap_or(true)
    }

    /// Number of completed cycles
    pub fn generation(&self) -> u64 {
        self.lock_state().map(|state| state.generation).unwrap_or(0)
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Arrivals waiting in the current cycle
    pub fn arrived(&self) -> usize {
        self.lock_state().map(|state| state.arrived).unwrap_or(0)
    }

    /// Participants still expected before the current cycle releases
    pub fn participants_remaining(&self) -> usize {
        self.participants - self.arrived()
    }

    fn lock_state(&self) -> SyncResult<MutexGuard<'_, BarrierState>> {
        self.state.lock().map_err(|_| SyncError::poisoned("barrier state"))
    }
}
