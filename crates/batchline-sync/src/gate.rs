// Pause gate
//
// A settable open/closed signal. Queue operations wait on a gate before
// they touch the buffer, which lets an operator stall one direction of
// flow without affecting capacity accounting.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{SyncError, SyncResult};

/// A binary signal that blocks waiters while closed
#[derive(Debug)]
pub struct Gate {
    state: watch::Sender<bool>,
}

impl Gate {
    /// Create a gate in the given state
    pub fn new(open: bool) -> Self {
        let (state, _) = watch::channel(open);
        Self { state }
    }

    /// Open the gate, releasing every waiter. No-op when already open.
    pub fn open(&self) {
        let changed = self.state.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        });
        if changed {
            trace!("gate opened");
        }
    }

    /// Close the gate. No-op when already closed.
    pub fn close(&self) {
        let changed = self.state.send_if_modified(|open| {
            if *open {
                *open = false;
                true
            } else {
                false
            }
        });
        if changed {
            trace!("gate closed");
        }
    }

    /// Current state
    pub fn is_open(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate is open
    ///
    /// Returns immediately when open. Cancellation wins over an open gate,
    /// so a cancelled caller never proceeds.
    pub async fn wait_open(&self, cancel: &CancellationToken) -> SyncResult<()> {
        let mut rx = self.state.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            opened = rx.wait_for(|open| *open) => opened
                .map(|_| ())
                .map_err(|_| SyncError::Cancelled),
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(true)
    }
}
