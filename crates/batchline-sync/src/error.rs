// Synchronization errors
//
// This module defines the error types shared by the gate, queue, barrier
// and ledger primitives.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Error type for every suspension point in this crate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Cooperative shutdown was observed while waiting
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded wait ran out of time
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    /// A capacity or ordering invariant was broken; the run must abort
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A primitive was constructed with an unusable parameter
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SyncError {
    /// Whether this error is the cooperative-shutdown signal
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    /// Whether this error is an expired timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::TimedOut(_))
    }

    /// Whether this error must abort the run instead of being retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::InvariantViolation(_))
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        SyncError::InvariantViolation(format!("{} lock poisoned", what))
    }
}

/// Result alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

/// A rejected enqueue, handing the item back to the caller
///
/// Nothing was inserted and no counter was changed when this is returned.
#[derive(Debug)]
pub struct EnqueueError<T> {
    item: T,
    kind: SyncError,
}

impl<T> EnqueueError<T> {
    pub(crate) fn new(item: T, kind: SyncError) -> Self {
        Self { item, kind }
    }

    /// Why the item was rejected
    pub fn kind(&self) -> &SyncError {
        &self.kind
    }

    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item not enqueued: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for EnqueueError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl<T> From<EnqueueError<T>> for SyncError {
    fn from(err: EnqueueError<T>) -> Self {
        err.kind
    }
}
