// Concurrent category ledger
//
// Accumulates amounts per category from many writers. Entries appear on
// first contribution and only grow; nothing is removed during a run.

use std::collections::BTreeMap;
use std::ops::AddAssign;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{SyncError, SyncResult};

/// A ledger that can be cloned and shared between writers
pub type SharedLedger<V = u64> = Arc<Ledger<V>>;

/// Running totals keyed by category
#[derive(Debug, Default)]
pub struct Ledger<V = u64> {
    entries: RwLock<BTreeMap<String, V>>,
}

impl<V> Ledger<V>
where
    V: Copy + Default + AddAssign,
{
    /// Create an empty ledger
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add `amount` to `category`, creating the entry if needed
    ///
    /// Returns the new total for the category.
    pub fn add(&self, category: &str, amount: V) -> SyncResult<V> {
        let mut entries = self.write()?;
        if let Some(total) = entries.get_mut(category) {
            *total += amount;
            return Ok(*total);
        }
        entries.insert(category.to_owned(), amount);
        Ok(amount)
    }

    /// Current total for one category
    pub fn get(&self, category: &str) -> SyncResult<Option<V>> {
        Ok(self.read()?.get(category).copied())
    }

    /// Copy of every category total, ordered by category
    pub fn snapshot(&self) -> SyncResult<BTreeMap<String, V>> {
        Ok(self.read()?.clone())
    }

    /// Sum across all categories
    pub fn total(&self) -> SyncResult<V> {
        let entries = self.read()?;
        let mut sum = V::default();
        for value in entries.values() {
            sum += *value;
        }
        Ok(sum)
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, BTreeMap<String, V>>> {
        self.entries.read().map_err(|_| SyncError::poisoned("ledger"))
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, BTreeMap<String, V>>> {
        self.entries.write().map_err(|_| SyncError::poisoned("ledger"))
    }
}
