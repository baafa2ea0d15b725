//! Key/value cache that history sequences are written into.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{HistoryKey, HistoryPoint};

/// Get/set cache holding history sequences.
///
/// Entries never expire from the manager's point of view; bounding memory
/// is up to the implementation.
pub trait HistoryCache: Send + Sync {
    fn get(&self, key: &HistoryKey) -> Option<Vec<HistoryPoint>>;
    fn set(&self, key: HistoryKey, points: Vec<HistoryPoint>);
    fn remove(&self, key: &HistoryKey);
}

/// Thread-safe in-process cache.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<HistoryKey, Vec<HistoryPoint>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sequences.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryCache for MemoryCache {
    fn get(&self, key: &HistoryKey) -> Option<Vec<HistoryPoint>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: HistoryKey, points: Vec<HistoryPoint>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, points);
    }

    fn remove(&self, key: &HistoryKey) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}
