//! Index adapters fed by the indexing stage.
//!
//! The buffer hands every indexed record to a [`RecordIndex`]. The index
//! only ever sees shared handles, so records disappear from it naturally
//! once the buffer evicts them; [`RecordIndex::clean`] then reclaims the
//! bookkeeping left behind.

use crate::error::IndexError;
use crate::estimator::{HeapSize, SizeEstimator};
use dashmap::DashMap;
use std::hash::Hash;
use std::mem::size_of;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Queryable index over buffered records.
///
/// The buffer calls `insert`, `size_bytes` and `clean` from the indexing
/// stage only, and `clear` from `AtomicBuffer::clear`.
pub trait RecordIndex<R>: Send + Sync {
    /// Add a record to the index.
    fn insert(&self, record: Arc<R>) -> Result<(), IndexError>;

    /// Memory used by the index structures themselves.
    fn size_bytes(&self, estimator: &dyn SizeEstimator<R>) -> u64;

    /// Compact internal structures. Must not change logical content.
    fn clean(&self);

    /// Drop all content.
    fn clear(&self);
}

/// Records that can be looked up by key.
pub trait IndexKey {
    /// Lookup key type.
    type Key: Eq + Hash + Clone + HeapSize + Send + Sync;

    /// The key this record is filed under.
    fn index_key(&self) -> Self::Key;
}

/// In-memory hash index over live records.
///
/// Entries hold weak references; a record evicted from the buffer stays
/// filed until the next [`clean`](RecordIndex::clean) but is no longer
/// returned by lookups.
pub struct MemoryIndex<R: IndexKey> {
    entries: DashMap<R::Key, Vec<Weak<R>>>,
    capacity: Option<usize>,
}

impl<R: IndexKey> MemoryIndex<R> {
    /// Create an unbounded index.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            capacity: None,
        }
    }

    /// Create an index that rejects records once `capacity` distinct keys are filed.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    /// Live records filed under `key`, oldest first.
    pub fn get(&self, key: &R::Key) -> Vec<Arc<R>> {
        self.entries
            .get(key)
            .map(|records| records.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    /// Whether any live record is filed under `key`.
    pub fn contains_key(&self, key: &R::Key) -> bool {
        self.entries
            .get(key)
            .is_some_and(|records| records.iter().any(|r| r.strong_count() > 0))
    }

    /// Number of distinct keys, including keys whose records are all evicted.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of filed references, live or not.
    pub fn reference_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.value().len()).sum()
    }
}

impl<R: IndexKey> Default for MemoryIndex<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> RecordIndex<R> for MemoryIndex<R>
where
    R: IndexKey + Send + Sync,
{
    fn insert(&self, record: Arc<R>) -> Result<(), IndexError> {
        let key = record.index_key();

        if let Some(mut records) = self.entries.get_mut(&key) {
            records.push(Arc::downgrade(&record));
            return Ok(());
        }

        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity {
                return Err(IndexError::CapacityExceeded { capacity });
            }
        }

        self.entries
            .entry(key)
            .or_default()
            .push(Arc::downgrade(&record));
        Ok(())
    }

    fn size_bytes(&self, estimator: &dyn SizeEstimator<R>) -> u64 {
        let overhead = estimator.object_overhead();
        let entry_inline = (size_of::<R::Key>() + size_of::<Vec<Weak<R>>>()) as u64;

        self.entries
            .iter()
            .map(|entry| {
                let refs = (entry.value().capacity() * size_of::<Weak<R>>()) as u64;
                overhead + entry_inline + entry.key().heap_size() as u64 + refs
            })
            .sum()
    }

    fn clean(&self) {
        let before = self.entries.len();

        self.entries.retain(|_, records| {
            records.retain(|r| r.strong_count() > 0);
            records.shrink_to_fit();
            !records.is_empty()
        });
        self.entries.shrink_to_fit();

        debug!(
            keys_before = before,
            keys_after = self.entries.len(),
            "Cleaned memory index"
        );
    }

    fn clear(&self) {
        self.entries.clear();
        self.entries.shrink_to_fit();
    }
}
