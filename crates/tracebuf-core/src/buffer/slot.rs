//! Record slots: the unit of storage in the buffer chain.
//!
//! Slots are shared through `Arc`, so a stage still holding a slot after it
//! was evicted or cleared never observes freed memory. The "no slot"
//! sentinel is `None` wherever a slot reference is optional.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared handle to a slot.
pub(crate) type SlotRef<R> = Arc<Slot<R>>;

/// A buffered record plus its bookkeeping.
///
/// `next` points at the slot inserted right after this one, i.e. towards the
/// head. It is set at most once, by the producer that displaced this slot as
/// head, and never changes afterwards.
pub(crate) struct Slot<R> {
    payload: ArcSwapOption<R>,
    next: OnceLock<SlotRef<R>>,
    size_bytes: AtomicU64,
    analyzed: AtomicBool,
    indexed: AtomicBool,
    evicted: AtomicBool,
    generation: u64,
}

impl<R> Slot<R> {
    /// Create an unlinked slot owning `record`.
    pub(crate) fn new(record: R, generation: u64) -> Self {
        Self {
            payload: ArcSwapOption::from(Some(Arc::new(record))),
            next: OnceLock::new(),
            size_bytes: AtomicU64::new(0),
            analyzed: AtomicBool::new(false),
            indexed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            generation,
        }
    }

    /// The record, unless the slot was evicted.
    pub(crate) fn payload(&self) -> Option<Arc<R>> {
        self.payload.load_full()
    }

    /// The slot inserted right after this one, if already linked.
    pub(crate) fn next(&self) -> Option<SlotRef<R>> {
        self.next.get().cloned()
    }

    pub(crate) fn has_next(&self) -> bool {
        self.next.get().is_some()
    }

    /// Link the successor. Only the producer that replaced this slot as head calls this.
    pub(crate) fn link(&self, successor: SlotRef<R>) {
        // The head CAS hands out each slot as predecessor exactly once.
        let linked = self.next.set(successor);
        debug_assert!(linked.is_ok(), "slot linked twice");
    }

    pub(crate) fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Acquire)
    }

    /// Record the computed size and mark the slot analyzed.
    pub(crate) fn mark_analyzed(&self, size_bytes: u64) {
        self.size_bytes.store(size_bytes, Ordering::Release);
        self.analyzed.store(true, Ordering::Release);
    }

    pub(crate) fn is_analyzed(&self) -> bool {
        self.analyzed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_indexed(&self) {
        self.indexed.store(true, Ordering::Release);
    }

    pub(crate) fn is_indexed(&self) -> bool {
        self.indexed.load(Ordering::Acquire)
    }

    /// Mark evicted and drop the buffer's reference to the record.
    pub(crate) fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        self.payload.store(None);
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Clear generation the slot was inserted in.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// The successor, if this slot may be retired by eviction.
    ///
    /// Both stages must be done with the slot and a newer slot must already
    /// be linked behind it, so the tail never has to move to "no slot" and
    /// no stage cursor is ever passed.
    pub(crate) fn retirable_successor(&self) -> Option<SlotRef<R>> {
        if self.is_analyzed() && self.is_indexed() {
            self.next()
        } else {
            None
        }
    }
}

impl<R> Drop for Slot<R> {
    // Unlink iteratively; recursive Arc drops would overflow the stack on long chains.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(slot) = next {
            next = match Arc::into_inner(slot) {
                Some(mut owned) => owned.next.take(),
                None => None,
            };
        }
    }
}

/// Pointer equality for optional slot handles.
pub(crate) fn same_slot<R>(a: &Option<SlotRef<R>>, b: &Option<SlotRef<R>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}
