//! Lock-free record buffer.
//!
//! Producers push records at the head of a singly linked chain. Three
//! stages trail behind them in insertion order:
//!
//! - analysis computes each record's footprint and folds it into the
//!   buffer size,
//! - indexing hands analyzed records to the index and keeps the index's
//!   own footprint accounted for,
//! - eviction retires the oldest records once occupancy crosses the
//!   eviction threshold.
//!
//! All buffer state lives in atomics. The only mutexes are the ones
//! inside the stage signals, held only while a stage goes to sleep.

use super::signal::{StageSignal, Ticket};
use super::slot::{same_slot, Slot, SlotRef};
use crate::config::MaintenanceConfig;
use crate::estimator::SizeEstimator;
use crate::fraction::AtomicFraction;
use crate::index::RecordIndex;
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

/// Result of one blocking stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage processed one unit of work.
    Completed,
    /// The wait was interrupted or the stages are shut down.
    Interrupted,
}

impl StageOutcome {
    /// Whether the call returned without doing its work.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, StageOutcome::Interrupted)
    }
}

/// Buffer statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStats {
    /// Accounted size in bytes, records plus index
    pub current_size: u64,
    /// Capacity in bytes
    pub max_size: u64,
    /// `current_size / max_size`
    pub occupancy: f64,
    /// Occupancy above which eviction runs
    pub eviction_threshold: f64,
    /// Records inserted since the last clear
    pub inserted: u64,
    /// Records analyzed since the last clear
    pub analyzed: u64,
    /// Records indexed since the last clear
    pub indexed: u64,
    /// Records evicted since the last clear
    pub evicted: u64,
    /// Last reported index footprint in bytes
    pub index_size: u64,
    /// Slots currently linked between tail and head
    pub retained: u64,
    /// Times eviction found the oldest record unprocessed and waited
    pub eviction_stalls: u64,
}

/// Concurrent trace record buffer.
///
/// `R` is the record type. Records are shared with the index as `Arc<R>`
/// and released by the buffer when their slot is evicted.
pub struct AtomicBuffer<R> {
    /// Newest slot
    head: ArcSwapOption<Slot<R>>,
    /// Oldest retained slot
    tail: ArcSwapOption<Slot<R>>,
    /// Next slot to analyze; `None` once analysis caught up
    analysis_cursor: ArcSwapOption<Slot<R>>,
    /// Next slot to index; `None` once indexing caught up
    indexing_cursor: ArcSwapOption<Slot<R>>,
    /// Last slot analyzed, to resume from when the cursor is `None`
    analysis_anchor: ArcSwapOption<Slot<R>>,
    /// Last slot indexed, to resume from when the cursor is `None`
    indexing_anchor: ArcSwapOption<Slot<R>>,

    current_size: AtomicU64,
    max_size: AtomicU64,
    eviction_threshold: AtomicFraction,
    fragment_fraction: AtomicFraction,

    inserted: AtomicU64,
    evicted: AtomicU64,
    analyzed: AtomicU64,
    indexed: AtomicU64,

    bytes_added_since_maintenance: AtomicU64,
    bytes_removed_since_maintenance: AtomicU64,
    indexed_since_refresh: AtomicU64,
    index_size: AtomicU64,

    /// Even while stable, odd while a clear is in progress
    generation: AtomicU64,
    /// Counter updates in flight; a clear waits for them to finish
    accounting: AtomicU64,
    eviction_stalls: AtomicU64,

    estimator: Arc<dyn SizeEstimator<R>>,
    index: Arc<dyn RecordIndex<R>>,
    maintenance: MaintenanceConfig,
    elements_count_for_maintenance: u64,

    analysis_signal: StageSignal,
    indexing_signal: StageSignal,
    eviction_signal: StageSignal,
}

impl<R> AtomicBuffer<R> {
    pub(crate) fn new(
        max_size: u64,
        eviction_threshold: f64,
        fragment_fraction: f64,
        estimator: Arc<dyn SizeEstimator<R>>,
        index: Arc<dyn RecordIndex<R>>,
        maintenance: MaintenanceConfig,
        elements_count_for_maintenance: u64,
    ) -> Self {
        Self {
            head: ArcSwapOption::empty(),
            tail: ArcSwapOption::empty(),
            analysis_cursor: ArcSwapOption::empty(),
            indexing_cursor: ArcSwapOption::empty(),
            analysis_anchor: ArcSwapOption::empty(),
            indexing_anchor: ArcSwapOption::empty(),
            current_size: AtomicU64::new(0),
            max_size: AtomicU64::new(max_size),
            eviction_threshold: AtomicFraction::new(eviction_threshold),
            fragment_fraction: AtomicFraction::new(fragment_fraction),
            inserted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            analyzed: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            bytes_added_since_maintenance: AtomicU64::new(0),
            bytes_removed_since_maintenance: AtomicU64::new(0),
            indexed_since_refresh: AtomicU64::new(0),
            index_size: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            accounting: AtomicU64::new(0),
            eviction_stalls: AtomicU64::new(0),
            estimator,
            index,
            maintenance,
            elements_count_for_maintenance,
            analysis_signal: StageSignal::new(),
            indexing_signal: StageSignal::new(),
            eviction_signal: StageSignal::new(),
        }
    }

    /// Insert a record at the head of the buffer.
    ///
    /// Never blocks on other producers or on the stages. The only wait is
    /// a short spin while a concurrent [`clear`](Self::clear) is running.
    pub fn insert(&self, record: R) {
        let generation = self.stable_generation();
        let slot = Arc::new(Slot::new(record, generation));

        let previous = loop {
            let current = self.head.load_full();
            let witnessed = self
                .head
                .compare_and_swap(&current, Some(Arc::clone(&slot)));
            if same_slot(&*witnessed, &current) {
                break current;
            }
        };

        let bootstrap = match previous {
            Some(previous) => {
                previous.link(Arc::clone(&slot));
                false
            }
            None => {
                install(&self.tail, &slot);
                install(&self.analysis_cursor, &slot);
                install(&self.indexing_cursor, &slot);
                true
            }
        };

        self.account(generation, || {
            self.inserted.fetch_add(1, Ordering::AcqRel);
        });

        // Pairs with the fence a stage issues before re-checking its anchor.
        fence(Ordering::SeqCst);
        if bootstrap || self.analysis_cursor.load().is_none() {
            self.analysis_signal.notify();
        }
        if bootstrap || self.indexing_cursor.load().is_none() {
            self.indexing_signal.notify();
        }
        if self.should_evict() {
            self.eviction_signal.notify();
        }
    }

    /// Analyze the next record, blocking until one is available.
    pub fn analyze_next(&self) -> StageOutcome {
        let ticket = self.analysis_signal.ticket();
        loop {
            let ready = self.analysis_signal.wait_until(ticket, || {
                claimable(&self.analysis_cursor, &self.analysis_anchor, |_| true)
            });
            if !ready {
                debug!(stage = "analysis", "Stage wait interrupted");
                return StageOutcome::Interrupted;
            }

            if let Some(slot) = claim(&self.analysis_cursor, &self.analysis_anchor, |_| true) {
                self.analyze(&slot);
                return StageOutcome::Completed;
            }
        }
    }

    /// Index the next analyzed record, blocking until one is available.
    ///
    /// Also runs index maintenance when its thresholds are reached.
    pub fn index_next(&self) -> StageOutcome {
        let ticket = self.indexing_signal.ticket();
        loop {
            let ready = self.indexing_signal.wait_until(ticket, || {
                claimable(&self.indexing_cursor, &self.indexing_anchor, Slot::is_analyzed)
            });
            if !ready {
                debug!(stage = "indexing", "Stage wait interrupted");
                return StageOutcome::Interrupted;
            }

            if let Some(slot) = claim(&self.indexing_cursor, &self.indexing_anchor, Slot::is_analyzed)
            {
                self.index_slot(&slot);
                return StageOutcome::Completed;
            }
        }
    }

    /// Evict one fragment of the oldest records.
    ///
    /// Blocks until occupancy exceeds the eviction threshold. Only slots
    /// that were analyzed and indexed and already have a successor are
    /// retired; when the oldest slot does not qualify yet, eviction waits
    /// for the other stages to make progress. Returns immediately if the
    /// buffer is empty.
    pub fn evict(&self) -> StageOutcome {
        let ticket = self.eviction_signal.ticket();
        if !self
            .eviction_signal
            .wait_until(ticket, || self.should_evict())
        {
            debug!(stage = "eviction", "Stage wait interrupted");
            return StageOutcome::Interrupted;
        }

        loop {
            let observed = self.tail.load_full();
            let Some(tail) = observed.as_ref() else {
                return StageOutcome::Completed;
            };

            let fragment = self.collect_fragment(tail);
            let Some(ref new_tail) = fragment.new_tail else {
                match self.wait_for_progress(ticket, tail) {
                    Some(true) => continue,
                    Some(false) => return StageOutcome::Completed,
                    None => return StageOutcome::Interrupted,
                }
            };

            let witnessed = self
                .tail
                .compare_and_swap(&observed, Some(Arc::clone(&new_tail)));
            if !same_slot(&*witnessed, &observed) {
                continue;
            }

            let mut slot = Arc::clone(tail);
            while !Arc::ptr_eq(&slot, &new_tail) {
                slot.evict();
                match slot.next() {
                    Some(next) => slot = next,
                    None => break,
                }
            }

            self.account_eviction(&fragment);

            debug!(
                slots = fragment.slots,
                bytes = fragment.bytes,
                occupancy = self.occupancy(),
                "Evicted fragment"
            );
            return StageOutcome::Completed;
        }
    }

    /// Drop every record and reset all counters.
    ///
    /// Resets the tail, cursors and counters before the head, then clears
    /// the index. Producers inserting concurrently wait for the reset to
    /// finish; a producer that raced past the head reset may lose its own
    /// record but never detaches later inserts from the chain.
    pub fn clear(&self) {
        let generation = self.begin_clear();
        self.wait_for_accounting();

        self.tail.store(None);
        self.analysis_anchor.store(None);
        self.indexing_anchor.store(None);
        self.analysis_cursor.store(None);
        self.indexing_cursor.store(None);

        self.inserted.store(0, Ordering::Release);
        self.evicted.store(0, Ordering::Release);
        self.analyzed.store(0, Ordering::Release);
        self.indexed.store(0, Ordering::Release);
        self.bytes_added_since_maintenance
            .store(0, Ordering::Release);
        self.bytes_removed_since_maintenance
            .store(0, Ordering::Release);
        self.indexed_since_refresh.store(0, Ordering::Release);
        self.index_size.store(0, Ordering::Release);
        self.current_size.store(0, Ordering::Release);
        self.eviction_stalls.store(0, Ordering::Release);

        self.head.store(None);
        self.index.clear();

        self.generation.store(generation + 1, Ordering::Release);

        info!(generation = generation + 1, "Buffer cleared");

        self.analysis_signal.notify();
        self.indexing_signal.notify();
        self.eviction_signal.notify();
    }

    /// Change the buffer capacity. Takes effect on the next occupancy check.
    pub fn set_max_size(&self, max_size: u64) {
        let previous = self.max_size.swap(max_size, Ordering::AcqRel);
        info!(
            previous = previous,
            max_size = max_size,
            "Buffer max size updated"
        );
        self.eviction_signal.notify();
    }

    /// Change the occupancy above which eviction runs.
    ///
    /// Values outside `0.0..=1.0` are clamped.
    pub fn set_eviction_threshold(&self, threshold: f64) {
        let stored = self.eviction_threshold.set(threshold);
        if stored != threshold {
            warn!(
                requested = threshold,
                applied = stored,
                "Eviction threshold clamped"
            );
        }
        info!(threshold = stored, "Eviction threshold updated");
        self.eviction_signal.notify();
    }

    /// Accounted size in bytes.
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Acquire)
    }

    /// Capacity in bytes.
    pub fn max_size(&self) -> u64 {
        self.max_size.load(Ordering::Acquire)
    }

    /// `current_size / max_size`.
    pub fn occupancy(&self) -> f64 {
        let current = self.current_size();
        let max = self.max_size();
        if max == 0 {
            return if current == 0 { 0.0 } else { f64::INFINITY };
        }
        current as f64 / max as f64
    }

    /// Occupancy above which eviction runs.
    pub fn eviction_threshold(&self) -> f64 {
        self.eviction_threshold.get()
    }

    pub fn inserted_count(&self) -> u64 {
        self.inserted.load(Ordering::Acquire)
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Acquire)
    }

    pub fn analyzed_count(&self) -> u64 {
        self.analyzed.load(Ordering::Acquire)
    }

    pub fn indexed_count(&self) -> u64 {
        self.indexed.load(Ordering::Acquire)
    }

    /// Times eviction stalled on an unprocessed oldest record since the last clear.
    pub fn eviction_stall_count(&self) -> u64 {
        self.eviction_stalls.load(Ordering::Acquire)
    }

    /// Index footprint as of the last refresh.
    pub fn index_size(&self) -> u64 {
        self.index_size.load(Ordering::Acquire)
    }

    /// Whether occupancy is strictly above the eviction threshold.
    pub fn should_evict(&self) -> bool {
        self.eviction_threshold
            .is_exceeded_by(self.current_size(), self.max_size())
    }

    /// Whether no slot is linked.
    pub fn is_empty(&self) -> bool {
        self.head.load().is_none()
    }

    /// Whether records are waiting for analysis.
    pub fn analysis_pending(&self) -> bool {
        self.analysis_cursor.load().is_some()
    }

    /// Whether records are waiting for indexing.
    pub fn indexing_pending(&self) -> bool {
        self.indexing_cursor.load().is_some()
    }

    /// Number of slots from tail to head that still hold a record.
    ///
    /// Walks the chain, so this is linear in the buffer length.
    pub fn retained_count(&self) -> u64 {
        let mut count = 0;
        let mut next = self.tail.load_full();
        while let Some(slot) = next {
            if !slot.is_evicted() {
                count += 1;
            }
            next = slot.next();
        }
        count
    }

    /// Snapshot of the buffer statistics.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            current_size: self.current_size(),
            max_size: self.max_size(),
            occupancy: self.occupancy(),
            eviction_threshold: self.eviction_threshold(),
            inserted: self.inserted_count(),
            analyzed: self.analyzed_count(),
            indexed: self.indexed_count(),
            evicted: self.evicted_count(),
            index_size: self.index_size(),
            retained: self.retained_count(),
            eviction_stalls: self.eviction_stall_count(),
        }
    }

    /// Make every stage call currently waiting return `Interrupted`.
    pub fn interrupt_stages(&self) {
        self.analysis_signal.interrupt();
        self.indexing_signal.interrupt();
        self.eviction_signal.interrupt();
    }

    /// Make all current and future stage waits return `Interrupted`.
    pub fn shutdown_stages(&self) {
        self.analysis_signal.close();
        self.indexing_signal.close();
        self.eviction_signal.close();
    }

    /// Undo [`shutdown_stages`](Self::shutdown_stages).
    pub fn resume_stages(&self) {
        self.analysis_signal.reopen();
        self.indexing_signal.reopen();
        self.eviction_signal.reopen();
    }

    /// Whether the stages are shut down.
    pub fn is_shut_down(&self) -> bool {
        self.analysis_signal.is_closed()
    }

    fn analyze(&self, slot: &Slot<R>) {
        let size = match slot.payload() {
            Some(record) => self.estimator.estimate(&record) + self.estimator.object_overhead(),
            None => 0,
        };
        // Accounted before the flag so eviction can never subtract it first.
        self.account(slot.generation(), || {
            self.add_current_size(size);
            self.analyzed.fetch_add(1, Ordering::AcqRel);
        });
        slot.mark_analyzed(size);
        trace!(size_bytes = size, "Analyzed record");

        self.indexing_signal.notify();
        if self.should_evict() {
            self.eviction_signal.notify();
        }
    }

    fn index_slot(&self, slot: &Slot<R>) {
        self.account(slot.generation(), || {
            if let Some(record) = slot.payload() {
                if let Err(e) = self.index.insert(record) {
                    warn!(error = %e, "Index insert failed, record skipped");
                }
            }
            self.indexed.fetch_add(1, Ordering::AcqRel);
            trace!(size_bytes = slot.size_bytes(), "Indexed record");
            self.run_maintenance(slot.size_bytes());
        });
        slot.mark_indexed();

        if self.should_evict() {
            self.eviction_signal.notify();
        }
    }

    fn run_maintenance(&self, size_bytes: u64) {
        let added = self
            .bytes_added_since_maintenance
            .fetch_add(size_bytes, Ordering::AcqRel)
            + size_bytes;
        let elements = self.indexed_since_refresh.fetch_add(1, Ordering::AcqRel) + 1;

        let by_bytes = added >= self.maintenance.index_refresh_bytes;
        let by_elements = self.elements_count_for_maintenance > 0
            && elements >= self.elements_count_for_maintenance;
        if by_bytes || by_elements {
            self.bytes_added_since_maintenance
                .store(0, Ordering::Release);
            self.indexed_since_refresh.store(0, Ordering::Release);
            self.refresh_index_size();
        }

        if self.bytes_removed_since_maintenance.load(Ordering::Acquire)
            >= self.maintenance.index_clean_bytes
        {
            let removed = self
                .bytes_removed_since_maintenance
                .swap(0, Ordering::AcqRel);
            self.index.clean();
            debug!(bytes_removed = removed, "Cleaned index");
        }
    }

    /// Query the index footprint and fold the change into the buffer size.
    fn refresh_index_size(&self) {
        let new_size = self.index.size_bytes(self.estimator.as_ref());
        let mut old_size = self.index_size.load(Ordering::Acquire);
        loop {
            match self.index_size.compare_exchange_weak(
                old_size,
                new_size,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => old_size = actual,
            }
        }

        if new_size >= old_size {
            self.add_current_size(new_size - old_size);
        } else {
            self.sub_current_size(old_size - new_size);
        }

        debug!(
            old_size = old_size,
            new_size = new_size,
            "Refreshed index size"
        );
    }

    fn collect_fragment(&self, tail: &SlotRef<R>) -> Fragment<R> {
        let target = self.fragment_fraction.scale_ceil(self.max_size()).max(1);
        let generation = self.generation.load(Ordering::Acquire);

        let mut fragment = Fragment {
            generation,
            new_tail: None,
            slots: 0,
            bytes: 0,
            accounted_slots: 0,
            accounted_bytes: 0,
        };

        let mut slot = Arc::clone(tail);
        while let Some(successor) = slot.retirable_successor() {
            let size = slot.size_bytes();
            fragment.slots += 1;
            fragment.bytes += size;
            if slot.generation() == generation {
                fragment.accounted_slots += 1;
                fragment.accounted_bytes += size;
            }
            fragment.new_tail = Some(Arc::clone(&successor));

            if fragment.bytes >= target {
                break;
            }
            slot = successor;
        }

        fragment
    }

    /// Wait until the stalled `tail` can be retired or is no longer the tail.
    ///
    /// `Some(true)` to retry the fragment, `Some(false)` if eviction is no
    /// longer needed, `None` if interrupted.
    fn wait_for_progress(&self, ticket: Ticket, tail: &SlotRef<R>) -> Option<bool> {
        self.eviction_stalls.fetch_add(1, Ordering::AcqRel);
        warn!(
            occupancy = self.occupancy(),
            analysis_pending = self.analysis_pending(),
            indexing_pending = self.indexing_pending(),
            "Eviction stalled, oldest record not yet processed"
        );

        let woke = self.eviction_signal.wait_until(ticket, || {
            tail.retirable_successor().is_some()
                || !self
                    .tail
                    .load()
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, tail))
                || !self.should_evict()
        });
        if !woke {
            return None;
        }
        Some(self.should_evict())
    }

    /// Apply the counters of a retired fragment unless a clear intervened.
    fn account_eviction(&self, fragment: &Fragment<R>) {
        self.account(fragment.generation, || {
            self.sub_current_size(fragment.accounted_bytes);
            self.evicted
                .fetch_add(fragment.accounted_slots, Ordering::AcqRel);
            self.bytes_removed_since_maintenance
                .fetch_add(fragment.accounted_bytes, Ordering::AcqRel);
        });
    }

    /// Run `update` if `generation` is still the current one.
    ///
    /// A clear waits for running updates before resetting the counters, so
    /// an update for one generation never lands in the next.
    fn account(&self, generation: u64, update: impl FnOnce()) {
        let _in_flight = AccountingGuard::enter(&self.accounting);
        if self.generation.load(Ordering::SeqCst) == generation {
            update();
        }
    }

    fn wait_for_accounting(&self) {
        while self.accounting.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
    }

    /// Current generation, waiting out a clear in progress.
    fn stable_generation(&self) -> u64 {
        loop {
            let generation = self.generation.load(Ordering::Acquire);
            if generation % 2 == 0 {
                return generation;
            }
            thread::yield_now();
        }
    }

    /// Move the generation to odd, serializing concurrent clears.
    fn begin_clear(&self) -> u64 {
        loop {
            let generation = self.stable_generation();
            if self
                .generation
                .compare_exchange_weak(
                    generation,
                    generation + 1,
                    Ordering::SeqCst,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return generation + 1;
            }
        }
    }

    fn add_current_size(&self, bytes: u64) {
        self.current_size.fetch_add(bytes, Ordering::AcqRel);
    }

    fn sub_current_size(&self, bytes: u64) {
        // The closure never returns `None`, so both arms carry the previous value.
        let previous = match self
            .current_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                Some(size.saturating_sub(bytes))
            }) {
            Ok(size) | Err(size) => size,
        };
        debug_assert!(
            previous >= bytes,
            "current size underflow: {} - {}",
            previous,
            bytes
        );
    }
}

impl<R> fmt::Display for AtomicBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "size {}/{} bytes ({:.1}% occupied, evicting above {:.1}%), \
             inserted {}, analyzed {}, indexed {}, evicted {}, index {} bytes",
            self.current_size(),
            self.max_size(),
            self.occupancy() * 100.0,
            self.eviction_threshold() * 100.0,
            self.inserted_count(),
            self.analyzed_count(),
            self.indexed_count(),
            self.evicted_count(),
            self.index_size(),
        )
    }
}

impl<R> fmt::Debug for AtomicBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("current_size", &self.current_size.load(Ordering::Relaxed))
            .field("max_size", &self.max_size.load(Ordering::Relaxed))
            .field("inserted", &self.inserted.load(Ordering::Relaxed))
            .field("evicted", &self.evicted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Run of oldest slots selected for one eviction.
struct Fragment<R> {
    /// Generation the accounted slots belong to
    generation: u64,
    new_tail: Option<SlotRef<R>>,
    slots: u64,
    bytes: u64,
    /// Slots from the current generation, which are the only ones counted
    accounted_slots: u64,
    accounted_bytes: u64,
}

/// Marks one counter update in flight for as long as it lives.
struct AccountingGuard<'a>(&'a AtomicU64);

impl<'a> AccountingGuard<'a> {
    fn enter(in_flight: &'a AtomicU64) -> Self {
        in_flight.fetch_add(1, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for AccountingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store `slot` unless `target` already holds a slot of the same or a newer generation.
fn install<R>(target: &ArcSwapOption<Slot<R>>, slot: &SlotRef<R>) {
    loop {
        let current = target.load_full();
        if current
            .as_ref()
            .is_some_and(|held| held.generation() >= slot.generation())
        {
            return;
        }
        let witnessed = target.compare_and_swap(&current, Some(Arc::clone(slot)));
        if same_slot(&*witnessed, &current) {
            return;
        }
    }
}

/// Whether `claim` would find work.
fn claimable<R>(
    cursor: &ArcSwapOption<Slot<R>>,
    anchor: &ArcSwapOption<Slot<R>>,
    gate: impl Fn(&Slot<R>) -> bool,
) -> bool {
    match cursor.load().as_ref() {
        Some(slot) => gate(slot),
        None => anchor.load().as_ref().is_some_and(|last| last.has_next()),
    }
}

/// Take the slot under `cursor` and advance the cursor past it.
///
/// When the cursor is `None` it is re-derived from the successor of the
/// last processed slot. Returns `None` if there is nothing to take or the
/// slot under the cursor does not pass `gate` yet.
fn claim<R>(
    cursor: &ArcSwapOption<Slot<R>>,
    anchor: &ArcSwapOption<Slot<R>>,
    gate: impl Fn(&Slot<R>) -> bool,
) -> Option<SlotRef<R>> {
    loop {
        let current = cursor.load_full();
        match current.as_ref() {
            Some(slot) => {
                if !gate(slot) {
                    return None;
                }
                let witnessed = cursor.compare_and_swap(&current, slot.next());
                if same_slot(&*witnessed, &current) {
                    anchor.store(Some(Arc::clone(slot)));
                    return Some(Arc::clone(slot));
                }
            }
            None => {
                let successor = anchor.load_full()?.next()?;
                cursor.compare_and_swap(&current, Some(successor));
            }
        }
    }
}
