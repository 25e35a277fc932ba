//! Record footprint estimation.
//!
//! The buffer never measures memory directly. It asks a [`SizeEstimator`]
//! how large each record is, and relies on the estimator's expansion rate
//! to absorb undercounting.
//!
//! [`FootprintEstimator`] is the stock implementation for any record type
//! that can report its own heap usage through [`HeapSize`].

use crate::fraction::AtomicFraction;
use std::mem::size_of;

/// Computes the in-memory footprint of records.
///
/// Implementations must be cheap and thread-safe: the analysis stage calls
/// `estimate` once per record, and the index may call it while reporting
/// its own size.
pub trait SizeEstimator<R>: Send + Sync {
    /// Footprint of `record` in bytes, including the expansion margin.
    fn estimate(&self, record: &R) -> u64;

    /// Platform base cost of one tracked object.
    fn object_overhead(&self) -> u64;

    /// Set the safety multiplier applied on top of raw sizes.
    ///
    /// # Arguments
    /// * `rate` - Fraction added to every estimate, in `0.0..=1.0`
    fn set_expansion_rate(&self, rate: f32);
}

/// Heap memory owned by a value, excluding its inline size.
pub trait HeapSize {
    /// Bytes allocated on the heap on behalf of this value.
    fn heap_size(&self) -> usize;
}

macro_rules! impl_heap_size_inline {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HeapSize for $ty {
                fn heap_size(&self) -> usize {
                    0
                }
            }
        )*
    };
}

impl_heap_size_inline!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, (),
    &'static str,
);

impl HeapSize for String {
    fn heap_size(&self) -> usize {
        self.capacity()
    }
}

impl<T: HeapSize> HeapSize for Vec<T> {
    fn heap_size(&self) -> usize {
        self.capacity() * size_of::<T>() + self.iter().map(HeapSize::heap_size).sum::<usize>()
    }
}

impl<T: HeapSize> HeapSize for Option<T> {
    fn heap_size(&self) -> usize {
        self.as_ref().map_or(0, HeapSize::heap_size)
    }
}

impl<T: HeapSize> HeapSize for Box<T> {
    fn heap_size(&self) -> usize {
        size_of::<T>() + self.as_ref().heap_size()
    }
}

/// Default per-object header cost on 64-bit targets.
pub const DEFAULT_OBJECT_OVERHEAD: u64 = 16;

/// Default allocation granularity.
pub const DEFAULT_ALIGNMENT: u64 = 8;

/// Estimator for records implementing [`HeapSize`].
///
/// `estimate = align(overhead + size_of::<R>() + heap_size) * (1 + rate)`
#[derive(Debug)]
pub struct FootprintEstimator {
    object_overhead: u64,
    alignment: u64,
    expansion_rate: AtomicFraction,
}

impl FootprintEstimator {
    /// Create an estimator with the default overhead and alignment.
    pub fn new() -> Self {
        Self::with_layout(DEFAULT_OBJECT_OVERHEAD, DEFAULT_ALIGNMENT)
    }

    /// Create an estimator for a specific object layout.
    ///
    /// An alignment of zero is treated as one.
    pub fn with_layout(object_overhead: u64, alignment: u64) -> Self {
        Self {
            object_overhead,
            alignment: alignment.max(1),
            expansion_rate: AtomicFraction::new(0.0),
        }
    }

    /// Current expansion rate.
    pub fn expansion_rate(&self) -> f32 {
        self.expansion_rate.get() as f32
    }

    /// Aligned size of `raw` bytes before expansion.
    pub fn aligned(&self, raw: u64) -> u64 {
        raw.div_ceil(self.alignment) * self.alignment
    }

    fn expand(&self, size: u64) -> u64 {
        let rate = self.expansion_rate.get();
        (size as f64 * (1.0 + rate)).ceil() as u64
    }
}

impl Default for FootprintEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: HeapSize> SizeEstimator<R> for FootprintEstimator {
    fn estimate(&self, record: &R) -> u64 {
        let raw = self.object_overhead + size_of::<R>() as u64 + record.heap_size() as u64;
        self.expand(self.aligned(raw))
    }

    fn object_overhead(&self) -> u64 {
        self.object_overhead
    }

    fn set_expansion_rate(&self, rate: f32) {
        self.expansion_rate.set(f64::from(rate));
    }
}
