//! Tracebuf Core - lock-free in-memory buffer for trace records
//!
//! This library provides the holding buffer of a monitoring backend that
//! retains incoming trace and measurement records briefly while they are:
//!
//! - Sized by a pluggable footprint estimator
//! - Inserted into a queryable index
//! - Evicted oldest-first once the buffer grows past its threshold
//!
//! Producers never take a lock. Each stage runs on its own thread under
//! [`scheduler::StageScheduler`] and sleeps while it has no work.

pub mod buffer;
pub mod config;
pub mod error;
pub mod estimator;
pub mod fraction;
pub mod index;
pub mod scheduler;

// Re-export commonly used types
pub use buffer::{AtomicBuffer, BufferBuilder, BufferStats, SizingPolicy, StageOutcome};
pub use config::Config;
pub use error::{Error, IndexError, Result, SizingError};
pub use estimator::{FootprintEstimator, HeapSize, SizeEstimator};
pub use index::{IndexKey, MemoryIndex, RecordIndex};
pub use scheduler::{Stage, StageScheduler, TaskInfo, TaskStatus};
