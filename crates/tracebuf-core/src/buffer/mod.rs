//! Concurrent trace record buffer.
//!
//! Records enter through [`AtomicBuffer::insert`] and are processed by
//! three stages: analysis, indexing and eviction. The stages are plain
//! blocking methods; [`StageScheduler`](crate::scheduler::StageScheduler)
//! runs each of them on its own thread.

mod atomic_buffer;
mod builder;
mod signal;
mod sizing;
mod slot;

pub use atomic_buffer::{AtomicBuffer, BufferStats, StageOutcome};
pub use builder::BufferBuilder;
pub use sizing::{detect_total_memory, SizingPolicy};
