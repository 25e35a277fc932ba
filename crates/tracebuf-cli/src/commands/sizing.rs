//! Sizing command implementation.

use anyhow::Result;
use tracebuf_core::fraction::AtomicFraction;
use tracebuf_core::{Config, SizingPolicy};
use tracing::info;

/// Print the buffer sizing the configuration yields.
pub fn run(mut config: Config, memory: Option<u64>) -> Result<()> {
    if let Some(memory) = memory {
        config.buffer.memory_limit_bytes = Some(memory);
    }

    let policy = SizingPolicy::new(config.buffer)?;
    let report = SizingReport::from_policy(&policy);

    info!(
        memory_basis = report.memory_basis,
        max_size = report.max_size,
        "Computed buffer sizing"
    );

    println!("Buffer sizing:");
    println!(
        "  Memory basis: {} ({:.2} MB)",
        report.memory_basis,
        mb(report.memory_basis)
    );
    println!("  Heap occupancy: {:.1}%", report.heap_occupancy * 100.0);
    println!(
        "  Max buffer size: {} ({:.2} MB)",
        report.max_size,
        mb(report.max_size)
    );
    println!(
        "  Object expansion rate: {:.1}%",
        report.expansion_rate * 100.0
    );
    println!(
        "  Eviction threshold: {:.1}% ({} bytes)",
        report.eviction_occupancy * 100.0,
        report.eviction_bytes
    );
    println!(
        "  Eviction fragment: {} ({:.2} MB)",
        report.fragment_bytes,
        mb(report.fragment_bytes)
    );

    if report.max_size == 0 {
        println!();
        println!("Warning: memory basis does not leave room for a buffer");
    }

    Ok(())
}

/// Values derived from a sizing policy.
#[derive(Debug)]
struct SizingReport {
    memory_basis: u64,
    heap_occupancy: f64,
    max_size: u64,
    expansion_rate: f32,
    eviction_occupancy: f64,
    eviction_bytes: u64,
    fragment_bytes: u64,
}

impl SizingReport {
    fn from_policy(policy: &SizingPolicy) -> Self {
        let memory_basis = policy.memory_basis();
        let max_size = policy.max_size_for_memory(memory_basis);
        let threshold = AtomicFraction::new(policy.eviction_occupancy());
        let fragment = AtomicFraction::new(policy.eviction_fragment_fraction());

        Self {
            memory_basis,
            heap_occupancy: policy.occupancy_for_memory(memory_basis),
            max_size,
            expansion_rate: policy.object_expansion_rate(max_size),
            eviction_occupancy: threshold.get(),
            eviction_bytes: threshold.scale_ceil(max_size),
            fragment_bytes: fragment.scale_ceil(max_size).max(1),
        }
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}
