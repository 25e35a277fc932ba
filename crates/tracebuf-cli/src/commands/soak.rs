//! Soak command implementation.
//!
//! Drives a buffer with synthetic measurements from several producer
//! threads while the analysis, indexing and eviction stages run.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracebuf_core::estimator::{FootprintEstimator, HeapSize};
use tracebuf_core::index::{IndexKey, MemoryIndex, RecordIndex};
use tracebuf_core::{BufferBuilder, Config, StageScheduler};
use tracing::info;

const HOSTS: u64 = 64;
const METRICS: [&str; 4] = ["cpu.load", "mem.used", "net.rx", "disk.io"];

/// A single sampled metric value from one host.
#[derive(Debug)]
pub struct Measurement {
    series: String,
    timestamp_ms: u64,
    value: f64,
    tags: Vec<String>,
}

impl Measurement {
    /// Deterministic synthetic measurement for the `seq`-th sample of a producer.
    fn synthetic(producer: usize, seq: u64, started: Instant) -> Self {
        let host = (seq + producer as u64) % HOSTS;
        let metric = METRICS[(seq % METRICS.len() as u64) as usize];

        Self {
            series: format!("host-{}.{}", host, metric),
            timestamp_ms: started.elapsed().as_millis() as u64,
            value: (seq % 1000) as f64 / 10.0,
            tags: vec![format!("producer={}", producer), format!("host=host-{}", host)],
        }
    }
}

impl HeapSize for Measurement {
    fn heap_size(&self) -> usize {
        self.series.heap_size()
            + self.timestamp_ms.heap_size()
            + self.value.heap_size()
            + self.tags.heap_size()
    }
}

impl IndexKey for Measurement {
    type Key = String;

    fn index_key(&self) -> String {
        self.series.clone()
    }
}

/// Run the soak test.
pub fn run(config: Config, producers: usize, seconds: u64, max_size: Option<u64>) -> Result<()> {
    config.validate()?;

    let index = Arc::new(MemoryIndex::<Measurement>::new());
    let mut builder = BufferBuilder::<Measurement>::new(config.buffer)
        .with_estimator(Arc::new(FootprintEstimator::new()))
        .with_index(Arc::clone(&index) as Arc<dyn RecordIndex<Measurement>>)
        .with_maintenance(config.maintenance);
    if let Some(max_size) = max_size {
        builder = builder.with_max_size(max_size);
    }
    let buffer = Arc::new(builder.build()?);

    let scheduler = StageScheduler::new(Arc::clone(&buffer));
    scheduler.start()?;

    info!(
        producers = producers,
        seconds = seconds,
        max_size = buffer.max_size(),
        "Starting soak run"
    );
    println!(
        "Soaking buffer of {} bytes with {} producers for {}s",
        buffer.max_size(),
        producers,
        seconds
    );

    let stop = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let mut handles = Vec::with_capacity(producers);
    for producer in 0..producers {
        let buffer = Arc::clone(&buffer);
        let producer_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name(format!("tracebuf-producer-{}", producer))
            .spawn(move || {
                let mut seq = 0u64;
                while !producer_stop.load(Ordering::Relaxed) {
                    buffer.insert(Measurement::synthetic(producer, seq, started));
                    seq += 1;
                }
                seq
            });
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                stop.store(true, Ordering::Relaxed);
                return Err(e).context("Failed to spawn producer thread");
            }
        }
    }

    for second in 1..=seconds {
        thread::sleep(Duration::from_secs(1));
        println!("[{:>4}s] {}", second, buffer);
    }

    stop.store(true, Ordering::Relaxed);
    let mut produced = 0u64;
    for handle in handles {
        produced += handle
            .join()
            .map_err(|_| anyhow!("Producer thread panicked"))?;
    }

    scheduler.stop();

    let stats = buffer.stats();
    info!(
        produced = produced,
        inserted = stats.inserted,
        evicted = stats.evicted,
        "Soak run finished"
    );

    println!();
    println!("Final statistics:");
    print!(
        "{}",
        toml::to_string_pretty(&stats).context("Failed to render statistics")?
    );
    println!("index_keys = {}", index.key_count());

    if stats.inserted != produced {
        return Err(anyhow!(
            "Inserted count {} does not match produced count {}",
            stats.inserted,
            produced
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_measurement_keys() {
        let started = Instant::now();
        let first = Measurement::synthetic(0, 0, started);
        let next_host = Measurement::synthetic(1, 0, started);

        assert_eq!(first.index_key(), "host-0.cpu.load");
        assert_eq!(next_host.index_key(), "host-1.cpu.load");
        assert_eq!(first.tags.len(), 2);
    }

    #[test]
    fn test_measurement_heap_size_counts_strings() {
        let measurement = Measurement::synthetic(3, 7, Instant::now());
        assert!(measurement.heap_size() >= measurement.series.len());
    }

    #[test]
    fn test_short_soak_run() {
        let config = Config::default();
        assert!(run(config, 2, 1, Some(256 * 1024)).is_ok());
    }

    #[test]
    fn test_soak_rejects_invalid_config() {
        let mut config = Config::default();
        config.maintenance.index_refresh_bytes = 0;
        assert!(run(config, 1, 1, Some(1024)).is_err());
    }
}
