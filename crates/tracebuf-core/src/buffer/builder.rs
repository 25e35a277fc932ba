//! Buffer construction.

use super::atomic_buffer::AtomicBuffer;
use super::sizing::SizingPolicy;
use crate::config::{BufferConfig, MaintenanceConfig};
use crate::estimator::SizeEstimator;
use crate::index::RecordIndex;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Builder for [`AtomicBuffer`].
///
/// The estimator and the index are required. The capacity is derived from
/// the sizing policy unless set explicitly with [`with_max_size`](Self::with_max_size).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tracebuf_core::buffer::BufferBuilder;
/// use tracebuf_core::config::BufferConfig;
/// use tracebuf_core::estimator::FootprintEstimator;
/// use tracebuf_core::index::{IndexKey, MemoryIndex};
///
/// struct Sample(u64);
///
/// impl IndexKey for Sample {
///     type Key = u64;
///     fn index_key(&self) -> u64 {
///         self.0
///     }
/// }
///
/// impl tracebuf_core::estimator::HeapSize for Sample {
///     fn heap_size(&self) -> usize {
///         0
///     }
/// }
///
/// let buffer = BufferBuilder::<Sample>::new(BufferConfig::default())
///     .with_estimator(Arc::new(FootprintEstimator::new()))
///     .with_index(Arc::new(MemoryIndex::<Sample>::new()))
///     .with_max_size(64 * 1024)
///     .build()
///     .unwrap();
///
/// buffer.insert(Sample(1));
/// assert_eq!(buffer.inserted_count(), 1);
/// ```
pub struct BufferBuilder<R> {
    config: BufferConfig,
    maintenance: MaintenanceConfig,
    estimator: Option<Arc<dyn SizeEstimator<R>>>,
    index: Option<Arc<dyn RecordIndex<R>>>,
    max_size: Option<u64>,
}

impl<R> BufferBuilder<R> {
    /// Start from a buffer configuration with default maintenance settings.
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            maintenance: MaintenanceConfig::default(),
            estimator: None,
            index: None,
            max_size: None,
        }
    }

    /// Size estimator used by the analysis stage.
    pub fn with_estimator(mut self, estimator: Arc<dyn SizeEstimator<R>>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Index fed by the indexing stage.
    pub fn with_index(mut self, index: Arc<dyn RecordIndex<R>>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Self {
        self.maintenance = maintenance;
        self
    }

    /// Fixed capacity in bytes instead of the memory-derived one.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Validate the configuration and build the buffer.
    ///
    /// Fails with [`Error::Sizing`] on an invalid sizing configuration and
    /// with [`Error::Config`] when a collaborator is missing or a
    /// maintenance threshold is zero.
    pub fn build(self) -> Result<AtomicBuffer<R>> {
        let policy = SizingPolicy::new(self.config)?;

        let estimator = self
            .estimator
            .ok_or_else(|| Error::Config("buffer requires a size estimator".into()))?;
        let index = self
            .index
            .ok_or_else(|| Error::Config("buffer requires a record index".into()))?;

        if self.maintenance.index_refresh_bytes == 0 || self.maintenance.index_clean_bytes == 0 {
            return Err(Error::Config(
                "index maintenance thresholds must be greater than zero".into(),
            ));
        }

        let max_size = match self.max_size {
            Some(max_size) => max_size,
            None => policy.initial_max_size(),
        };
        let expansion_rate = policy.object_expansion_rate(max_size);
        estimator.set_expansion_rate(expansion_rate);

        info!(
            max_size = max_size,
            expansion_rate = expansion_rate,
            eviction_threshold = policy.eviction_occupancy(),
            fragment_fraction = policy.eviction_fragment_fraction(),
            "Buffer created"
        );

        Ok(AtomicBuffer::new(
            max_size,
            policy.eviction_occupancy(),
            policy.eviction_fragment_fraction(),
            estimator,
            index,
            self.maintenance,
            policy.elements_count_for_maintenance(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{FootprintEstimator, HeapSize};
    use crate::index::{IndexKey, MemoryIndex};

    struct Sample(u64);

    impl IndexKey for Sample {
        type Key = u64;

        fn index_key(&self) -> u64 {
            self.0
        }
    }

    impl HeapSize for Sample {
        fn heap_size(&self) -> usize {
            0
        }
    }

    fn builder() -> BufferBuilder<Sample> {
        BufferBuilder::<Sample>::new(BufferConfig::default())
            .with_estimator(Arc::new(FootprintEstimator::new()))
            .with_index(Arc::new(MemoryIndex::<Sample>::new()))
    }

    #[test]
    fn test_build_with_explicit_max_size() {
        let buffer = builder().with_max_size(4096).build().unwrap();
        assert_eq!(buffer.max_size(), 4096);
        assert_eq!(buffer.eviction_threshold(), 0.8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_build_derives_max_size_from_memory_limit() {
        let config = BufferConfig {
            memory_limit_bytes: Some(2 * 1024 * 1024 * 1024),
            ..Default::default()
        };
        let expected = SizingPolicy::new(config.clone())
            .unwrap()
            .max_size_for_memory(2 * 1024 * 1024 * 1024);

        let buffer = BufferBuilder::<Sample>::new(config)
            .with_estimator(Arc::new(FootprintEstimator::new()))
            .with_index(Arc::new(MemoryIndex::<Sample>::new()))
            .build()
            .unwrap();
        assert_eq!(buffer.max_size(), expected);
    }

    #[test]
    fn test_build_sets_expansion_rate() {
        let estimator = Arc::new(FootprintEstimator::new());
        let _buffer = BufferBuilder::<Sample>::new(BufferConfig::default())
            .with_estimator(Arc::clone(&estimator) as Arc<dyn SizeEstimator<Sample>>)
            .with_index(Arc::new(MemoryIndex::<Sample>::new()))
            .with_max_size(1024)
            .build()
            .unwrap();

        // Small buffers get the maximum rate.
        assert!((estimator.expansion_rate() - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_build_requires_estimator() {
        let result = BufferBuilder::<Sample>::new(BufferConfig::default())
            .with_index(Arc::new(MemoryIndex::<Sample>::new()))
            .with_max_size(1024)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_build_requires_index() {
        let result = BufferBuilder::<Sample>::new(BufferConfig::default())
            .with_estimator(Arc::new(FootprintEstimator::new()))
            .with_max_size(1024)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_build_rejects_invalid_sizing() {
        let config = BufferConfig {
            eviction_fragment_size_percentage: 0.0,
            ..Default::default()
        };
        let result = BufferBuilder::<Sample>::new(config)
            .with_estimator(Arc::new(FootprintEstimator::new()))
            .with_index(Arc::new(MemoryIndex::<Sample>::new()))
            .build();
        assert!(matches!(result, Err(Error::Sizing(_))));
    }

    #[test]
    fn test_build_rejects_zero_maintenance() {
        let result = builder()
            .with_maintenance(MaintenanceConfig {
                index_refresh_bytes: 0,
                index_clean_bytes: 1,
            })
            .with_max_size(1024)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
