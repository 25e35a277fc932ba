//! Adaptive sizing policy for the buffer.
//!
//! Derives the maximum buffer capacity from the memory available to the
//! process, and the object size expansion rate from the buffer's own size.
//! Both are piecewise linear: a flat value below the low breakpoint, a flat
//! value above the high breakpoint, and linear interpolation in between.
//!
//! The policy is validated once at construction. An invalid configuration
//! fails here and the buffer is never started.

use crate::config::BufferConfig;
use crate::error::SizingError;
use tracing::{debug, warn};

/// Memory assumed when nothing better can be detected.
const FALLBACK_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Validated sizing policy.
#[derive(Debug, Clone)]
pub struct SizingPolicy {
    config: BufferConfig,
}

impl SizingPolicy {
    /// Validate a buffer configuration and wrap it as a policy.
    pub fn new(config: BufferConfig) -> Result<Self, SizingError> {
        check_fraction(
            "eviction_occupancy_percentage",
            config.eviction_occupancy_percentage,
            false,
        )?;
        check_fraction(
            "eviction_fragment_size_percentage",
            config.eviction_fragment_size_percentage,
            false,
        )?;
        check_fraction("max_heap_occupancy", config.max_heap_occupancy, true)?;
        check_fraction("min_heap_occupancy", config.min_heap_occupancy, true)?;
        check_fraction(
            "max_object_expansion_rate",
            f64::from(config.max_object_expansion_rate),
            true,
        )?;
        check_fraction(
            "min_object_expansion_rate",
            f64::from(config.min_object_expansion_rate),
            true,
        )?;

        if config.min_heap_occupancy > config.max_heap_occupancy {
            return Err(SizingError::InvertedRange {
                lower: "min_heap_occupancy",
                lower_value: config.min_heap_occupancy,
                upper: "max_heap_occupancy",
                upper_value: config.max_heap_occupancy,
            });
        }

        if config.min_object_expansion_rate > config.max_object_expansion_rate {
            return Err(SizingError::InvertedRange {
                lower: "min_object_expansion_rate",
                lower_value: f64::from(config.min_object_expansion_rate),
                upper: "max_object_expansion_rate",
                upper_value: f64::from(config.max_object_expansion_rate),
            });
        }

        if config.min_heap_occupancy_active_till > config.max_heap_occupancy_active_from {
            return Err(SizingError::InvertedBreakpoints {
                lower: "min_heap_occupancy_active_till",
                lower_value: config.min_heap_occupancy_active_till,
                upper: "max_heap_occupancy_active_from",
                upper_value: config.max_heap_occupancy_active_from,
            });
        }

        if config.max_object_expansion_rate_active_till
            > config.min_object_expansion_rate_active_from
        {
            return Err(SizingError::InvertedBreakpoints {
                lower: "max_object_expansion_rate_active_till",
                lower_value: config.max_object_expansion_rate_active_till,
                upper: "min_object_expansion_rate_active_from",
                upper_value: config.min_object_expansion_rate_active_from,
            });
        }

        Ok(Self { config })
    }

    /// The validated configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Occupancy above which eviction becomes eligible.
    pub fn eviction_occupancy(&self) -> f64 {
        self.config.eviction_occupancy_percentage
    }

    /// Eviction fragment size as a fraction of the max buffer size.
    pub fn eviction_fragment_fraction(&self) -> f64 {
        self.config.eviction_fragment_size_percentage
    }

    /// Index maintenance batch size in elements.
    pub fn elements_count_for_maintenance(&self) -> u64 {
        self.config.elements_count_for_maintenance
    }

    /// Memory the policy sizes against: the configured limit or the detected total.
    pub fn memory_basis(&self) -> u64 {
        match self.config.memory_limit_bytes {
            Some(limit) => limit,
            None => detect_total_memory(),
        }
    }

    /// Max buffer size for the memory basis of this policy.
    pub fn initial_max_size(&self) -> u64 {
        self.max_size_for_memory(self.memory_basis())
    }

    /// Fraction of `total_memory` the buffer may claim.
    pub fn occupancy_for_memory(&self, total_memory: u64) -> f64 {
        interpolate(
            total_memory,
            self.config.min_heap_occupancy_active_till,
            self.config.min_heap_occupancy,
            self.config.max_heap_occupancy_active_from,
            self.config.max_heap_occupancy,
        )
    }

    /// Max buffer size for a given amount of total memory.
    ///
    /// At least `min_memory_delta` bytes always stay unclaimed; when that is
    /// impossible the buffer size is zero.
    pub fn max_size_for_memory(&self, total_memory: u64) -> u64 {
        let occupancy = self.occupancy_for_memory(total_memory);
        let claimed = (total_memory as f64 * occupancy).round() as u64;
        let ceiling = total_memory.saturating_sub(self.config.min_memory_delta);
        let size = claimed.min(ceiling);

        debug!(
            total_memory = total_memory,
            occupancy = occupancy,
            claimed = claimed,
            max_size = size,
            "Computed buffer max size"
        );

        size
    }

    /// Object size expansion rate for a buffer of `buffer_size` bytes.
    ///
    /// Small buffers get the larger safety margin.
    pub fn object_expansion_rate(&self, buffer_size: u64) -> f32 {
        interpolate(
            buffer_size,
            self.config.max_object_expansion_rate_active_till,
            f64::from(self.config.max_object_expansion_rate),
            self.config.min_object_expansion_rate_active_from,
            f64::from(self.config.min_object_expansion_rate),
        ) as f32
    }
}

/// Piecewise linear interpolation between `(low, at_low)` and `(high, at_high)`.
fn interpolate(x: u64, low: u64, at_low: f64, high: u64, at_high: f64) -> f64 {
    if x <= low {
        return at_low;
    }
    if x >= high {
        return at_high;
    }
    let position = (x - low) as f64 / (high - low) as f64;
    at_low + (at_high - at_low) * position
}

fn check_fraction(option: &'static str, value: f64, allow_zero: bool) -> Result<(), SizingError> {
    let in_range = if allow_zero {
        (0.0..=1.0).contains(&value)
    } else {
        value > 0.0 && value <= 1.0
    };
    if in_range {
        Ok(())
    } else {
        Err(SizingError::OutOfRange {
            option,
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

/// Total physical memory, read from `/proc/meminfo` where available.
pub fn detect_total_memory() -> u64 {
    match read_meminfo_total() {
        Some(bytes) => bytes,
        None => {
            warn!(
                fallback_bytes = FALLBACK_MEMORY_BYTES,
                "Could not detect total memory, using fallback"
            );
            FALLBACK_MEMORY_BYTES
        }
    }
}

fn read_meminfo_total() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn test_config() -> BufferConfig {
        BufferConfig {
            max_heap_occupancy: 0.6,
            min_heap_occupancy: 0.2,
            max_heap_occupancy_active_from: 1000 * MIB,
            min_heap_occupancy_active_till: 200 * MIB,
            min_memory_delta: 50 * MIB,
            max_object_expansion_rate: 0.3,
            min_object_expansion_rate: 0.1,
            max_object_expansion_rate_active_till: 100 * MIB,
            min_object_expansion_rate_active_from: 500 * MIB,
            ..BufferConfig::default()
        }
    }

    #[test]
    fn test_occupancy_below_low_breakpoint() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        assert_eq!(policy.occupancy_for_memory(100 * MIB), 0.2);
        assert_eq!(policy.occupancy_for_memory(200 * MIB), 0.2);
    }

    #[test]
    fn test_occupancy_above_high_breakpoint() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        assert_eq!(policy.occupancy_for_memory(1000 * MIB), 0.6);
        assert_eq!(policy.occupancy_for_memory(8000 * MIB), 0.6);
    }

    #[test]
    fn test_occupancy_interpolates_linearly() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        // Midpoint between 200 MiB and 1000 MiB
        let occupancy = policy.occupancy_for_memory(600 * MIB);
        assert!((occupancy - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_max_size_respects_memory_delta() {
        let mut config = test_config();
        config.min_heap_occupancy = 0.9;
        config.max_heap_occupancy = 0.9;
        let policy = SizingPolicy::new(config).unwrap();

        // 90% of 100 MiB would leave only 10 MiB free
        assert_eq!(policy.max_size_for_memory(100 * MIB), 50 * MIB);
    }

    #[test]
    fn test_max_size_clamps_to_zero() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        assert_eq!(policy.max_size_for_memory(10 * MIB), 0);
        assert_eq!(policy.max_size_for_memory(0), 0);
    }

    #[test]
    fn test_max_size_large_memory() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        let size = policy.max_size_for_memory(10_000 * MIB);
        assert_eq!(size, 6_000 * MIB);
    }

    #[test]
    fn test_expansion_rate_bounds() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        assert_eq!(policy.object_expansion_rate(10 * MIB), 0.3);
        assert_eq!(policy.object_expansion_rate(100 * MIB), 0.3);
        assert_eq!(policy.object_expansion_rate(500 * MIB), 0.1);
        assert_eq!(policy.object_expansion_rate(5000 * MIB), 0.1);
    }

    #[test]
    fn test_expansion_rate_interpolates() {
        let policy = SizingPolicy::new(test_config()).unwrap();
        let rate = policy.object_expansion_rate(300 * MIB);
        assert!((rate - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_memory_limit_override() {
        let mut config = test_config();
        config.memory_limit_bytes = Some(1000 * MIB);
        let policy = SizingPolicy::new(config).unwrap();

        assert_eq!(policy.memory_basis(), 1000 * MIB);
        assert_eq!(policy.initial_max_size(), 600 * MIB);
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let mut config = test_config();
        config.eviction_occupancy_percentage = 0.0;
        assert!(matches!(
            SizingPolicy::new(config),
            Err(SizingError::OutOfRange {
                option: "eviction_occupancy_percentage",
                ..
            })
        ));

        let mut config = test_config();
        config.eviction_fragment_size_percentage = 1.5;
        assert!(SizingPolicy::new(config).is_err());

        let mut config = test_config();
        config.min_object_expansion_rate = -0.1;
        assert!(SizingPolicy::new(config).is_err());
    }

    #[test]
    fn test_rejects_nan() {
        let mut config = test_config();
        config.max_heap_occupancy = f64::NAN;
        assert!(SizingPolicy::new(config).is_err());
    }

    #[test]
    fn test_rejects_inverted_occupancy() {
        let mut config = test_config();
        config.min_heap_occupancy = 0.7;
        assert!(matches!(
            SizingPolicy::new(config),
            Err(SizingError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_breakpoints() {
        let mut config = test_config();
        config.min_heap_occupancy_active_till = 2000 * MIB;
        assert!(matches!(
            SizingPolicy::new(config),
            Err(SizingError::InvertedBreakpoints {
                lower: "min_heap_occupancy_active_till",
                ..
            })
        ));

        let mut config = test_config();
        config.max_object_expansion_rate_active_till = 600 * MIB;
        assert!(matches!(
            SizingPolicy::new(config),
            Err(SizingError::InvertedBreakpoints { .. })
        ));
    }

    #[test]
    fn test_equal_breakpoints_step() {
        let mut config = test_config();
        config.min_heap_occupancy_active_till = 500 * MIB;
        config.max_heap_occupancy_active_from = 500 * MIB;
        let policy = SizingPolicy::new(config).unwrap();

        assert_eq!(policy.occupancy_for_memory(499 * MIB), 0.2);
        assert_eq!(policy.occupancy_for_memory(500 * MIB), 0.2);
        assert_eq!(policy.occupancy_for_memory(501 * MIB), 0.6);
    }

    #[test]
    fn test_parse_meminfo_total() {
        let meminfo = "MemTotal:       16318412 kB\nMemFree:         1234567 kB\n";
        assert_eq!(parse_meminfo_total(meminfo), Some(16318412 * 1024));
        assert_eq!(parse_meminfo_total("MemFree: 12 kB"), None);
    }

    #[test]
    fn test_detect_total_memory_nonzero() {
        assert!(detect_total_memory() > 0);
    }
}
