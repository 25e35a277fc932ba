//! Configuration structures for tracebuf.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.
//! Every field has a default so an empty file is a valid configuration.

use crate::buffer::SizingPolicy;
use serde::{Deserialize, Serialize};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Buffer sizing and eviction configuration
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Index maintenance configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Buffer sizing configuration.
///
/// Fractions are in `0.0..=1.0`, sizes and breakpoints are in bytes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Occupancy above which eviction becomes eligible
    #[serde(default = "default_eviction_occupancy")]
    pub eviction_occupancy_percentage: f64,

    /// Size of one eviction fragment as a fraction of the max buffer size
    #[serde(default = "default_eviction_fragment")]
    pub eviction_fragment_size_percentage: f64,

    /// Fraction of memory claimed once memory reaches `max_heap_occupancy_active_from`
    #[serde(default = "default_max_heap_occupancy")]
    pub max_heap_occupancy: f64,

    /// Fraction of memory claimed while memory stays below `min_heap_occupancy_active_till`
    #[serde(default = "default_min_heap_occupancy")]
    pub min_heap_occupancy: f64,

    /// Memory size from which `max_heap_occupancy` applies
    #[serde(default = "default_max_heap_occupancy_active_from")]
    pub max_heap_occupancy_active_from: u64,

    /// Memory size up to which `min_heap_occupancy` applies
    #[serde(default = "default_min_heap_occupancy_active_till")]
    pub min_heap_occupancy_active_till: u64,

    /// Memory that must stay unclaimed regardless of interpolation
    #[serde(default = "default_min_memory_delta")]
    pub min_memory_delta: u64,

    /// Expansion rate for small buffers
    #[serde(default = "default_max_object_expansion_rate")]
    pub max_object_expansion_rate: f32,

    /// Expansion rate for large buffers
    #[serde(default = "default_min_object_expansion_rate")]
    pub min_object_expansion_rate: f32,

    /// Buffer size up to which `max_object_expansion_rate` applies
    #[serde(default = "default_max_object_expansion_rate_active_till")]
    pub max_object_expansion_rate_active_till: u64,

    /// Buffer size from which `min_object_expansion_rate` applies
    #[serde(default = "default_min_object_expansion_rate_active_from")]
    pub min_object_expansion_rate_active_from: u64,

    /// Indexed element count after which index maintenance runs
    #[serde(default = "default_elements_count_for_maintenance")]
    pub elements_count_for_maintenance: u64,

    /// Total memory the sizing policy works from (detected when unset)
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            eviction_occupancy_percentage: default_eviction_occupancy(),
            eviction_fragment_size_percentage: default_eviction_fragment(),
            max_heap_occupancy: default_max_heap_occupancy(),
            min_heap_occupancy: default_min_heap_occupancy(),
            max_heap_occupancy_active_from: default_max_heap_occupancy_active_from(),
            min_heap_occupancy_active_till: default_min_heap_occupancy_active_till(),
            min_memory_delta: default_min_memory_delta(),
            max_object_expansion_rate: default_max_object_expansion_rate(),
            min_object_expansion_rate: default_min_object_expansion_rate(),
            max_object_expansion_rate_active_till: default_max_object_expansion_rate_active_till(),
            min_object_expansion_rate_active_from: default_min_object_expansion_rate_active_from(),
            elements_count_for_maintenance: default_elements_count_for_maintenance(),
            memory_limit_bytes: None,
        }
    }
}

/// Index maintenance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaintenanceConfig {
    /// Bytes indexed before the index size is recomputed
    #[serde(default = "default_index_refresh_bytes")]
    pub index_refresh_bytes: u64,

    /// Bytes evicted before the index is asked to compact itself
    #[serde(default = "default_index_clean_bytes")]
    pub index_clean_bytes: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            index_refresh_bytes: default_index_refresh_bytes(),
            index_clean_bytes: default_index_clean_bytes(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string understood by tracing filters.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

// Default value functions
fn default_eviction_occupancy() -> f64 {
    0.8
}
fn default_eviction_fragment() -> f64 {
    0.1
}
fn default_max_heap_occupancy() -> f64 {
    0.6
}
fn default_min_heap_occupancy() -> f64 {
    0.3
}
fn default_max_heap_occupancy_active_from() -> u64 {
    GIB
}
fn default_min_heap_occupancy_active_till() -> u64 {
    256 * MIB
}
fn default_min_memory_delta() -> u64 {
    128 * MIB
}
fn default_max_object_expansion_rate() -> f32 {
    0.3
}
fn default_min_object_expansion_rate() -> f32 {
    0.1
}
fn default_max_object_expansion_rate_active_till() -> u64 {
    128 * MIB
}
fn default_min_object_expansion_rate_active_from() -> u64 {
    GIB
}
fn default_elements_count_for_maintenance() -> u64 {
    30_000
}
fn default_index_refresh_bytes() -> u64 {
    16 * MIB
}
fn default_index_clean_bytes() -> u64 {
    16 * MIB
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        SizingPolicy::new(self.buffer.clone())?;

        if self.maintenance.index_refresh_bytes == 0 {
            return Err(crate::Error::Config(
                "index_refresh_bytes must be greater than zero".into(),
            ));
        }

        if self.maintenance.index_clean_bytes == 0 {
            return Err(crate::Error::Config(
                "index_clean_bytes must be greater than zero".into(),
            ));
        }

        if self.buffer.elements_count_for_maintenance == 0 {
            tracing::warn!("elements_count_for_maintenance is zero, element-driven index refresh disabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_buffer_config() {
        let config = BufferConfig::default();
        assert_eq!(config.eviction_occupancy_percentage, 0.8);
        assert_eq!(config.eviction_fragment_size_percentage, 0.1);
        assert_eq!(config.min_memory_delta, 128 * MIB);
        assert!(config.memory_limit_bytes.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.buffer.elements_count_for_maintenance, 30_000);
        assert_eq!(config.maintenance.index_refresh_bytes, 16 * MIB);
        assert_eq!(config.monitoring.log_format, LogFormat::Json);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            [buffer]
            eviction_occupancy_percentage = 0.7
            memory_limit_bytes = 4294967296

            [monitoring]
            log_level = "debug"
            log_format = "text"
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer.eviction_occupancy_percentage, 0.7);
        assert_eq!(config.buffer.memory_limit_bytes, Some(4 * GIB));
        assert_eq!(config.buffer.eviction_fragment_size_percentage, 0.1);
        assert_eq!(config.monitoring.log_level, LogLevel::Debug);
        assert_eq!(config.monitoring.log_format, LogFormat::Text);
    }

    #[test]
    fn test_config_validation_rejects_bad_threshold() {
        let mut config = Config::default();
        config.buffer.eviction_occupancy_percentage = 1.2;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("eviction_occupancy_percentage"));
    }

    #[test]
    fn test_config_validation_rejects_zero_maintenance() {
        let mut config = Config::default();
        config.maintenance.index_clean_bytes = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("index_clean_bytes"));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[buffer]\neviction_fragment_size_percentage = 0.05\n\n[maintenance]\nindex_clean_bytes = 1024"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.buffer.eviction_fragment_size_percentage, 0.05);
        assert_eq!(config.maintenance.index_clean_bytes, 1024);
    }

    #[test]
    fn test_config_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[buffer]\nmin_heap_occupancy = 0.9\nmax_heap_occupancy = 0.5").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Sizing(_)));
    }

    #[test]
    fn test_to_toml_reparses() {
        let mut config = Config::default();
        config.buffer.memory_limit_bytes = Some(GIB);
        config.monitoring.log_level = LogLevel::Debug;

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("[buffer]"));

        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.buffer.memory_limit_bytes, Some(GIB));
        assert_eq!(parsed.monitoring.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_format_variants() {
        assert_eq!(LogFormat::default(), LogFormat::Json);
        assert_ne!(LogFormat::Json, LogFormat::Text);
    }
}
