//! Error types for the tracebuf core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Only startup configuration failures ever reach a caller; per-record
//! failures inside the buffer stages are logged and contained.

use thiserror::Error;

/// Result type alias for tracebuf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for tracebuf.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sizing policy rejected the buffer configuration
    #[error("Sizing error: {0}")]
    Sizing(#[from] SizingError),

    /// A stage thread could not be spawned
    #[error("Failed to spawn {stage} stage: {message}")]
    StageSpawn { stage: &'static str, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Sizing policy validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SizingError {
    /// A fraction option lies outside its allowed interval
    #[error("{option} must be within {min}..={max}, got {value}")]
    OutOfRange {
        option: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A lower bound option exceeds its upper bound counterpart
    #[error("{lower} ({lower_value}) must not exceed {upper} ({upper_value})")]
    InvertedRange {
        lower: &'static str,
        lower_value: f64,
        upper: &'static str,
        upper_value: f64,
    },

    /// Interpolation breakpoints are out of order
    #[error("Breakpoint {lower} ({lower_value} bytes) must not exceed {upper} ({upper_value} bytes)")]
    InvertedBreakpoints {
        lower: &'static str,
        lower_value: u64,
        upper: &'static str,
        upper_value: u64,
    },
}

/// Index adapter errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The index refused the record
    #[error("Record rejected: {0}")]
    Rejected(String),

    /// The index reached its key capacity
    #[error("Index capacity exceeded: {capacity} keys")]
    CapacityExceeded { capacity: usize },
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
