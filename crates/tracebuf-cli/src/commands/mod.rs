//! Subcommand implementations.

pub mod sizing;
pub mod soak;
