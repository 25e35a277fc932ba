//! Tracebuf CLI - operator tool for the tracebuf buffer engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracebuf_core::config::LogFormat;
use tracebuf_core::{Config, SizingError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (unreadable or malformed config file)
    ConfigError = 1,
    /// Sizing policy rejected the buffer configuration
    SizingError = 2,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code by inspecting its source.
    fn from_error(error: &anyhow::Error) -> Self {
        if error.downcast_ref::<SizingError>().is_some() {
            return ExitCode::SizingError;
        }

        match error.downcast_ref::<tracebuf_core::Error>() {
            Some(tracebuf_core::Error::Sizing(_)) => ExitCode::SizingError,
            Some(tracebuf_core::Error::Config(_))
            | Some(tracebuf_core::Error::Io(_))
            | Some(tracebuf_core::Error::Serialization(_)) => ExitCode::ConfigError,
            _ => ExitCode::RuntimeError,
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "tracebuf")]
#[command(about = "Operator tool for the tracebuf in-memory trace buffer", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Show the buffer sizing derived from the configuration
    Sizing {
        /// Size against this many bytes of memory instead of the detected total
        #[arg(long)]
        memory: Option<u64>,
    },

    /// Run producers and all buffer stages against synthetic measurements
    Soak {
        /// Number of producer threads
        #[arg(long, default_value_t = 4)]
        producers: usize,

        /// Run time in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Fixed buffer capacity in bytes
        #[arg(long)]
        max_size: Option<u64>,
    },
}

fn main() {
    let exit_code = run_cli();
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses; errors surface later
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_directive()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli) {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
fn execute_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Validate => {
            config.validate()?;
            println!("Configuration is valid");
        }

        Commands::Sizing { memory } => {
            commands::sizing::run(config, memory)?;
        }

        Commands::Soak {
            producers,
            seconds,
            max_size,
        } => {
            commands::soak::run(config, producers, seconds, max_size)?;
        }
    }

    Ok(())
}

/// Load the config file, or the defaults when none is given.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        tracing::debug!("No configuration file given, using defaults");
        return Ok(Config::default());
    };

    let content = std::fs::read_to_string(path).map_err(tracebuf_core::Error::from)?;
    let config: Config = toml::from_str(&content).map_err(tracebuf_core::Error::from)?;
    Ok(config)
}
