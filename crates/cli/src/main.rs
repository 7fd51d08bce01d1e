//! # Edge Agent CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and validation
//! - Agent lifecycle with graceful shutdown
//! - Platform and configuration inspection

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use contracts::ObservabilitySettings;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_agent, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    init_logging(&cli)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Edge agent CLI starting");

    let result = match &cli.command {
        Commands::Run(args) => run_agent(args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Logging level: `-q` / `-v` flags win, then `[observability] log_level`
/// from the configuration file when it parses, then `info`.
fn init_logging(cli: &Cli) -> Result<()> {
    let settings = config_loader::ConfigLoader::load_from_path(cli.config_path())
        .map(|config| config.observability)
        .unwrap_or_else(|_| ObservabilitySettings::default());

    let mut config = ObservabilityConfig::from_settings(&settings, cli.log_format.into());
    // Metrics listener is started by `run` only
    config.metrics_port = None;
    config.default_log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn".to_string(),
        (false, 0) => config.default_log_level,
        (false, 1) => "debug".to_string(),
        (false, _) => "trace".to_string(),
    };

    observability::init_with_config(config)
}
