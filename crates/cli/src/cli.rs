//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Edge Agent - on-device object detection with dashboard sync
#[derive(Parser, Debug)]
#[command(
    name = "edge-agent",
    author,
    version,
    about = "Edge detection agent",
    long_about = "Captures frames from the attached cameras, runs object detection, \n\
                  persists detections locally and synchronizes them with a remote \n\
                  dashboard, tolerating camera and network failures."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "EDGE_AGENT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "EDGE_AGENT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Configuration file of the selected command
    pub fn config_path(&self) -> &Path {
        match &self.command {
            Commands::Run(args) => &args.config,
            Commands::Validate(args) => &args.config,
            Commands::Info(args) => &args.config,
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent until Ctrl-C / SIGTERM
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration and platform information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config.toml", env = "EDGE_AGENT_CONFIG")]
    pub config: PathBuf,

    /// Override the device id from configuration
    #[arg(long, env = "EDGE_AGENT_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Override the dashboard API URL from configuration
    #[arg(long, env = "EDGE_AGENT_API_URL")]
    pub api_url: Option<String>,

    /// Override the dashboard API key from configuration
    #[arg(long, env = "EDGE_AGENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the request signing secret from configuration
    #[arg(long, env = "EDGE_AGENT_DEVICE_SECRET", hide_env_values = true)]
    pub device_secret: Option<String>,

    /// Stop after this many seconds (0 = run until signalled)
    #[arg(long, default_value = "0", env = "EDGE_AGENT_DURATION")]
    pub duration: u64,

    /// Validate configuration and exit without starting
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port, overrides configuration (0 = disabled)
    #[arg(long, env = "EDGE_AGENT_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Probe the host for cameras and board details
    #[arg(long)]
    pub platform: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
