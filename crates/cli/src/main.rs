//! Real-Time Pipeline CLI
//!
//! Checks pipeline configuration and drives simulated stream and batch runs
//! against an in-process service.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{CheckConfigArgs, SimulateBatchArgs, SimulateStreamArgs};
use realtime_pipeline_config::{ObservabilityConfig, PipelineConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "rtp",
    version,
    about = "Real-time inference pipeline tool",
    long_about = "Command-line tool for the real-time inference pipeline.\n\n\
                  Configuration is read from an optional YAML file and from\n\
                  RTP_-prefixed environment variables."
)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        env = "RTP_CONFIG_FILE",
        help = "Path to configuration file"
    )]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    #[command(name = "check-config", about = "Load and validate the configuration")]
    CheckConfig(CheckConfigArgs),

    /// Push synthetic records through a stream
    #[command(
        name = "simulate-stream",
        about = "Run synthetic records through a stream with an echo backend"
    )]
    SimulateStream(SimulateStreamArgs),

    /// Run a synthetic batch job
    #[command(name = "simulate-batch", about = "Run a generated batch job to completion")]
    SimulateBatch(SimulateBatchArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.clone())?;

    init_tracing(&config.observability, cli.verbose);

    match cli.command {
        Commands::CheckConfig(args) => commands::check_config(&config, &args),
        Commands::SimulateStream(args) => commands::simulate_stream(config, &args).await,
        Commands::SimulateBatch(args) => commands::simulate_batch(config, &args).await,
    }
}

/// Initialize tracing/logging
fn init_tracing(observability: &ObservabilityConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&observability.log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logging {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
