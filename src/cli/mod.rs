pub mod commands;
pub mod report;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shardstrap")]
#[command(about = "Bootstraps a sharded, replicated database cluster from a declarative config")]
pub struct Cli {
    /// Log output format (filter with RUST_LOG, default `info`)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load and validate a config file
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the ordered admin commands of a bootstrap as JSON
    Plan {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run the full bootstrap against a simulated cluster
    Simulate {
        #[arg(long)]
        config: PathBuf,
        /// Transient failures injected into every mutating operation
        #[arg(long, default_value_t = 0)]
        flaky_ops: u32,
        /// Status probes each replica group needs before electing a primary
        #[arg(long, default_value_t = 0)]
        election_delay: u32,
        /// Write the JSON run report to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Dispatches a parsed command line and returns the process exit status.
pub async fn run(cli: Cli) -> anyhow::Result<u8> {
    match cli.command {
        Command::Validate { config } => commands::validate(&config),
        Command::Plan { config } => commands::plan(&config),
        Command::Simulate {
            config,
            flaky_ops,
            election_delay,
            report,
        } => commands::simulate(&config, flaky_ops, election_delay, report.as_deref()).await,
    }
}
