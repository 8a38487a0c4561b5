//! Recast CLI - Command-line interface
//!
//! Converts videos, lists the encoders of the codec platform and writes
//! simulated input fixtures.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use recast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "recast")]
#[command(about = "Hardware-accelerated video transcoder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Warn, global = true)]
    log_level: CliLogLevel,

    /// Directory receiving the full trace log of the last run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("Warning: trace log disabled: {e}");
    }

    commands::handle_command(cli.command).await
}
