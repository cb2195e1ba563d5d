//! Braid - unified CLI entrypoint.
//!
//! Usage:
//!   braid start --config config/braid.toml
//!   braid status --data-dir data
//!   braid config validate --config config/braid.toml
//!   braid inspect log --data-dir data --partition 1
//!   braid snapshot verify --data-dir data

use anyhow::Result;
use braid::cli::commands::{
    run_config, run_init, run_inspect, run_snapshot, run_start_with_config, run_status,
};
use braid::cli::{Cli, Commands};
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/braid.toml"));

    match cli.command {
        Commands::Start(args) => run_start_with_config(&config_path, args, cli.log_level).await,
        Commands::Status(args) => run_status(args),
        Commands::Init(args) => run_init(args),
        Commands::Config(args) => run_config(args),
        Commands::Inspect(args) => run_inspect(args),
        Commands::Snapshot(args) => run_snapshot(args),
    }
}
