//! Command-line interface.
//!
//! Unified CLI for running a braid node and inspecting its data directory.

pub mod commands;

use clap::{Parser, Subcommand};

/// Braid - replicated, partitioned event log with a deterministic processor.
#[derive(Parser, Debug)]
#[command(name = "braid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a braid node.
    Start(commands::StartArgs),
    /// Show partition status from a data directory.
    Status(commands::StatusArgs),
    /// Initialize a data directory and configuration.
    Init(commands::InitArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Inspect partition logs.
    Inspect(commands::InspectArgs),
    /// Snapshot operations.
    Snapshot(commands::SnapshotArgs),
}
