//! Init command implementation.

use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Initialize a data directory and configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Data directory.
    #[arg(short, long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Write a configuration file with every default spelled out.
    #[arg(long)]
    pub write_config: Option<PathBuf>,
}

/// Run the init command.
pub fn run_init(args: InitArgs) -> Result<()> {
    std::fs::create_dir_all(&args.data_dir)?;
    println!("Initialized data directory: {:?}", args.data_dir);

    if let Some(path) = args.write_config {
        if path.exists() {
            anyhow::bail!("refusing to overwrite existing config {:?}", path);
        }
        let mut config = Config::default();
        config.node.data_dir = args.data_dir.display().to_string();
        let content = toml::to_string_pretty(&config).context("failed to render config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        println!("Wrote configuration: {:?}", path);
    }

    Ok(())
}
