//! Start command implementation.

use crate::core::config::{Config, ConfigOverrides, TelemetryConfig};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start a braid node.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the data directory.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Override the member id of this node.
    #[arg(long)]
    pub node_id: Option<u32>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
#[cfg(feature = "telemetry")]
fn init_tracing(telemetry: &TelemetryConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));

    if telemetry.log_format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_telemetry: &TelemetryConfig) {}

/// Run the start command with the given config path. A missing file runs
/// with defaults.
pub async fn run_start_with_config(
    config_path: &Path,
    args: StartArgs,
    log_level: Option<String>,
) -> Result<()> {
    let mut config = if config_path.exists() {
        Config::from_file(config_path)
            .with_context(|| format!("failed to load config from {:?}", config_path))?
    } else {
        Config::default()
    };
    config.apply_overrides(&ConfigOverrides {
        log_level,
        data_dir: args.data_dir,
        node_id: args.node_id,
    });
    config.validate()?;
    init_tracing(&config.telemetry);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
