//! Snapshot command implementation.

use super::partition_dirs;
use crate::snapshot::SnapshotStore;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Snapshot operations.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

/// Snapshot subcommands.
#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// List persisted snapshots of every replica.
    List {
        /// Data directory.
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Verify the checksums of every persisted snapshot.
    Verify {
        /// Data directory.
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
}

/// Run the snapshot command.
pub fn run_snapshot(args: SnapshotArgs) -> Result<()> {
    match args.command {
        SnapshotCommand::List { data_dir } => {
            for (member, partition_id, dir) in partition_dirs(&data_dir)? {
                let store = SnapshotStore::open_read_only(partition_id, &dir);
                let ids = store.list()?;
                println!("partition {} node {}: {} snapshot(s)", partition_id, member, ids.len());
                for id in ids {
                    println!("  {} (compaction floor {})", id, id.compaction_floor());
                }
            }
        }
        SnapshotCommand::Verify { data_dir } => {
            let mut invalid = 0;
            for (member, partition_id, dir) in partition_dirs(&data_dir)? {
                let store = SnapshotStore::open_read_only(partition_id, &dir);
                for id in store.list()? {
                    match store.verify(id) {
                        Ok(_) => println!("✓ partition {} node {}: {}", partition_id, member, id),
                        Err(e) => {
                            invalid += 1;
                            println!("✗ partition {} node {}: {}: {}", partition_id, member, id, e);
                        }
                    }
                }
            }
            if invalid > 0 {
                anyhow::bail!("{} snapshot(s) failed verification", invalid);
            }
        }
    }
    Ok(())
}
