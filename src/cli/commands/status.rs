//! Status command implementation.
//!
//! Reads replica metadata straight from a data directory without changing
//! it, so it works while the node is stopped or running.

use super::partition_dirs;
use crate::log::LogStream;
use crate::raft::MetaStore;
use crate::snapshot::SnapshotStore;
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

/// Show partition status from a data directory.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Data directory.
    #[arg(short, long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Serialize)]
struct ReplicaSummary {
    partition_id: i32,
    member: u32,
    term: u64,
    voted_for: Option<u32>,
    lowest_position: i64,
    highest_position: i64,
    last_term: u64,
    torn_bytes: u64,
    latest_snapshot: Option<String>,
}

/// Run the status command.
pub fn run_status(args: StatusArgs) -> Result<()> {
    let mut summaries = Vec::new();
    for (member, partition_id, dir) in partition_dirs(&args.data_dir)? {
        let meta = MetaStore::new(partition_id, &dir).load()?;
        let log = LogStream::open_read_only(partition_id, &dir.join("log"))?;
        let snapshots = SnapshotStore::open_read_only(partition_id, &dir);
        summaries.push(ReplicaSummary {
            partition_id,
            member,
            term: meta.term,
            voted_for: meta.voted_for,
            lowest_position: log.lowest_position(),
            highest_position: log.highest_position(),
            last_term: log.last_term(),
            torn_bytes: log.recovery().torn_bytes,
            latest_snapshot: snapshots.list()?.last().map(|id| id.to_string()),
        });
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summaries)?),
        _ => {
            println!("Braid Data Directory Status");
            println!("===========================");
            println!("Data dir: {:?}", args.data_dir);
            println!();
            if summaries.is_empty() {
                println!("No partition replicas found.");
            }
            for s in &summaries {
                println!("Partition {} / node {}:", s.partition_id, s.member);
                println!("  Term:         {} (voted for {:?})", s.term, s.voted_for);
                println!(
                    "  Log:          {}..={} (last term {})",
                    s.lowest_position, s.highest_position, s.last_term
                );
                if s.torn_bytes > 0 {
                    println!("  Torn tail:    {} bytes", s.torn_bytes);
                }
                println!(
                    "  Snapshot:     {}",
                    s.latest_snapshot.as_deref().unwrap_or("none")
                );
            }
        }
    }
    Ok(())
}
