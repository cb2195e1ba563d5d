//! Inspect command implementation.

use crate::core::runtime::partition_dir;
use crate::log::{LogStream, ReadLimit};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Inspect partition logs.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Print the records of a partition log. The log is only read; a torn
    /// tail is reported, not truncated.
    Log {
        /// Data directory.
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
        /// Member owning the replica.
        #[arg(long, default_value_t = 0)]
        node: u32,
        /// Partition id.
        #[arg(long, default_value_t = 1)]
        partition: i32,
        /// First position to print.
        #[arg(long, default_value_t = 1)]
        from: i64,
        /// Maximum number of records.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Log {
            data_dir,
            node,
            partition,
            from,
            limit,
        } => {
            let dir = partition_dir(&data_dir, node, partition).join("log");
            if !dir.exists() {
                anyhow::bail!("no log for partition {} on node {} in {:?}", partition, node, data_dir);
            }
            let log = LogStream::open_read_only(partition, &dir)?;
            println!(
                "partition {} node {}: positions {}..={}",
                partition,
                node,
                log.lowest_position(),
                log.highest_position()
            );
            let torn_bytes = log.recovery().torn_bytes;
            if torn_bytes > 0 {
                println!("torn tail of {} bytes after the last complete batch", torn_bytes);
            }
            let start = from.max(log.lowest_position());
            for entry in log.reader(start, ReadLimit::Appended).take(limit) {
                let entry = entry?;
                let record = &entry.record;
                println!(
                    "{:>8} term={:<4} key={:<20} {:?} {} {} source={} value={:?}",
                    record.position,
                    entry.term,
                    record.key,
                    record.record_type(),
                    record.value_type(),
                    record.intent(),
                    record.source_record_position,
                    record.value
                );
            }
        }
    }
    Ok(())
}
