//! CLI command implementations.

mod config;
mod init;
mod inspect;
mod snapshot;
mod start;
mod status;

pub use config::{run_config, ConfigArgs};
pub use init::{run_init, InitArgs};
pub use inspect::{run_inspect, InspectArgs};
pub use snapshot::{run_snapshot, SnapshotArgs};
pub use start::{run_start_with_config, StartArgs};
pub use status::{run_status, StatusArgs};

use std::path::{Path, PathBuf};

/// Partition directories below a data directory, as
/// `(member, partition_id, path)`.
pub(crate) fn partition_dirs(data_dir: &Path) -> anyhow::Result<Vec<(u32, i32, PathBuf)>> {
    let mut found = Vec::new();
    if !data_dir.exists() {
        return Ok(found);
    }
    for node in std::fs::read_dir(data_dir)? {
        let node = node?;
        let Some(member) = node
            .file_name()
            .to_str()
            .and_then(|n| n.strip_prefix("node-"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        for partition in std::fs::read_dir(node.path())? {
            let partition = partition?;
            let Some(partition_id) = partition
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("partition-"))
                .and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };
            found.push((member, partition_id, partition.path()));
        }
    }
    found.sort_by_key(|(member, partition_id, _)| (*partition_id, *member));
    Ok(found)
}
