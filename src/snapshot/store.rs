//! On-disk snapshot store of one partition.
//!
//! ```text
//! <partition>/snapshots/<id>/state.bin
//! <partition>/snapshots/<id>.checksum
//! <partition>/pending/<id>/...
//! ```
//!
//! Snapshots are written under `pending/`, moved into `snapshots/` with a
//! rename and only then receive their checksum file, written to a temporary
//! name and renamed as well. A snapshot directory without checksum file is
//! an interrupted persist and is deleted on open.

use super::checksum::SnapshotChecksum;
use crate::core::error::{BraidError, BraidResult};
use crate::record::PartitionId;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

const SNAPSHOTS_DIR: &str = "snapshots";
const PENDING_DIR: &str = "pending";
const CHECKSUM_SUFFIX: &str = ".checksum";
/// File holding the exported state store entries.
pub const STATE_FILE: &str = "state.bin";

/// Identity of a snapshot: `{position}-{term}-{processed}-{exported}`.
///
/// `position`/`term` name the last log entry whose effects the snapshot
/// holds; `processed` and `exported` bound how far the log may be compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId {
    pub position: i64,
    pub term: u64,
    pub processed: i64,
    pub exported: i64,
}

impl SnapshotId {
    /// Positions below zero ("nothing yet") are recorded as 0.
    pub fn new(position: i64, term: u64, processed: i64, exported: i64) -> Self {
        Self {
            position: position.max(0),
            term,
            processed: processed.max(0),
            exported: exported.max(0),
        }
    }

    /// Lowest log position that must be retained next to this snapshot.
    pub fn compaction_floor(&self) -> i64 {
        self.processed.min(self.exported) + 1
    }
}

impl std::fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.position, self.term, self.processed, self.exported
        )
    }
}

impl FromStr for SnapshotId {
    type Err = BraidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let invalid = || BraidError::invalid_snapshot(s, "malformed snapshot id");
        if parts.len() != 4 {
            return Err(invalid());
        }
        Ok(Self {
            position: parts[0].parse().map_err(|_| invalid())?,
            term: parts[1].parse().map_err(|_| invalid())?,
            processed: parts[2].parse().map_err(|_| invalid())?,
            exported: parts[3].parse().map_err(|_| invalid())?,
        })
    }
}

/// A snapshot being written; invisible to readers until persisted.
#[derive(Debug)]
pub struct TransientSnapshot {
    partition_id: PartitionId,
    id: SnapshotId,
    dir: PathBuf,
    snapshots_dir: PathBuf,
}

impl TransientSnapshot {
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Directory the caller populates.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn write_file(&self, name: &str, bytes: &[u8]) -> BraidResult<()> {
        let mut file =
            File::create(self.dir.join(name)).map_err(|e| BraidError::io(self.partition_id, e))?;
        file.write_all(bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| BraidError::io(self.partition_id, e))
    }

    /// Write the state store entries as [`STATE_FILE`].
    pub fn write_state(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> BraidResult<()> {
        let bytes = bincode::serialize(entries)?;
        self.write_file(STATE_FILE, &bytes)
    }

    /// Move the snapshot into place and publish its checksum.
    pub fn persist(self) -> BraidResult<PersistedSnapshot> {
        let id = self.id.to_string();
        let target = self.snapshots_dir.join(&id);
        let checksum_path = checksum_path(&self.snapshots_dir, &self.id);
        if target.exists() && checksum_path.exists() {
            let _ = std::fs::remove_dir_all(&self.dir);
            return PersistedSnapshot::load(self.id, &self.snapshots_dir);
        }

        let checksum = SnapshotChecksum::compute(&id, &self.dir)?;
        let io = |e| BraidError::io(self.partition_id, e);
        if target.exists() {
            std::fs::remove_dir_all(&target).map_err(io)?;
        }
        std::fs::rename(&self.dir, &target).map_err(io)?;

        let tmp = checksum_path.with_extension("checksum.tmp");
        {
            let mut file = File::create(&tmp).map_err(io)?;
            file.write_all(checksum.render().as_bytes()).map_err(io)?;
            file.sync_all().map_err(io)?;
        }
        std::fs::rename(&tmp, &checksum_path).map_err(io)?;
        if let Ok(dir) = File::open(&self.snapshots_dir) {
            let _ = dir.sync_all();
        }

        info!(
            partition_id = self.partition_id,
            snapshot_id = %self.id,
            "persisted snapshot"
        );
        Ok(PersistedSnapshot {
            id: self.id,
            dir: target,
            checksum,
        })
    }

    /// Discard the snapshot.
    pub fn abort(self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// A published, checksum-verified snapshot.
#[derive(Debug, Clone)]
pub struct PersistedSnapshot {
    id: SnapshotId,
    dir: PathBuf,
    checksum: SnapshotChecksum,
}

impl PersistedSnapshot {
    fn load(id: SnapshotId, snapshots_dir: &Path) -> BraidResult<Self> {
        let name = id.to_string();
        let dir = snapshots_dir.join(&name);
        let text = std::fs::read_to_string(checksum_path(snapshots_dir, &id))
            .map_err(|e| BraidError::invalid_snapshot(&name, format!("checksum file: {}", e)))?;
        let checksum = SnapshotChecksum::parse(&name, &text)?;
        checksum.verify(&name, &dir)?;
        Ok(Self { id, dir, checksum })
    }

    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn checksum(&self) -> &SnapshotChecksum {
        &self.checksum
    }

    pub fn read_file(&self, name: &str) -> BraidResult<Vec<u8>> {
        std::fs::read(self.dir.join(name))
            .map_err(|e| BraidError::invalid_snapshot(self.id.to_string(), e.to_string()))
    }

    /// Entries of the state store captured by this snapshot.
    pub fn read_state(&self) -> BraidResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let bytes = self.read_file(STATE_FILE)?;
        bincode::deserialize(&bytes)
            .map_err(|e| BraidError::invalid_snapshot(self.id.to_string(), e.to_string()))
    }
}

/// Snapshots of one partition.
#[derive(Debug)]
pub struct SnapshotStore {
    partition_id: PartitionId,
    snapshots_dir: PathBuf,
    pending_dir: PathBuf,
    retained_count: usize,
    read_only: bool,
}

impl SnapshotStore {
    /// Open the store under `partition_dir`, removing leftovers of
    /// interrupted writes.
    pub fn open(
        partition_id: PartitionId,
        partition_dir: &Path,
        retained_count: usize,
    ) -> BraidResult<Self> {
        let store = Self {
            partition_id,
            snapshots_dir: partition_dir.join(SNAPSHOTS_DIR),
            pending_dir: partition_dir.join(PENDING_DIR),
            retained_count: retained_count.max(1),
            read_only: false,
        };
        let io = |e| BraidError::io(partition_id, e);
        std::fs::create_dir_all(&store.snapshots_dir).map_err(io)?;
        if store.pending_dir.exists() {
            std::fs::remove_dir_all(&store.pending_dir).map_err(io)?;
        }
        std::fs::create_dir_all(&store.pending_dir).map_err(io)?;
        store.remove_orphans()?;
        Ok(store)
    }

    /// Open the store for inspection. Pending and orphaned snapshots are
    /// left alone and every call that would write or delete fails.
    pub fn open_read_only(partition_id: PartitionId, partition_dir: &Path) -> Self {
        Self {
            partition_id,
            snapshots_dir: partition_dir.join(SNAPSHOTS_DIR),
            pending_dir: partition_dir.join(PENDING_DIR),
            retained_count: usize::MAX,
            read_only: true,
        }
    }

    fn io(&self, err: std::io::Error) -> BraidError {
        BraidError::io(self.partition_id, err)
    }

    fn ensure_writable(&self) -> BraidResult<()> {
        if self.read_only {
            return Err(BraidError::internal(format!(
                "snapshot store of partition {} is opened read-only",
                self.partition_id
            )));
        }
        Ok(())
    }

    fn remove_orphans(&self) -> BraidResult<()> {
        let entries = std::fs::read_dir(&self.snapshots_dir).map_err(|e| self.io(e))?;
        for entry in entries {
            let path = entry.map_err(|e| self.io(e))?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let orphan = if path.is_dir() {
                match name.parse::<SnapshotId>() {
                    Ok(id) => !checksum_path(&self.snapshots_dir, &id).exists(),
                    Err(_) => true,
                }
            } else if let Some(stem) = name.strip_suffix(CHECKSUM_SUFFIX) {
                !self.snapshots_dir.join(stem).is_dir()
            } else {
                true
            };
            if orphan {
                warn!(
                    partition_id = self.partition_id,
                    path = %path.display(),
                    "removing orphaned snapshot file"
                );
                remove_path(&path).map_err(|e| self.io(e))?;
            }
        }
        Ok(())
    }

    /// Start writing a snapshot.
    pub fn take_transient(&self, id: SnapshotId) -> BraidResult<TransientSnapshot> {
        self.ensure_writable()?;
        let dir = self.pending_dir.join(id.to_string());
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| self.io(e))?;
        }
        std::fs::create_dir_all(&dir).map_err(|e| self.io(e))?;
        Ok(TransientSnapshot {
            partition_id: self.partition_id,
            id,
            dir,
            snapshots_dir: self.snapshots_dir.clone(),
        })
    }

    /// Ids of every published snapshot, oldest first. A snapshot counts as
    /// published once its checksum file exists. Not verified.
    pub fn list(&self) -> BraidResult<Vec<SnapshotId>> {
        let mut ids = Vec::new();
        let entries = match std::fs::read_dir(&self.snapshots_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && self.read_only => {
                return Ok(ids)
            }
            Err(e) => return Err(self.io(e)),
        };
        for entry in entries {
            let path = entry.map_err(|e| self.io(e))?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<SnapshotId>().ok())
                .filter(|id| checksum_path(&self.snapshots_dir, id).exists())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Load and verify one snapshot.
    pub fn verify(&self, id: SnapshotId) -> BraidResult<PersistedSnapshot> {
        PersistedSnapshot::load(id, &self.snapshots_dir)
    }

    /// Newest snapshot that passes verification. Snapshots failing it are
    /// deleted unless the store is read-only.
    pub fn latest_snapshot(&self) -> BraidResult<Option<PersistedSnapshot>> {
        for id in self.list()?.into_iter().rev() {
            match self.verify(id) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(_) if self.read_only => continue,
                Err(err) => {
                    warn!(
                        partition_id = self.partition_id,
                        snapshot_id = %id,
                        error = %err,
                        "deleting invalid snapshot"
                    );
                    self.delete(id)?;
                }
            }
        }
        Ok(None)
    }

    pub fn delete(&self, id: SnapshotId) -> BraidResult<()> {
        self.ensure_writable()?;
        let dir = self.snapshots_dir.join(id.to_string());
        let checksum = checksum_path(&self.snapshots_dir, &id);
        // Checksum first: a directory without checksum is an orphan anyway.
        if checksum.exists() {
            std::fs::remove_file(&checksum).map_err(|e| self.io(e))?;
        }
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| self.io(e))?;
        }
        Ok(())
    }

    /// Delete snapshots older than `id` beyond the retained count, and
    /// pending snapshots older than `id`. Returns how many snapshots went.
    pub fn purge_older_than(&self, id: SnapshotId) -> BraidResult<usize> {
        self.ensure_writable()?;
        let mut removed = 0;
        let ids = self.list()?;
        let keep_from = ids.len().saturating_sub(self.retained_count);
        for old in ids.iter().take(keep_from).filter(|old| **old < id) {
            self.delete(*old)?;
            removed += 1;
            debug!(partition_id = self.partition_id, snapshot_id = %old, "purged snapshot");
        }

        let pending = std::fs::read_dir(&self.pending_dir).map_err(|e| self.io(e))?;
        for entry in pending {
            let path = entry.map_err(|e| self.io(e))?.path();
            let stale = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<SnapshotId>().ok())
                .map(|pending_id| pending_id < id)
                .unwrap_or(true);
            if stale {
                remove_path(&path).map_err(|e| self.io(e))?;
            }
        }
        Ok(removed)
    }
}

fn checksum_path(snapshots_dir: &Path, id: &SnapshotId) -> PathBuf {
    snapshots_dir.join(format!("{}{}", id, CHECKSUM_SUFFIX))
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
