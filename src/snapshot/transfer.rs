//! Snapshot transfer between replicas.
//!
//! A snapshot travels as one [`SnapshotChunk`] per file. Every chunk carries
//! an xxhash64 of its content and the combined checksum of the whole
//! snapshot; the receiver checks both before it publishes anything.

use super::checksum::SnapshotChecksum;
use super::store::{PersistedSnapshot, SnapshotId, SnapshotStore, TransientSnapshot};
use crate::core::error::{BraidError, BraidResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hasher;
use twox_hash::XxHash64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChunk {
    pub snapshot_id: String,
    pub file_name: String,
    pub total_count: u32,
    pub content: Vec<u8>,
    pub chunk_checksum: u64,
    pub snapshot_checksum: String,
}

fn chunk_checksum(content: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(content);
    hasher.finish()
}

/// Split a persisted snapshot into chunks, in file name order.
pub fn chunks(snapshot: &PersistedSnapshot) -> BraidResult<Vec<SnapshotChunk>> {
    let checksum = snapshot.checksum();
    let combined = checksum.combined();
    let names: Vec<&str> = checksum.file_names().collect();
    let total_count = names.len() as u32;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let content = snapshot.read_file(name)?;
        out.push(SnapshotChunk {
            snapshot_id: snapshot.id().to_string(),
            file_name: name.to_string(),
            total_count,
            chunk_checksum: chunk_checksum(&content),
            content,
            snapshot_checksum: combined.clone(),
        });
    }
    Ok(out)
}

/// A snapshot being received from another replica.
#[derive(Debug)]
pub struct ReceivedSnapshot {
    transient: TransientSnapshot,
    expected_checksum: String,
    total_count: u32,
    received: BTreeSet<String>,
}

impl ReceivedSnapshot {
    /// Start receiving the snapshot announced by `first`.
    pub fn begin(store: &SnapshotStore, first: &SnapshotChunk) -> BraidResult<Self> {
        let id: SnapshotId = first.snapshot_id.parse()?;
        Ok(Self {
            transient: store.take_transient(id)?,
            expected_checksum: first.snapshot_checksum.clone(),
            total_count: first.total_count,
            received: BTreeSet::new(),
        })
    }

    pub fn id(&self) -> SnapshotId {
        self.transient.id()
    }

    fn reject(&self, reason: impl Into<String>) -> BraidError {
        BraidError::invalid_snapshot(self.transient.id().to_string(), reason)
    }

    /// Validate and store one chunk. Returns true once every chunk arrived.
    pub fn apply(&mut self, chunk: &SnapshotChunk) -> BraidResult<bool> {
        if chunk.snapshot_id != self.transient.id().to_string() {
            return Err(self.reject(format!(
                "chunk of snapshot {} sent to receiver of another snapshot",
                chunk.snapshot_id
            )));
        }
        if chunk.snapshot_checksum != self.expected_checksum
            || chunk.total_count != self.total_count
        {
            return Err(self.reject("chunk disagrees with the announced snapshot"));
        }
        if chunk.file_name.contains('/') || chunk.file_name.contains("..") {
            return Err(self.reject(format!("invalid file name {}", chunk.file_name)));
        }
        let computed = chunk_checksum(&chunk.content);
        if computed != chunk.chunk_checksum {
            return Err(self.reject(format!(
                "chunk {} checksum mismatch: expected {:x}, computed {:x}",
                chunk.file_name, chunk.chunk_checksum, computed
            )));
        }
        if self.received.insert(chunk.file_name.clone()) {
            self.transient.write_file(&chunk.file_name, &chunk.content)?;
        }
        Ok(self.is_complete())
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.total_count
    }

    /// Verify the whole snapshot and publish it.
    pub fn persist(self) -> BraidResult<PersistedSnapshot> {
        if !self.is_complete() {
            return Err(self.reject(format!(
                "received {} of {} chunks",
                self.received.len(),
                self.total_count
            )));
        }
        let id = self.transient.id().to_string();
        let checksum = SnapshotChecksum::compute(&id, self.transient.path())?;
        if checksum.combined() != self.expected_checksum {
            let err = self.reject("snapshot checksum mismatch");
            self.transient.abort();
            return Err(err);
        }
        self.transient.persist()
    }

    pub fn abort(self) {
        self.transient.abort();
    }
}
