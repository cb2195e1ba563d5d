//! Raft roles, persistent vote state and election timing.

use crate::core::error::{BraidError, BraidResult};
use crate::record::PartitionId;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::io::Write;
use std::path::{Path, PathBuf};
use twox_hash::XxHash64;

/// Member of a partition's replication group.
pub type MemberId = u32;

const META_FILE: &str = "raft-meta.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftRole {
    Follower,
    Candidate,
    Leader,
    /// The partition failed; the replica neither votes nor appends.
    Inactive,
}

impl std::fmt::Display for RaftRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Follower => write!(f, "FOLLOWER"),
            Self::Candidate => write!(f, "CANDIDATE"),
            Self::Leader => write!(f, "LEADER"),
            Self::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// State that must survive restarts before it is acted upon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMeta {
    pub term: u64,
    pub voted_for: Option<MemberId>,
}

/// Atomic file store for [`RaftMeta`].
#[derive(Debug, Clone)]
pub struct MetaStore {
    partition_id: PartitionId,
    path: PathBuf,
}

impl MetaStore {
    pub fn new(partition_id: PartitionId, partition_dir: &Path) -> Self {
        Self {
            partition_id,
            path: partition_dir.join(META_FILE),
        }
    }

    pub fn load(&self) -> BraidResult<RaftMeta> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RaftMeta::default()),
            Err(e) => Err(BraidError::io(self.partition_id, e)),
        }
    }

    /// Write through a temporary file and rename.
    pub fn store(&self, meta: &RaftMeta) -> BraidResult<()> {
        let io = |e| BraidError::io(self.partition_id, e);
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(meta)?;
        let mut file = std::fs::File::create(&tmp).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        std::fs::rename(&tmp, &self.path).map_err(io)
    }
}

/// Election timeout in ticks for `member` in `term`.
///
/// The timeout is derived from (member, term) so that members spread out
/// without a random source. With priority election the primary always uses
/// the base timeout and everyone else waits strictly longer.
pub fn election_timeout_ticks(
    base_ticks: u32,
    member: MemberId,
    term: u64,
    is_primary: bool,
    priority_election: bool,
) -> u32 {
    let base = base_ticks.max(1);
    if priority_election && is_primary {
        return base;
    }
    let mut hasher = XxHash64::with_seed(term);
    hasher.write_u32(member);
    let spread = (hasher.finish() % u64::from(base)) as u32;
    if priority_election {
        base + 1 + spread
    } else {
        base + spread
    }
}

/// Size of a majority of `members`.
pub fn quorum(members: usize) -> usize {
    members / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_has_shortest_timeout() {
        for term in 0..20 {
            let primary = election_timeout_ticks(10, 0, term, true, true);
            for member in 1..5 {
                assert!(election_timeout_ticks(10, member, term, false, true) > primary);
            }
        }
    }

    #[test]
    fn timeout_is_deterministic() {
        assert_eq!(
            election_timeout_ticks(10, 3, 7, false, false),
            election_timeout_ticks(10, 3, 7, false, false)
        );
    }

    #[test]
    fn meta_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::new(1, dir.path());
        assert_eq!(store.load().unwrap(), RaftMeta::default());
        let meta = RaftMeta {
            term: 4,
            voted_for: Some(2),
        };
        store.store(&meta).unwrap();
        assert_eq!(store.load().unwrap(), meta);
    }
}
