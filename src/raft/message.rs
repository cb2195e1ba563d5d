//! Replication messages.

use super::role::MemberId;
use crate::record::PartitionId;
use crate::snapshot::SnapshotChunk;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub term: u64,
    pub leader: MemberId,
    pub prev_position: i64,
    pub prev_term: u64,
    /// Encoded frames, copied verbatim into the follower's log.
    pub frames: Vec<Vec<u8>>,
    pub commit_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub term: u64,
    pub success: bool,
    /// On success the highest position now matching the leader; otherwise a
    /// hint where the leader should retry from.
    pub last_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
    pub candidate: MemberId,
    pub last_position: i64,
    pub last_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub granted: bool,
}

/// One file of a snapshot, plus where the follower's log continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader: MemberId,
    /// The follower's log restarts after this position.
    pub base_position: i64,
    pub base_term: u64,
    pub chunk: SnapshotChunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: u64,
    pub success: bool,
    /// Set once the snapshot is installed.
    pub done: bool,
    pub last_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    AppendRequest(AppendRequest),
    AppendResponse(AppendResponse),
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    InstallSnapshotRequest(InstallSnapshotRequest),
    InstallSnapshotResponse(InstallSnapshotResponse),
}

impl RaftMessage {
    pub fn term(&self) -> u64 {
        match self {
            Self::AppendRequest(m) => m.term,
            Self::AppendResponse(m) => m.term,
            Self::VoteRequest(m) => m.term,
            Self::VoteResponse(m) => m.term,
            Self::InstallSnapshotRequest(m) => m.term,
            Self::InstallSnapshotResponse(m) => m.term,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::AppendRequest(_) => "append_request",
            Self::AppendResponse(_) => "append_response",
            Self::VoteRequest(_) => "vote_request",
            Self::VoteResponse(_) => "vote_response",
            Self::InstallSnapshotRequest(_) => "install_snapshot_request",
            Self::InstallSnapshotResponse(_) => "install_snapshot_response",
        }
    }
}

/// A message addressed to one replica of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub partition_id: PartitionId,
    pub from: MemberId,
    pub to: MemberId,
    pub message: RaftMessage,
}
