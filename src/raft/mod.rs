//! Replication of partition logs.
//!
//! - [`role`] - Roles, persisted term and vote, election timing
//! - [`entry`] - Lifecycle of leader-appended batches
//! - [`message`] - Messages exchanged between replicas
//! - [`node`] - The replication state machine
//! - [`admin`] - Admin control protocol
//!
//! Each partition forms its own replication group. The node is driven by the
//! partition actor; it appends through the partition's [`LogStream`] and
//! returns outgoing messages instead of sending them.
//!
//! [`LogStream`]: crate::log::LogStream

pub mod admin;
pub mod entry;
pub mod message;
pub mod node;
pub mod role;

pub use admin::{AdminError, AdminErrorCode, AdminRequest, AdminRequestType, AdminResponse};
pub use entry::{transition, EntryEvent, EntryState, EntryTracker};
pub use message::{
    AppendRequest, AppendResponse, Envelope, InstallSnapshotRequest, InstallSnapshotResponse,
    RaftMessage, VoteRequest, VoteResponse,
};
pub use node::{RaftContext, RaftEvent, RaftNode, RaftOutput};
pub use role::{election_timeout_ticks, quorum, MemberId, MetaStore, RaftMeta, RaftRole};
