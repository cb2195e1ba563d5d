//! Snapshots of the partition state.
//!
//! - [`store`] - Transient and persisted snapshots, retention
//! - [`checksum`] - SHA-256 checksum companion files
//! - [`transfer`] - Chunked transfer to lagging replicas
//!
//! A snapshot holds the state store entries of a partition at a log position.
//! Recovery restores the newest valid snapshot and replays the log after it;
//! the log below the snapshot's compaction floor may then be deleted.

pub mod checksum;
pub mod store;
pub mod transfer;

pub use checksum::SnapshotChecksum;
pub use store::{PersistedSnapshot, SnapshotId, SnapshotStore, TransientSnapshot, STATE_FILE};
pub use transfer::{chunks, ReceivedSnapshot, SnapshotChunk};
