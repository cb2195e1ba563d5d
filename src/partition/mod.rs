//! Partition replicas and the transport between them.
//!
//! - [`replica`] - The per-replica actor and its handle
//! - [`router`] - In-process routing of raft messages and inter-partition
//!   commands

pub mod replica;
pub mod router;

pub use replica::{
    PartitionHandle, PartitionMessage, PartitionReplica, PartitionStatus, ReplicaSettings,
};
pub use router::{partition_for_correlation_key, ClusterNetwork};
