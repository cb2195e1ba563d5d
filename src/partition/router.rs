//! In-process transport between partition replicas.
//!
//! Replicas register their inbox per `(partition, member)`. Raft messages go
//! to exactly one replica; inter-partition commands go to every replica of
//! the receiving partition and only its leader appends them. Exporter
//! positions go from a leader to the other replicas of its partition.

use super::replica::PartitionMessage;
use crate::raft::{Envelope, MemberId};
use crate::record::PartitionId;
use crate::stream::InterPartitionCommand;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::hash::Hasher;
use tokio::sync::mpsc;
use tracing::trace;
use twox_hash::XxHash64;

const CORRELATION_SEED: u64 = 0;

pub struct ClusterNetwork {
    partition_count: u32,
    replicas: RwLock<BTreeMap<(PartitionId, MemberId), mpsc::UnboundedSender<PartitionMessage>>>,
    isolated: RwLock<HashSet<MemberId>>,
}

impl ClusterNetwork {
    pub fn new(partition_count: u32) -> Self {
        Self {
            partition_count: partition_count.max(1),
            replicas: RwLock::new(BTreeMap::new()),
            isolated: RwLock::new(HashSet::new()),
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    pub fn register(
        &self,
        partition_id: PartitionId,
        member: MemberId,
        inbox: mpsc::UnboundedSender<PartitionMessage>,
    ) {
        self.replicas.write().insert((partition_id, member), inbox);
    }

    pub fn unregister(&self, partition_id: PartitionId, member: MemberId) {
        self.replicas.write().remove(&(partition_id, member));
    }

    /// Members with a registered replica of `partition_id`.
    pub fn members(&self, partition_id: PartitionId) -> Vec<MemberId> {
        self.replicas
            .read()
            .keys()
            .filter(|(p, _)| *p == partition_id)
            .map(|(_, m)| *m)
            .collect()
    }

    /// Drop all traffic from and to `member` until [`heal`](Self::heal).
    pub fn isolate(&self, member: MemberId) {
        self.isolated.write().insert(member);
    }

    pub fn heal(&self, member: MemberId) {
        self.isolated.write().remove(&member);
    }

    pub fn is_isolated(&self, member: MemberId) -> bool {
        self.isolated.read().contains(&member)
    }

    /// Deliver a raft message. Returns false if it was dropped.
    pub fn send_raft(&self, envelope: Envelope) -> bool {
        {
            let isolated = self.isolated.read();
            if isolated.contains(&envelope.from) || isolated.contains(&envelope.to) {
                return false;
            }
        }
        let replicas = self.replicas.read();
        let Some(inbox) = replicas.get(&(envelope.partition_id, envelope.to)) else {
            return false;
        };
        trace!(
            partition_id = envelope.partition_id,
            from = envelope.from,
            to = envelope.to,
            kind = envelope.message.kind(),
            "routing raft message"
        );
        inbox.send(PartitionMessage::Raft(envelope)).is_ok()
    }

    /// Hand the leader's acknowledged exporter positions to the other
    /// reachable replicas of `partition_id`. Returns how many received them.
    pub fn send_exporter_positions(
        &self,
        partition_id: PartitionId,
        from: MemberId,
        positions: &BTreeMap<String, i64>,
    ) -> usize {
        let isolated = self.isolated.read();
        if isolated.contains(&from) {
            return 0;
        }
        let replicas = self.replicas.read();
        let mut delivered = 0;
        for ((partition, member), inbox) in replicas.iter() {
            if *partition != partition_id || *member == from || isolated.contains(member) {
                continue;
            }
            let message = PartitionMessage::ExporterPositions {
                positions: positions.clone(),
            };
            if inbox.send(message).is_ok() {
                delivered += 1;
            }
        }
        trace!(partition_id, from, delivered, "routing exporter positions");
        delivered
    }

    /// Offer a command to every reachable replica of the receiving partition.
    pub fn send_command(&self, command: InterPartitionCommand) -> usize {
        let isolated = self.isolated.read();
        let replicas = self.replicas.read();
        let mut delivered = 0;
        for ((partition_id, member), inbox) in replicas.iter() {
            if *partition_id != command.receiver_partition || isolated.contains(member) {
                continue;
            }
            if inbox
                .send(PartitionMessage::InterPartition(command.clone()))
                .is_ok()
            {
                delivered += 1;
            }
        }
        trace!(
            sender = command.sender_partition,
            receiver = command.receiver_partition,
            key = command.key,
            delivered,
            "routing inter-partition command"
        );
        delivered
    }

    /// Partition owning a message correlation key.
    pub fn partition_for_correlation_key(&self, correlation_key: &str) -> PartitionId {
        partition_for_correlation_key(correlation_key, self.partition_count)
    }
}

/// `1 + xxhash64(correlation_key) % partition_count`.
pub fn partition_for_correlation_key(correlation_key: &str, partition_count: u32) -> PartitionId {
    let mut hasher = XxHash64::with_seed(CORRELATION_SEED);
    hasher.write(correlation_key.as_bytes());
    let index = hasher.finish() % u64::from(partition_count.max(1));
    index as PartitionId + 1
}
