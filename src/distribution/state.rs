//! Durable bookkeeping of command distributions on the origin partition.
//!
//! - the distributed command, by distribution key, until every target
//!   acknowledged it;
//! - one pending entry per (distribution key, target partition);
//! - queue entries ordering distributions that share a queue id, per target.

use crate::core::error::BraidResult;
use crate::record::{CommandDistributionRecord, PartitionId};
use crate::state::{ColumnFamily, ColumnFamilyId, ReadContext, Transaction};
use serde::{Deserialize, Serialize};

/// A distribution that has not been acknowledged by one target yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDistribution {
    pub queue_id: Option<String>,
    /// False while the distribution waits in its queue.
    pub sent: bool,
}

#[derive(Clone, Copy)]
pub struct DistributionState {
    commands: ColumnFamily<i64, CommandDistributionRecord>,
    pending: ColumnFamily<(i64, i32), PendingDistribution>,
    queued: ColumnFamily<(String, i32, i64), ()>,
}

impl Default for DistributionState {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributionState {
    pub const fn new() -> Self {
        Self {
            commands: ColumnFamily::new(ColumnFamilyId::DistributionCommand),
            pending: ColumnFamily::new(ColumnFamilyId::PendingDistribution),
            queued: ColumnFamily::new(ColumnFamilyId::QueuedDistribution),
        }
    }

    pub fn add_command(
        &self,
        tx: &mut Transaction<'_>,
        key: i64,
        record: &CommandDistributionRecord,
    ) -> BraidResult<()> {
        self.commands.insert(tx, &key, record)
    }

    pub fn get_command<C: ReadContext>(
        &self,
        ctx: &C,
        key: i64,
    ) -> BraidResult<Option<CommandDistributionRecord>> {
        self.commands.get(ctx, &key)
    }

    pub fn remove_command(&self, tx: &mut Transaction<'_>, key: i64) -> BraidResult<()> {
        self.commands.delete_existing(tx, &key)
    }

    pub fn add_pending(
        &self,
        tx: &mut Transaction<'_>,
        key: i64,
        partition_id: PartitionId,
        queue_id: Option<String>,
        sent: bool,
    ) -> BraidResult<()> {
        if let Some(queue_id) = &queue_id {
            let entry = (queue_id.clone(), partition_id, key);
            if !self.queued.exists(tx, &entry) {
                self.queued.insert(tx, &entry, &())?;
            }
        }
        self.pending
            .upsert(tx, &(key, partition_id), &PendingDistribution { queue_id, sent })
    }

    pub fn get_pending<C: ReadContext>(
        &self,
        ctx: &C,
        key: i64,
        partition_id: PartitionId,
    ) -> BraidResult<Option<PendingDistribution>> {
        self.pending.get(ctx, &(key, partition_id))
    }

    pub fn has_pending<C: ReadContext>(&self, ctx: &C, key: i64, partition_id: PartitionId) -> bool {
        self.pending.exists(ctx, &(key, partition_id))
    }

    /// Remove the pending entry of an acknowledged target.
    pub fn remove_pending(
        &self,
        tx: &mut Transaction<'_>,
        key: i64,
        partition_id: PartitionId,
    ) -> BraidResult<()> {
        let pending = self.pending.get(tx, &(key, partition_id))?;
        self.pending.delete_existing(tx, &(key, partition_id))?;
        if let Some(PendingDistribution {
            queue_id: Some(queue_id),
            ..
        }) = pending
        {
            self.queued
                .delete_if_exists(tx, &(queue_id, partition_id, key));
        }
        Ok(())
    }

    /// Whether any target of a distribution is still unacknowledged.
    pub fn has_any_pending<C: ReadContext>(&self, ctx: &C, key: i64) -> BraidResult<bool> {
        let mut found = false;
        self.pending.while_equal_prefix(ctx, &key, |_, _| {
            found = true;
            Ok(false)
        })?;
        Ok(found)
    }

    /// Whether a queue already holds a distribution for a partition.
    pub fn queue_occupied<C: ReadContext>(
        &self,
        ctx: &C,
        queue_id: &str,
        partition_id: PartitionId,
    ) -> BraidResult<bool> {
        Ok(self.next_queued(ctx, queue_id, partition_id)?.is_some())
    }

    /// Head of a queue for a partition.
    pub fn next_queued<C: ReadContext>(
        &self,
        ctx: &C,
        queue_id: &str,
        partition_id: PartitionId,
    ) -> BraidResult<Option<i64>> {
        let mut head = None;
        self.queued
            .while_equal_prefix(ctx, &(queue_id.to_string(), partition_id), |key, ()| {
                head = Some(key.2);
                Ok(false)
            })?;
        Ok(head)
    }

    /// Every (key, partition) distribution that was sent but not acknowledged.
    pub fn sent_pending<C: ReadContext>(&self, ctx: &C) -> BraidResult<Vec<(i64, PartitionId)>> {
        let mut found = Vec::new();
        self.pending.for_each(ctx, |(key, partition_id), pending| {
            if pending.sent {
                found.push((key, partition_id));
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Every pending (key, partition) entry.
    pub fn all_pending<C: ReadContext>(
        &self,
        ctx: &C,
    ) -> BraidResult<Vec<((i64, PartitionId), PendingDistribution)>> {
        self.pending.collect(ctx)
    }
}
