//! Deterministic key generation.
//!
//! Keys are `(partition_id << 51) + counter`. The counter is bumped while a
//! command is processed and re-derived from event keys on replay, so a
//! follower that replays the log ends up with the same counter as the leader
//! that wrote it.

use crate::core::error::BraidResult;
use crate::record::{decode_key_counter, decode_partition_id, encode_key, PartitionId};
use crate::state::{ColumnFamily, ColumnFamilyId, ReadContext, Transaction};

#[derive(Clone, Copy)]
pub struct KeyGenerator {
    partition_id: PartitionId,
    counter: ColumnFamily<(), i64>,
}

impl KeyGenerator {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            counter: ColumnFamily::new(ColumnFamilyId::KeyGenerator),
        }
    }

    fn current<C: ReadContext>(&self, ctx: &C) -> BraidResult<i64> {
        Ok(self.counter.get(ctx, &())?.unwrap_or(0))
    }

    /// Allocate the next key.
    pub fn next_key(&self, tx: &mut Transaction<'_>) -> BraidResult<i64> {
        let next = self.current(tx)? + 1;
        self.counter.upsert(tx, &(), &next)?;
        Ok(encode_key(self.partition_id, next))
    }

    /// Advance the counter past a key seen in an applied event.
    pub fn observe(&self, tx: &mut Transaction<'_>, key: i64) -> BraidResult<()> {
        if key < 0 || decode_partition_id(key) != self.partition_id {
            return Ok(());
        }
        let counter = decode_key_counter(key);
        if counter > self.current(tx)? {
            self.counter.upsert(tx, &(), &counter)?;
        }
        Ok(())
    }
}
