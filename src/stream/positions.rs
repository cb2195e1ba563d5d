//! Processing progress kept inside the state store.
//!
//! Storing the positions in the same store as the domain state means they
//! commit in the same batch, so after a crash the recorded progress always
//! matches the state it describes.

use crate::core::error::BraidResult;
use crate::record::NO_POSITION;
use crate::state::{ColumnFamily, ColumnFamilyId, ReadContext, Transaction};
use serde::{Deserialize, Serialize};

/// How far a partition's processor has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingPositions {
    /// Highest command whose follow-ups are reflected in the state.
    pub last_processed_position: i64,
    /// Highest log position whose effects are reflected in the state.
    pub last_applied_position: i64,
}

impl Default for ProcessingPositions {
    fn default() -> Self {
        Self {
            last_processed_position: NO_POSITION,
            last_applied_position: NO_POSITION,
        }
    }
}

/// Column family holding [`ProcessingPositions`].
#[derive(Clone, Copy)]
pub struct PositionsState {
    positions: ColumnFamily<(), ProcessingPositions>,
}

impl Default for PositionsState {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionsState {
    pub const fn new() -> Self {
        Self {
            positions: ColumnFamily::new(ColumnFamilyId::ProcessingPositions),
        }
    }

    pub fn get<C: ReadContext>(&self, ctx: &C) -> BraidResult<ProcessingPositions> {
        Ok(self.positions.get(ctx, &())?.unwrap_or_default())
    }

    pub fn set(&self, tx: &mut Transaction<'_>, positions: &ProcessingPositions) -> BraidResult<()> {
        self.positions.upsert(tx, &(), positions)
    }
}
