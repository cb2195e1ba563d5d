//! Sequential reader over the committed part of a partition log.

use crate::core::error::{BraidError, BraidResult};
use crate::log::{LogStream, ReadLimit};
use crate::record::Record;

/// Position-keyed cursor that can resume after any acknowledged position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExporterCursor {
    next: i64,
}

impl ExporterCursor {
    /// Cursor continuing after `last_acknowledged`; a negative position
    /// starts at the beginning of the log.
    pub fn resume_after(last_acknowledged: i64) -> Self {
        Self {
            next: last_acknowledged.max(0) + 1,
        }
    }

    pub fn next_position(&self) -> i64 {
        self.next
    }

    pub fn seek(&mut self, position: i64) {
        self.next = position.max(1);
    }

    /// Read up to `max` committed records.
    ///
    /// Fails with [`BraidError::Compacted`] if the next position was already
    /// removed from the log.
    pub fn poll(&mut self, log: &LogStream, max: usize) -> BraidResult<Vec<Record>> {
        let lowest = log.lowest_position();
        if self.next < lowest {
            return Err(BraidError::Compacted {
                position: self.next,
                floor: lowest,
            });
        }
        let mut records = Vec::new();
        let mut reader = log.reader(self.next, ReadLimit::Committed);
        for entry in reader.by_ref().take(max) {
            records.push(entry?.record);
        }
        self.next = reader.next_position();
        Ok(records)
    }
}
