//! Retrying unacknowledged distributions.
//!
//! The retry bookkeeping is deliberately not part of the replicated state: it
//! only exists on the leader and is rebuilt from the pending entries whenever
//! a replica becomes leader.

use super::DistributionState;
use crate::core::config::DistributionConfig;
use crate::core::error::BraidResult;
use crate::record::PartitionId;
use crate::state::ReadContext;
use crate::stream::result::InterPartitionCommand;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryState {
    next_due_ms: i64,
    backoff_ms: i64,
    attempts: u32,
}

/// Re-sends distributions whose targets have not acknowledged yet, with
/// exponential backoff per (distribution, target).
#[derive(Debug)]
pub struct CommandRedistributor {
    partition_id: PartitionId,
    retry_interval_ms: i64,
    max_backoff_ms: i64,
    retries: HashMap<(i64, PartitionId), RetryState>,
}

impl CommandRedistributor {
    pub fn new(partition_id: PartitionId, config: &DistributionConfig) -> Self {
        Self {
            partition_id,
            retry_interval_ms: config.retry_interval_ms as i64,
            max_backoff_ms: config.max_backoff_ms.max(config.retry_interval_ms) as i64,
            retries: HashMap::new(),
        }
    }

    /// Forget all retry timers, e.g. after losing leadership.
    pub fn reset(&mut self) {
        self.retries.clear();
    }

    pub fn tracked(&self) -> usize {
        self.retries.len()
    }

    /// Attempts made so far for one target of a distribution.
    pub fn attempts(&self, key: i64, partition_id: PartitionId) -> u32 {
        self.retries
            .get(&(key, partition_id))
            .map(|r| r.attempts)
            .unwrap_or(0)
    }

    /// Commands that are due for another send at `now_ms`.
    ///
    /// A distribution seen for the first time is scheduled one retry interval
    /// ahead, since its initial send is a post-commit task of the command that
    /// started it.
    pub fn run_retry_cycle<C: ReadContext>(
        &mut self,
        ctx: &C,
        state: &DistributionState,
        now_ms: i64,
    ) -> BraidResult<Vec<InterPartitionCommand>> {
        let pending = state.sent_pending(ctx)?;
        self.retries.retain(|entry, _| pending.contains(entry));

        let mut due = Vec::new();
        for (key, target) in pending {
            let retry = self.retries.entry((key, target)).or_insert(RetryState {
                next_due_ms: now_ms + self.retry_interval_ms,
                backoff_ms: self.retry_interval_ms,
                attempts: 0,
            });
            if retry.next_due_ms > now_ms {
                continue;
            }

            let Some(command) = state.get_command(ctx, key)? else {
                warn!(key, target, "pending distribution without command");
                continue;
            };
            let Some(value) = command.command_value else {
                warn!(key, target, "distributed command has no value");
                continue;
            };

            retry.attempts += 1;
            retry.backoff_ms = (retry.backoff_ms * 2).min(self.max_backoff_ms);
            retry.next_due_ms = now_ms + retry.backoff_ms;
            debug!(
                key,
                target,
                attempts = retry.attempts,
                next_in_ms = retry.backoff_ms,
                "redistributing command"
            );
            due.push(InterPartitionCommand {
                sender_partition: self.partition_id,
                receiver_partition: target,
                key,
                intent: command.intent,
                value: *value,
            });
        }
        Ok(due)
    }
}
