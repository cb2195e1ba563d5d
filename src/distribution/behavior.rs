//! Distributing a command from its origin partition to the others.
//!
//! The origin records a `Started` event holding the command, then for each
//! target either sends it right away (`Distributing`) or parks it behind an
//! earlier distribution of the same queue (`Enqueued`). Sends are post-commit
//! tasks; a target answers with an `Acknowledge` command once it processed
//! its copy.

use crate::core::error::BraidResult;
use crate::engine::ProcessingContext;
use crate::record::{
    CommandDistributionIntent, CommandDistributionRecord, Intent, PartitionId, RecordValue,
};
use crate::stream::result::InterPartitionCommand;
use tracing::debug;

/// Queue shared by all deployment distributions.
pub const DEPLOYMENT_QUEUE: &str = "deployment";

fn distribution_record(
    partition_id: PartitionId,
    queue_id: Option<&str>,
    intent: Intent,
    value: Option<&RecordValue>,
) -> CommandDistributionRecord {
    CommandDistributionRecord {
        partition_id,
        queue_id: queue_id.map(str::to_string),
        value_type: intent.value_type(),
        intent,
        command_value: value.map(|v| Box::new(v.clone())),
    }
}

/// Distribute `intent`/`value` under `key` to every partition except this one.
pub fn distribute_to_other_partitions(
    ctx: &mut ProcessingContext<'_, '_>,
    key: i64,
    intent: Intent,
    value: &RecordValue,
    queue_id: Option<&str>,
) -> BraidResult<()> {
    let own = ctx.partition_id();
    let targets: Vec<PartitionId> = ctx
        .partition_ids()
        .into_iter()
        .filter(|p| *p != own)
        .collect();
    distribute_to_partitions(ctx, key, intent, value, &targets, queue_id)
}

/// Distribute to an explicit set of partitions.
pub fn distribute_to_partitions(
    ctx: &mut ProcessingContext<'_, '_>,
    key: i64,
    intent: Intent,
    value: &RecordValue,
    targets: &[PartitionId],
    queue_id: Option<&str>,
) -> BraidResult<()> {
    if targets.is_empty() {
        return Ok(());
    }
    let own = ctx.partition_id();
    ctx.write_event(
        key,
        Intent::CommandDistribution(CommandDistributionIntent::Started),
        RecordValue::CommandDistribution(distribution_record(own, queue_id, intent, Some(value))),
    )?;

    for &target in targets {
        let occupied = match queue_id {
            Some(queue) => ctx.state.distribution.queue_occupied(ctx.tx, queue, target)?,
            None => false,
        };
        if occupied {
            debug!(key, target, queue = ?queue_id, "distribution enqueued");
            ctx.write_event(
                key,
                Intent::CommandDistribution(CommandDistributionIntent::Enqueued),
                RecordValue::CommandDistribution(distribution_record(
                    target, queue_id, intent, None,
                )),
            )?;
        } else {
            start_sending(ctx, key, target, queue_id, intent, value)?;
        }
    }
    Ok(())
}

/// Write `Distributing` for one target and schedule the send.
pub(crate) fn start_sending(
    ctx: &mut ProcessingContext<'_, '_>,
    key: i64,
    target: PartitionId,
    queue_id: Option<&str>,
    intent: Intent,
    value: &RecordValue,
) -> BraidResult<()> {
    ctx.write_event(
        key,
        Intent::CommandDistribution(CommandDistributionIntent::Distributing),
        RecordValue::CommandDistribution(distribution_record(target, queue_id, intent, None)),
    )?;
    let own = ctx.partition_id();
    ctx.result.send_command(InterPartitionCommand {
        sender_partition: own,
        receiver_partition: target,
        key,
        intent,
        value: value.clone(),
    });
    Ok(())
}

/// On a target: tell the origin that its command was processed here.
pub fn acknowledge(
    ctx: &mut ProcessingContext<'_, '_>,
    key: i64,
    origin: PartitionId,
    intent: Intent,
    queue_id: Option<&str>,
) {
    let own = ctx.partition_id();
    ctx.result.send_command(InterPartitionCommand {
        sender_partition: own,
        receiver_partition: origin,
        key,
        intent: Intent::CommandDistribution(CommandDistributionIntent::Acknowledge),
        value: RecordValue::CommandDistribution(distribution_record(own, queue_id, intent, None)),
    });
}
