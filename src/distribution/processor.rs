//! Processing acknowledgements on the origin partition.

use super::behavior::start_sending;
use crate::engine::{CommandProcessor, ProcessingContext, ProcessingFailure};
use crate::record::{
    CommandDistributionIntent, CommandDistributionRecord, DeploymentIntent, Intent, Record,
    RecordValue, Rejection, RejectionType, ValueType,
};
use tracing::debug;

/// Handles `COMMAND_DISTRIBUTION ACKNOWLEDGE`.
///
/// Removes the acknowledging partition from the pending set, releases the
/// next queued distribution for that partition and, once no target is left,
/// finishes the distribution and runs the command's completion step.
pub struct AcknowledgeProcessor;

impl CommandProcessor for AcknowledgeProcessor {
    fn process(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure> {
        let ack = command.value.as_command_distribution()?;
        let key = command.key;
        let partition = ack.partition_id;
        let distribution = ctx.state.distribution;

        let Some(pending) = distribution.get_pending(ctx.tx, key, partition)? else {
            return Err(ProcessingFailure::Rejected(Rejection::new(
                RejectionType::NotFound,
                format!(
                    "Expected to acknowledge distribution {} for partition {}, but no such distribution is pending",
                    key, partition
                ),
            )));
        };
        let Some(stored) = distribution.get_command(ctx.tx, key)? else {
            return Err(ProcessingFailure::Rejected(Rejection::new(
                RejectionType::NotFound,
                format!("Expected distribution {} to exist, but it was not found", key),
            )));
        };

        ctx.write_event(
            key,
            Intent::CommandDistribution(CommandDistributionIntent::Acknowledged),
            RecordValue::CommandDistribution(CommandDistributionRecord {
                partition_id: partition,
                queue_id: pending.queue_id.clone(),
                value_type: stored.value_type,
                intent: stored.intent,
                command_value: None,
            }),
        )?;
        debug!(key, partition, "distribution acknowledged");

        if let Some(queue_id) = pending.queue_id.as_deref() {
            release_next_queued(ctx, queue_id, partition)?;
        }

        if !distribution.has_any_pending(ctx.tx, key)? {
            ctx.write_event(
                key,
                Intent::CommandDistribution(CommandDistributionIntent::Finished),
                RecordValue::CommandDistribution(stored.clone()),
            )?;
            on_fully_distributed(ctx, key, &stored)?;
        }
        Ok(())
    }
}

/// Send the head of a queue if it is still waiting.
fn release_next_queued(
    ctx: &mut ProcessingContext<'_, '_>,
    queue_id: &str,
    partition: i32,
) -> Result<(), ProcessingFailure> {
    let distribution = ctx.state.distribution;
    let Some(next_key) = distribution.next_queued(ctx.tx, queue_id, partition)? else {
        return Ok(());
    };
    match distribution.get_pending(ctx.tx, next_key, partition)? {
        Some(next) if !next.sent => {}
        _ => return Ok(()),
    }
    let Some(next_command) = distribution.get_command(ctx.tx, next_key)? else {
        return Ok(());
    };
    let Some(value) = next_command.command_value.as_deref() else {
        return Ok(());
    };
    let value = value.clone();
    start_sending(
        ctx,
        next_key,
        partition,
        Some(queue_id),
        next_command.intent,
        &value,
    )?;
    Ok(())
}

/// Completion step of a distributed command.
fn on_fully_distributed(
    ctx: &mut ProcessingContext<'_, '_>,
    key: i64,
    stored: &CommandDistributionRecord,
) -> Result<(), ProcessingFailure> {
    if stored.value_type == ValueType::Deployment {
        if let Some(value) = stored.command_value.as_deref() {
            ctx.write_event(
                key,
                Intent::Deployment(DeploymentIntent::FullyDistributed),
                value.clone(),
            )?;
        }
    }
    Ok(())
}
