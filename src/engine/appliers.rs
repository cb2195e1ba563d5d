//! Event appliers.
//!
//! One applier per event intent. Appliers are the only code that mutates
//! domain state; they run both while a command is processed and while the log
//! is replayed, which is what keeps leader and followers identical.

use super::EngineState;
use crate::core::error::{BraidError, BraidResult};
use crate::record::{
    CommandDistributionIntent, DeploymentIntent, ErrorIntent, Intent, LeadershipIntent,
    MessageSubscriptionIntent, RecordValue,
};
use crate::state::Transaction;
use std::collections::HashMap;

type Applier = fn(&EngineState, &mut Transaction<'_>, i64, &RecordValue) -> BraidResult<()>;

/// Lookup table from event intent to applier.
pub struct EventAppliers {
    appliers: HashMap<Intent, Applier>,
}

impl Default for EventAppliers {
    fn default() -> Self {
        Self::new()
    }
}

impl EventAppliers {
    pub fn new() -> Self {
        let mut appliers: HashMap<Intent, Applier> = HashMap::new();
        appliers.insert(
            Intent::Deployment(DeploymentIntent::Created),
            deployment_created,
        );
        appliers.insert(Intent::Deployment(DeploymentIntent::FullyDistributed), noop);
        appliers.insert(
            Intent::MessageSubscription(MessageSubscriptionIntent::Created),
            subscription_created,
        );
        appliers.insert(
            Intent::MessageSubscription(MessageSubscriptionIntent::Deleted),
            subscription_deleted,
        );
        appliers.insert(
            Intent::CommandDistribution(CommandDistributionIntent::Started),
            distribution_started,
        );
        appliers.insert(
            Intent::CommandDistribution(CommandDistributionIntent::Distributing),
            distribution_distributing,
        );
        appliers.insert(
            Intent::CommandDistribution(CommandDistributionIntent::Enqueued),
            distribution_enqueued,
        );
        appliers.insert(
            Intent::CommandDistribution(CommandDistributionIntent::Acknowledged),
            distribution_acknowledged,
        );
        appliers.insert(
            Intent::CommandDistribution(CommandDistributionIntent::Finished),
            distribution_finished,
        );
        appliers.insert(Intent::Error(ErrorIntent::Created), noop);
        appliers.insert(Intent::Leadership(LeadershipIntent::Elected), noop);
        Self { appliers }
    }

    pub fn contains(&self, intent: Intent) -> bool {
        self.appliers.contains_key(&intent)
    }

    /// Apply one event and advance the key generator past its key.
    pub fn apply(
        &self,
        state: &EngineState,
        tx: &mut Transaction<'_>,
        key: i64,
        intent: Intent,
        value: &RecordValue,
    ) -> BraidResult<()> {
        let applier = self
            .appliers
            .get(&intent)
            .ok_or_else(|| BraidError::internal(format!("no applier for event {}", intent)))?;
        applier(state, tx, key, value)?;
        state.key_generator.observe(tx, key)
    }
}

fn noop(_: &EngineState, _: &mut Transaction<'_>, _: i64, _: &RecordValue) -> BraidResult<()> {
    Ok(())
}

fn deployment_created(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    state.deployments.create(tx, key, value.as_deployment()?)
}

fn subscription_created(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    state
        .subscriptions
        .create(tx, key, value.as_message_subscription()?)
}

fn subscription_deleted(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    _: &RecordValue,
) -> BraidResult<()> {
    state.subscriptions.delete(tx, key)
}

fn distribution_started(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    state
        .distribution
        .add_command(tx, key, value.as_command_distribution()?)
}

fn distribution_distributing(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    let record = value.as_command_distribution()?;
    state
        .distribution
        .add_pending(tx, key, record.partition_id, record.queue_id.clone(), true)
}

fn distribution_enqueued(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    let record = value.as_command_distribution()?;
    state
        .distribution
        .add_pending(tx, key, record.partition_id, record.queue_id.clone(), false)
}

fn distribution_acknowledged(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    value: &RecordValue,
) -> BraidResult<()> {
    let record = value.as_command_distribution()?;
    state
        .distribution
        .remove_pending(tx, key, record.partition_id)
}

fn distribution_finished(
    state: &EngineState,
    tx: &mut Transaction<'_>,
    key: i64,
    _: &RecordValue,
) -> BraidResult<()> {
    state.distribution.remove_command(tx, key)
}
