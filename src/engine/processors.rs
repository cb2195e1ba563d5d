//! Command processors.

use super::{CommandProcessor, ProcessingContext, ProcessingFailure};
use crate::distribution::{self, AcknowledgeProcessor, DEPLOYMENT_QUEUE};
use crate::record::{
    decode_partition_id, CommandDistributionIntent, DeploymentIntent, Intent,
    MessageSubscriptionIntent, Record, RecordType, RecordValue, Rejection, RejectionType,
};
use std::collections::HashMap;
use tracing::debug;

/// Every command processor, by the intent it handles.
pub fn command_processors() -> HashMap<Intent, Box<dyn CommandProcessor>> {
    let mut processors: HashMap<Intent, Box<dyn CommandProcessor>> = HashMap::new();
    processors.insert(
        Intent::Deployment(DeploymentIntent::Create),
        Box::new(DeploymentCreateProcessor),
    );
    processors.insert(
        Intent::MessageSubscription(MessageSubscriptionIntent::Create),
        Box::new(MessageSubscriptionCreateProcessor),
    );
    processors.insert(
        Intent::MessageSubscription(MessageSubscriptionIntent::Delete),
        Box::new(MessageSubscriptionDeleteProcessor),
    );
    processors.insert(
        Intent::CommandDistribution(CommandDistributionIntent::Acknowledge),
        Box::new(AcknowledgeProcessor),
    );
    processors
}

fn invalid(reason: String) -> ProcessingFailure {
    ProcessingFailure::Rejected(Rejection::new(RejectionType::InvalidArgument, reason))
}

/// `DEPLOYMENT CREATE`.
///
/// On the partition that received it from a client the processor assigns a
/// key and version, then distributes the deployment to every other
/// partition. A copy arriving from another partition carries the origin's
/// key; it is stored once and acknowledged every time it arrives.
pub struct DeploymentCreateProcessor;

impl DeploymentCreateProcessor {
    fn process_distributed(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure> {
        let key = command.key;
        let record = command.value.as_deployment()?;
        if ctx.state.deployments.exists(ctx.tx, key) {
            debug!(key, "deployment already distributed here");
        } else {
            ctx.write_event(
                key,
                Intent::Deployment(DeploymentIntent::Created),
                RecordValue::Deployment(record.clone()),
            )?;
        }
        distribution::acknowledge(
            ctx,
            key,
            decode_partition_id(key),
            command.intent(),
            Some(DEPLOYMENT_QUEUE),
        );
        Ok(())
    }
}

impl CommandProcessor for DeploymentCreateProcessor {
    fn process(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure> {
        if command.key >= 0 && decode_partition_id(command.key) != ctx.partition_id() {
            return self.process_distributed(ctx, command);
        }

        let mut record = command.value.as_deployment()?.clone();
        if record.tenant_id.is_empty() {
            return Err(invalid("Expected a tenant id, but none was given".into()));
        }
        if record.resource_name.is_empty() {
            return Err(invalid(
                "Expected a resource name, but none was given".into(),
            ));
        }

        let latest = ctx.state.deployments.latest_version(
            ctx.tx,
            &record.tenant_id,
            &record.resource_name,
        )?;
        if let Some(latest) = latest {
            if let Some(existing) = ctx.state.deployments.get(ctx.tx, latest.key)? {
                if existing.resource == record.resource {
                    return Err(ProcessingFailure::Rejected(Rejection::new(
                        RejectionType::AlreadyExists,
                        format!(
                            "Expected to deploy a new version of '{}', but it is identical to version {}",
                            record.resource_name, latest.version
                        ),
                    )));
                }
            }
        }
        record.version = latest.map(|l| l.version + 1).unwrap_or(1);

        let key = ctx.next_key()?;
        let value = RecordValue::Deployment(record);
        ctx.write_event(key, Intent::Deployment(DeploymentIntent::Created), value.clone())?;
        ctx.result.respond(
            key,
            RecordType::Event,
            Intent::Deployment(DeploymentIntent::Created),
            value.clone(),
            None,
        );

        distribution::distribute_to_other_partitions(
            ctx,
            key,
            command.intent(),
            &value,
            Some(DEPLOYMENT_QUEUE),
        )?;
        Ok(())
    }
}

/// `MESSAGE_SUBSCRIPTION CREATE`.
pub struct MessageSubscriptionCreateProcessor;

impl CommandProcessor for MessageSubscriptionCreateProcessor {
    fn process(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure> {
        let record = command.value.as_message_subscription()?;
        if record.message_name.is_empty() {
            return Err(invalid(
                "Expected a message name, but none was given".into(),
            ));
        }
        if ctx.state.subscriptions.exists_for_element(
            ctx.tx,
            &record.tenant_id,
            &record.message_name,
            record.element_instance_key,
        )? {
            return Err(ProcessingFailure::Rejected(Rejection::new(
                RejectionType::AlreadyExists,
                format!(
                    "Expected to open a subscription to '{}' for element instance {}, but one is already open",
                    record.message_name, record.element_instance_key
                ),
            )));
        }

        let key = ctx.next_key()?;
        let value = RecordValue::MessageSubscription(record.clone());
        let created = Intent::MessageSubscription(MessageSubscriptionIntent::Created);
        ctx.write_event(key, created, value.clone())?;
        ctx.result.respond(key, RecordType::Event, created, value, None);
        Ok(())
    }
}

/// `MESSAGE_SUBSCRIPTION DELETE`.
pub struct MessageSubscriptionDeleteProcessor;

impl CommandProcessor for MessageSubscriptionDeleteProcessor {
    fn process(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure> {
        let key = command.key;
        let Some(existing) = ctx.state.subscriptions.get(ctx.tx, key)? else {
            return Err(ProcessingFailure::Rejected(Rejection::new(
                RejectionType::NotFound,
                format!(
                    "Expected to close message subscription {}, but no such subscription exists",
                    key
                ),
            )));
        };

        let value = RecordValue::MessageSubscription(existing);
        let deleted = Intent::MessageSubscription(MessageSubscriptionIntent::Deleted);
        ctx.write_event(key, deleted, value.clone())?;
        ctx.result.respond(key, RecordType::Event, deleted, value, None);
        Ok(())
    }
}
