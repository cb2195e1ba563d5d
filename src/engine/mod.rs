//! Deterministic engine driven by the stream processor.
//!
//! - [`state`] - Domain column families
//! - [`key_generator`] - Partition-scoped key allocation
//! - [`appliers`] - Event appliers: the only code that mutates state
//! - [`processors`] - Command processors: validate, then write events
//!
//! Command processors never write state directly. They emit events through
//! [`ProcessingContext::write_event`], which applies the event immediately
//! through the same applier that replay uses. Processing a command and
//! replaying the events it produced therefore yield the same state.
//!
//! The lookup tables for processors and appliers are built once per engine
//! and owned by it.

pub mod appliers;
pub mod key_generator;
pub mod processors;
pub mod state;

pub use appliers::EventAppliers;
pub use key_generator::KeyGenerator;
pub use state::{DeploymentState, LatestVersion, MessageSubscriptionState};

use crate::core::error::BraidError;
use crate::distribution::DistributionState;
use crate::record::{Intent, PartitionId, Record, RecordValue, Rejection};
use crate::state::Transaction;
use crate::stream::result::ProcessingResultBuilder;
use crate::core::error::BraidResult;
use std::collections::HashMap;

/// Handles on every column family the engine uses.
#[derive(Clone, Copy)]
pub struct EngineState {
    pub partition_id: PartitionId,
    pub key_generator: KeyGenerator,
    pub deployments: DeploymentState,
    pub subscriptions: MessageSubscriptionState,
    pub distribution: DistributionState,
}

impl EngineState {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            partition_id,
            key_generator: KeyGenerator::new(partition_id),
            deployments: DeploymentState::new(),
            subscriptions: MessageSubscriptionState::new(),
            distribution: DistributionState::new(),
        }
    }
}

/// Why a command produced no regular follow-ups.
#[derive(Debug)]
pub enum ProcessingFailure {
    /// Business rule violated; becomes a COMMAND_REJECTION.
    Rejected(Rejection),
    /// Unexpected error while processing.
    Failed(BraidError),
}

impl From<BraidError> for ProcessingFailure {
    fn from(err: BraidError) -> Self {
        Self::Failed(err)
    }
}

impl From<Rejection> for ProcessingFailure {
    fn from(rejection: Rejection) -> Self {
        Self::Rejected(rejection)
    }
}

/// What a command processor can touch while handling one command.
pub struct ProcessingContext<'a, 'db> {
    pub tx: &'a mut Transaction<'db>,
    pub state: &'a EngineState,
    pub result: &'a mut ProcessingResultBuilder,
    appliers: &'a EventAppliers,
    partition_count: u32,
}

impl<'a, 'db> ProcessingContext<'a, 'db> {
    pub fn partition_id(&self) -> PartitionId {
        self.state.partition_id
    }

    /// Every partition id of the cluster.
    pub fn partition_ids(&self) -> Vec<PartitionId> {
        (1..=self.partition_count as PartitionId).collect()
    }

    pub fn next_key(&mut self) -> BraidResult<i64> {
        self.state.key_generator.next_key(self.tx)
    }

    /// Apply an event to the state and append it.
    pub fn write_event(&mut self, key: i64, intent: Intent, value: RecordValue) -> BraidResult<()> {
        self.appliers.apply(self.state, self.tx, key, intent, &value)?;
        self.result.append_event(key, intent, value);
        Ok(())
    }
}

/// Handles one command intent.
pub trait CommandProcessor: Send + Sync {
    fn process(
        &self,
        ctx: &mut ProcessingContext<'_, '_>,
        command: &Record,
    ) -> Result<(), ProcessingFailure>;
}

/// Engine of one partition.
pub struct Engine {
    state: EngineState,
    appliers: EventAppliers,
    processors: HashMap<Intent, Box<dyn CommandProcessor>>,
    partition_count: u32,
}

impl Engine {
    pub fn new(partition_id: PartitionId, partition_count: u32) -> Self {
        Self {
            state: EngineState::new(partition_id),
            appliers: EventAppliers::new(),
            processors: processors::command_processors(),
            partition_count,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn partition_id(&self) -> PartitionId {
        self.state.partition_id
    }

    /// Run the processor registered for the command's intent.
    pub fn process(
        &self,
        tx: &mut Transaction<'_>,
        command: &Record,
        result: &mut ProcessingResultBuilder,
    ) -> Result<(), ProcessingFailure> {
        let Some(processor) = self.processors.get(&command.intent()) else {
            return Err(ProcessingFailure::Rejected(Rejection::new(
                crate::record::RejectionType::InvalidArgument,
                format!(
                    "no processor for {} {}",
                    command.value_type(),
                    command.intent()
                ),
            )));
        };
        let mut ctx = ProcessingContext {
            tx,
            state: &self.state,
            result,
            appliers: &self.appliers,
            partition_count: self.partition_count,
        };
        processor.process(&mut ctx, command)
    }

    /// Apply a replayed event.
    pub fn apply_event(&self, tx: &mut Transaction<'_>, record: &Record) -> BraidResult<()> {
        self.appliers
            .apply(&self.state, tx, record.key, record.intent(), &record.value)
    }
}
