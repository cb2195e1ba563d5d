//! Cross-partition command distribution.
//!
//! - [`state`] - Distribution bookkeeping in the state store
//! - [`behavior`] - Starting distributions and acknowledging them
//! - [`processor`] - The `ACKNOWLEDGE` command processor
//! - [`redistributor`] - Leader-side retries with backoff
//!
//! Delivery between partitions is at-least-once. Targets process a
//! distributed command idempotently and acknowledge every copy they see;
//! the origin finishes a distribution once every target acknowledged.

pub mod behavior;
pub mod processor;
pub mod redistributor;
pub mod state;

pub use behavior::{acknowledge, distribute_to_other_partitions, distribute_to_partitions, DEPLOYMENT_QUEUE};
pub use processor::AcknowledgeProcessor;
pub use redistributor::CommandRedistributor;
pub use state::{DistributionState, PendingDistribution};
