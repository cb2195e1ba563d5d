//! Stream processing.
//!
//! - [`processor`] - Replay and command processing over the partition log
//! - [`result`] - Follow-up records and post-commit side effects
//! - [`positions`] - Processing progress stored alongside the state

pub mod positions;
pub mod processor;
pub mod result;

pub use positions::{PositionsState, ProcessingPositions};
pub use processor::{ProcessedCommand, StreamPhase, StreamProcessor};
pub use result::{
    CommandResponse, InterPartitionCommand, PostCommitTask, ProcessingResult,
    ProcessingResultBuilder,
};
