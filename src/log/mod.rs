//! Append-only partition log.
//!
//! - [`segment`] - Segment files, frame index and crash recovery
//! - [`stream`] - Positions, writer lease, commit tracking and readers

pub mod segment;
pub mod stream;

pub use segment::{RecoveryReport, SegmentState};
pub use stream::{AppendResult, LogFailureListener, LogStream, LogStreamReader, ReadLimit};
