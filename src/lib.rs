//! Braid - partitioned, replicated event log with a deterministic processor.
//!
//! Every partition is an append-only log replicated across members with
//! Raft. The leader's stream processor reads committed commands one at a
//! time, runs them against a column-family state store and appends the
//! resulting events; followers replay those events to reach the same state.
//! Snapshots of the state bound recovery time and let the log be compacted,
//! and commands that concern several partitions are distributed with
//! retry-until-acknowledged semantics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Partition actor (per replica)                 │
//! │   client commands │ admin requests │ inter-partition commands   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          Stream processor  →  Engine (processors/appliers)      │
//! │   replay │ process │ post-commit tasks │ command distribution    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌──────────────────────────┐  ┌──────────────────────────────────┐
//! │  State store (CFs)       │  │  Snapshots (checksummed, chunked) │
//! └──────────────────────────┘  └──────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            Raft replication  →  Segmented partition log         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Hosting and wiring partition replicas
//! - [`core::time`] - Clocks for record timestamps
//! - [`core::error`] - Error types and classification
//!
//! ## Log
//! - [`record`] - Records, metadata and the frame codec
//! - [`log`] - Segmented, position-indexed partition log
//!
//! ## Processing
//! - [`state`] - Column-family key-value state store
//! - [`engine`] - Command processors and event appliers
//! - [`stream`] - Replay and processing over the log
//! - [`distribution`] - Cross-partition command distribution
//!
//! ## Replication
//! - [`raft`] - Raft per partition, admin protocol
//! - [`snapshot`] - Snapshot store, checksums and transfer
//! - [`exporter`] - Exporting committed records
//! - [`partition`] - Replica actor and in-process network
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Positions of a partition are dense and strictly increasing from 1.
//! - Applying the committed events of a log to an empty state yields the
//!   state the leader had after producing them.
//! - A command's state change and side effects become visible only after the
//!   records it produced are committed.
//! - The log is never compacted past what the newest snapshot and every
//!   exporter have covered.

// Core infrastructure
pub mod core;

// Records and the partition log
pub mod log;
pub mod record;

// State and processing
pub mod distribution;
pub mod engine;
pub mod state;
pub mod stream;

// Replication, snapshots and export
pub mod exporter;
pub mod partition;
pub mod raft;
pub mod snapshot;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime, time};
pub use self::core::error::{BraidError, BraidResult};
