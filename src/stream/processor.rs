//! The stream processor of one partition.
//!
//! On followers the processor replays committed events into the state store.
//! On the leader it additionally processes commands: one command at a time,
//! its follow-up records are handed to the caller for appending and the
//! resulting state change is held back until those records are committed.
//! Side effects (responses, inter-partition sends) are released at the same
//! moment.
//!
//! ```text
//! Uninitialized -> Replaying -> Processing <-> Paused
//!                      ^            |
//!                      +------------+ (leadership lost)
//! any -> Failed | Closed
//! ```

use super::positions::{PositionsState, ProcessingPositions};
use super::result::{PostCommitTask, ProcessingResultBuilder};
use crate::core::error::{BraidError, BraidResult};
use crate::core::time::SharedClock;
use crate::engine::{Engine, ProcessingFailure};
use crate::log::{LogStream, ReadLimit};
use crate::record::{
    AppendEntry, ErrorIntent, ErrorRecord, Intent, PartitionId, Record, RecordType, RecordValue,
    Rejection, RejectionType,
};
use crate::state::{StateDb, WriteBatch};
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a [`StreamProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Uninitialized,
    Replaying,
    Processing,
    Paused,
    Closed,
    Failed,
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Replaying => "replaying",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Follow-ups of one processed command, waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedCommand {
    pub source_position: i64,
    pub records: Vec<AppendEntry>,
}

/// Processed but uncommitted state change.
struct PendingCommit {
    source_position: i64,
    batch: WriteBatch,
    tasks: Vec<PostCommitTask>,
}

pub struct StreamProcessor {
    partition_id: PartitionId,
    engine: Engine,
    db: StateDb,
    positions_state: PositionsState,
    positions: ProcessingPositions,
    phase: StreamPhase,
    paused_from: StreamPhase,
    clock: SharedClock,
    replay_cursor: i64,
    process_cursor: i64,
    pending: Option<PendingCommit>,
}

impl StreamProcessor {
    pub fn new(partition_id: PartitionId, partition_count: u32, clock: SharedClock) -> Self {
        Self {
            partition_id,
            engine: Engine::new(partition_id, partition_count),
            db: StateDb::new(),
            positions_state: PositionsState::new(),
            positions: ProcessingPositions::default(),
            phase: StreamPhase::Uninitialized,
            paused_from: StreamPhase::Replaying,
            clock,
            replay_cursor: 1,
            process_cursor: 1,
            pending: None,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn positions(&self) -> ProcessingPositions {
        self.positions
    }

    pub fn state(&self) -> &StateDb {
        &self.db
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn ensure_usable(&self) -> BraidResult<()> {
        match self.phase {
            StreamPhase::Failed => Err(BraidError::PartitionFailed {
                partition_id: self.partition_id,
                reason: "stream processor failed".into(),
            }),
            StreamPhase::Closed => Err(BraidError::PartitionUnavailable {
                partition_id: self.partition_id,
            }),
            _ => Ok(()),
        }
    }

    /// Start from a recovered state store (a snapshot, or empty).
    pub fn recover(&mut self, db: StateDb) -> BraidResult<()> {
        self.ensure_usable()?;
        self.positions = self.positions_state.get(&db)?;
        self.db = db;
        self.pending = None;
        self.replay_cursor = self.positions.last_applied_position.max(0) + 1;
        self.process_cursor = self.positions.last_processed_position.max(0) + 1;
        self.phase = StreamPhase::Replaying;
        info!(
            partition_id = self.partition_id,
            last_processed = self.positions.last_processed_position,
            last_applied = self.positions.last_applied_position,
            "stream processor recovered"
        );
        Ok(())
    }

    /// Replay committed records up to the log's commit position. Returns the
    /// number of events applied.
    pub fn replay(&mut self, log: &LogStream) -> BraidResult<usize> {
        self.ensure_usable()?;
        if self.phase == StreamPhase::Paused || self.phase == StreamPhase::Uninitialized {
            return Ok(0);
        }
        let start = self.replay_cursor.max(self.positions.last_applied_position + 1);
        if start < log.lowest_position() {
            return Err(BraidError::Compacted {
                position: start,
                floor: log.lowest_position(),
            });
        }
        let mut applied = 0;
        let mut reader = log.reader(start, ReadLimit::Committed);
        while let Some(entry) = reader.next() {
            let record = entry?.record;
            if self.replay_record(&record)? {
                applied += 1;
            }
        }
        self.replay_cursor = reader.next_position();
        if applied > 0 {
            debug!(
                partition_id = self.partition_id,
                applied,
                last_applied = self.positions.last_applied_position,
                "replayed events"
            );
        }
        Ok(applied)
    }

    /// Position up to which the log has been replayed.
    pub fn replayed_to(&self) -> i64 {
        self.replay_cursor - 1
    }

    fn replay_record(&mut self, record: &Record) -> BraidResult<bool> {
        if record.position <= self.positions.last_applied_position {
            return Ok(false);
        }
        let mut positions = self.positions;
        if record.source_record_position >= 0 {
            positions.last_processed_position = positions
                .last_processed_position
                .max(record.source_record_position);
        }
        if !record.is_event() {
            if positions != self.positions {
                self.positions = positions;
                self.persist_positions()?;
            }
            return Ok(false);
        }

        positions.last_applied_position = record.position;
        let mut tx = self.db.transaction();
        if let Err(err) = self.engine.apply_event(&mut tx, record) {
            drop(tx);
            let violation = BraidError::DeterminismViolation {
                position: record.position,
                reason: format!("replaying {} {}: {}", record.value_type(), record.intent(), err),
            };
            return Err(self.fail(violation));
        }
        self.positions_state.set(&mut tx, &positions)?;
        let batch = tx.into_batch();
        self.db.apply(batch)?;
        self.positions = positions;
        Ok(true)
    }

    fn persist_positions(&mut self) -> BraidResult<()> {
        let mut tx = self.db.transaction();
        self.positions_state.set(&mut tx, &self.positions)?;
        let batch = tx.into_batch();
        self.db.apply(batch)
    }

    /// Switch to processing. The caller replays up to the current leader's
    /// first entry first, so every earlier command is already accounted for.
    pub fn start_processing(&mut self) -> BraidResult<()> {
        self.ensure_usable()?;
        self.process_cursor = self.positions.last_processed_position.max(0) + 1;
        if self.phase == StreamPhase::Paused {
            self.paused_from = StreamPhase::Processing;
        } else {
            self.phase = StreamPhase::Processing;
        }
        info!(
            partition_id = self.partition_id,
            from = self.process_cursor,
            "stream processor processing"
        );
        Ok(())
    }

    /// Process the next committed command, if any.
    ///
    /// Returns `None` when there is nothing to do or the previous command's
    /// follow-ups are not committed yet. Otherwise the returned records must
    /// be appended and, once committed, confirmed with
    /// [`commit_pending`](Self::commit_pending).
    pub fn process_next(&mut self, log: &LogStream) -> BraidResult<Option<ProcessedCommand>> {
        self.ensure_usable()?;
        if self.phase != StreamPhase::Processing || self.pending.is_some() {
            return Ok(None);
        }
        let start = self
            .process_cursor
            .max(self.positions.last_processed_position + 1);
        let mut reader = log.reader(start, ReadLimit::Committed);
        let mut command = None;
        while let Some(entry) = reader.next() {
            let record = entry?.record;
            if !record.is_command() {
                self.replay_record(&record)?;
                continue;
            }
            if record.position > self.positions.last_processed_position {
                command = Some(record);
                break;
            }
        }
        self.process_cursor = reader.next_position();
        let Some(command) = command else {
            return Ok(None);
        };
        self.process_command(&command).map(Some)
    }

    fn process_command(&mut self, command: &Record) -> BraidResult<ProcessedCommand> {
        let timestamp = self.clock.millis();
        let mut builder = ProcessingResultBuilder::for_command(
            command.position,
            timestamp,
            self.partition_id,
            &command.metadata,
        );

        let mut tx = self.db.transaction();
        let outcome = self.engine.process(&mut tx, command, &mut builder);
        let batch = match outcome {
            Ok(()) => tx.into_batch(),
            Err(ProcessingFailure::Rejected(rejection)) => {
                drop(tx);
                debug!(
                    partition_id = self.partition_id,
                    position = command.position,
                    rejection = ?rejection.rejection_type,
                    reason = %rejection.reason,
                    "command rejected"
                );
                builder = ProcessingResultBuilder::for_command(
                    command.position,
                    timestamp,
                    self.partition_id,
                    &command.metadata,
                );
                reject(&mut builder, command, rejection);
                WriteBatch::new()
            }
            Err(ProcessingFailure::Failed(err)) => {
                drop(tx);
                if is_fatal_for_processing(&err) {
                    return Err(self.fail(err));
                }
                warn!(
                    partition_id = self.partition_id,
                    position = command.position,
                    error = %err,
                    "command failed; writing error event"
                );
                builder = ProcessingResultBuilder::for_command(
                    command.position,
                    timestamp,
                    self.partition_id,
                    &command.metadata,
                );
                let message = err.to_string();
                builder.append_event(
                    command.key,
                    Intent::Error(ErrorIntent::Created),
                    RecordValue::Error(ErrorRecord {
                        error_message: message.clone(),
                        failed_position: command.position,
                    }),
                );
                reject(
                    &mut builder,
                    command,
                    Rejection::new(RejectionType::ProcessingError, message),
                );
                WriteBatch::new()
            }
        };

        let result = builder.build();
        self.pending = Some(PendingCommit {
            source_position: command.position,
            batch,
            tasks: result.tasks,
        });
        Ok(ProcessedCommand {
            source_position: command.position,
            records: result.records,
        })
    }

    /// Make the pending state change visible once its records are committed
    /// up to `written_up_to`, and release its side effects.
    pub fn commit_pending(&mut self, written_up_to: i64) -> BraidResult<Vec<PostCommitTask>> {
        self.ensure_usable()?;
        let Some(pending) = self.pending.take() else {
            return Ok(Vec::new());
        };
        let positions = ProcessingPositions {
            last_processed_position: pending
                .source_position
                .max(self.positions.last_processed_position),
            last_applied_position: written_up_to.max(self.positions.last_applied_position),
        };
        let mut batch = pending.batch;
        let mut tx = self.db.transaction();
        self.positions_state.set(&mut tx, &positions)?;
        batch.merge(tx.into_batch());
        self.db.apply(batch)?;
        self.positions = positions;
        self.replay_cursor = self.replay_cursor.max(positions.last_applied_position + 1);
        Ok(pending.tasks)
    }

    /// Drop the pending state change; its records were never appended.
    pub fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                partition_id = self.partition_id,
                source_position = pending.source_position,
                "discarded uncommitted processing result"
            );
            self.process_cursor = pending.source_position;
        }
    }

    /// Stop processing and replaying until resumed.
    pub fn pause(&mut self) {
        if matches!(self.phase, StreamPhase::Replaying | StreamPhase::Processing) {
            self.paused_from = self.phase;
            self.phase = StreamPhase::Paused;
            info!(partition_id = self.partition_id, "stream processor paused");
        }
    }

    pub fn resume(&mut self) {
        if self.phase == StreamPhase::Paused {
            self.phase = self.paused_from;
            info!(partition_id = self.partition_id, phase = %self.phase, "stream processor resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.phase == StreamPhase::Paused
    }

    pub fn close(&mut self) {
        self.pending = None;
        self.phase = StreamPhase::Closed;
    }

    /// Move to `Failed` and hand the error back for propagation.
    pub fn fail(&mut self, err: BraidError) -> BraidError {
        error!(partition_id = self.partition_id, error = %err, "stream processor failed");
        self.pending = None;
        self.phase = StreamPhase::Failed;
        err
    }

    /// Entries of the state store, for a snapshot.
    pub fn export_state(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.db.export()
    }
}

/// Errors that mean this replica can no longer be trusted to process.
fn is_fatal_for_processing(err: &BraidError) -> bool {
    matches!(
        err,
        BraidError::Codec { .. }
            | BraidError::CorruptedFrame { .. }
            | BraidError::DeterminismViolation { .. }
    )
}

fn reject(builder: &mut ProcessingResultBuilder, command: &Record, rejection: Rejection) {
    builder.append_rejection(
        command.key,
        command.intent(),
        command.value.clone(),
        rejection.clone(),
    );
    builder.respond(
        command.key,
        RecordType::CommandRejection,
        command.intent(),
        command.value.clone(),
        Some(rejection),
    );
}
