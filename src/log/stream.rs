//! Partition log stream.
//!
//! The stream layers position assignment, writer leases, commit tracking and
//! failure handling over [`SegmentedLog`]. Positions start at 1 and grow by
//! exactly one per appended record. Only the holder of the writer lease for
//! the current term may append; followers write replicated frames verbatim.

use super::segment::{PendingFrame, RecoveryReport, SegmentedLog};
use crate::core::config::LogConfig;
use crate::core::error::{BraidError, BraidResult};
use crate::record::codec::{decode_frame, encode_frame, FrameFlags, LogEntry};
use crate::record::{AppendEntry, PartitionId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

const LOG_META_FILE: &str = "log-meta.json";

/// Notified when the stream fails or recovers.
pub trait LogFailureListener: Send + Sync {
    /// The stream hit an unrecoverable error and stopped accepting appends.
    fn on_failure(&self, partition_id: PartitionId, error: &BraidError);

    /// The stream was reset and accepts appends again.
    fn on_recovered(&self, _partition_id: PartitionId) {}
}

/// Position and term just below the lowest retained frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct LogMeta {
    base_position: i64,
    base_term: u64,
}

/// Positions assigned by an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub first_position: i64,
    pub last_position: i64,
}

/// How far a reader may advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLimit {
    /// Up to the commit position.
    Committed,
    /// Up to the highest appended position.
    Appended,
}

/// Append-only, position-indexed log of one partition.
pub struct LogStream {
    partition_id: PartitionId,
    dir: PathBuf,
    segments: SegmentedLog,
    meta: LogMeta,
    recovery: RecoveryReport,
    writer_term: Option<u64>,
    commit_position: i64,
    failure: Option<String>,
    listeners: Vec<Arc<dyn LogFailureListener>>,
    commits: watch::Sender<i64>,
}

impl LogStream {
    /// Open the log under `dir`.
    pub fn open(partition_id: PartitionId, dir: &Path, config: &LogConfig) -> BraidResult<Self> {
        let (segments, report) = SegmentedLog::open(
            partition_id,
            dir,
            config.segment_size_bytes,
            config.flush_on_append,
        )?;
        let meta = read_meta(partition_id, dir)?;
        tracing::info!(
            partition_id,
            segments = report.segments,
            frames = report.frames,
            torn_bytes = report.torn_bytes,
            base_position = meta.base_position,
            "opened partition log"
        );
        Ok(Self::from_parts(partition_id, dir, segments, meta, report))
    }

    /// Open the log under `dir` for inspection. Nothing on disk changes: a
    /// torn tail stays in place and shows up in [`recovery`](Self::recovery),
    /// and appends, truncation and compaction fail.
    pub fn open_read_only(partition_id: PartitionId, dir: &Path) -> BraidResult<Self> {
        let (segments, report) = SegmentedLog::open_read_only(partition_id, dir)?;
        let meta = read_meta(partition_id, dir)?;
        Ok(Self::from_parts(partition_id, dir, segments, meta, report))
    }

    fn from_parts(
        partition_id: PartitionId,
        dir: &Path,
        segments: SegmentedLog,
        meta: LogMeta,
        recovery: RecoveryReport,
    ) -> Self {
        let (commits, _) = watch::channel(meta.base_position);
        Self {
            partition_id,
            dir: dir.to_path_buf(),
            segments,
            meta,
            recovery,
            writer_term: None,
            commit_position: meta.base_position,
            failure: None,
            listeners: Vec::new(),
            commits,
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// What opening the log found on disk.
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Lowest position that can still be read.
    pub fn lowest_position(&self) -> i64 {
        match self.segments.first_position() {
            -1 => self.meta.base_position + 1,
            first => first,
        }
    }

    /// Highest appended position, or the base position if nothing is retained.
    pub fn highest_position(&self) -> i64 {
        match self.segments.last_position() {
            -1 => self.meta.base_position,
            last => last,
        }
    }

    /// Term of the highest appended entry.
    pub fn last_term(&self) -> u64 {
        self.term_at(self.highest_position()).unwrap_or(self.meta.base_term)
    }

    /// Term of the entry at `position`, including the base entry below the
    /// retained range.
    pub fn term_at(&self, position: i64) -> Option<u64> {
        if position == self.meta.base_position {
            return Some(self.meta.base_term);
        }
        self.segments.term_at(position)
    }

    pub fn commit_position(&self) -> i64 {
        self.commit_position
    }

    /// Receiver notified whenever the commit position advances.
    pub fn subscribe_commits(&self) -> watch::Receiver<i64> {
        self.commits.subscribe()
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn add_failure_listener(&mut self, listener: Arc<dyn LogFailureListener>) {
        self.listeners.push(listener);
    }

    /// Grant append rights to the leader of `term`.
    pub fn acquire_writer(&mut self, term: u64) {
        self.writer_term = Some(term);
    }

    /// Revoke append rights.
    pub fn release_writer(&mut self) {
        self.writer_term = None;
    }

    pub fn writer_term(&self) -> Option<u64> {
        self.writer_term
    }

    fn ensure_healthy(&self) -> BraidResult<()> {
        match &self.failure {
            Some(reason) => Err(BraidError::PartitionFailed {
                partition_id: self.partition_id,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Append a batch of records as the writer of `term`.
    ///
    /// The batch is written atomically: after a crash either all of its
    /// frames are recovered or none.
    pub fn append(&mut self, term: u64, entries: Vec<AppendEntry>) -> BraidResult<AppendResult> {
        self.ensure_healthy()?;
        if self.writer_term != Some(term) {
            return Err(BraidError::not_leader(self.partition_id, term));
        }
        if entries.is_empty() {
            return Err(BraidError::internal("empty append"));
        }

        let first_position = self.highest_position() + 1;
        let len = entries.len();
        let mut frames = Vec::with_capacity(len);
        for (i, entry) in entries.into_iter().enumerate() {
            let position = first_position + i as i64;
            let log_entry = LogEntry {
                term,
                record: entry.into_record(self.partition_id, position),
            };
            let bytes = encode_frame(&log_entry, FrameFlags::for_batch(i, len))?;
            frames.push(PendingFrame {
                position,
                term,
                bytes,
            });
        }

        self.write_frames(&frames)?;
        Ok(AppendResult {
            first_position,
            last_position: first_position + len as i64 - 1,
        })
    }

    /// Append frames produced by the leader, byte for byte.
    ///
    /// Frames must continue directly after the highest position.
    pub fn append_replicated(&mut self, frames: &[Vec<u8>]) -> BraidResult<i64> {
        self.ensure_healthy()?;
        let mut expected = self.highest_position() + 1;
        let mut pending = Vec::with_capacity(frames.len());
        for bytes in frames {
            let frame = decode_frame(bytes)?;
            let position = frame.entry.position();
            if position != expected {
                return Err(BraidError::internal(format!(
                    "replicated frame at position {} does not follow {}",
                    position,
                    expected - 1
                )));
            }
            if frame.entry.record.partition_id != self.partition_id {
                return Err(BraidError::codec(format!(
                    "frame for partition {} replicated to partition {}",
                    frame.entry.record.partition_id, self.partition_id
                )));
            }
            pending.push(PendingFrame {
                position,
                term: frame.entry.term,
                bytes: bytes.clone(),
            });
            expected += 1;
        }
        // The leader only ships whole batches, so its flags still delimit
        // complete batches here.
        self.write_frames(&pending)?;
        Ok(self.highest_position())
    }

    fn write_frames(&mut self, frames: &[PendingFrame]) -> BraidResult<()> {
        if let Err(err) = self.segments.append_batch(frames) {
            if matches!(err, BraidError::IoFailure { .. }) {
                self.fail(&err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Mark the stream as failed and notify listeners.
    pub fn fail(&mut self, error: &BraidError) {
        if self.failure.is_some() {
            return;
        }
        tracing::error!(partition_id = self.partition_id, error = %error, "log stream failed");
        self.failure = Some(error.to_string());
        self.writer_term = None;
        for listener in &self.listeners {
            listener.on_failure(self.partition_id, error);
        }
    }

    /// Read the entry at `position`.
    pub fn read(&self, position: i64) -> BraidResult<Option<LogEntry>> {
        let floor = self.lowest_position();
        if position < floor {
            return Err(BraidError::Compacted { position, floor });
        }
        Ok(self.segments.read_frame(position)?.map(|f| f.entry))
    }

    /// Raw frame bytes at `position`, for replication.
    pub fn read_raw(&self, position: i64) -> BraidResult<Option<Vec<u8>>> {
        let floor = self.lowest_position();
        if position < floor {
            return Err(BraidError::Compacted { position, floor });
        }
        self.segments.read_raw(position)
    }

    /// Forward reader starting at `from`.
    pub fn reader(&self, from: i64, limit: ReadLimit) -> LogStreamReader<'_> {
        LogStreamReader {
            log: self,
            next: from,
            limit,
        }
    }

    /// Advance the commit position; never moves backwards or past the
    /// highest appended position.
    pub fn set_commit_position(&mut self, position: i64) {
        let position = position.min(self.highest_position());
        if position > self.commit_position {
            self.commit_position = position;
            self.commits.send_replace(position);
        }
    }

    /// Drop uncommitted entries after `position`.
    pub fn truncate_after(&mut self, position: i64) -> BraidResult<()> {
        if position < self.commit_position {
            return Err(BraidError::internal(format!(
                "refusing to truncate to {} below commit position {}",
                position, self.commit_position
            )));
        }
        self.segments.truncate_after(position)
    }

    /// Delete whole segments below `floor`. Returns whether anything was
    /// deleted.
    pub fn compact(&mut self, floor: i64) -> BraidResult<bool> {
        let floor = floor.min(self.commit_position + 1);
        if floor <= self.lowest_position() {
            return Ok(false);
        }
        let Some((base_position, base_term)) = self.segments.delete_below(floor)? else {
            return Ok(false);
        };
        self.meta = LogMeta {
            base_position,
            base_term,
        };
        write_meta(self.partition_id, &self.dir, &self.meta)?;
        tracing::info!(
            partition_id = self.partition_id,
            lowest_position = self.lowest_position(),
            "compacted log"
        );
        Ok(true)
    }

    /// Discard every entry and continue after a snapshot at `base_position`.
    pub fn reset(&mut self, base_position: i64, base_term: u64) -> BraidResult<()> {
        self.segments.reset()?;
        self.meta = LogMeta {
            base_position,
            base_term,
        };
        write_meta(self.partition_id, &self.dir, &self.meta)?;
        self.commit_position = base_position;
        self.commits.send_replace(base_position);
        let recovered = self.failure.take().is_some();
        if recovered {
            for listener in &self.listeners {
                listener.on_recovered(self.partition_id);
            }
        }
        tracing::info!(
            partition_id = self.partition_id,
            base_position,
            base_term,
            "reset log"
        );
        Ok(())
    }
}

/// Lazy, restartable forward iterator over a log stream.
pub struct LogStreamReader<'a> {
    log: &'a LogStream,
    next: i64,
    limit: ReadLimit,
}

impl<'a> LogStreamReader<'a> {
    /// Position the next call to `next` returns.
    pub fn next_position(&self) -> i64 {
        self.next
    }

    /// Restart from another position.
    pub fn seek(&mut self, position: i64) {
        self.next = position;
    }

    fn bound(&self) -> i64 {
        match self.limit {
            ReadLimit::Committed => self.log.commit_position(),
            ReadLimit::Appended => self.log.highest_position(),
        }
    }
}

impl<'a> Iterator for LogStreamReader<'a> {
    type Item = BraidResult<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.bound() {
            return None;
        }
        match self.log.read(self.next) {
            Ok(Some(entry)) => {
                self.next += 1;
                Some(Ok(entry))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

fn read_meta(partition_id: PartitionId, dir: &Path) -> BraidResult<LogMeta> {
    let path = dir.join(LOG_META_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LogMeta::default()),
        Err(e) => Err(BraidError::io(partition_id, e)),
    }
}

fn write_meta(partition_id: PartitionId, dir: &Path, meta: &LogMeta) -> BraidResult<()> {
    let tmp = dir.join(format!("{}.tmp", LOG_META_FILE));
    let bytes = serde_json::to_vec(meta)?;
    std::fs::write(&tmp, bytes).map_err(|e| BraidError::io(partition_id, e))?;
    std::fs::rename(&tmp, dir.join(LOG_META_FILE)).map_err(|e| BraidError::io(partition_id, e))?;
    Ok(())
}
