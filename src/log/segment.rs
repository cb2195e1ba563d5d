//! Segment files backing a partition log.
//!
//! Frames are appended to the open segment until it exceeds the configured
//! size, after which it is sealed and a new segment is started. Rotation only
//! happens between batches, so a batch never spans two segments. An in-memory
//! index maps every retained position to its segment and byte offset; it is
//! rebuilt by scanning the segments on open. A log opened read-only scans
//! the same way but never modifies or creates files.

use crate::core::error::{BraidError, BraidResult};
use crate::record::codec::{decode_frame, frame_length, align, FrameError, FrameFlags};
use crate::record::{DecodedFrame, PartitionId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Segment is open for appends.
    Open,
    /// Segment is immutable.
    Sealed,
}

/// A segment file.
#[derive(Debug)]
pub struct Segment {
    /// Segment id (sequential).
    pub id: u64,
    /// First position stored in this segment, or -1 if empty.
    pub first_position: i64,
    /// Last position stored in this segment, or -1 if empty.
    pub last_position: i64,
    /// Segment file path.
    pub path: PathBuf,
    /// Current size in bytes.
    pub size_bytes: u64,
    pub state: SegmentState,
    reader: Mutex<File>,
    writer: Option<File>,
}

impl Segment {
    fn create(dir: &Path, id: u64) -> std::io::Result<Self> {
        let path = segment_path(dir, id);
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let reader = File::open(&path)?;
        Ok(Self {
            id,
            first_position: -1,
            last_position: -1,
            path,
            size_bytes: 0,
            state: SegmentState::Open,
            reader: Mutex::new(reader),
            writer: Some(writer),
        })
    }

    fn is_empty(&self) -> bool {
        self.first_position < 0
    }

    fn seal(&mut self) {
        self.state = SegmentState::Sealed;
        self.writer = None;
    }

    fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Where a frame lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    pub segment_id: u64,
    pub offset: u64,
    /// Aligned length of the frame.
    pub length: usize,
    pub term: u64,
}

/// A frame ready to be written.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub position: i64,
    pub term: u64,
    pub bytes: Vec<u8>,
}

/// What recovery found when opening the segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub segments: usize,
    pub frames: usize,
    /// Bytes past the last complete batch (torn frame or unterminated
    /// batch). They are cut from the file unless the log is read-only.
    pub torn_bytes: u64,
}

/// The ordered set of segments of one partition log.
pub struct SegmentedLog {
    partition_id: PartitionId,
    dir: PathBuf,
    max_segment_size: u64,
    flush: bool,
    segments: BTreeMap<u64, Segment>,
    index: BTreeMap<i64, FrameLocation>,
    read_only: bool,
}

impl SegmentedLog {
    /// Open (or create) the segments under `dir`, truncating a torn tail.
    pub fn open(
        partition_id: PartitionId,
        dir: &Path,
        max_segment_size: u64,
        flush: bool,
    ) -> BraidResult<(Self, RecoveryReport)> {
        std::fs::create_dir_all(dir).map_err(|e| BraidError::io(partition_id, e))?;
        let mut log = Self {
            partition_id,
            dir: dir.to_path_buf(),
            max_segment_size,
            flush,
            segments: BTreeMap::new(),
            index: BTreeMap::new(),
            read_only: false,
        };
        let report = log.recover()?;
        if log.segments.is_empty() {
            let segment = Segment::create(&log.dir, 1).map_err(|e| log.io(e))?;
            log.segments.insert(1, segment);
        }
        Ok((log, report))
    }

    /// Index the segments under `dir` without touching them. A torn tail is
    /// left in place and reported; every mutating call fails.
    pub fn open_read_only(
        partition_id: PartitionId,
        dir: &Path,
    ) -> BraidResult<(Self, RecoveryReport)> {
        let mut log = Self {
            partition_id,
            dir: dir.to_path_buf(),
            max_segment_size: u64::MAX,
            flush: false,
            segments: BTreeMap::new(),
            index: BTreeMap::new(),
            read_only: true,
        };
        let report = log.recover()?;
        Ok((log, report))
    }

    fn io(&self, err: std::io::Error) -> BraidError {
        BraidError::io(self.partition_id, err)
    }

    fn ensure_writable(&self) -> BraidResult<()> {
        if self.read_only {
            return Err(BraidError::internal(format!(
                "log of partition {} is opened read-only",
                self.partition_id
            )));
        }
        Ok(())
    }

    fn recover(&mut self) -> BraidResult<RecoveryReport> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(|e| self.io(e))?;
        for entry in entries {
            let entry = entry.map_err(|e| self.io(e))?;
            if let Some(id) = parse_segment_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut report = RecoveryReport::default();
        let mut expected_position: Option<i64> = None;
        let last_id = ids.last().copied();

        for id in ids {
            let path = segment_path(&self.dir, id);
            let bytes = std::fs::read(&path).map_err(|e| self.io(e))?;
            let is_last = Some(id) == last_id;
            let mut offset = 0usize;
            // Offset just past the last complete batch.
            let mut committed_offset = 0usize;
            let mut batch: Vec<(i64, FrameLocation)> = Vec::new();
            let mut segment_first = -1;
            let mut segment_last = -1;

            while offset < bytes.len() {
                let remaining = &bytes[offset..];
                let frame = match decode_frame(remaining) {
                    Ok(frame) => frame,
                    Err(err) => {
                        let at_tail = match frame_length(remaining) {
                            Some(len) => offset + align(len) >= bytes.len(),
                            None => true,
                        };
                        let torn = matches!(err, FrameError::Incomplete { .. })
                            || matches!(err, FrameError::ChecksumMismatch { .. }) && at_tail;
                        if is_last && torn {
                            break;
                        }
                        return Err(BraidError::CorruptedFrame {
                            segment: path.display().to_string(),
                            offset: offset as u64,
                            reason: err.to_string(),
                        });
                    }
                };
                let position = frame.entry.position();
                if let Some(expected) = expected_position {
                    if position != expected {
                        return Err(BraidError::CorruptedFrame {
                            segment: path.display().to_string(),
                            offset: offset as u64,
                            reason: format!("expected position {}, found {}", expected, position),
                        });
                    }
                }
                expected_position = Some(position + 1);
                batch.push((
                    position,
                    FrameLocation {
                        segment_id: id,
                        offset: offset as u64,
                        length: frame.aligned_length,
                        term: frame.entry.term,
                    },
                ));
                offset += frame.aligned_length;

                if frame.flags.contains(FrameFlags::BATCH_END) {
                    for (pos, location) in batch.drain(..) {
                        if segment_first < 0 {
                            segment_first = pos;
                        }
                        segment_last = pos;
                        self.index.insert(pos, location);
                        report.frames += 1;
                    }
                    committed_offset = offset;
                }
            }

            if !batch.is_empty() && !is_last {
                return Err(BraidError::CorruptedFrame {
                    segment: path.display().to_string(),
                    offset: committed_offset as u64,
                    reason: "unterminated batch before the last segment".to_string(),
                });
            }

            if committed_offset < bytes.len() && self.read_only {
                report.torn_bytes += (bytes.len() - committed_offset) as u64;
            } else if committed_offset < bytes.len() {
                let cut = (bytes.len() - committed_offset) as u64;
                tracing::warn!(
                    partition_id = self.partition_id,
                    segment = %path.display(),
                    truncated_bytes = cut,
                    "truncating torn log tail"
                );
                let file = OpenOptions::new()
                    .write(true)
                    .open(&path)
                    .map_err(|e| self.io(e))?;
                file.set_len(committed_offset as u64)
                    .map_err(|e| self.io(e))?;
                file.sync_all().map_err(|e| self.io(e))?;
                report.torn_bytes += cut;
                expected_position = if segment_last >= 0 {
                    Some(segment_last + 1)
                } else {
                    self.index.keys().next_back().map(|p| p + 1)
                };
            }

            let reader = File::open(&path).map_err(|e| self.io(e))?;
            let writer = if is_last && !self.read_only {
                Some(
                    OpenOptions::new()
                        .append(true)
                        .open(&path)
                        .map_err(|e| self.io(e))?,
                )
            } else {
                None
            };
            self.segments.insert(
                id,
                Segment {
                    id,
                    first_position: segment_first,
                    last_position: segment_last,
                    path,
                    size_bytes: committed_offset as u64,
                    state: if is_last {
                        SegmentState::Open
                    } else {
                        SegmentState::Sealed
                    },
                    reader: Mutex::new(reader),
                    writer,
                },
            );
            report.segments += 1;
        }
        Ok(report)
    }

    /// First retained position, or -1 if the log is empty.
    pub fn first_position(&self) -> i64 {
        self.index.keys().next().copied().unwrap_or(-1)
    }

    /// Last written position, or -1 if the log is empty.
    pub fn last_position(&self) -> i64 {
        self.index.keys().next_back().copied().unwrap_or(-1)
    }

    /// Term of the frame at `position`.
    pub fn term_at(&self, position: i64) -> Option<u64> {
        self.index.get(&position).map(|l| l.term)
    }

    pub fn contains(&self, position: i64) -> bool {
        self.index.contains_key(&position)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Append one batch of frames as a single write.
    pub fn append_batch(&mut self, frames: &[PendingFrame]) -> BraidResult<()> {
        if frames.is_empty() {
            return Ok(());
        }
        self.ensure_writable()?;
        self.rotate_if_full()?;
        let partition_id = self.partition_id;
        let flush = self.flush;
        let (id, segment) = self
            .segments
            .iter_mut()
            .next_back()
            .ok_or_else(|| BraidError::internal("log has no open segment"))?;
        let id = *id;

        let mut buf = Vec::with_capacity(frames.iter().map(|f| f.bytes.len()).sum());
        for frame in frames {
            buf.extend_from_slice(&frame.bytes);
        }
        let writer = segment
            .writer
            .as_mut()
            .ok_or_else(|| BraidError::internal("open segment has no writer"))?;
        writer
            .write_all(&buf)
            .map_err(|e| BraidError::io(partition_id, e))?;
        if flush {
            writer
                .sync_data()
                .map_err(|e| BraidError::io(partition_id, e))?;
        }

        let mut offset = segment.size_bytes;
        for frame in frames {
            if segment.is_empty() {
                segment.first_position = frame.position;
            }
            segment.last_position = frame.position;
            self.index.insert(
                frame.position,
                FrameLocation {
                    segment_id: id,
                    offset,
                    length: frame.bytes.len(),
                    term: frame.term,
                },
            );
            offset += frame.bytes.len() as u64;
        }
        segment.size_bytes = offset;
        Ok(())
    }

    fn rotate_if_full(&mut self) -> BraidResult<()> {
        let next_id = match self.segments.iter_mut().next_back() {
            Some((id, segment)) if segment.size_bytes >= self.max_segment_size => {
                segment.seal();
                id + 1
            }
            Some(_) => return Ok(()),
            None => 1,
        };
        let segment = Segment::create(&self.dir, next_id).map_err(|e| self.io(e))?;
        tracing::debug!(
            partition_id = self.partition_id,
            segment_id = next_id,
            "rotated log segment"
        );
        self.segments.insert(next_id, segment);
        Ok(())
    }

    /// Raw bytes of the frame at `position`.
    pub fn read_raw(&self, position: i64) -> BraidResult<Option<Vec<u8>>> {
        let Some(location) = self.index.get(&position) else {
            return Ok(None);
        };
        let segment = self
            .segments
            .get(&location.segment_id)
            .ok_or_else(|| BraidError::internal("index points at a missing segment"))?;
        let bytes = segment
            .read_at(location.offset, location.length)
            .map_err(|e| self.io(e))?;
        Ok(Some(bytes))
    }

    /// Decoded frame at `position`.
    pub fn read_frame(&self, position: i64) -> BraidResult<Option<DecodedFrame>> {
        let Some(bytes) = self.read_raw(position)? else {
            return Ok(None);
        };
        let frame = decode_frame(&bytes).map_err(|e| BraidError::CorruptedFrame {
            segment: format!("partition-{}", self.partition_id),
            offset: position as u64,
            reason: e.to_string(),
        })?;
        Ok(Some(frame))
    }

    /// Drop every frame after `position`.
    pub fn truncate_after(&mut self, position: i64) -> BraidResult<()> {
        self.ensure_writable()?;
        let Some((&first_dropped, location)) = self.index.range(position + 1..).next() else {
            return Ok(());
        };
        let location = *location;
        let doomed: Vec<u64> = self
            .segments
            .range(location.segment_id + 1..)
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            if let Some(segment) = self.segments.remove(&id) {
                std::fs::remove_file(&segment.path).map_err(|e| self.io(e))?;
            }
        }
        let partition_id = self.partition_id;
        let segment = self
            .segments
            .get_mut(&location.segment_id)
            .ok_or_else(|| BraidError::internal("index points at a missing segment"))?;
        let file = OpenOptions::new()
            .write(true)
            .open(&segment.path)
            .map_err(|e| BraidError::io(partition_id, e))?;
        file.set_len(location.offset)
            .map_err(|e| BraidError::io(partition_id, e))?;
        file.sync_all()
            .map_err(|e| BraidError::io(partition_id, e))?;
        segment.size_bytes = location.offset;
        segment.state = SegmentState::Open;
        segment.writer = Some(
            OpenOptions::new()
                .append(true)
                .open(&segment.path)
                .map_err(|e| BraidError::io(partition_id, e))?,
        );
        if first_dropped <= segment.first_position || segment.first_position < 0 {
            segment.first_position = -1;
            segment.last_position = -1;
        } else {
            segment.last_position = position;
        }
        self.index.split_off(&first_dropped);
        tracing::info!(
            partition_id = self.partition_id,
            position,
            "truncated log suffix"
        );
        Ok(())
    }

    /// Delete sealed segments whose frames all lie below `floor`.
    ///
    /// Returns position and term of the highest deleted frame.
    pub fn delete_below(&mut self, floor: i64) -> BraidResult<Option<(i64, u64)>> {
        self.ensure_writable()?;
        let doomed: Vec<u64> = self
            .segments
            .values()
            .filter(|s| {
                s.state == SegmentState::Sealed && s.last_position >= 0 && s.last_position < floor
            })
            .map(|s| s.id)
            .collect();
        let mut last_deleted = None;
        for id in &doomed {
            if let Some(segment) = self.segments.remove(id) {
                let term = self.index.get(&segment.last_position).map(|l| l.term);
                std::fs::remove_file(&segment.path).map_err(|e| self.io(e))?;
                self.index = self.index.split_off(&(segment.last_position + 1));
                if let Some(term) = term {
                    last_deleted = Some((segment.last_position, term));
                }
            }
        }
        Ok(last_deleted)
    }

    /// Delete everything and start over with an empty segment.
    pub fn reset(&mut self) -> BraidResult<()> {
        self.ensure_writable()?;
        let next_id = self.segments.keys().next_back().map(|id| id + 1).unwrap_or(1);
        let segments = std::mem::take(&mut self.segments);
        for segment in segments.into_values() {
            std::fs::remove_file(&segment.path).map_err(|e| self.io(e))?;
        }
        self.index.clear();
        let segment = Segment::create(&self.dir, next_id).map_err(|e| self.io(e))?;
        self.segments.insert(next_id, segment);
        Ok(())
    }
}

fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("segment_{:016}.log", id))
}

fn parse_segment_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let id = name.strip_prefix("segment_")?.strip_suffix(".log")?;
    id.parse().ok()
}
