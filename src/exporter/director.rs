//! Drives the exporters of one partition.
//!
//! Only the leader exports. Each exporter has its own cursor and
//! acknowledged position; positions are persisted to `exporters.json` in the
//! partition directory after every round that moved one of them. The leader
//! hands its positions to the followers, which store them without exporting
//! so their snapshots can compact and a new leader resumes where the old one
//! stopped.

use super::cursor::ExporterCursor;
use crate::core::error::{BraidError, BraidResult};
use crate::log::LogStream;
use crate::record::{PartitionId, Record};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const POSITIONS_FILE: &str = "exporters.json";

/// Consumer of committed records.
///
/// `export` returning `Ok` acknowledges the record. An error leaves the
/// position unacknowledged and the record is offered again next round.
pub trait Exporter: Send {
    fn id(&self) -> &str;

    fn export(&mut self, record: &Record) -> BraidResult<()>;
}

/// Exporter that logs every record.
#[derive(Debug, Clone)]
pub struct TracingExporter {
    id: String,
}

impl TracingExporter {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Exporter for TracingExporter {
    fn id(&self) -> &str {
        &self.id
    }

    fn export(&mut self, record: &Record) -> BraidResult<()> {
        info!(
            exporter = %self.id,
            partition_id = record.partition_id,
            position = record.position,
            key = record.key,
            record_type = ?record.record_type(),
            value_type = %record.value_type(),
            intent = %record.intent(),
            "exported record"
        );
        Ok(())
    }
}

/// Exporter collecting records in memory, shared with whoever holds a clone.
#[derive(Debug, Clone, Default)]
pub struct RecordingExporter {
    id: String,
    records: Arc<Mutex<Vec<Record>>>,
}

impl RecordingExporter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: Arc::default(),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl Exporter for RecordingExporter {
    fn id(&self) -> &str {
        &self.id
    }

    fn export(&mut self, record: &Record) -> BraidResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExporterPositions {
    positions: BTreeMap<String, i64>,
}

struct ExporterContainer {
    exporter: Box<dyn Exporter>,
    cursor: ExporterCursor,
    position: i64,
}

pub struct ExporterDirector {
    partition_id: PartitionId,
    path: PathBuf,
    containers: Vec<ExporterContainer>,
    active: bool,
    paused: bool,
    /// Positions moved since the last [`take_changed_positions`](Self::take_changed_positions).
    changed: bool,
}

impl ExporterDirector {
    /// Load acknowledged positions and attach `exporters` to them.
    pub fn open(
        partition_id: PartitionId,
        partition_dir: &Path,
        exporters: Vec<Box<dyn Exporter>>,
    ) -> BraidResult<Self> {
        let path = partition_dir.join(POSITIONS_FILE);
        let stored = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<ExporterPositions>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ExporterPositions::default(),
            Err(e) => return Err(BraidError::io(partition_id, e)),
        };
        let containers = exporters
            .into_iter()
            .map(|exporter| {
                let position = stored
                    .positions
                    .get(exporter.id())
                    .copied()
                    .unwrap_or(0);
                ExporterContainer {
                    exporter,
                    cursor: ExporterCursor::resume_after(position),
                    position,
                }
            })
            .collect();
        Ok(Self {
            partition_id,
            path,
            containers,
            active: false,
            paused: false,
            changed: false,
        })
    }

    pub fn exporter_count(&self) -> usize {
        self.containers.len()
    }

    /// Start exporting, e.g. after becoming leader.
    pub fn activate(&mut self) {
        for container in &mut self.containers {
            container.cursor = ExporterCursor::resume_after(container.position);
        }
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            info!(partition_id = self.partition_id, "exporting paused");
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            info!(partition_id = self.partition_id, "exporting resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Acknowledged position per exporter id.
    pub fn positions(&self) -> BTreeMap<String, i64> {
        self.containers
            .iter()
            .map(|c| (c.exporter.id().to_string(), c.position))
            .collect()
    }

    /// Lowest acknowledged position, or `None` without exporters.
    pub fn lowest_position(&self) -> Option<i64> {
        self.containers.iter().map(|c| c.position).min()
    }

    /// Positions acknowledged since the previous call, for distribution to
    /// the followers.
    pub fn take_changed_positions(&mut self) -> Option<BTreeMap<String, i64>> {
        if !std::mem::take(&mut self.changed) {
            return None;
        }
        Some(self.positions())
    }

    /// Store positions acknowledged by the leader's exporters. Ignored while
    /// this replica exports itself; positions never move backwards.
    pub fn store_positions(&mut self, positions: &BTreeMap<String, i64>) -> BraidResult<bool> {
        if self.active {
            return Ok(false);
        }
        let mut moved = false;
        for container in &mut self.containers {
            let Some(&position) = positions.get(container.exporter.id()) else {
                continue;
            };
            if position > container.position {
                container.position = position;
                moved = true;
            }
        }
        if moved {
            self.persist()?;
        }
        Ok(moved)
    }

    /// Offer up to `max_records` committed records to every exporter.
    /// Returns how many records were acknowledged in total.
    pub fn export(&mut self, log: &LogStream, max_records: usize) -> BraidResult<usize> {
        if !self.active || self.paused || self.containers.is_empty() {
            return Ok(0);
        }
        let mut acknowledged = 0;
        for container in &mut self.containers {
            let records = match container.cursor.poll(log, max_records) {
                Ok(records) => records,
                Err(BraidError::Compacted { position, floor }) => {
                    // Compaction never passes the exported position of the
                    // leader that took the snapshot, so the gap was exported.
                    warn!(
                        partition_id = self.partition_id,
                        exporter = container.exporter.id(),
                        position,
                        floor,
                        "exporter position below log start; skipping to floor"
                    );
                    container.position = container.position.max(floor - 1);
                    container.cursor.seek(floor);
                    continue;
                }
                Err(err) => return Err(err),
            };
            for record in &records {
                if let Err(err) = container.exporter.export(record) {
                    warn!(
                        partition_id = self.partition_id,
                        exporter = container.exporter.id(),
                        position = record.position,
                        error = %err,
                        "export failed; will retry"
                    );
                    container.cursor.seek(record.position);
                    break;
                }
                container.position = record.position;
                acknowledged += 1;
            }
        }
        if acknowledged > 0 {
            self.changed = true;
            self.persist()?;
            debug!(
                partition_id = self.partition_id,
                acknowledged,
                lowest = ?self.lowest_position(),
                "exported records"
            );
        }
        Ok(acknowledged)
    }

    fn persist(&self) -> BraidResult<()> {
        let io = |e| BraidError::io(self.partition_id, e);
        let stored = ExporterPositions {
            positions: self.positions(),
        };
        let bytes = serde_json::to_vec_pretty(&stored)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp).map_err(io)?;
        file.write_all(&bytes).map_err(io)?;
        file.sync_all().map_err(io)?;
        std::fs::rename(&tmp, &self.path).map_err(io)
    }
}
