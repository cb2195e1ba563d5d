//! Configuration parsing and validation.
//!
//! Braid configuration is loaded from TOML files with CLI overrides. Every
//! field has a default, so an empty file yields a runnable single-node setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level braid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node identity and data location.
    #[serde(default)]
    pub node: NodeConfig,

    /// Cluster shape and partition distribution.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Append-only log configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Replication timing.
    #[serde(default)]
    pub raft: RaftConfig,

    /// Stream processor configuration.
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Snapshot scheduling and retention.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Cross-partition command distribution.
    #[serde(default)]
    pub distribution: DistributionConfig,

    /// Built-in exporters.
    #[serde(default)]
    pub exporters: ExportersConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Node identity and data location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Member id of this node, in `0..cluster.cluster_size`.
    #[serde(default)]
    pub node_id: u32,

    /// Root directory for partition logs, snapshots and metadata.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            data_dir: default_data_dir(),
        }
    }
}

/// Cluster shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Mode: "embedded" hosts every member in-process, "standalone" hosts
    /// only `node.node_id`.
    #[serde(default = "default_cluster_mode")]
    pub mode: String,

    /// Number of members in the cluster.
    #[serde(default = "default_cluster_size")]
    pub cluster_size: u32,

    /// Number of partitions; partition ids run from 1 to this value.
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    /// Replicas per partition.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: default_cluster_mode(),
            cluster_size: default_cluster_size(),
            partition_count: default_partition_count(),
            replication_factor: default_replication_factor(),
        }
    }
}

impl ClusterConfig {
    /// Members replicating a partition, round-robin over the cluster.
    ///
    /// The first member is the partition's designated primary.
    pub fn replicas(&self, partition_id: i32) -> Vec<u32> {
        let size = self.cluster_size.max(1);
        let start = (partition_id.max(1) as u32 - 1) % size;
        (0..self.replication_factor.min(size))
            .map(|i| (start + i) % size)
            .collect()
    }

    /// All partition ids.
    pub fn partition_ids(&self) -> Vec<i32> {
        (1..=self.partition_count as i32).collect()
    }

    /// Whether every member is hosted in this process.
    pub fn is_embedded(&self) -> bool {
        self.mode == "embedded"
    }
}

/// Append-only log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Segment rotation threshold in bytes.
    #[serde(default = "default_segment_size_bytes")]
    pub segment_size_bytes: u64,

    /// Sync segment data to disk before an append returns.
    #[serde(default = "default_true")]
    pub flush_on_append: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_size_bytes: default_segment_size_bytes(),
            flush_on_append: true,
        }
    }
}

/// Replication timing, measured in ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Ticks between leader heartbeats.
    #[serde(default = "default_heartbeat_ticks")]
    pub heartbeat_ticks: u32,

    /// Base election timeout in ticks.
    #[serde(default = "default_election_timeout_ticks")]
    pub election_timeout_ticks: u32,

    /// Give the designated primary the shortest election timeout.
    #[serde(default = "default_true")]
    pub priority_election: bool,

    /// Maximum entries per append request.
    #[serde(default = "default_max_append_batch")]
    pub max_append_batch: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            heartbeat_ticks: default_heartbeat_ticks(),
            election_timeout_ticks: default_election_timeout_ticks(),
            priority_election: true,
            max_append_batch: default_max_append_batch(),
        }
    }
}

impl RaftConfig {
    /// Tick interval as a duration.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Stream processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Upper bound of commands processed per actor turn.
    #[serde(default = "default_max_commands_per_drive")]
    pub max_commands_per_drive: usize,

    /// Delay before retrying a command whose append failed transiently.
    #[serde(default = "default_error_retry_delay_ms")]
    pub error_retry_delay_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_commands_per_drive: default_max_commands_per_drive(),
            error_retry_delay_ms: default_error_retry_delay_ms(),
        }
    }
}

/// Snapshot scheduling and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Period between snapshot attempts in milliseconds.
    #[serde(default = "default_snapshot_period_ms")]
    pub period_ms: u64,

    /// Number of persisted snapshots to keep.
    #[serde(default = "default_retained_count")]
    pub retained_count: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            period_ms: default_snapshot_period_ms(),
            retained_count: default_retained_count(),
        }
    }
}

/// Cross-partition command distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// First retry delay in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound for the exponential backoff in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_retry_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Built-in exporters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportersConfig {
    /// Log every committed record on partition leaders.
    #[serde(default)]
    pub tracing: bool,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "pretty" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_cluster_mode() -> String {
    "embedded".to_string()
}

fn default_cluster_size() -> u32 {
    1
}

fn default_partition_count() -> u32 {
    1
}

fn default_replication_factor() -> u32 {
    1
}

fn default_segment_size_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_heartbeat_ticks() -> u32 {
    2
}

fn default_election_timeout_ticks() -> u32 {
    10
}

fn default_max_append_batch() -> usize {
    256
}

fn default_max_commands_per_drive() -> usize {
    64
}

fn default_error_retry_delay_ms() -> u64 {
    250
}

fn default_snapshot_period_ms() -> u64 {
    5 * 60 * 1000
}

fn default_retained_count() -> usize {
    1
}

fn default_retry_interval_ms() -> u64 {
    10_000
}

fn default_max_backoff_ms() -> u64 {
    5 * 60 * 1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref data_dir) = overrides.data_dir {
            self.node.data_dir = data_dir.clone();
        }
        if let Some(node_id) = overrides.node_id {
            self.node.node_id = node_id;
        }
    }

    /// Root data directory.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.node.data_dir)
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_cluster()?;
        self.validate_log()?;
        self.validate_raft()?;
        self.validate_snapshot()?;
        self.validate_distribution()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        let cluster = &self.cluster;
        if cluster.mode != "embedded" && cluster.mode != "standalone" {
            anyhow::bail!(
                "cluster.mode must be 'embedded' or 'standalone', got: {}",
                cluster.mode
            );
        }
        if cluster.cluster_size == 0 {
            anyhow::bail!("cluster.cluster_size must be > 0");
        }
        if cluster.partition_count == 0 {
            anyhow::bail!("cluster.partition_count must be > 0");
        }
        // Keys reserve 13 bits for the partition id.
        if cluster.partition_count >= 8192 {
            anyhow::bail!("cluster.partition_count must be < 8192");
        }
        if cluster.replication_factor == 0 {
            anyhow::bail!("cluster.replication_factor must be > 0");
        }
        if cluster.replication_factor > cluster.cluster_size {
            anyhow::bail!(
                "cluster.replication_factor ({}) cannot exceed cluster.cluster_size ({})",
                cluster.replication_factor,
                cluster.cluster_size
            );
        }
        if self.node.node_id >= cluster.cluster_size {
            anyhow::bail!(
                "node.node_id ({}) must be < cluster.cluster_size ({})",
                self.node.node_id,
                cluster.cluster_size
            );
        }
        Ok(())
    }

    fn validate_log(&self) -> Result<()> {
        if self.log.segment_size_bytes < 4096 {
            anyhow::bail!("log.segment_size_bytes must be >= 4096");
        }
        Ok(())
    }

    fn validate_raft(&self) -> Result<()> {
        let raft = &self.raft;
        if raft.tick_interval_ms == 0 {
            anyhow::bail!("raft.tick_interval_ms must be > 0");
        }
        if raft.heartbeat_ticks == 0 {
            anyhow::bail!("raft.heartbeat_ticks must be > 0");
        }
        if raft.election_timeout_ticks <= raft.heartbeat_ticks {
            anyhow::bail!(
                "raft.election_timeout_ticks ({}) must exceed raft.heartbeat_ticks ({})",
                raft.election_timeout_ticks,
                raft.heartbeat_ticks
            );
        }
        if raft.max_append_batch == 0 {
            anyhow::bail!("raft.max_append_batch must be > 0");
        }
        if self.processing.max_commands_per_drive == 0 {
            anyhow::bail!("processing.max_commands_per_drive must be > 0");
        }
        Ok(())
    }

    fn validate_snapshot(&self) -> Result<()> {
        if self.snapshot.period_ms == 0 {
            anyhow::bail!("snapshot.period_ms must be > 0");
        }
        if self.snapshot.retained_count == 0 {
            anyhow::bail!("snapshot.retained_count must be >= 1");
        }
        Ok(())
    }

    fn validate_distribution(&self) -> Result<()> {
        let dist = &self.distribution;
        if dist.retry_interval_ms == 0 {
            anyhow::bail!("distribution.retry_interval_ms must be > 0");
        }
        if dist.max_backoff_ms < dist.retry_interval_ms {
            anyhow::bail!(
                "distribution.max_backoff_ms ({}) cannot be below distribution.retry_interval_ms ({})",
                dist.max_backoff_ms,
                dist.retry_interval_ms
            );
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        if self.telemetry.log_format != "pretty" && self.telemetry.log_format != "json" {
            anyhow::bail!(
                "telemetry.log_format must be 'pretty' or 'json', got: {}",
                self.telemetry.log_format
            );
        }
        Ok(())
    }
}

/// CLI overrides for configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override data directory.
    pub data_dir: Option<String>,
    /// Override node id.
    pub node_id: Option<u32>,
}
