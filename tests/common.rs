//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use braid::core::config::{Config, LogConfig};
use braid::core::time::ControlledClock;
use braid::log::LogStream;
use braid::record::{
    AppendEntry, DeploymentIntent, DeploymentRecord, Intent, MessageSubscriptionIntent,
    MessageSubscriptionRecord, PartitionId, RecordValue,
};
use braid::state::StateDb;
use braid::stream::{PostCommitTask, StreamProcessor};
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Create a temporary directory for test data.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Write a config file with the given TOML content.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Configuration for an in-process cluster with fast timers.
pub fn cluster_config(data_dir: &Path, cluster_size: u32, partition_count: u32) -> Config {
    let mut config = Config::default();
    config.node.data_dir = data_dir.display().to_string();
    config.cluster.mode = "embedded".into();
    config.cluster.cluster_size = cluster_size;
    config.cluster.partition_count = partition_count;
    config.cluster.replication_factor = cluster_size;
    config.log.flush_on_append = false;
    config.raft.tick_interval_ms = 5;
    config.raft.heartbeat_ticks = 2;
    config.raft.election_timeout_ticks = 10;
    config.distribution.retry_interval_ms = 50;
    config.distribution.max_backoff_ms = 400;
    config.snapshot.period_ms = 60 * 60 * 1000;
    config
}

/// Log configuration with tiny segments so compaction has something to do.
pub fn small_segment_log_config() -> LogConfig {
    LogConfig {
        segment_size_bytes: 512,
        flush_on_append: false,
    }
}

/// Open a partition log under `dir`.
pub fn open_log(partition_id: PartitionId, dir: &Path) -> LogStream {
    LogStream::open(partition_id, dir, &small_segment_log_config()).expect("Failed to open log")
}

/// A clock pinned at a fixed time.
pub fn test_clock() -> Arc<ControlledClock> {
    Arc::new(ControlledClock::new(1_700_000_000_000))
}

pub fn deployment_value(tenant: &str, name: &str, resource: &[u8]) -> RecordValue {
    RecordValue::Deployment(DeploymentRecord {
        tenant_id: tenant.into(),
        resource_name: name.into(),
        resource: resource.to_vec(),
        version: 0,
    })
}

/// A `DEPLOYMENT CREATE` command.
pub fn deploy(tenant: &str, name: &str, resource: &[u8]) -> AppendEntry {
    AppendEntry::command(
        Intent::Deployment(DeploymentIntent::Create),
        deployment_value(tenant, name, resource),
    )
}

pub fn subscription_value(
    tenant: &str,
    message: &str,
    correlation_key: &str,
    element_instance_key: i64,
) -> RecordValue {
    RecordValue::MessageSubscription(MessageSubscriptionRecord {
        tenant_id: tenant.into(),
        message_name: message.into(),
        correlation_key: correlation_key.into(),
        element_instance_key,
    })
}

/// A `MESSAGE_SUBSCRIPTION CREATE` command.
pub fn subscribe(
    tenant: &str,
    message: &str,
    correlation_key: &str,
    element_instance_key: i64,
) -> AppendEntry {
    AppendEntry::command(
        Intent::MessageSubscription(MessageSubscriptionIntent::Create),
        subscription_value(tenant, message, correlation_key, element_instance_key),
    )
}

/// A `MESSAGE_SUBSCRIPTION DELETE` command for an existing subscription.
pub fn unsubscribe(key: i64, tenant: &str, message: &str) -> AppendEntry {
    AppendEntry::command(
        Intent::MessageSubscription(MessageSubscriptionIntent::Delete),
        subscription_value(tenant, message, "", -1),
    )
    .with_key(key)
}

/// A stream processor that replayed `log` and is ready to process.
pub fn leader_processor(
    log: &LogStream,
    partition_count: u32,
    clock: Arc<ControlledClock>,
) -> StreamProcessor {
    let mut processor = StreamProcessor::new(log.partition_id(), partition_count, clock);
    processor.recover(StateDb::new()).unwrap();
    processor.replay(log).unwrap();
    processor.start_processing().unwrap();
    processor
}

/// Append commands as the writer of `term` and commit them immediately.
pub fn append_committed(log: &mut LogStream, term: u64, entries: Vec<AppendEntry>) -> i64 {
    if log.writer_term() != Some(term) {
        log.acquire_writer(term);
    }
    let appended = log.append(term, entries).unwrap();
    log.set_commit_position(appended.last_position);
    appended.last_position
}

/// Process every committed command, appending and committing follow-ups
/// right away, as a single-replica leader would. Returns the released
/// post-commit tasks.
pub fn process_all(
    processor: &mut StreamProcessor,
    log: &mut LogStream,
    term: u64,
) -> Vec<PostCommitTask> {
    let mut tasks = Vec::new();
    while let Some(processed) = processor.process_next(log).unwrap() {
        if processed.records.is_empty() {
            let applied = processor.positions().last_applied_position;
            tasks.extend(processor.commit_pending(applied).unwrap());
            continue;
        }
        let last = append_committed(log, term, processed.records);
        tasks.extend(processor.commit_pending(last).unwrap());
    }
    tasks
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_config_is_valid() {
        let dir = temp_test_dir();
        let config = cluster_config(dir.path(), 3, 2);
        config.validate().unwrap();
        assert_eq!(config.cluster.replicas(1), vec![0, 1, 2]);
    }

    #[test]
    fn append_committed_advances_commit() {
        let dir = temp_test_dir();
        let mut log = open_log(1, dir.path());
        let last = append_committed(&mut log, 1, vec![deploy("t", "a", b"x")]);
        assert_eq!(last, 1);
        assert_eq!(log.commit_position(), 1);
    }
}
