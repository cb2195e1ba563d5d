//! Partition replica tests against an in-process cluster.

mod common;

use braid::error::BraidError;
use braid::exporter::{Exporter, RecordingExporter};
use braid::raft::{AdminErrorCode, AdminRequestType, RaftRole};
use braid::record::{
    decode_partition_id, CommandDistributionIntent, DeploymentIntent, Intent, PartitionId,
    RecordValue, RejectionType,
};
use braid::runtime::{ExporterFactory, Runtime};
use braid::stream::CommandResponse;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn start_cluster(data_dir: &Path, cluster_size: u32, partition_count: u32) -> Runtime {
    let config = common::cluster_config(data_dir, cluster_size, partition_count);
    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    runtime
}

fn deployed_version(response: &CommandResponse) -> i32 {
    match &response.value {
        RecordValue::Deployment(deployment) => deployment.version,
        other => panic!("unexpected response value {:?}", other),
    }
}

// ============================================================================
// Command tests
// ============================================================================

#[tokio::test]
async fn submit_returns_command_response() {
    let dir = common::temp_test_dir();
    let mut runtime = start_cluster(dir.path(), 1, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();

    let created = leader.submit(common::deploy("t", "a", b"v1")).await.unwrap();
    assert!(!created.is_rejection());
    assert_eq!(created.intent, Intent::Deployment(DeploymentIntent::Created));
    assert_eq!(decode_partition_id(created.key), 1);
    assert_eq!(created.request_stream_id, 0);
    assert_eq!(deployed_version(&created), 1);

    let duplicate = leader.submit(common::deploy("t", "a", b"v1")).await.unwrap();
    assert!(duplicate.is_rejection());
    let rejection = duplicate.rejection.unwrap();
    assert_eq!(rejection.rejection_type, RejectionType::AlreadyExists);

    let updated = leader.submit(common::deploy("t", "a", b"v2")).await.unwrap();
    assert_eq!(deployed_version(&updated), 2);
    assert_ne!(updated.request_id, created.request_id);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn follower_refuses_commands() {
    let dir = common::temp_test_dir();
    let mut runtime = start_cluster(dir.path(), 3, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();
    let follower = runtime
        .replicas(1)
        .into_iter()
        .find(|r| r.member() != leader.member())
        .unwrap();

    let err = follower
        .submit(common::deploy("t", "a", b"x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BraidError::NotLeader { partition_id: 1, .. }));

    let response = follower
        .admin(AdminRequestType::StepDownIfNotPrimary)
        .await
        .unwrap();
    let error = response.error().unwrap();
    assert_eq!(error.code, AdminErrorCode::PartitionLeaderMismatch);
    assert_eq!(error.operation, AdminRequestType::StepDownIfNotPrimary);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn primary_ignores_step_down_request() {
    let dir = common::temp_test_dir();
    let mut runtime = start_cluster(dir.path(), 3, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();
    // Priority election makes the primary win the first term.
    assert_eq!(leader.member(), 0);

    let response = leader
        .admin(AdminRequestType::StepDownIfNotPrimary)
        .await
        .unwrap();
    assert!(response.is_ok());
    assert_eq!(leader.status().await.unwrap().role, RaftRole::Leader);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn pause_exporting_is_reported_in_status() {
    let dir = common::temp_test_dir();
    let mut runtime = start_cluster(dir.path(), 1, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();

    assert!(leader
        .admin(AdminRequestType::PauseExporting)
        .await
        .unwrap()
        .is_ok());
    assert!(leader.status().await.unwrap().exporting_paused);
    assert!(leader
        .admin(AdminRequestType::ResumeExporting)
        .await
        .unwrap()
        .is_ok());
    assert!(!leader.status().await.unwrap().exporting_paused);

    runtime.stop().await.unwrap();
}

// ============================================================================
// Failover tests
// ============================================================================

#[tokio::test]
async fn new_leader_continues_with_replicated_state() {
    let dir = common::temp_test_dir();
    let mut runtime = start_cluster(dir.path(), 3, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();
    let created = leader.submit(common::deploy("t", "a", b"v1")).await.unwrap();
    assert_eq!(deployed_version(&created), 1);

    leader.shutdown().await;
    let next = runtime.await_leader(1, TIMEOUT).await.unwrap();
    assert_ne!(next.member(), leader.member());
    assert!(next.status().await.unwrap().term > 1);

    let duplicate = next.submit(common::deploy("t", "a", b"v1")).await.unwrap();
    assert!(duplicate.is_rejection());
    let updated = next.submit(common::deploy("t", "a", b"v2")).await.unwrap();
    assert_eq!(deployed_version(&updated), 2);
    // Keys keep increasing across leaders.
    assert!(updated.key > created.key);

    // The stopped replica refuses further work.
    assert!(matches!(
        leader.submit(common::deploy("t", "b", b"x")).await,
        Err(BraidError::PartitionUnavailable { partition_id: 1 })
    ));

    runtime.stop().await.unwrap();
}

// ============================================================================
// Snapshot tests
// ============================================================================

#[tokio::test]
async fn state_survives_snapshot_and_restart() {
    let dir = common::temp_test_dir();
    {
        let mut runtime = start_cluster(dir.path(), 1, 1).await;
        let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();
        for name in ["a", "b", "c"] {
            let response = leader.submit(common::deploy("t", name, b"x")).await.unwrap();
            assert!(!response.is_rejection());
        }

        let id = leader.take_snapshot().await.unwrap().unwrap();
        let status = leader.status().await.unwrap();
        assert_eq!(status.latest_snapshot, Some(id.to_string()));
        assert_eq!(id.position, status.last_applied_position);
        runtime.stop().await.unwrap();
    }

    let mut runtime = start_cluster(dir.path(), 1, 1).await;
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();
    let status = leader.status().await.unwrap();
    assert!(status.term >= 2);
    assert!(status.latest_snapshot.is_some());

    let duplicate = leader.submit(common::deploy("t", "b", b"x")).await.unwrap();
    assert!(duplicate.is_rejection());
    let updated = leader.submit(common::deploy("t", "c", b"y")).await.unwrap();
    assert_eq!(deployed_version(&updated), 2);

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn follower_compacts_below_leader_exported_position() {
    let dir = common::temp_test_dir();
    let (factory, exported) = recording_exporters();
    let mut config = common::cluster_config(dir.path(), 3, 1);
    config.log.segment_size_bytes = 4096;
    let mut runtime = Runtime::new(config).unwrap().with_exporters(factory);
    runtime.start().await.unwrap();
    let leader = runtime.await_leader(1, TIMEOUT).await.unwrap();

    let resource = vec![7u8; 600];
    for i in 0..40 {
        let name = format!("resource-{}", i);
        let response = leader.submit(common::deploy("t", &name, &resource)).await.unwrap();
        assert!(!response.is_rejection());
    }
    let target = leader.status().await.unwrap().commit_position;

    let leader_exported = common::eventually(TIMEOUT, || {
        let leader = leader.clone();
        async move { leader.status().await.unwrap().exported_position >= Some(target) }
    })
    .await;
    assert!(leader_exported, "leader did not export up to {}", target);
    assert!(exported.lock().get(&1).is_some());

    let followers: Vec<_> = runtime
        .replicas(1)
        .into_iter()
        .filter(|r| r.member() != leader.member())
        .collect();
    assert_eq!(followers.len(), 2);
    for follower in &followers {
        let caught_up = common::eventually(TIMEOUT, || {
            let follower = follower.clone();
            async move {
                let status = follower.status().await.unwrap();
                status.exported_position >= Some(target)
                    && status.last_applied_position >= target
            }
        })
        .await;
        assert!(caught_up, "member {} did not catch up", follower.member());

        let id = follower.take_snapshot().await.unwrap().unwrap();
        assert!(id.exported >= target);
        let status = follower.status().await.unwrap();
        assert!(
            status.lowest_position > 1,
            "member {} kept its log from position {}",
            follower.member(),
            status.lowest_position
        );
    }

    runtime.stop().await.unwrap();
}

// ============================================================================
// Distribution tests
// ============================================================================

type Exported = Arc<Mutex<BTreeMap<PartitionId, Vec<RecordingExporter>>>>;

fn recording_exporters() -> (ExporterFactory, Exported) {
    let exported: Exported = Arc::default();
    let shared = exported.clone();
    let factory: ExporterFactory = Arc::new(move |partition_id: PartitionId, _member: u32| {
        let exporter = RecordingExporter::new("recording");
        shared
            .lock()
            .entry(partition_id)
            .or_default()
            .push(exporter.clone());
        vec![Box::new(exporter) as Box<dyn Exporter>]
    });
    (factory, exported)
}

fn exported_intents(exported: &Exported, partition_id: PartitionId, key: i64) -> Vec<Intent> {
    let exporters = exported.lock();
    let Some(recorders) = exporters.get(&partition_id) else {
        return Vec::new();
    };
    recorders
        .iter()
        .flat_map(|r| r.records())
        .filter(|r| r.key == key && r.is_event())
        .map(|r| r.intent())
        .collect()
}

#[tokio::test]
async fn deployment_is_distributed_to_every_partition() {
    let dir = common::temp_test_dir();
    let (factory, exported) = recording_exporters();
    let config = common::cluster_config(dir.path(), 1, 3);
    let mut runtime = Runtime::new(config).unwrap().with_exporters(factory);
    runtime.start().await.unwrap();
    for partition_id in 1..=3 {
        runtime.await_leader(partition_id, TIMEOUT).await.unwrap();
    }

    let leader = runtime.leader(1).await.unwrap();
    let created = leader.submit(common::deploy("t", "a", b"x")).await.unwrap();
    let key = created.key;

    let fully_distributed = Intent::Deployment(DeploymentIntent::FullyDistributed);
    let distributed = common::eventually(TIMEOUT, || {
        let done = exported_intents(&exported, 1, key).contains(&fully_distributed);
        async move { done }
    })
    .await;
    assert!(distributed, "deployment was not fully distributed");

    let origin = exported_intents(&exported, 1, key);
    let acknowledged = origin
        .iter()
        .filter(|i| **i == Intent::CommandDistribution(CommandDistributionIntent::Acknowledged))
        .count();
    assert_eq!(acknowledged, 2);
    assert_eq!(origin.last(), Some(&fully_distributed));

    for partition_id in 2..=3 {
        let created_on_target = common::eventually(TIMEOUT, || {
            let intents = exported_intents(&exported, partition_id, key);
            async move { intents.contains(&Intent::Deployment(DeploymentIntent::Created)) }
        })
        .await;
        assert!(created_on_target, "partition {} missed the deployment", partition_id);
    }

    runtime.stop().await.unwrap();
}
