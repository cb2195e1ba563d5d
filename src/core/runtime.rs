//! Main runtime orchestration.
//!
//! The runtime opens every hosted partition replica, wires them to one
//! in-process [`ClusterNetwork`] and runs them until shutdown:
//! - Start order: data directory → network → replicas
//! - Shutdown order: replicas → network
//!
//! In embedded mode every member of the cluster is hosted here, which gives
//! a fully replicated cluster inside a single process. Standalone mode hosts
//! only `node.node_id`.

use crate::core::config::Config;
use crate::core::time::{system_clock, SharedClock};
use crate::exporter::{Exporter, TracingExporter};
use crate::partition::{
    ClusterNetwork, PartitionHandle, PartitionReplica, PartitionStatus, ReplicaSettings,
};
use crate::raft::MemberId;
use crate::record::PartitionId;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Factory for the exporters of a replica.
pub type ExporterFactory = Arc<dyn Fn(PartitionId, MemberId) -> Vec<Box<dyn Exporter>> + Send + Sync>;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    Starting,
    Healthy,
    /// Some replicas failed; the others keep running.
    Degraded,
    Failed,
    Stopping,
    Stopped,
}

/// Directory of one replica: `<data_dir>/node-<member>/partition-<id>`.
pub fn partition_dir(data_dir: &Path, member: MemberId, partition_id: PartitionId) -> PathBuf {
    data_dir
        .join(format!("node-{}", member))
        .join(format!("partition-{}", partition_id))
}

struct HostedReplica {
    handle: PartitionHandle,
    task: JoinHandle<()>,
}

/// Braid runtime holding all replica handles.
pub struct Runtime {
    config: Arc<Config>,
    data_dir: PathBuf,
    clock: SharedClock,
    exporter_factory: Option<ExporterFactory>,
    network: Arc<ClusterNetwork>,
    replicas: BTreeMap<(PartitionId, MemberId), HostedReplica>,
    health: ComponentHealth,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let data_dir = config.data_dir();
        let network = Arc::new(ClusterNetwork::new(config.cluster.partition_count));
        Ok(Self {
            config: Arc::new(config),
            data_dir,
            clock: system_clock(),
            exporter_factory: None,
            network,
            replicas: BTreeMap::new(),
            health: ComponentHealth::Starting,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Use another clock for record timestamps and timers.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Attach exporters to every replica.
    pub fn with_exporters(mut self, factory: ExporterFactory) -> Self {
        self.exporter_factory = Some(factory);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn network(&self) -> &Arc<ClusterNetwork> {
        &self.network
    }

    pub fn health(&self) -> ComponentHealth {
        self.health
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Members hosted by this process.
    pub fn hosted_members(&self) -> Vec<MemberId> {
        if self.config.cluster.is_embedded() {
            (0..self.config.cluster.cluster_size).collect()
        } else {
            vec![self.config.node.node_id]
        }
    }

    /// Handles of every hosted replica of `partition_id`.
    pub fn replicas(&self, partition_id: PartitionId) -> Vec<PartitionHandle> {
        self.replicas
            .iter()
            .filter(|((p, _), _)| *p == partition_id)
            .map(|(_, r)| r.handle.clone())
            .collect()
    }

    pub fn replica(&self, partition_id: PartitionId, member: MemberId) -> Option<PartitionHandle> {
        self.replicas
            .get(&(partition_id, member))
            .map(|r| r.handle.clone())
    }

    /// Handle of the hosted replica currently leading `partition_id`.
    pub async fn leader(&self, partition_id: PartitionId) -> Option<PartitionHandle> {
        for handle in self.replicas(partition_id) {
            if let Ok(status) = handle.status().await {
                if status.role == crate::raft::RaftRole::Leader && status.failure.is_none() {
                    return Some(handle);
                }
            }
        }
        None
    }

    /// Wait until `partition_id` has a processing leader.
    pub async fn await_leader(
        &self,
        partition_id: PartitionId,
        timeout: Duration,
    ) -> Result<PartitionHandle> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for handle in self.replicas(partition_id) {
                if let Ok(status) = handle.status().await {
                    if status.role == crate::raft::RaftRole::Leader && status.phase == "processing"
                    {
                        return Ok(handle);
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("no leader for partition {} within {:?}", partition_id, timeout);
            }
            tokio::time::sleep(self.config.raft.tick_interval()).await;
        }
    }

    /// Status of every hosted replica.
    pub async fn status(&self) -> Vec<PartitionStatus> {
        let mut statuses = Vec::with_capacity(self.replicas.len());
        for replica in self.replicas.values() {
            if let Ok(status) = replica.handle.status().await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// Open and spawn every hosted replica.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            data_dir = %self.data_dir.display(),
            mode = %self.config.cluster.mode,
            partitions = self.config.cluster.partition_count,
            "starting braid runtime"
        );
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("failed to create data directory {}", self.data_dir.display())
        })?;

        let hosted = self.hosted_members();
        for partition_id in self.config.cluster.partition_ids() {
            let members = self.config.cluster.replicas(partition_id);
            for member in members.iter().copied().filter(|m| hosted.contains(m)) {
                self.start_replica(partition_id, member, members.clone())?;
            }
        }

        self.health = ComponentHealth::Healthy;
        self.running.store(true, Ordering::Release);
        tracing::info!(replicas = self.replicas.len(), "braid runtime started");
        Ok(())
    }

    fn start_replica(
        &mut self,
        partition_id: PartitionId,
        member: MemberId,
        members: Vec<MemberId>,
    ) -> Result<()> {
        let settings = ReplicaSettings {
            partition_id,
            member,
            members,
            partition_count: self.config.cluster.partition_count,
            partition_dir: partition_dir(&self.data_dir, member, partition_id),
        };
        let exporters = match &self.exporter_factory {
            Some(factory) => factory(partition_id, member),
            None if self.config.exporters.tracing => {
                vec![Box::new(TracingExporter::new("tracing")) as Box<dyn Exporter>]
            }
            None => Vec::new(),
        };
        let replica = PartitionReplica::open(
            settings,
            self.config.clone(),
            self.clock.clone(),
            self.network.clone(),
            exporters,
        )
        .with_context(|| {
            format!(
                "failed to open partition {} replica on member {}",
                partition_id, member
            )
        })?;
        let (handle, task) = replica.spawn();
        self.replicas
            .insert((partition_id, member), HostedReplica { handle, task });
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the shutdown signal.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until SIGINT or [`shutdown`](Self::shutdown).
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop every replica, waiting for its task to finish.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping braid runtime");
        self.health = ComponentHealth::Stopping;
        self.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(true);

        let replicas = std::mem::take(&mut self.replicas);
        for ((partition_id, member), replica) in replicas {
            replica.handle.shutdown().await;
            match tokio::time::timeout(Duration::from_secs(5), replica.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(partition_id, member, error = %e, "replica task panicked");
                }
                Err(_) => {
                    tracing::warn!(partition_id, member, "replica stop timed out");
                }
            }
        }

        self.health = ComponentHealth::Stopped;
        tracing::info!("braid runtime stopped");
        Ok(())
    }
}
