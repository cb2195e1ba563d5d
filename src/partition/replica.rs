//! The actor hosting one replica of a partition.
//!
//! A replica owns its log, snapshot store, raft node, stream processor and
//! exporters, and is driven by a single tokio task: messages from the inbox
//! and a periodic tick are handled one at a time, so none of the owned
//! components needs locking.

use super::router::ClusterNetwork;
use crate::core::config::Config;
use crate::core::error::{BraidError, BraidResult};
use crate::core::time::SharedClock;
use crate::distribution::CommandRedistributor;
use crate::exporter::{Exporter, ExporterDirector};
use crate::log::LogStream;
use crate::raft::{
    AdminError, AdminErrorCode, AdminRequest, AdminRequestType, AdminResponse, Envelope,
    MemberId, RaftContext, RaftEvent, RaftNode, RaftRole,
};
use crate::record::{AppendEntry, PartitionId};
use crate::snapshot::{SnapshotId, SnapshotStore};
use crate::state::StateDb;
use crate::stream::{
    CommandResponse, InterPartitionCommand, PostCommitTask, StreamPhase, StreamProcessor,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const LOG_DIR: &str = "log";
const EXPORT_BATCH: usize = 512;

/// Inbox message of a partition replica.
#[derive(Debug)]
pub enum PartitionMessage {
    Raft(Envelope),
    Submit {
        command: AppendEntry,
        reply: oneshot::Sender<BraidResult<CommandResponse>>,
    },
    InterPartition(InterPartitionCommand),
    /// Acknowledged exporter positions of the partition leader.
    ExporterPositions {
        positions: BTreeMap<String, i64>,
    },
    Admin {
        request: AdminRequest,
        reply: oneshot::Sender<AdminResponse>,
    },
    TakeSnapshot {
        reply: oneshot::Sender<BraidResult<Option<SnapshotId>>>,
    },
    Status {
        reply: oneshot::Sender<PartitionStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Point-in-time view of a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub partition_id: PartitionId,
    pub member: MemberId,
    pub role: RaftRole,
    pub term: u64,
    pub leader: Option<MemberId>,
    pub phase: String,
    pub lowest_position: i64,
    pub highest_position: i64,
    pub commit_position: i64,
    pub last_processed_position: i64,
    pub last_applied_position: i64,
    pub exporting_paused: bool,
    pub exported_position: Option<i64>,
    pub latest_snapshot: Option<String>,
    pub failure: Option<String>,
}

/// Where a replica lives and who it replicates with.
#[derive(Debug, Clone)]
pub struct ReplicaSettings {
    pub partition_id: PartitionId,
    pub member: MemberId,
    /// Replicas of the partition, designated primary first.
    pub members: Vec<MemberId>,
    pub partition_count: u32,
    pub partition_dir: PathBuf,
}

pub struct PartitionReplica {
    partition_id: PartitionId,
    member: MemberId,
    partition_count: u32,
    config: Arc<Config>,
    clock: SharedClock,
    network: Arc<ClusterNetwork>,
    log: LogStream,
    snapshots: SnapshotStore,
    raft: RaftNode,
    processor: StreamProcessor,
    exporters: ExporterDirector,
    redistributor: CommandRedistributor,
    requests: HashMap<i64, oneshot::Sender<BraidResult<CommandResponse>>>,
    request_counter: u32,
    awaiting_commit: Option<i64>,
    leader_processing: bool,
    processing_paused: bool,
    last_snapshot_ms: i64,
    /// Processing is held back until this time after a transient error.
    retry_after_ms: i64,
    failure: Option<String>,
}

impl PartitionReplica {
    /// Open the replica's storage and recover its state from the newest
    /// valid snapshot.
    pub fn open(
        settings: ReplicaSettings,
        config: Arc<Config>,
        clock: SharedClock,
        network: Arc<ClusterNetwork>,
        exporters: Vec<Box<dyn Exporter>>,
    ) -> BraidResult<Self> {
        let ReplicaSettings {
            partition_id,
            member,
            members,
            partition_count,
            partition_dir,
        } = settings;
        std::fs::create_dir_all(&partition_dir).map_err(|e| BraidError::io(partition_id, e))?;

        let log = LogStream::open(partition_id, &partition_dir.join(LOG_DIR), &config.log)?;
        let snapshots =
            SnapshotStore::open(partition_id, &partition_dir, config.snapshot.retained_count)?;
        let raft = RaftNode::open(partition_id, member, members, &partition_dir, &config.raft)?;
        let exporters = ExporterDirector::open(partition_id, &partition_dir, exporters)?;
        let redistributor = CommandRedistributor::new(partition_id, &config.distribution);
        let now_ms = clock.millis();

        let mut replica = Self {
            partition_id,
            member,
            partition_count,
            processor: StreamProcessor::new(partition_id, partition_count, clock.clone()),
            config,
            clock,
            network,
            log,
            snapshots,
            raft,
            exporters,
            redistributor,
            requests: HashMap::new(),
            request_counter: 0,
            awaiting_commit: None,
            leader_processing: false,
            processing_paused: false,
            last_snapshot_ms: now_ms,
            retry_after_ms: 0,
            failure: None,
        };
        replica.recover_processor()?;
        info!(
            partition_id,
            member,
            term = replica.raft.term(),
            lowest_position = replica.log.lowest_position(),
            highest_position = replica.log.highest_position(),
            "opened partition replica"
        );
        Ok(replica)
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    /// Register with the network and run the actor on the current runtime.
    pub fn spawn(self) -> (PartitionHandle, JoinHandle<()>) {
        let (sender, inbox) = mpsc::unbounded_channel();
        self.network
            .register(self.partition_id, self.member, sender.clone());
        let handle = PartitionHandle {
            partition_id: self.partition_id,
            member: self.member,
            sender,
        };
        let task = tokio::spawn(self.run(inbox));
        (handle, task)
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<PartitionMessage>) {
        let mut ticker = tokio::time::interval(self.config.raft.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(PartitionMessage::Shutdown { reply }) => {
                        self.close();
                        let _ = reply.send(());
                        break;
                    }
                    Some(message) => self.handle_message(message),
                    None => {
                        self.close();
                        break;
                    }
                },
                _ = ticker.tick() => self.tick(),
            }
        }
        debug!(
            partition_id = self.partition_id,
            member = self.member,
            "partition actor stopped"
        );
    }

    /// Handle one inbox message other than shutdown.
    pub fn handle_message(&mut self, message: PartitionMessage) {
        match message {
            PartitionMessage::Raft(envelope) => self.on_raft_message(envelope),
            PartitionMessage::Submit { command, reply } => self.on_submit(command, reply),
            PartitionMessage::InterPartition(command) => self.on_inter_partition(command),
            PartitionMessage::ExporterPositions { positions } => {
                self.on_exporter_positions(&positions)
            }
            PartitionMessage::Admin { request, reply } => {
                let _ = reply.send(self.on_admin(&request));
            }
            PartitionMessage::TakeSnapshot { reply } => {
                let _ = reply.send(self.take_snapshot());
            }
            PartitionMessage::Status { reply } => {
                let _ = reply.send(self.status());
            }
            PartitionMessage::Shutdown { reply } => {
                self.close();
                let _ = reply.send(());
                return;
            }
        }
        self.drive();
    }

    /// Periodic work: raft timers, redistribution and scheduled snapshots.
    pub fn tick(&mut self) {
        if self.failure.is_some() {
            return;
        }
        let now_ms = self.clock.millis();
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms,
        };
        if let Err(err) = self.raft.tick(&mut ctx) {
            self.on_error(err);
        }
        self.flush_raft();

        if self.leader_processing {
            match self.redistributor.run_retry_cycle(
                self.processor.state(),
                &self.processor.engine().state().distribution,
                now_ms,
            ) {
                Ok(commands) => {
                    for command in commands {
                        self.network.send_command(command);
                    }
                }
                Err(err) => self.on_error(err),
            }
            if let Some(positions) = self.exporters.take_changed_positions() {
                self.network
                    .send_exporter_positions(self.partition_id, self.member, &positions);
            }
        }

        if now_ms - self.last_snapshot_ms >= self.config.snapshot.period_ms as i64 {
            self.last_snapshot_ms = now_ms;
            if let Err(err) = self.take_snapshot() {
                warn!(
                    partition_id = self.partition_id,
                    error = %err,
                    "scheduled snapshot failed"
                );
            }
        }
        self.drive();
    }

    fn on_raft_message(&mut self, envelope: Envelope) {
        if self.failure.is_some() {
            return;
        }
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms: self.clock.millis(),
        };
        if let Err(err) = self.raft.handle(&mut ctx, envelope) {
            self.on_error(err);
        }
        self.flush_raft();
    }

    fn next_request_id(&mut self) -> i64 {
        self.request_counter = self.request_counter.wrapping_add(1);
        ((self.raft.term() as i64) << 32) | i64::from(self.request_counter)
    }

    fn on_submit(
        &mut self,
        command: AppendEntry,
        reply: oneshot::Sender<BraidResult<CommandResponse>>,
    ) {
        if let Some(reason) = &self.failure {
            let _ = reply.send(Err(BraidError::PartitionFailed {
                partition_id: self.partition_id,
                reason: reason.clone(),
            }));
            return;
        }
        if !self.raft.is_leader() {
            let _ = reply.send(Err(BraidError::not_leader(
                self.partition_id,
                self.raft.term(),
            )));
            return;
        }
        let now_ms = self.clock.millis();
        let request_id = self.next_request_id();
        let command = command
            .with_request(request_id, self.member as i32)
            .with_timestamp(now_ms);
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms,
        };
        match self.raft.propose(&mut ctx, vec![command]) {
            Ok(appended) => {
                debug!(
                    partition_id = self.partition_id,
                    request_id,
                    position = appended.first_position,
                    "accepted client command"
                );
                self.requests.insert(request_id, reply);
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
        self.flush_raft();
    }

    fn on_inter_partition(&mut self, command: InterPartitionCommand) {
        if self.failure.is_some() || !self.raft.is_leader() {
            return;
        }
        let now_ms = self.clock.millis();
        let entry = command.to_append_entry(now_ms);
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms,
        };
        match self.raft.propose(&mut ctx, vec![entry]) {
            Ok(appended) => debug!(
                partition_id = self.partition_id,
                sender = command.sender_partition,
                key = command.key,
                intent = %command.intent,
                position = appended.first_position,
                "appended inter-partition command"
            ),
            Err(err) => self.on_error(err),
        }
        self.flush_raft();
    }

    fn on_exporter_positions(&mut self, positions: &BTreeMap<String, i64>) {
        if self.failure.is_some() || self.raft.is_leader() {
            return;
        }
        match self.exporters.store_positions(positions) {
            Ok(true) => debug!(
                partition_id = self.partition_id,
                lowest = ?self.exporters.lowest_position(),
                "stored leader exporter positions"
            ),
            Ok(false) => {}
            Err(err) => self.on_error(err),
        }
    }

    /// Handle an admin request.
    pub fn on_admin(&mut self, request: &AdminRequest) -> AdminResponse {
        if request.partition_id != self.partition_id {
            return AdminError::new(
                AdminErrorCode::OperationFailed,
                request,
                format!("request sent to partition {}", self.partition_id),
            )
            .into();
        }
        if let Some(reason) = &self.failure {
            return AdminError::new(AdminErrorCode::PartitionUnavailable, request, reason.clone())
                .into();
        }
        match request.request_type {
            AdminRequestType::StepDownIfNotPrimary => {
                if !self.raft.is_leader() {
                    return AdminError::new(
                        AdminErrorCode::PartitionLeaderMismatch,
                        request,
                        format!("member {} is not the leader", self.member),
                    )
                    .into();
                }
                if !self.raft.is_primary() {
                    info!(
                        partition_id = self.partition_id,
                        member = self.member,
                        "stepping down in favor of the primary"
                    );
                    let mut ctx = RaftContext {
                        log: &mut self.log,
                        snapshots: &self.snapshots,
                        now_ms: self.clock.millis(),
                    };
                    self.raft.step_down(&mut ctx);
                    self.flush_raft();
                }
            }
            AdminRequestType::PauseExporting => self.exporters.pause(),
            AdminRequestType::ResumeExporting => self.exporters.resume(),
            AdminRequestType::PauseProcessing => {
                self.processing_paused = true;
                self.processor.pause();
            }
            AdminRequestType::ResumeProcessing => {
                self.processing_paused = false;
                self.processor.resume();
            }
        }
        AdminResponse::ok(request)
    }

    /// Persist a snapshot of the current state and compact the log below it.
    /// Returns `None` if there is nothing to snapshot.
    pub fn take_snapshot(&mut self) -> BraidResult<Option<SnapshotId>> {
        if let Some(reason) = &self.failure {
            return Err(BraidError::PartitionFailed {
                partition_id: self.partition_id,
                reason: reason.clone(),
            });
        }
        let positions = self.processor.positions();
        let position = positions.last_applied_position;
        if position <= 0 {
            return Ok(None);
        }
        let processed = positions.last_processed_position;
        let exported = self.exporters.lowest_position().unwrap_or(processed);
        let term = self.log.term_at(position).unwrap_or(0);
        let id = SnapshotId::new(position, term, processed, exported);

        if let Some(latest) = self.snapshots.latest_snapshot()? {
            if latest.id() >= id {
                return Ok(Some(latest.id()));
            }
        }

        let transient = self.snapshots.take_transient(id)?;
        if let Err(err) = transient.write_state(&self.processor.export_state()) {
            transient.abort();
            return Err(err);
        }
        let persisted = transient.persist()?;
        let purged = self.snapshots.purge_older_than(persisted.id())?;
        let floor = persisted.id().compaction_floor();
        let compacted = self.log.compact(floor)?;
        info!(
            partition_id = self.partition_id,
            snapshot_id = %persisted.id(),
            purged,
            compacted,
            floor,
            "took snapshot"
        );
        Ok(Some(persisted.id()))
    }

    pub fn status(&self) -> PartitionStatus {
        let positions = self.processor.positions();
        let latest_snapshot = match self.snapshots.list() {
            Ok(ids) => ids.last().map(|id| id.to_string()),
            Err(_) => None,
        };
        PartitionStatus {
            partition_id: self.partition_id,
            member: self.member,
            role: self.raft.role(),
            term: self.raft.term(),
            leader: self.raft.leader(),
            phase: self.processor.phase().to_string(),
            lowest_position: self.log.lowest_position(),
            highest_position: self.log.highest_position(),
            commit_position: self.log.commit_position(),
            last_processed_position: positions.last_processed_position,
            last_applied_position: positions.last_applied_position,
            exporting_paused: self.exporters.is_paused(),
            exported_position: self.exporters.lowest_position(),
            latest_snapshot,
            failure: self.failure.clone(),
        }
    }

    /// Replace the processor with one rebuilt from the newest snapshot.
    fn recover_processor(&mut self) -> BraidResult<()> {
        let db = match self.snapshots.latest_snapshot()? {
            Some(snapshot) => {
                debug!(
                    partition_id = self.partition_id,
                    snapshot_id = %snapshot.id(),
                    "restoring state from snapshot"
                );
                StateDb::restore(snapshot.read_state()?)?
            }
            None => StateDb::new(),
        };
        let mut processor =
            StreamProcessor::new(self.partition_id, self.partition_count, self.clock.clone());
        processor.recover(db)?;
        if self.processing_paused {
            processor.pause();
        }
        self.processor = processor;
        self.awaiting_commit = None;
        self.leader_processing = false;
        Ok(())
    }

    fn flush_raft(&mut self) {
        loop {
            let output = self.raft.take_output();
            if output.is_empty() {
                break;
            }
            for envelope in output.messages {
                self.network.send_raft(envelope);
            }
            for event in output.events {
                self.on_raft_event(event);
            }
        }
    }

    fn on_raft_event(&mut self, event: RaftEvent) {
        match event {
            RaftEvent::BecameLeader { term } => {
                debug!(
                    partition_id = self.partition_id,
                    term,
                    "waiting for leadership entry to commit"
                );
            }
            RaftEvent::BecameFollower {
                term,
                leader,
                was_leader,
            } => {
                if !was_leader {
                    return;
                }
                info!(
                    partition_id = self.partition_id,
                    term,
                    leader = ?leader,
                    failed_requests = self.requests.len(),
                    "leadership lost"
                );
                for (_, reply) in self.requests.drain() {
                    let _ = reply.send(Err(BraidError::not_leader(self.partition_id, term)));
                }
                self.redistributor.reset();
                self.exporters.deactivate();
                if let Err(err) = self.recover_processor() {
                    self.fail(err);
                }
            }
            RaftEvent::CommitAdvanced(position) => {
                debug!(partition_id = self.partition_id, position, "commit advanced");
            }
            RaftEvent::SnapshotInstalled(snapshot) => {
                info!(
                    partition_id = self.partition_id,
                    snapshot_id = %snapshot.id(),
                    "recovering from installed snapshot"
                );
                if let Err(err) = self.recover_processor() {
                    self.fail(err);
                }
            }
        }
    }

    /// Replay, start processing once leadership is established, process
    /// committed commands and export.
    fn drive(&mut self) {
        if self.failure.is_some() || self.clock.millis() < self.retry_after_ms {
            return;
        }
        if let Err(err) = self.try_drive() {
            self.on_error(err);
        }
        self.flush_raft();
    }

    fn try_drive(&mut self) -> BraidResult<()> {
        if self.processor.phase() == StreamPhase::Replaying {
            self.processor.replay(&self.log)?;
        }
        self.maybe_start_processing()?;

        for _ in 0..self.config.processing.max_commands_per_drive {
            if !self.complete_awaited_commit()? {
                break;
            }
            let Some(processed) = self.processor.process_next(&self.log)? else {
                break;
            };
            if processed.records.is_empty() {
                let applied = self.processor.positions().last_applied_position;
                let tasks = self.processor.commit_pending(applied)?;
                self.run_tasks(tasks);
                continue;
            }
            let mut ctx = RaftContext {
                log: &mut self.log,
                snapshots: &self.snapshots,
                now_ms: self.clock.millis(),
            };
            match self.raft.propose(&mut ctx, processed.records) {
                Ok(appended) => self.awaiting_commit = Some(appended.last_position),
                Err(err) => {
                    self.processor.abort_pending();
                    return Err(err);
                }
            }
        }
        self.complete_awaited_commit()?;

        if self.leader_processing {
            self.exporters.export(&self.log, EXPORT_BATCH)?;
        }
        Ok(())
    }

    fn maybe_start_processing(&mut self) -> BraidResult<()> {
        if self.leader_processing || !self.raft.is_leader() {
            return Ok(());
        }
        let leadership_position = self.raft.leadership_position();
        if leadership_position < 0
            || self.log.commit_position() < leadership_position
            || self.processor.replayed_to() < leadership_position
        {
            return Ok(());
        }
        self.processor.start_processing()?;
        self.leader_processing = true;
        self.redistributor.reset();
        self.exporters.activate();
        info!(
            partition_id = self.partition_id,
            member = self.member,
            term = self.raft.term(),
            "partition leader processing"
        );
        Ok(())
    }

    /// Release the pending result if its records are committed. Returns
    /// whether nothing is pending any more.
    fn complete_awaited_commit(&mut self) -> BraidResult<bool> {
        let Some(last_position) = self.awaiting_commit else {
            return Ok(true);
        };
        if self.log.commit_position() < last_position {
            return Ok(false);
        }
        self.awaiting_commit = None;
        let tasks = self.processor.commit_pending(last_position)?;
        self.run_tasks(tasks);
        Ok(true)
    }

    fn run_tasks(&mut self, tasks: Vec<PostCommitTask>) {
        for task in tasks {
            match task {
                PostCommitTask::Respond(response) => {
                    if response.request_stream_id != self.member as i32 {
                        continue;
                    }
                    if let Some(reply) = self.requests.remove(&response.request_id) {
                        let _ = reply.send(Ok(response));
                    }
                }
                PostCommitTask::SendCommand(command) => {
                    self.network.send_command(command);
                }
            }
        }
    }

    fn on_error(&mut self, err: BraidError) {
        if err.is_retriable() {
            warn!(
                partition_id = self.partition_id,
                member = self.member,
                error = %err,
                class = %err.class(),
                retry_in_ms = self.config.processing.error_retry_delay_ms,
                "transient partition error"
            );
            self.retry_after_ms =
                self.clock.millis() + self.config.processing.error_retry_delay_ms as i64;
            return;
        }
        self.fail(err);
    }

    /// Mark the replica failed: it stops replicating and processing until an
    /// operator intervenes.
    fn fail(&mut self, err: BraidError) {
        if self.failure.is_some() {
            return;
        }
        error!(
            partition_id = self.partition_id,
            member = self.member,
            error = %err,
            "partition failed"
        );
        let reason = err.to_string();
        self.log.fail(&err);
        if self.processor.phase() != StreamPhase::Failed {
            self.processor.fail(err);
        }
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms: self.clock.millis(),
        };
        self.raft.deactivate(&mut ctx);
        self.exporters.deactivate();
        self.redistributor.reset();
        for (_, reply) in self.requests.drain() {
            let _ = reply.send(Err(BraidError::PartitionFailed {
                partition_id: self.partition_id,
                reason: reason.clone(),
            }));
        }
        self.failure = Some(reason);
    }

    fn close(&mut self) {
        for (_, reply) in self.requests.drain() {
            let _ = reply.send(Err(BraidError::PartitionUnavailable {
                partition_id: self.partition_id,
            }));
        }
        if self.raft.is_leader() {
            self.log.release_writer();
        }
        self.processor.close();
        self.exporters.deactivate();
        self.network.unregister(self.partition_id, self.member);
        info!(
            partition_id = self.partition_id,
            member = self.member,
            "partition replica closed"
        );
    }
}

/// Client side of a running partition replica.
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    partition_id: PartitionId,
    member: MemberId,
    sender: mpsc::UnboundedSender<PartitionMessage>,
}

impl PartitionHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    fn unavailable(&self) -> BraidError {
        BraidError::PartitionUnavailable {
            partition_id: self.partition_id,
        }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> PartitionMessage,
    ) -> BraidResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(message(reply))
            .map_err(|_| self.unavailable())?;
        response.await.map_err(|_| self.unavailable())
    }

    /// Append a client command and wait for its response. Rejections are
    /// returned as responses, not errors.
    pub async fn submit(&self, command: AppendEntry) -> BraidResult<CommandResponse> {
        self.request(|reply| PartitionMessage::Submit { command, reply })
            .await?
    }

    pub async fn admin(&self, request_type: AdminRequestType) -> BraidResult<AdminResponse> {
        let request = AdminRequest::new(self.partition_id, request_type);
        self.request(|reply| PartitionMessage::Admin { request, reply })
            .await
    }

    pub async fn take_snapshot(&self) -> BraidResult<Option<SnapshotId>> {
        self.request(|reply| PartitionMessage::TakeSnapshot { reply })
            .await?
    }

    pub async fn status(&self) -> BraidResult<PartitionStatus> {
        self.request(|reply| PartitionMessage::Status { reply })
            .await
    }

    /// Stop the replica; pending requests fail with `PartitionUnavailable`.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|reply| PartitionMessage::Shutdown { reply })
            .await;
    }
}
