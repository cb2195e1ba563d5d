//! Raft replication of one partition's log.
//!
//! A [`RaftNode`] is a synchronous state machine owned by the partition
//! actor. It never touches the network itself: every call buffers outgoing
//! [`Envelope`]s and [`RaftEvent`]s that the actor drains with
//! [`RaftNode::take_output`] and delivers.
//!
//! Raft positions are log positions. The leader only ships whole append
//! batches so followers keep batch boundaries intact on disk.

use super::entry::{transition, EntryEvent, EntryTracker};
use super::message::{
    AppendRequest, AppendResponse, Envelope, InstallSnapshotRequest, InstallSnapshotResponse,
    RaftMessage, VoteRequest, VoteResponse,
};
use super::role::{election_timeout_ticks, quorum, MemberId, MetaStore, RaftMeta, RaftRole};
use crate::core::config::RaftConfig;
use crate::core::error::{BraidError, BraidResult};
use crate::log::{AppendResult, LogStream};
use crate::record::codec::{decode_frame, frame_flags, FrameFlags};
use crate::record::{
    AppendEntry, Intent, LeadershipIntent, LeadershipRecord, PartitionId, RecordValue, NO_KEY,
    NO_POSITION,
};
use crate::snapshot::{self, PersistedSnapshot, ReceivedSnapshot, SnapshotStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// What a [`RaftNode`] may touch while handling a call.
pub struct RaftContext<'a> {
    pub log: &'a mut LogStream,
    pub snapshots: &'a SnapshotStore,
    /// Timestamp for records the node appends itself.
    pub now_ms: i64,
}

/// Notifications for the owner of the node.
#[derive(Debug, Clone)]
pub enum RaftEvent {
    BecameLeader {
        term: u64,
    },
    BecameFollower {
        term: u64,
        leader: Option<MemberId>,
        was_leader: bool,
    },
    CommitAdvanced(i64),
    SnapshotInstalled(PersistedSnapshot),
}

#[derive(Debug, Default)]
pub struct RaftOutput {
    pub messages: Vec<Envelope>,
    pub events: Vec<RaftEvent>,
}

impl RaftOutput {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    next: i64,
    matched: i64,
    snapshot_in_flight: bool,
    snapshot_wait: u32,
}

pub struct RaftNode {
    partition_id: PartitionId,
    member: MemberId,
    members: Vec<MemberId>,
    primary: MemberId,
    config: RaftConfig,
    meta_store: MetaStore,
    meta: RaftMeta,
    role: RaftRole,
    leader: Option<MemberId>,
    election_elapsed: u32,
    election_timeout: u32,
    heartbeat_elapsed: u32,
    votes: BTreeSet<MemberId>,
    progress: BTreeMap<MemberId, Progress>,
    entries: EntryTracker,
    leadership_position: i64,
    receiving: Option<ReceivedSnapshot>,
    output: RaftOutput,
}

impl RaftNode {
    /// Open the node, loading the persisted term and vote. `members` lists
    /// the replicas with the primary first.
    pub fn open(
        partition_id: PartitionId,
        member: MemberId,
        mut members: Vec<MemberId>,
        partition_dir: &Path,
        config: &RaftConfig,
    ) -> BraidResult<Self> {
        if !members.contains(&member) {
            members.push(member);
        }
        let primary = members[0];
        let meta_store = MetaStore::new(partition_id, partition_dir);
        let meta = meta_store.load()?;
        let mut node = Self {
            partition_id,
            member,
            members,
            primary,
            config: config.clone(),
            meta_store,
            meta,
            role: RaftRole::Follower,
            leader: None,
            election_elapsed: 0,
            election_timeout: 0,
            heartbeat_elapsed: 0,
            votes: BTreeSet::new(),
            progress: BTreeMap::new(),
            entries: EntryTracker::default(),
            leadership_position: NO_POSITION,
            receiving: None,
            output: RaftOutput::default(),
        };
        node.reset_election_timer();
        debug!(
            partition_id,
            member,
            term = node.meta.term,
            "opened raft node"
        );
        Ok(node)
    }

    pub fn member(&self) -> MemberId {
        self.member
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    pub fn role(&self) -> RaftRole {
        self.role
    }

    pub fn term(&self) -> u64 {
        self.meta.term
    }

    pub fn voted_for(&self) -> Option<MemberId> {
        self.meta.voted_for
    }

    pub fn leader(&self) -> Option<MemberId> {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.role == RaftRole::Leader
    }

    pub fn is_primary(&self) -> bool {
        self.member == self.primary
    }

    /// Position of the `Leadership::Elected` entry of the current term.
    pub fn leadership_position(&self) -> i64 {
        self.leadership_position
    }

    pub fn entries_in_flight(&self) -> usize {
        self.entries.in_flight()
    }

    pub fn take_output(&mut self) -> RaftOutput {
        std::mem::take(&mut self.output)
    }

    fn peers(&self) -> Vec<MemberId> {
        self.members
            .iter()
            .copied()
            .filter(|m| *m != self.member)
            .collect()
    }

    fn send(&mut self, to: MemberId, message: RaftMessage) {
        self.output.messages.push(Envelope {
            partition_id: self.partition_id,
            from: self.member,
            to,
            message,
        });
    }

    fn emit(&mut self, event: RaftEvent) {
        self.output.events.push(event);
    }

    fn reset_election_timer(&mut self) {
        self.election_elapsed = 0;
        self.election_timeout = election_timeout_ticks(
            self.config.election_timeout_ticks,
            self.member,
            self.meta.term,
            self.is_primary(),
            self.config.priority_election,
        );
    }

    fn persist_meta(&self) -> BraidResult<()> {
        self.meta_store.store(&self.meta)
    }

    /// Advance on a tick of the partition's timer.
    pub fn tick(&mut self, ctx: &mut RaftContext<'_>) -> BraidResult<()> {
        match self.role {
            RaftRole::Inactive => Ok(()),
            RaftRole::Leader => {
                self.heartbeat_elapsed += 1;
                if self.heartbeat_elapsed >= self.config.heartbeat_ticks {
                    self.heartbeat_elapsed = 0;
                    self.expire_snapshot_transfers();
                    self.broadcast_append(ctx)?;
                }
                Ok(())
            }
            RaftRole::Follower | RaftRole::Candidate => {
                self.election_elapsed += 1;
                if self.election_elapsed >= self.election_timeout {
                    self.start_election(ctx)?;
                }
                Ok(())
            }
        }
    }

    fn expire_snapshot_transfers(&mut self) {
        let limit = self.config.election_timeout_ticks;
        for progress in self.progress.values_mut() {
            if progress.snapshot_in_flight {
                progress.snapshot_wait += 1;
                if progress.snapshot_wait > limit {
                    progress.snapshot_in_flight = false;
                    progress.snapshot_wait = 0;
                }
            }
        }
    }

    /// Handle a message from another replica.
    pub fn handle(&mut self, ctx: &mut RaftContext<'_>, envelope: Envelope) -> BraidResult<()> {
        if self.role == RaftRole::Inactive {
            return Ok(());
        }
        let term = envelope.message.term();
        if term > self.meta.term {
            self.update_term(ctx, term)?;
        }
        let from = envelope.from;
        match envelope.message {
            RaftMessage::AppendRequest(req) => self.on_append_request(ctx, from, req),
            RaftMessage::AppendResponse(resp) => self.on_append_response(ctx, from, resp),
            RaftMessage::VoteRequest(req) => self.on_vote_request(ctx, from, req),
            RaftMessage::VoteResponse(resp) => self.on_vote_response(ctx, from, resp),
            RaftMessage::InstallSnapshotRequest(req) => self.on_install_snapshot(ctx, from, req),
            RaftMessage::InstallSnapshotResponse(resp) => {
                self.on_install_snapshot_response(ctx, from, resp)
            }
        }
    }

    fn update_term(&mut self, ctx: &mut RaftContext<'_>, term: u64) -> BraidResult<()> {
        self.meta = RaftMeta {
            term,
            voted_for: None,
        };
        self.persist_meta()?;
        if self.role == RaftRole::Follower {
            self.leader = None;
            self.reset_election_timer();
        } else {
            self.become_follower(ctx, None);
        }
        Ok(())
    }

    fn start_election(&mut self, ctx: &mut RaftContext<'_>) -> BraidResult<()> {
        self.meta = RaftMeta {
            term: self.meta.term + 1,
            voted_for: Some(self.member),
        };
        self.persist_meta()?;
        self.role = RaftRole::Candidate;
        self.leader = None;
        self.votes.clear();
        self.votes.insert(self.member);
        self.reset_election_timer();
        info!(
            partition_id = self.partition_id,
            member = self.member,
            term = self.meta.term,
            "starting election"
        );

        if self.votes.len() >= quorum(self.members.len()) {
            return self.become_leader(ctx);
        }
        let request = VoteRequest {
            term: self.meta.term,
            candidate: self.member,
            last_position: ctx.log.highest_position(),
            last_term: ctx.log.last_term(),
        };
        for peer in self.peers() {
            self.send(peer, RaftMessage::VoteRequest(request.clone()));
        }
        Ok(())
    }

    fn become_leader(&mut self, ctx: &mut RaftContext<'_>) -> BraidResult<()> {
        let term = self.meta.term;
        self.role = RaftRole::Leader;
        self.leader = Some(self.member);
        self.heartbeat_elapsed = 0;
        let next = ctx.log.highest_position() + 1;
        self.progress = self
            .peers()
            .into_iter()
            .map(|peer| {
                (
                    peer,
                    Progress {
                        next,
                        matched: 0,
                        snapshot_in_flight: false,
                        snapshot_wait: 0,
                    },
                )
            })
            .collect();
        ctx.log.acquire_writer(term);
        info!(
            partition_id = self.partition_id,
            member = self.member,
            term,
            "became leader"
        );
        self.emit(RaftEvent::BecameLeader { term });

        let elected = AppendEntry::event(
            NO_KEY,
            Intent::Leadership(LeadershipIntent::Elected),
            RecordValue::Leadership(LeadershipRecord {
                term,
                leader: self.member,
            }),
        )
        .with_timestamp(ctx.now_ms);
        let appended = self.propose(ctx, vec![elected])?;
        self.leadership_position = appended.last_position;
        Ok(())
    }

    fn become_follower(&mut self, ctx: &mut RaftContext<'_>, leader: Option<MemberId>) {
        let was_leader = self.role == RaftRole::Leader;
        self.role = RaftRole::Follower;
        self.leader = leader;
        self.votes.clear();
        self.progress.clear();
        self.leadership_position = NO_POSITION;
        if was_leader {
            ctx.log.release_writer();
            let closed = self.entries.close_all();
            info!(
                partition_id = self.partition_id,
                member = self.member,
                term = self.meta.term,
                uncommitted_batches = closed,
                "stepped down to follower"
            );
        }
        self.reset_election_timer();
        self.emit(RaftEvent::BecameFollower {
            term: self.meta.term,
            leader,
            was_leader,
        });
    }

    /// Give up leadership without changing the term.
    pub fn step_down(&mut self, ctx: &mut RaftContext<'_>) {
        if self.role == RaftRole::Leader {
            self.become_follower(ctx, None);
        }
    }

    /// Stop taking part in replication after the partition failed.
    pub fn deactivate(&mut self, ctx: &mut RaftContext<'_>) {
        if self.role == RaftRole::Leader {
            ctx.log.release_writer();
            self.entries.close_all();
        }
        self.role = RaftRole::Inactive;
        self.leader = None;
        self.progress.clear();
        warn!(
            partition_id = self.partition_id,
            member = self.member,
            "raft replica inactive"
        );
    }

    /// Append records as leader and start replicating them.
    pub fn propose(
        &mut self,
        ctx: &mut RaftContext<'_>,
        entries: Vec<AppendEntry>,
    ) -> BraidResult<AppendResult> {
        if self.role != RaftRole::Leader {
            return Err(BraidError::not_leader(self.partition_id, self.meta.term));
        }
        let mut state = EntryTracker::submit();
        match ctx.log.append(self.meta.term, entries) {
            Ok(result) => {
                state = transition(state, EntryEvent::Written);
                state = transition(state, EntryEvent::Durable);
                self.entries
                    .track(result.first_position, result.last_position, state);
                self.broadcast_append(ctx)?;
                self.advance_commit(ctx);
                Ok(result)
            }
            Err(err) => {
                state = transition(state, EntryEvent::IoFailure);
                debug!(partition_id = self.partition_id, ?state, "append failed");
                Err(err)
            }
        }
    }

    fn broadcast_append(&mut self, ctx: &mut RaftContext<'_>) -> BraidResult<()> {
        for peer in self.peers() {
            self.send_append(ctx, peer)?;
        }
        Ok(())
    }

    fn send_append(&mut self, ctx: &mut RaftContext<'_>, to: MemberId) -> BraidResult<()> {
        let Some(progress) = self.progress.get(&to).copied() else {
            return Ok(());
        };
        if progress.snapshot_in_flight {
            return Ok(());
        }
        if progress.next < ctx.log.lowest_position() {
            return self.send_snapshot(ctx, to);
        }

        let prev_position = progress.next - 1;
        let prev_term = ctx.log.term_at(prev_position).unwrap_or(0);
        let highest = ctx.log.highest_position();
        let mut frames = Vec::new();
        let mut position = progress.next;
        while position <= highest {
            let Some(frame) = ctx.log.read_raw(position)? else {
                break;
            };
            let batch_end = frame_flags(&frame)
                .map(|flags| flags.contains(FrameFlags::BATCH_END))
                .unwrap_or(true);
            frames.push(frame);
            position += 1;
            if batch_end && frames.len() >= self.config.max_append_batch {
                break;
            }
        }
        if let Some(progress) = self.progress.get_mut(&to) {
            progress.next = position;
        }
        let request = AppendRequest {
            term: self.meta.term,
            leader: self.member,
            prev_position,
            prev_term,
            frames,
            commit_position: ctx.log.commit_position(),
        };
        self.send(to, RaftMessage::AppendRequest(request));
        Ok(())
    }

    fn send_snapshot(&mut self, ctx: &mut RaftContext<'_>, to: MemberId) -> BraidResult<()> {
        let Some(latest) = ctx.snapshots.latest_snapshot()? else {
            warn!(
                partition_id = self.partition_id,
                follower = to,
                "follower is behind the log but no snapshot exists"
            );
            return Ok(());
        };
        let base_position = latest.id().compaction_floor() - 1;
        let Some(base_term) = ctx.log.term_at(base_position) else {
            warn!(
                partition_id = self.partition_id,
                follower = to,
                base_position,
                "snapshot base is no longer in the log"
            );
            return Ok(());
        };
        let chunks = snapshot::chunks(&latest)?;
        if let Some(progress) = self.progress.get_mut(&to) {
            progress.snapshot_in_flight = true;
            progress.snapshot_wait = 0;
        }
        info!(
            partition_id = self.partition_id,
            follower = to,
            snapshot_id = %latest.id(),
            chunks = chunks.len(),
            "sending snapshot"
        );
        for chunk in chunks {
            self.send(
                to,
                RaftMessage::InstallSnapshotRequest(InstallSnapshotRequest {
                    term: self.meta.term,
                    leader: self.member,
                    base_position,
                    base_term,
                    chunk,
                }),
            );
        }
        Ok(())
    }

    fn advance_commit(&mut self, ctx: &mut RaftContext<'_>) {
        if self.role != RaftRole::Leader {
            return;
        }
        let mut matched: Vec<i64> = self.progress.values().map(|p| p.matched).collect();
        matched.push(ctx.log.highest_position());
        matched.sort_unstable_by(|a, b| b.cmp(a));
        let Some(&candidate) = matched.get(quorum(self.members.len()) - 1) else {
            return;
        };
        if candidate > ctx.log.commit_position()
            && ctx.log.term_at(candidate) == Some(self.meta.term)
        {
            ctx.log.set_commit_position(candidate);
            self.entries.on_commit(candidate);
            self.emit(RaftEvent::CommitAdvanced(candidate));
        }
    }

    fn on_append_request(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        req: AppendRequest,
    ) -> BraidResult<()> {
        let reply = |term, success, last_position| {
            RaftMessage::AppendResponse(AppendResponse {
                term,
                success,
                last_position,
            })
        };
        if req.term < self.meta.term {
            debug!(
                partition_id = self.partition_id,
                from,
                stale_term = req.term,
                term = self.meta.term,
                "rejecting append from stale leader"
            );
            let highest = ctx.log.highest_position();
            self.send(from, reply(self.meta.term, false, highest));
            return Ok(());
        }
        if self.role != RaftRole::Follower {
            self.become_follower(ctx, Some(req.leader));
        } else {
            self.leader = Some(req.leader);
        }
        self.election_elapsed = 0;

        let term = self.meta.term;
        let highest = ctx.log.highest_position();
        let base = ctx.log.lowest_position() - 1;
        if req.prev_position > highest {
            self.send(from, reply(term, false, highest));
            return Ok(());
        }
        if req.prev_position >= base && ctx.log.term_at(req.prev_position) != Some(req.prev_term)
        {
            let hint = (req.prev_position - 1).max(ctx.log.commit_position());
            self.send(from, reply(term, false, hint));
            return Ok(());
        }

        let received = req.frames.len() as i64;
        let mut next = req.prev_position + 1;
        let mut to_append = Vec::new();
        for frame in req.frames {
            if next <= base {
                next += 1;
                continue;
            }
            if to_append.is_empty() && next <= ctx.log.highest_position() {
                let frame_term = decode_frame(&frame).map_err(BraidError::from)?.entry.term;
                if ctx.log.term_at(next) == Some(frame_term) {
                    next += 1;
                    continue;
                }
                info!(
                    partition_id = self.partition_id,
                    position = next,
                    "truncating conflicting entries"
                );
                ctx.log.truncate_after(next - 1)?;
            }
            to_append.push(frame);
            next += 1;
        }
        if !to_append.is_empty() {
            ctx.log.append_replicated(&to_append)?;
        }

        let last = (req.prev_position + received).max(base);
        let commit = req.commit_position.min(last);
        if commit > ctx.log.commit_position() {
            ctx.log.set_commit_position(commit);
            self.emit(RaftEvent::CommitAdvanced(ctx.log.commit_position()));
        }
        self.send(from, reply(term, true, last));
        Ok(())
    }

    fn on_append_response(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        resp: AppendResponse,
    ) -> BraidResult<()> {
        if self.role != RaftRole::Leader || resp.term != self.meta.term {
            return Ok(());
        }
        let highest = ctx.log.highest_position();
        let Some(progress) = self.progress.get_mut(&from) else {
            return Ok(());
        };
        if resp.success {
            progress.matched = progress.matched.max(resp.last_position);
            progress.next = progress.next.max(progress.matched + 1);
            let behind = progress.next <= highest;
            self.advance_commit(ctx);
            if behind {
                self.send_append(ctx, from)?;
            }
        } else {
            progress.next = (resp.last_position + 1).max(progress.matched + 1).max(1);
            self.send_append(ctx, from)?;
        }
        Ok(())
    }

    fn on_vote_request(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        req: VoteRequest,
    ) -> BraidResult<()> {
        let up_to_date = (req.last_term, req.last_position)
            >= (ctx.log.last_term(), ctx.log.highest_position());
        let can_vote = match self.meta.voted_for {
            None => true,
            Some(candidate) => candidate == req.candidate,
        };
        let granted = req.term == self.meta.term
            && self.role != RaftRole::Leader
            && can_vote
            && up_to_date;
        if granted {
            self.meta.voted_for = Some(req.candidate);
            self.persist_meta()?;
            self.election_elapsed = 0;
        }
        debug!(
            partition_id = self.partition_id,
            candidate = req.candidate,
            term = self.meta.term,
            granted,
            "vote requested"
        );
        self.send(
            from,
            RaftMessage::VoteResponse(VoteResponse {
                term: self.meta.term,
                granted,
            }),
        );
        Ok(())
    }

    fn on_vote_response(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        resp: VoteResponse,
    ) -> BraidResult<()> {
        if self.role != RaftRole::Candidate || resp.term != self.meta.term || !resp.granted {
            return Ok(());
        }
        self.votes.insert(from);
        if self.votes.len() >= quorum(self.members.len()) {
            self.become_leader(ctx)?;
        }
        Ok(())
    }

    fn on_install_snapshot(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        req: InstallSnapshotRequest,
    ) -> BraidResult<()> {
        if req.term < self.meta.term {
            let highest = ctx.log.highest_position();
            self.send(
                from,
                RaftMessage::InstallSnapshotResponse(InstallSnapshotResponse {
                    term: self.meta.term,
                    success: false,
                    done: false,
                    last_position: highest,
                }),
            );
            return Ok(());
        }
        if self.role != RaftRole::Follower {
            self.become_follower(ctx, Some(req.leader));
        } else {
            self.leader = Some(req.leader);
        }
        self.election_elapsed = 0;

        let same_transfer = self
            .receiving
            .as_ref()
            .map(|r| r.id().to_string() == req.chunk.snapshot_id)
            .unwrap_or(false);
        if !same_transfer {
            if let Some(stale) = self.receiving.take() {
                stale.abort();
            }
            self.receiving = Some(ReceivedSnapshot::begin(ctx.snapshots, &req.chunk)?);
        }
        let Some(receiver) = self.receiving.as_mut() else {
            return Ok(());
        };

        let outcome = match receiver.apply(&req.chunk) {
            Ok(false) => return Ok(()),
            Ok(true) => match self.receiving.take() {
                Some(complete) => complete.persist(),
                None => return Ok(()),
            },
            Err(err) => {
                if let Some(failed) = self.receiving.take() {
                    failed.abort();
                }
                Err(err)
            }
        };

        let term = self.meta.term;
        let response = match outcome {
            Ok(installed) => {
                ctx.log.reset(req.base_position, req.base_term)?;
                info!(
                    partition_id = self.partition_id,
                    snapshot_id = %installed.id(),
                    base_position = req.base_position,
                    "installed snapshot from leader"
                );
                self.emit(RaftEvent::SnapshotInstalled(installed));
                InstallSnapshotResponse {
                    term,
                    success: true,
                    done: true,
                    last_position: req.base_position,
                }
            }
            Err(err) => {
                warn!(
                    partition_id = self.partition_id,
                    error = %err,
                    "rejected snapshot from leader"
                );
                InstallSnapshotResponse {
                    term,
                    success: false,
                    done: false,
                    last_position: ctx.log.highest_position(),
                }
            }
        };
        self.send(from, RaftMessage::InstallSnapshotResponse(response));
        Ok(())
    }

    fn on_install_snapshot_response(
        &mut self,
        ctx: &mut RaftContext<'_>,
        from: MemberId,
        resp: InstallSnapshotResponse,
    ) -> BraidResult<()> {
        if self.role != RaftRole::Leader || resp.term != self.meta.term {
            return Ok(());
        }
        let Some(progress) = self.progress.get_mut(&from) else {
            return Ok(());
        };
        progress.snapshot_in_flight = false;
        progress.snapshot_wait = 0;
        if resp.success && resp.done {
            progress.matched = progress.matched.max(resp.last_position);
            progress.next = resp.last_position + 1;
            self.send_append(ctx, from)?;
        }
        Ok(())
    }
}
