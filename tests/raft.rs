//! Replication tests.
//!
//! Replicas are driven by hand: the harness ticks nodes and routes the
//! envelopes they emit until the cluster is quiet.

mod common;

use braid::config::RaftConfig;
use braid::error::BraidError;
use braid::log::LogStream;
use braid::raft::{
    election_timeout_ticks, quorum, AppendRequest, Envelope, InstallSnapshotRequest,
    RaftContext, RaftEvent, RaftMessage, RaftNode, RaftRole,
};
use braid::record::{encode_frame, FrameFlags, LogEntry};
use braid::snapshot::{SnapshotChunk, SnapshotId, SnapshotStore};
use std::collections::{BTreeSet, VecDeque};

const PARTITION: i32 = 1;
const NOW_MS: i64 = 1_700_000_000_000;

struct Replica {
    _dir: tempfile::TempDir,
    log: LogStream,
    snapshots: SnapshotStore,
    node: RaftNode,
    events: Vec<RaftEvent>,
}

impl Replica {
    fn open(member: u32, members: &[u32]) -> Self {
        let dir = common::temp_test_dir();
        let log = common::open_log(PARTITION, dir.path());
        let snapshots = SnapshotStore::open(PARTITION, dir.path(), 1).unwrap();
        let node = RaftNode::open(
            PARTITION,
            member,
            members.to_vec(),
            dir.path(),
            &raft_config(),
        )
        .unwrap();
        Self {
            _dir: dir,
            log,
            snapshots,
            node,
            events: Vec::new(),
        }
    }

    fn propose(&mut self, entries: Vec<braid::record::AppendEntry>) -> Result<i64, BraidError> {
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms: NOW_MS,
        };
        self.node
            .propose(&mut ctx, entries)
            .map(|appended| appended.last_position)
    }

    /// Handle one message and return what the node sent back.
    fn deliver(&mut self, from: u32, message: RaftMessage) -> Vec<RaftMessage> {
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms: NOW_MS,
        };
        let envelope = Envelope {
            partition_id: PARTITION,
            from,
            to: self.node.member(),
            message,
        };
        self.node.handle(&mut ctx, envelope).unwrap();
        let output = self.node.take_output();
        self.events.extend(output.events);
        output
            .messages
            .into_iter()
            .filter(|m| m.to == from)
            .map(|m| m.message)
            .collect()
    }

    fn step_down(&mut self) {
        let mut ctx = RaftContext {
            log: &mut self.log,
            snapshots: &self.snapshots,
            now_ms: NOW_MS,
        };
        self.node.step_down(&mut ctx);
    }
}

struct Cluster {
    replicas: Vec<Replica>,
    down: BTreeSet<u32>,
    queue: VecDeque<Envelope>,
}

impl Cluster {
    fn new(size: u32) -> Self {
        let members: Vec<u32> = (0..size).collect();
        Self {
            replicas: members.iter().map(|m| Replica::open(*m, &members)).collect(),
            down: BTreeSet::new(),
            queue: VecDeque::new(),
        }
    }

    fn replica(&mut self, member: u32) -> &mut Replica {
        &mut self.replicas[member as usize]
    }

    fn leader(&self) -> Option<u32> {
        self.replicas
            .iter()
            .find(|r| r.node.is_leader() && !self.down.contains(&r.node.member()))
            .map(|r| r.node.member())
    }

    fn collect_output(&mut self) {
        for replica in &mut self.replicas {
            let output = replica.node.take_output();
            replica.events.extend(output.events);
            self.queue.extend(output.messages);
        }
    }

    /// Deliver messages until none are left.
    fn pump(&mut self) {
        self.collect_output();
        while let Some(envelope) = self.queue.pop_front() {
            if self.down.contains(&envelope.from) || self.down.contains(&envelope.to) {
                continue;
            }
            let replica = &mut self.replicas[envelope.to as usize];
            let mut ctx = RaftContext {
                log: &mut replica.log,
                snapshots: &replica.snapshots,
                now_ms: NOW_MS,
            };
            replica.node.handle(&mut ctx, envelope).unwrap();
            self.collect_output();
        }
    }

    /// Tick every running replica once, delivering messages after each.
    fn tick(&mut self) {
        for member in 0..self.replicas.len() as u32 {
            if self.down.contains(&member) {
                continue;
            }
            let replica = &mut self.replicas[member as usize];
            let mut ctx = RaftContext {
                log: &mut replica.log,
                snapshots: &replica.snapshots,
                now_ms: NOW_MS,
            };
            replica.node.tick(&mut ctx).unwrap();
            self.pump();
        }
    }

    fn tick_until_leader(&mut self) -> u32 {
        for _ in 0..200 {
            if let Some(leader) = self.leader() {
                return leader;
            }
            self.tick();
        }
        panic!("no leader elected");
    }

    fn tick_times(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }
}

fn raft_config() -> RaftConfig {
    RaftConfig {
        tick_interval_ms: 5,
        heartbeat_ticks: 2,
        election_timeout_ticks: 10,
        priority_election: true,
        max_append_batch: 8,
    }
}

// ============================================================================
// Election tests
// ============================================================================

#[test]
fn quorum_sizes() {
    assert_eq!(quorum(1), 1);
    assert_eq!(quorum(2), 2);
    assert_eq!(quorum(3), 2);
    assert_eq!(quorum(5), 3);
}

#[test]
fn election_timeout_is_deterministic() {
    let a = election_timeout_ticks(10, 2, 7, false, false);
    let b = election_timeout_ticks(10, 2, 7, false, false);
    assert_eq!(a, b);
    assert!((10..20).contains(&a));
}

#[test]
fn single_replica_elects_itself() {
    let mut cluster = Cluster::new(1);
    for _ in 0..9 {
        cluster.tick();
        assert!(cluster.leader().is_none());
    }
    cluster.tick();

    let replica = cluster.replica(0);
    assert_eq!(replica.node.role(), RaftRole::Leader);
    assert_eq!(replica.node.term(), 1);
    assert_eq!(replica.node.voted_for(), Some(0));
    // The leadership entry commits on its own.
    assert_eq!(replica.node.leadership_position(), 1);
    assert_eq!(replica.log.commit_position(), 1);
    assert_eq!(replica.log.writer_term(), Some(1));
    assert!(matches!(
        replica.events[..],
        [RaftEvent::BecameLeader { term: 1 }, RaftEvent::CommitAdvanced(1)]
    ));
}

#[test]
fn primary_wins_first_election() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    assert_eq!(leader, 0);

    cluster.tick_times(4);
    for replica in &cluster.replicas {
        assert_eq!(replica.node.term(), 1);
        assert_eq!(replica.node.leader(), Some(0));
        assert_eq!(replica.log.highest_position(), 1);
        assert_eq!(replica.log.commit_position(), 1);
    }
    assert_eq!(cluster.replica(1).node.role(), RaftRole::Follower);
}

#[test]
fn term_and_vote_survive_reopen() {
    let mut cluster = Cluster::new(1);
    cluster.tick_until_leader();
    let dir = cluster.replicas[0]._dir.path().to_path_buf();

    let reopened = RaftNode::open(PARTITION, 0, vec![0], &dir, &raft_config()).unwrap();
    assert_eq!(reopened.term(), 1);
    assert_eq!(reopened.voted_for(), Some(0));
    assert_eq!(reopened.role(), RaftRole::Follower);
}

// ============================================================================
// Replication tests
// ============================================================================

#[test]
fn commit_waits_for_quorum() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    cluster.tick_times(2);

    let last = cluster
        .replica(leader)
        .propose(vec![common::deploy("t", "a", b"1")])
        .unwrap();
    assert_eq!(last, 2);
    // Nothing delivered yet.
    assert_eq!(cluster.replica(leader).log.commit_position(), 1);

    cluster.pump();
    assert_eq!(cluster.replica(leader).log.commit_position(), 2);
    assert!(cluster
        .replica(leader)
        .events
        .iter()
        .any(|e| matches!(e, RaftEvent::CommitAdvanced(2))));

    cluster.tick_times(2);
    for replica in &cluster.replicas {
        assert_eq!(replica.log.commit_position(), 2);
        let entry = replica.log.read(2).unwrap().unwrap();
        assert_eq!(entry.term, 1);
        assert!(entry.record.is_command());
    }
}

#[test]
fn no_commit_without_quorum() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    cluster.tick_times(2);
    cluster.down.extend([1, 2]);

    cluster
        .replica(leader)
        .propose(vec![common::deploy("t", "a", b"1")])
        .unwrap();
    cluster.pump();
    assert_eq!(cluster.replica(leader).log.highest_position(), 2);
    assert_eq!(cluster.replica(leader).log.commit_position(), 1);

    cluster.down.remove(&1);
    cluster.tick_times(2);
    assert_eq!(cluster.replica(leader).log.commit_position(), 2);
}

#[test]
fn follower_refuses_proposals() {
    let mut cluster = Cluster::new(3);
    cluster.tick_until_leader();
    let err = cluster
        .replica(1)
        .propose(vec![common::deploy("t", "a", b"1")])
        .unwrap_err();
    assert!(matches!(err, BraidError::NotLeader { partition_id: 1, term: 1 }));
}

#[test]
fn batches_keep_their_boundaries_on_followers() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    let batch = (0..3)
        .map(|i| common::deploy("t", &format!("r{}", i), b"x"))
        .collect();
    cluster.replica(leader).propose(batch).unwrap();
    cluster.pump();
    cluster.tick_times(2);

    let expected: Vec<Vec<u8>> = (2..=4)
        .map(|p| cluster.replicas[leader as usize].log.read_raw(p).unwrap().unwrap())
        .collect();
    for replica in &cluster.replicas {
        let frames: Vec<Vec<u8>> = (2..=4)
            .map(|p| replica.log.read_raw(p).unwrap().unwrap())
            .collect();
        assert_eq!(frames, expected);
    }
}

// ============================================================================
// Leadership change tests
// ============================================================================

#[test]
fn step_down_releases_the_writer() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    cluster.replica(leader).step_down();
    cluster.pump();

    let replica = cluster.replica(leader);
    assert_eq!(replica.node.role(), RaftRole::Follower);
    assert_eq!(replica.node.term(), 1);
    assert_eq!(replica.log.writer_term(), None);
    assert!(replica.events.iter().any(|e| matches!(
        e,
        RaftEvent::BecameFollower {
            term: 1,
            was_leader: true,
            ..
        }
    )));
    assert!(replica
        .propose(vec![common::deploy("t", "a", b"1")])
        .is_err());

    let next = cluster.tick_until_leader();
    assert_eq!(cluster.replica(next).node.term(), 2);
}

#[test]
fn failover_truncates_uncommitted_entries() {
    let mut cluster = Cluster::new(3);
    let old = cluster.tick_until_leader();
    cluster.tick_times(2);

    cluster.down.insert(old);
    cluster
        .replica(old)
        .propose(vec![common::deploy("t", "lost", b"x")])
        .unwrap();
    cluster.pump();
    assert_eq!(cluster.replica(old).log.highest_position(), 2);

    let new = cluster.tick_until_leader();
    assert_ne!(new, old);
    assert_eq!(cluster.replica(new).node.term(), 2);
    cluster.tick_times(2);
    assert_eq!(cluster.replica(new).log.commit_position(), 2);

    cluster.down.remove(&old);
    cluster.tick_times(4);
    let replica = cluster.replica(old);
    assert_eq!(replica.node.role(), RaftRole::Follower);
    assert_eq!(replica.node.leader(), Some(new));
    assert_eq!(replica.node.term(), 2);
    assert_eq!(replica.log.term_at(2), Some(2));
    assert_eq!(replica.log.commit_position(), 2);
    assert!(replica.events.iter().any(|e| matches!(
        e,
        RaftEvent::BecameFollower {
            was_leader: true,
            ..
        }
    )));
}

/// A cluster whose leader was elected in term 2, with a follower and a member
/// to impersonate the term 1 leader.
fn cluster_in_second_term() -> (Cluster, u32, u32, u32) {
    let mut cluster = Cluster::new(3);
    let first = cluster.tick_until_leader();
    cluster.replica(first).step_down();
    cluster.pump();
    let leader = cluster.tick_until_leader();
    cluster.tick_times(2);
    assert_eq!(cluster.replica(leader).node.term(), 2);
    let follower = (0..3).find(|m| *m != leader).unwrap();
    let stale = (0..3).find(|m| *m != leader && *m != follower).unwrap();
    (cluster, leader, follower, stale)
}

#[test]
fn superseded_leader_append_is_rejected() {
    let (mut cluster, leader, follower, stale) = cluster_in_second_term();
    let replica = cluster.replica(follower);
    let highest = replica.log.highest_position();
    let commit = replica.log.commit_position();
    let entry = LogEntry {
        term: 1,
        record: common::deploy("t", "stale", b"x").into_record(PARTITION, highest + 1),
    };
    let request = AppendRequest {
        term: 1,
        leader: stale,
        prev_position: highest,
        prev_term: replica.log.last_term(),
        frames: vec![encode_frame(&entry, FrameFlags::single()).unwrap()],
        commit_position: highest + 1,
    };

    let replies = replica.deliver(stale, RaftMessage::AppendRequest(request));
    match &replies[..] {
        [RaftMessage::AppendResponse(response)] => {
            assert!(!response.success);
            assert_eq!(response.term, 2);
        }
        other => panic!("unexpected replies {:?}", other),
    }
    assert_eq!(replica.log.highest_position(), highest);
    assert_eq!(replica.log.commit_position(), commit);
    assert_eq!(replica.node.term(), 2);
    assert_eq!(replica.node.leader(), Some(leader));
    assert_eq!(replica.node.role(), RaftRole::Follower);
}

#[test]
fn superseded_leader_snapshot_is_rejected() {
    let (mut cluster, leader, follower, stale) = cluster_in_second_term();
    let replica = cluster.replica(follower);
    let highest = replica.log.highest_position();
    let request = InstallSnapshotRequest {
        term: 1,
        leader: stale,
        base_position: highest + 10,
        base_term: 1,
        chunk: SnapshotChunk {
            snapshot_id: SnapshotId::new(highest + 10, 1, highest + 10, highest + 10).to_string(),
            file_name: "state.bin".into(),
            total_count: 1,
            content: b"state".to_vec(),
            chunk_checksum: 0,
            snapshot_checksum: String::new(),
        },
    };

    let replies = replica.deliver(stale, RaftMessage::InstallSnapshotRequest(request));
    match &replies[..] {
        [RaftMessage::InstallSnapshotResponse(response)] => {
            assert!(!response.success);
            assert!(!response.done);
            assert_eq!(response.term, 2);
        }
        other => panic!("unexpected replies {:?}", other),
    }
    assert!(replica.snapshots.list().unwrap().is_empty());
    assert!(!replica
        .events
        .iter()
        .any(|e| matches!(e, RaftEvent::SnapshotInstalled(_))));
    assert_eq!(replica.log.highest_position(), highest);
    assert_eq!(replica.node.term(), 2);
    assert_eq!(replica.node.leader(), Some(leader));
}

// ============================================================================
// Snapshot replication tests
// ============================================================================

#[test]
fn lagging_follower_receives_snapshot() {
    let mut cluster = Cluster::new(3);
    let leader = cluster.tick_until_leader();
    cluster.tick_times(2);
    let lagging = (0..3).find(|m| *m != leader).unwrap();
    cluster.down.insert(lagging);

    for i in 0..40 {
        cluster
            .replica(leader)
            .propose(vec![common::deploy("t", &format!("r{}", i), b"payload")])
            .unwrap();
        cluster.pump();
    }
    let last = cluster.replica(leader).log.highest_position();
    assert_eq!(cluster.replica(leader).log.commit_position(), last);

    let id = SnapshotId::new(last, 1, last, last);
    {
        let replica = cluster.replica(leader);
        let transient = replica.snapshots.take_transient(id).unwrap();
        transient
            .write_state(&[(vec![0, 1], b"state".to_vec())])
            .unwrap();
        transient.persist().unwrap();
        assert!(replica.log.compact(id.compaction_floor()).unwrap());
        assert!(replica.log.lowest_position() > 2);
    }

    let tail = cluster
        .replica(leader)
        .propose(vec![common::deploy("t", "after", b"x")])
        .unwrap();
    cluster.pump();

    cluster.down.remove(&lagging);
    cluster.tick_times(6);

    let replica = cluster.replica(lagging);
    assert!(replica
        .events
        .iter()
        .any(|e| matches!(e, RaftEvent::SnapshotInstalled(s) if s.id() == id)));
    assert_eq!(replica.snapshots.latest_snapshot().unwrap().unwrap().id(), id);
    assert_eq!(replica.log.lowest_position(), last + 1);
    assert_eq!(replica.log.highest_position(), tail);
    assert_eq!(replica.log.commit_position(), tail);
    assert!(matches!(
        replica.log.read(2),
        Err(BraidError::Compacted { .. })
    ));
}
