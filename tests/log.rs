//! Partition log tests.

mod common;

use braid::error::BraidError;
use braid::log::{LogFailureListener, LogStream, ReadLimit};
use braid::record::{encode_frame, FrameFlags, LogEntry, PartitionId};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn append_deployments(log: &mut LogStream, term: u64, count: usize) -> i64 {
    let mut last = 0;
    for i in 0..count {
        last = common::append_committed(
            log,
            term,
            vec![common::deploy("t", &format!("r{}", i), b"resource")],
        );
    }
    last
}

fn segment_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("segment_"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}

fn append_to_last_segment(dir: &Path, bytes: &[u8]) {
    let last = segment_files(dir).pop().unwrap();
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(last)
        .unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

fn frame_at(partition_id: PartitionId, position: i64, flags: FrameFlags) -> Vec<u8> {
    let entry = LogEntry {
        term: 1,
        record: common::deploy("t", "torn", b"x").into_record(partition_id, position),
    };
    encode_frame(&entry, flags).unwrap()
}

// ============================================================================
// Append tests
// ============================================================================

#[test]
fn positions_are_dense_from_one() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    assert_eq!(log.lowest_position(), 1);
    assert_eq!(log.highest_position(), 0);

    log.acquire_writer(1);
    let first = log
        .append(1, vec![common::deploy("t", "a", b"x")])
        .unwrap();
    assert_eq!((first.first_position, first.last_position), (1, 1));
    let batch = log
        .append(
            1,
            vec![
                common::deploy("t", "b", b"x"),
                common::deploy("t", "c", b"x"),
                common::deploy("t", "d", b"x"),
            ],
        )
        .unwrap();
    assert_eq!((batch.first_position, batch.last_position), (2, 4));

    for position in 1..=4 {
        let entry = log.read(position).unwrap().unwrap();
        assert_eq!(entry.position(), position);
        assert_eq!(entry.record.partition_id, 1);
        assert_eq!(entry.term, 1);
    }
    assert!(log.read(5).unwrap().is_none());
}

#[test]
fn append_requires_writer_lease_of_the_term() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());

    let err = log
        .append(1, vec![common::deploy("t", "a", b"x")])
        .unwrap_err();
    assert!(matches!(err, BraidError::NotLeader { .. }), "{:?}", err);

    log.acquire_writer(2);
    let err = log
        .append(1, vec![common::deploy("t", "a", b"x")])
        .unwrap_err();
    assert!(matches!(err, BraidError::NotLeader { .. }));

    log.release_writer();
    assert_eq!(log.writer_term(), None);
    assert!(log.append(2, vec![common::deploy("t", "a", b"x")]).is_err());
    assert_eq!(log.highest_position(), 0);
}

#[test]
fn empty_append_is_refused() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    log.acquire_writer(1);
    assert!(log.append(1, Vec::new()).is_err());
}

#[test]
fn terms_are_tracked_per_position() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    common::append_committed(&mut log, 1, vec![common::deploy("t", "a", b"x")]);
    common::append_committed(&mut log, 3, vec![common::deploy("t", "b", b"x")]);
    assert_eq!(log.term_at(1), Some(1));
    assert_eq!(log.term_at(2), Some(3));
    assert_eq!(log.last_term(), 3);
    assert_eq!(log.term_at(0), Some(0));
}

// ============================================================================
// Reader and commit tests
// ============================================================================

#[test]
fn committed_reader_stops_at_commit_position() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    log.acquire_writer(1);
    for name in ["a", "b", "c", "d"] {
        log.append(1, vec![common::deploy("t", name, b"x")]).unwrap();
    }
    log.set_commit_position(2);

    let committed: Vec<i64> = log
        .reader(1, ReadLimit::Committed)
        .map(|e| e.unwrap().position())
        .collect();
    assert_eq!(committed, vec![1, 2]);

    let appended: Vec<i64> = log
        .reader(1, ReadLimit::Appended)
        .map(|e| e.unwrap().position())
        .collect();
    assert_eq!(appended, vec![1, 2, 3, 4]);

    let mut reader = log.reader(1, ReadLimit::Appended);
    reader.seek(3);
    assert_eq!(reader.next_position(), 3);
    assert_eq!(reader.next().unwrap().unwrap().position(), 3);
}

#[test]
fn commit_position_never_moves_back_or_past_the_end() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    log.acquire_writer(1);
    log.append(1, vec![common::deploy("t", "a", b"x")]).unwrap();
    log.append(1, vec![common::deploy("t", "b", b"x")]).unwrap();

    let mut commits = log.subscribe_commits();
    log.set_commit_position(10);
    assert_eq!(log.commit_position(), 2);
    assert!(commits.has_changed().unwrap());
    assert_eq!(*commits.borrow_and_update(), 2);

    log.set_commit_position(1);
    assert_eq!(log.commit_position(), 2);
}

#[test]
fn truncation_below_commit_is_refused() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    log.acquire_writer(1);
    for name in ["a", "b", "c", "d"] {
        log.append(1, vec![common::deploy("t", name, b"x")]).unwrap();
    }
    log.set_commit_position(2);

    assert!(log.truncate_after(1).is_err());
    log.truncate_after(2).unwrap();
    assert_eq!(log.highest_position(), 2);
    assert!(log.read(3).unwrap().is_none());

    let next = log.append(1, vec![common::deploy("t", "e", b"x")]).unwrap();
    assert_eq!(next.first_position, 3);
    assert_eq!(log.read(3).unwrap().unwrap().position(), 3);
}

// ============================================================================
// Compaction tests
// ============================================================================

#[test]
fn compaction_deletes_sealed_segments_below_floor() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    let last = append_deployments(&mut log, 1, 30);
    assert!(segment_files(dir.path()).len() > 2);

    assert!(log.compact(20).unwrap());
    let lowest = log.lowest_position();
    assert!(lowest > 1 && lowest <= 20, "lowest {}", lowest);
    assert_eq!(log.highest_position(), last);

    match log.read(1) {
        Err(BraidError::Compacted { position, floor }) => {
            assert_eq!(position, 1);
            assert_eq!(floor, lowest);
        }
        other => panic!("expected compacted, got {:?}", other),
    }
    assert!(log.read(20).unwrap().is_some());
    assert!(log.term_at(lowest - 1).is_some());

    drop(log);
    let reopened = common::open_log(1, dir.path());
    assert_eq!(reopened.lowest_position(), lowest);
    assert_eq!(reopened.highest_position(), last);
}

#[test]
fn compaction_is_bounded_by_commit_position() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    log.acquire_writer(1);
    for i in 0..30 {
        log.append(1, vec![common::deploy("t", &format!("r{}", i), b"resource")])
            .unwrap();
    }
    log.set_commit_position(1);
    assert!(!log.compact(30).unwrap());
    assert_eq!(log.lowest_position(), 1);
}

#[test]
fn compaction_below_lowest_is_a_no_op() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    append_deployments(&mut log, 1, 3);
    assert!(!log.compact(1).unwrap());
    assert!(!log.compact(0).unwrap());
}

// ============================================================================
// Recovery tests
// ============================================================================

#[test]
fn reopen_recovers_every_entry() {
    let dir = common::temp_test_dir();
    {
        let mut log = common::open_log(1, dir.path());
        append_deployments(&mut log, 2, 12);
    }
    let log = common::open_log(1, dir.path());
    assert_eq!(log.highest_position(), 12);
    assert_eq!(log.last_term(), 2);
    // Commit is learned again from replication.
    assert_eq!(log.commit_position(), 0);
    let positions: Vec<i64> = log
        .reader(1, ReadLimit::Appended)
        .map(|e| e.unwrap().position())
        .collect();
    assert_eq!(positions, (1..=12).collect::<Vec<_>>());
}

#[test]
fn torn_tail_is_truncated_on_open() {
    let dir = common::temp_test_dir();
    {
        let mut log = common::open_log(1, dir.path());
        append_deployments(&mut log, 1, 3);
    }
    let frame = frame_at(1, 4, FrameFlags::single());
    append_to_last_segment(dir.path(), &frame[..frame.len() / 2]);

    let mut log = common::open_log(1, dir.path());
    assert_eq!(log.highest_position(), 3);
    log.acquire_writer(1);
    let next = log.append(1, vec![common::deploy("t", "z", b"x")]).unwrap();
    assert_eq!(next.first_position, 4);
    assert_eq!(log.read(4).unwrap().unwrap().record.position, 4);
}

#[test]
fn unterminated_batch_is_dropped_on_open() {
    let dir = common::temp_test_dir();
    {
        let mut log = common::open_log(1, dir.path());
        append_deployments(&mut log, 1, 2);
    }
    append_to_last_segment(dir.path(), &frame_at(1, 3, FrameFlags::BATCH_BEGIN));

    let log = common::open_log(1, dir.path());
    assert_eq!(log.highest_position(), 2);
    assert!(log.read(3).unwrap().is_none());
}

#[test]
fn read_only_open_leaves_torn_tail_in_place() {
    let dir = common::temp_test_dir();
    {
        let mut log = common::open_log(1, dir.path());
        append_deployments(&mut log, 1, 3);
    }
    let frame = frame_at(1, 4, FrameFlags::single());
    let torn = &frame[..frame.len() / 2];
    append_to_last_segment(dir.path(), torn);
    let last_segment = segment_files(dir.path()).pop().unwrap();
    let size_before = std::fs::metadata(&last_segment).unwrap().len();

    let mut log = LogStream::open_read_only(1, dir.path()).unwrap();
    assert_eq!(log.highest_position(), 3);
    assert_eq!(log.recovery().torn_bytes, torn.len() as u64);
    let positions: Vec<i64> = log
        .reader(1, ReadLimit::Appended)
        .map(|entry| entry.unwrap().record.position)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);

    assert!(log.truncate_after(1).is_err());
    assert!(log.reset(10, 2).is_err());
    drop(log);
    assert_eq!(std::fs::metadata(&last_segment).unwrap().len(), size_before);

    // A writable open still cuts the tail.
    let log = common::open_log(1, dir.path());
    assert_eq!(log.recovery().torn_bytes, torn.len() as u64);
    assert!(std::fs::metadata(&last_segment).unwrap().len() < size_before);
}

#[test]
fn read_only_open_creates_nothing() {
    let dir = common::temp_test_dir();
    let log_dir = dir.path().join("log");
    std::fs::create_dir_all(&log_dir).unwrap();

    let log = LogStream::open_read_only(1, &log_dir).unwrap();
    assert_eq!(log.highest_position(), 0);
    assert_eq!(log.lowest_position(), 1);
    assert!(segment_files(&log_dir).is_empty());
    assert!(LogStream::open_read_only(1, &dir.path().join("missing")).is_err());
}

#[test]
fn reset_continues_after_base_position() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    append_deployments(&mut log, 1, 5);

    log.reset(100, 7).unwrap();
    assert_eq!(log.highest_position(), 100);
    assert_eq!(log.lowest_position(), 101);
    assert_eq!(log.commit_position(), 100);
    assert_eq!(log.last_term(), 7);
    assert_eq!(log.term_at(100), Some(7));

    log.acquire_writer(8);
    let next = log.append(8, vec![common::deploy("t", "a", b"x")]).unwrap();
    assert_eq!(next.first_position, 101);

    drop(log);
    let reopened = common::open_log(1, dir.path());
    assert_eq!(reopened.lowest_position(), 101);
    assert_eq!(reopened.highest_position(), 101);
}

// ============================================================================
// Replication tests
// ============================================================================

#[test]
fn replicated_frames_are_stored_verbatim() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let mut leader = common::open_log(1, leader_dir.path());
    let mut follower = common::open_log(1, follower_dir.path());
    append_deployments(&mut leader, 1, 3);

    let frames: Vec<Vec<u8>> = (1..=3)
        .map(|p| leader.read_raw(p).unwrap().unwrap())
        .collect();
    assert_eq!(follower.append_replicated(&frames).unwrap(), 3);
    for position in 1..=3 {
        assert_eq!(
            follower.read(position).unwrap(),
            leader.read(position).unwrap()
        );
        assert_eq!(
            follower.read_raw(position).unwrap(),
            leader.read_raw(position).unwrap()
        );
    }
}

#[test]
fn replicated_frames_must_follow_the_tail() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let mut leader = common::open_log(1, leader_dir.path());
    let mut follower = common::open_log(1, follower_dir.path());
    append_deployments(&mut leader, 1, 2);

    let second = leader.read_raw(2).unwrap().unwrap();
    assert!(follower.append_replicated(&[second]).is_err());
    assert_eq!(follower.highest_position(), 0);
}

#[test]
fn replicated_frames_must_belong_to_the_partition() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let mut leader = common::open_log(1, leader_dir.path());
    let mut follower = common::open_log(2, follower_dir.path());
    append_deployments(&mut leader, 1, 1);

    let frame = leader.read_raw(1).unwrap().unwrap();
    assert!(follower.append_replicated(&[frame]).is_err());
}

// ============================================================================
// Failure tests
// ============================================================================

#[derive(Default)]
struct CountingListener {
    failures: AtomicUsize,
    recoveries: AtomicUsize,
}

impl LogFailureListener for CountingListener {
    fn on_failure(&self, _partition_id: PartitionId, _error: &BraidError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_recovered(&self, _partition_id: PartitionId) {
        self.recoveries.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn failed_stream_refuses_appends_until_reset() {
    let dir = common::temp_test_dir();
    let mut log = common::open_log(1, dir.path());
    let listener = Arc::new(CountingListener::default());
    log.add_failure_listener(listener.clone());
    append_deployments(&mut log, 1, 2);

    log.fail(&BraidError::internal("disk gone"));
    log.fail(&BraidError::internal("again"));
    assert!(log.is_failed());
    assert_eq!(listener.failures.load(Ordering::SeqCst), 1);
    assert_eq!(log.writer_term(), None);

    log.acquire_writer(1);
    let err = log
        .append(1, vec![common::deploy("t", "x", b"x")])
        .unwrap_err();
    assert!(matches!(err, BraidError::PartitionFailed { .. }), "{:?}", err);

    log.reset(2, 1).unwrap();
    assert!(!log.is_failed());
    assert_eq!(listener.recoveries.load(Ordering::SeqCst), 1);
    log.acquire_writer(1);
    assert!(log.append(1, vec![common::deploy("t", "x", b"x")]).is_ok());
}
