//! Snapshot store, checksum and transfer tests.

mod common;

use braid::error::BraidError;
use braid::snapshot::{
    chunks, ReceivedSnapshot, SnapshotChecksum, SnapshotId, SnapshotStore, STATE_FILE,
};
use std::path::Path;

fn state_entries(marker: u8) -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        (vec![0, 10, 1], vec![marker; 16]),
        (vec![0, 10, 2], vec![marker, 1, 2, 3]),
    ]
}

fn persist(store: &SnapshotStore, id: SnapshotId, marker: u8) {
    let transient = store.take_transient(id).unwrap();
    transient.write_state(&state_entries(marker)).unwrap();
    transient.persist().unwrap();
}

fn snapshots_dir(partition_dir: &Path) -> std::path::PathBuf {
    partition_dir.join("snapshots")
}

// ============================================================================
// Snapshot id tests
// ============================================================================

#[test]
fn snapshot_id_renders_and_parses() {
    let id = SnapshotId::new(120, 3, 118, 95);
    assert_eq!(id.to_string(), "120-3-118-95");
    assert_eq!("120-3-118-95".parse::<SnapshotId>().unwrap(), id);
    assert!("120-3-118".parse::<SnapshotId>().is_err());
    assert!("a-b-c-d".parse::<SnapshotId>().is_err());
}

#[test]
fn compaction_floor_is_bounded_by_processing_and_export() {
    assert_eq!(SnapshotId::new(120, 3, 118, 95).compaction_floor(), 96);
    assert_eq!(SnapshotId::new(120, 3, 50, 95).compaction_floor(), 51);
    // Nothing exported yet keeps the whole log.
    assert_eq!(SnapshotId::new(120, 3, 118, -1).compaction_floor(), 1);
}

#[test]
fn snapshot_ids_order_by_position_first() {
    let older = SnapshotId::new(10, 5, 10, 10);
    let newer = SnapshotId::new(11, 1, 0, 0);
    assert!(older < newer);
}

// ============================================================================
// Store tests
// ============================================================================

#[test]
fn transient_snapshot_is_invisible_until_persisted() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    let id = SnapshotId::new(5, 1, 5, 5);

    let transient = store.take_transient(id).unwrap();
    transient.write_state(&state_entries(1)).unwrap();
    assert!(store.list().unwrap().is_empty());
    assert!(store.latest_snapshot().unwrap().is_none());

    let persisted = transient.persist().unwrap();
    assert_eq!(persisted.id(), id);
    assert_eq!(store.list().unwrap(), vec![id]);
    assert!(persisted.checksum().digest_of(STATE_FILE).is_some());

    let latest = store.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.id(), id);
    assert_eq!(latest.read_state().unwrap(), state_entries(1));
}

#[test]
fn aborted_snapshot_leaves_nothing_behind() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    let transient = store.take_transient(SnapshotId::new(5, 1, 5, 5)).unwrap();
    transient.write_state(&state_entries(1)).unwrap();
    let path = transient.path().to_path_buf();
    transient.abort();
    assert!(!path.exists());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn latest_snapshot_skips_and_deletes_corrupted_ones() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 3).unwrap();
    let good = SnapshotId::new(5, 1, 5, 5);
    let bad = SnapshotId::new(9, 1, 9, 9);
    persist(&store, good, 1);
    persist(&store, bad, 2);

    let state = snapshots_dir(dir.path())
        .join(bad.to_string())
        .join(STATE_FILE);
    std::fs::write(&state, b"flipped").unwrap();
    assert!(matches!(
        store.verify(bad),
        Err(BraidError::InvalidSnapshot { .. })
    ));

    let latest = store.latest_snapshot().unwrap().unwrap();
    assert_eq!(latest.id(), good);
    assert_eq!(store.list().unwrap(), vec![good]);
}

#[test]
fn malformed_checksum_file_invalidates_snapshot() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    let id = SnapshotId::new(5, 1, 5, 5);
    persist(&store, id, 1);

    let checksum = snapshots_dir(dir.path()).join(format!("{}.checksum", id));
    std::fs::write(&checksum, "not a checksum\n").unwrap();
    assert!(store.verify(id).is_err());
    assert!(store.latest_snapshot().unwrap().is_none());
}

#[test]
fn open_removes_orphans_and_pending_snapshots() {
    let dir = common::temp_test_dir();
    let id = SnapshotId::new(5, 1, 5, 5);
    {
        let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
        persist(&store, id, 1);
        let pending = store.take_transient(SnapshotId::new(8, 1, 8, 8)).unwrap();
        pending.write_state(&state_entries(2)).unwrap();
    }
    let snapshots = snapshots_dir(dir.path());
    // Directory without checksum: an interrupted persist.
    std::fs::create_dir_all(snapshots.join("7-1-7-7")).unwrap();
    // Checksum without directory.
    std::fs::write(snapshots.join("6-1-6-6.checksum"), "x").unwrap();

    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    assert_eq!(store.list().unwrap(), vec![id]);
    assert!(!snapshots.join("7-1-7-7").exists());
    assert!(!snapshots.join("6-1-6-6.checksum").exists());
    let pending_entries = std::fs::read_dir(dir.path().join("pending")).unwrap().count();
    assert_eq!(pending_entries, 0);
}

#[test]
fn read_only_store_leaves_pending_and_orphans_alone() {
    let dir = common::temp_test_dir();
    let id = SnapshotId::new(5, 1, 5, 5);
    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    persist(&store, id, 1);
    let pending = store.take_transient(SnapshotId::new(8, 1, 8, 8)).unwrap();
    pending.write_state(&state_entries(2)).unwrap();
    let snapshots = snapshots_dir(dir.path());
    std::fs::create_dir_all(snapshots.join("7-1-7-7")).unwrap();

    let inspector = SnapshotStore::open_read_only(1, dir.path());
    assert_eq!(inspector.list().unwrap(), vec![id]);
    assert_eq!(inspector.verify(id).unwrap().id(), id);
    assert_eq!(inspector.latest_snapshot().unwrap().unwrap().id(), id);
    assert!(inspector.take_transient(SnapshotId::new(9, 1, 9, 9)).is_err());
    assert!(inspector.delete(id).is_err());
    assert!(inspector.purge_older_than(SnapshotId::new(9, 1, 9, 9)).is_err());

    assert!(pending.path().join(STATE_FILE).exists());
    assert!(snapshots.join("7-1-7-7").exists());

    // The writer can still finish its snapshot.
    let persisted = pending.persist().unwrap();
    assert_eq!(inspector.list().unwrap(), vec![id, persisted.id()]);
}

#[test]
fn read_only_store_without_snapshots_lists_nothing() {
    let dir = common::temp_test_dir();
    let inspector = SnapshotStore::open_read_only(1, dir.path());
    assert!(inspector.list().unwrap().is_empty());
    assert!(inspector.latest_snapshot().unwrap().is_none());
    assert!(!snapshots_dir(dir.path()).exists());
}

#[test]
fn purge_keeps_retained_count() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 2).unwrap();
    let ids = [
        SnapshotId::new(5, 1, 5, 5),
        SnapshotId::new(10, 1, 10, 10),
        SnapshotId::new(15, 2, 15, 15),
    ];
    for (i, id) in ids.iter().enumerate() {
        persist(&store, *id, i as u8);
    }

    assert_eq!(store.purge_older_than(ids[2]).unwrap(), 1);
    assert_eq!(store.list().unwrap(), vec![ids[1], ids[2]]);
    assert_eq!(store.purge_older_than(ids[2]).unwrap(), 0);
}

#[test]
fn persisting_an_existing_snapshot_is_idempotent() {
    let dir = common::temp_test_dir();
    let store = SnapshotStore::open(1, dir.path(), 1).unwrap();
    let id = SnapshotId::new(5, 1, 5, 5);
    persist(&store, id, 1);

    let again = store.take_transient(id).unwrap();
    again.write_state(&state_entries(9)).unwrap();
    let persisted = again.persist().unwrap();
    assert_eq!(persisted.read_state().unwrap(), state_entries(1));
}

// ============================================================================
// Checksum tests
// ============================================================================

#[test]
fn checksum_file_round_trips_through_text() {
    let dir = common::temp_test_dir();
    std::fs::write(dir.path().join("a.bin"), b"alpha").unwrap();
    std::fs::write(dir.path().join("b.bin"), b"beta").unwrap();

    let checksum = SnapshotChecksum::compute("1-1-1-1", dir.path()).unwrap();
    let rendered = checksum.render();
    assert_eq!(rendered.lines().count(), 2);
    assert!(rendered.lines().next().unwrap().ends_with(" a.bin"));

    let parsed = SnapshotChecksum::parse("1-1-1-1", &rendered).unwrap();
    assert_eq!(parsed, checksum);
    assert_eq!(parsed.combined(), checksum.combined());
    parsed.verify("1-1-1-1", dir.path()).unwrap();

    std::fs::write(dir.path().join("c.bin"), b"extra").unwrap();
    assert!(parsed.verify("1-1-1-1", dir.path()).is_err());
}

#[test]
fn empty_snapshot_has_no_checksum() {
    let dir = common::temp_test_dir();
    assert!(SnapshotChecksum::compute("1-1-1-1", dir.path()).is_err());
    assert!(SnapshotChecksum::parse("1-1-1-1", "").is_err());
}

// ============================================================================
// Transfer tests
// ============================================================================

#[test]
fn chunks_rebuild_the_snapshot_on_another_replica() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let leader = SnapshotStore::open(1, leader_dir.path(), 1).unwrap();
    let follower = SnapshotStore::open(1, follower_dir.path(), 1).unwrap();

    let id = SnapshotId::new(20, 2, 20, 18);
    let transient = leader.take_transient(id).unwrap();
    transient.write_state(&state_entries(4)).unwrap();
    transient.write_file("extra.bin", b"more data").unwrap();
    let snapshot = transient.persist().unwrap();

    let chunks = chunks(&snapshot).unwrap();
    assert_eq!(chunks.len(), 2);
    let mut received = ReceivedSnapshot::begin(&follower, &chunks[0]).unwrap();
    assert_eq!(received.id(), id);
    assert!(!received.apply(&chunks[0]).unwrap());
    // Redelivery of a chunk is harmless.
    assert!(!received.apply(&chunks[0]).unwrap());
    assert!(received.apply(&chunks[1]).unwrap());

    let copy = received.persist().unwrap();
    assert_eq!(copy.checksum().combined(), snapshot.checksum().combined());
    assert_eq!(copy.read_state().unwrap(), state_entries(4));
    assert_eq!(follower.latest_snapshot().unwrap().unwrap().id(), id);
}

#[test]
fn corrupted_chunk_is_rejected() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let leader = SnapshotStore::open(1, leader_dir.path(), 1).unwrap();
    let follower = SnapshotStore::open(1, follower_dir.path(), 1).unwrap();
    persist(&leader, SnapshotId::new(20, 2, 20, 18), 4);
    let snapshot = leader.latest_snapshot().unwrap().unwrap();

    let mut chunk = chunks(&snapshot).unwrap().remove(0);
    let mut received = ReceivedSnapshot::begin(&follower, &chunk).unwrap();
    chunk.content[0] ^= 0xff;
    assert!(received.apply(&chunk).is_err());

    let mut foreign = chunk.clone();
    foreign.snapshot_id = "1-1-1-1".into();
    assert!(received.apply(&foreign).is_err());

    let mut escaping = chunks(&snapshot).unwrap().remove(0);
    escaping.file_name = "../state.bin".into();
    assert!(received.apply(&escaping).is_err());
}

#[test]
fn incomplete_transfer_cannot_be_persisted() {
    let leader_dir = common::temp_test_dir();
    let follower_dir = common::temp_test_dir();
    let leader = SnapshotStore::open(1, leader_dir.path(), 1).unwrap();
    let follower = SnapshotStore::open(1, follower_dir.path(), 1).unwrap();

    let id = SnapshotId::new(20, 2, 20, 18);
    let transient = leader.take_transient(id).unwrap();
    transient.write_state(&state_entries(4)).unwrap();
    transient.write_file("extra.bin", b"more data").unwrap();
    let snapshot = transient.persist().unwrap();

    let chunks = chunks(&snapshot).unwrap();
    let mut received = ReceivedSnapshot::begin(&follower, &chunks[0]).unwrap();
    received.apply(&chunks[0]).unwrap();
    assert!(!received.is_complete());
    assert!(received.persist().is_err());
    assert!(follower.list().unwrap().is_empty());
}
