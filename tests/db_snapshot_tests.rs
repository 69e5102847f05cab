// M23: Snapshot tests
// A snapshot pins a sequence number: reads through it ignore later writes,
// and flushes and compactions keep every version it can see.

use lsm_kv::{DB, Error, FlushOptions, Options, ReadOptions};

fn open(dir: &std::path::Path) -> DB {
    DB::open(
        Options {
            create_if_missing: true,
            ..Default::default()
        },
        dir,
    )
    .unwrap()
}

fn read_at(snapshot: &lsm_kv::Snapshot) -> ReadOptions {
    ReadOptions {
        snapshot: Some(snapshot.clone()),
        ..Default::default()
    }
}

// =============================================================================
// Test 1: Reads through a snapshot ignore later writes
// =============================================================================
#[test]
fn snapshot_read_ignores_later_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    db.put(b"k", b"old").unwrap();
    db.put(b"gone", b"here").unwrap();

    let snapshot = db.create_snapshot();
    assert_eq!(snapshot.sequence(), 2);

    db.put(b"k", b"new").unwrap();
    db.delete(b"gone").unwrap();
    db.put(b"fresh", b"x").unwrap();

    let at = read_at(&snapshot);
    assert_eq!(db.get_opt(b"k", &at).unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.get_opt(b"gone", &at).unwrap(), Some(b"here".to_vec()));
    assert_eq!(db.get_opt(b"fresh", &at).unwrap(), None);

    assert_eq!(db.get(b"k").unwrap(), Some(b"new".to_vec()));
    assert_eq!(db.get(b"gone").unwrap(), None);
}

// =============================================================================
// Test 2: Snapshots survive flush and full compaction
// =============================================================================
#[test]
fn snapshot_survives_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    for i in 0..100 {
        db.put(format!("key_{i:03}"), b"v1").unwrap();
    }
    let snapshot = db.create_snapshot();
    for i in 0..100 {
        if i % 2 == 0 {
            db.delete(format!("key_{i:03}")).unwrap();
        } else {
            db.put(format!("key_{i:03}"), b"v2").unwrap();
        }
    }
    db.flush(&FlushOptions::default()).unwrap();
    db.compact_range(None, None).unwrap();

    let at = read_at(&snapshot);
    for i in 0..100 {
        let key = format!("key_{i:03}");
        assert_eq!(db.get_opt(&key, &at).unwrap(), Some(b"v1".to_vec()), "{key}");
        let latest = if i % 2 == 0 { None } else { Some(b"v2".to_vec()) };
        assert_eq!(db.get(&key).unwrap(), latest, "{key}");
    }

    // Iterators see the snapshot too.
    let mut iter = db.iterator(read_at(&snapshot)).unwrap();
    iter.seek_to_first().unwrap();
    let mut count = 0;
    while iter.valid() {
        assert_eq!(iter.value(), b"v1");
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, 100);
}

// =============================================================================
// Test 3: Releasing the last snapshot lets compaction drop old versions
// =============================================================================
#[test]
fn released_snapshot_allows_garbage_collection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    db.put(b"k", b"v1").unwrap();
    let snapshot = db.create_snapshot();
    db.put(b"k", b"v2").unwrap();
    db.compact_range(None, None).unwrap();

    let entries = |db: &DB| -> u64 { db.live_files_metadata().iter().map(|f| f.entry_count).sum() };
    assert_eq!(entries(&db), 2, "both versions kept for the snapshot");

    db.release_snapshot(snapshot);
    // Keys on both sides of "k" make the next compaction rewrite its file.
    db.put(b"a", b"x").unwrap();
    db.put(b"z", b"x").unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(entries(&db), 3, "only the newest version of k is left");
    assert_eq!(db.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

// =============================================================================
// Test 4: Dropping a clone keeps the snapshot alive
// =============================================================================
#[test]
fn clones_share_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    db.put(b"k", b"v1").unwrap();
    let snapshot = db.create_snapshot();
    let clone = snapshot.clone();
    drop(snapshot);

    db.put(b"k", b"v2").unwrap();
    db.compact_range(None, None).unwrap();
    assert_eq!(db.get_opt(b"k", &read_at(&clone)).unwrap(), Some(b"v1".to_vec()));
}

// =============================================================================
// Test 5: A snapshot from another database is rejected
// =============================================================================
#[test]
fn foreign_snapshot_is_rejected() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let a = open(dir_a.path());
    let b = open(dir_b.path());
    a.put(b"k", b"v").unwrap();

    let snapshot = a.create_snapshot();
    assert!(matches!(
        b.get_opt(b"k", &read_at(&snapshot)),
        Err(Error::InvalidArgument(_))
    ));
}

// =============================================================================
// Test 6: An iterator without a snapshot keeps its view through compaction
// =============================================================================
#[test]
fn plain_iterator_pins_its_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(dir.path());
    db.put(b"k", b"v1").unwrap();
    db.flush(&FlushOptions::default()).unwrap();

    let mut iter = db.iterator(ReadOptions::default()).unwrap();
    db.put(b"k", b"v2").unwrap();
    db.put(b"a", b"x").unwrap();
    db.put(b"z", b"x").unwrap();
    db.compact_range(None, None).unwrap();

    let entries: u64 = db.live_files_metadata().iter().map(|f| f.entry_count).sum();
    assert_eq!(entries, 4, "old version of k kept while the iterator lives");

    iter.seek_to_first().unwrap();
    assert!(iter.valid());
    assert_eq!(iter.key(), b"k");
    assert_eq!(iter.value(), b"v1");
    iter.next().unwrap();
    assert!(!iter.valid());
}

// =============================================================================
// Test 7: Reads racing compaction always find a live key
// =============================================================================
#[test]
fn reads_racing_compaction_see_a_version() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open(dir.path()));
    db.put(b"k", 0u64.to_le_bytes()).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let db = Arc::clone(&db);
        std::thread::spawn(move || {
            for i in 1..=400u64 {
                db.put(b"k", i.to_le_bytes()).unwrap();
                db.put(format!("pad_{:03}", i % 50), b"p").unwrap();
            }
        })
    };
    let compactor = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                db.compact_range(None, None).unwrap();
            }
        })
    };

    let mut last_seen = 0u64;
    while !writer.is_finished() {
        let snapshot = db.create_snapshot();
        let pinned = db.get_opt(b"k", &read_at(&snapshot)).unwrap();
        let latest = db.get(b"k").unwrap();
        let pinned = u64::from_le_bytes(pinned.expect("snapshot lost k").try_into().unwrap());
        let latest = u64::from_le_bytes(latest.expect("read lost k").try_into().unwrap());
        assert!(pinned >= last_seen && latest >= pinned);
        last_seen = pinned;
    }
    writer.join().unwrap();
    done.store(true, Ordering::Release);
    compactor.join().unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(400u64.to_le_bytes().to_vec()));
}
