// M25: TTL tests
// Column families opened with a ttl hide records once they are old enough
// and drop them at compaction. Time is driven by a ManualClock.

use std::sync::Arc;
use std::time::Duration;

use lsm_kv::{ColumnFamilyOptions, DB, FlushOptions, ManualClock, Options, ReadOptions};

const START: u64 = 1_000;

fn open_with_ttl(dir: &std::path::Path, clock: &Arc<ManualClock>) -> DB {
    DB::open(
        Options {
            create_if_missing: true,
            clock: clock.clone(),
            default_cf: ColumnFamilyOptions {
                ttl: Some(Duration::from_secs(10)),
                ..Default::default()
            },
            ..Default::default()
        },
        dir,
    )
    .unwrap()
}

fn scan(db: &DB) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut iter = db.iterator(ReadOptions::default()).unwrap();
    iter.seek_to_first().unwrap();
    let mut out = Vec::new();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next().unwrap();
    }
    out
}

// =============================================================================
// Test 1: Values read back without their timestamp
// =============================================================================
#[test]
fn values_are_returned_without_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let db = open_with_ttl(dir.path(), &clock);
    db.put(b"k", b"value").unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"value".to_vec()));

    db.flush(&FlushOptions::default()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"value".to_vec()));
    assert_eq!(scan(&db), vec![(b"k".to_vec(), b"value".to_vec())]);
}

// =============================================================================
// Test 2: A record expires exactly when its age reaches the ttl
// =============================================================================
#[test]
fn record_expires_at_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let db = open_with_ttl(dir.path(), &clock);
    db.put(b"k", b"v").unwrap();

    clock.set(START + 9);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(scan(&db).len(), 1);

    clock.set(START + 10);
    assert_eq!(db.get(b"k").unwrap(), None);
    assert!(scan(&db).is_empty());
}

// =============================================================================
// Test 3: Rewriting a key restarts its clock
// =============================================================================
#[test]
fn overwrite_refreshes_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let db = open_with_ttl(dir.path(), &clock);
    db.put(b"k", b"first").unwrap();
    db.put(b"other", b"x").unwrap();
    db.flush(&FlushOptions::default()).unwrap();

    clock.set(START + 8);
    db.put(b"k", b"second").unwrap();
    clock.set(START + 12);

    assert_eq!(db.get(b"k").unwrap(), Some(b"second".to_vec()));
    assert_eq!(db.get(b"other").unwrap(), None);
    assert_eq!(scan(&db), vec![(b"k".to_vec(), b"second".to_vec())]);
}

// =============================================================================
// Test 4: Compaction removes expired records from disk
// =============================================================================
#[test]
fn compaction_drops_expired_records() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let db = open_with_ttl(dir.path(), &clock);
    for i in 0..50 {
        db.put(format!("old_{i:02}"), b"v").unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();

    clock.set(START + 5);
    for i in 0..10 {
        db.put(format!("new_{i:02}"), b"v").unwrap();
    }
    clock.set(START + 11);
    db.compact_range(None, None).unwrap();

    let files = db.live_files_metadata();
    assert_eq!(files.iter().map(|f| f.entry_count).sum::<u64>(), 10);
    assert_eq!(db.get(b"old_00").unwrap(), None);
    assert_eq!(db.get(b"new_09").unwrap(), Some(b"v".to_vec()));

    // The bottom level is only filtered at read time.
    clock.set(START + 15);
    assert_eq!(db.get(b"new_09").unwrap(), None);
    assert!(scan(&db).is_empty());
}

// =============================================================================
// Test 5: Expiry uses the stored write time after reopen
// =============================================================================
#[test]
fn expiry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    {
        let db = open_with_ttl(dir.path(), &clock);
        db.put(b"k", b"v").unwrap();
    }
    clock.set(START + 5);
    let db = open_with_ttl(dir.path(), &clock);
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
    clock.set(START + 10);
    assert_eq!(db.get(b"k").unwrap(), None);
}

// =============================================================================
// Test 6: The ttl belongs to one column family
// =============================================================================
#[test]
fn ttl_is_per_column_family() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let db = DB::open(
        Options {
            create_if_missing: true,
            clock: clock.clone(),
            ..Default::default()
        },
        dir.path(),
    )
    .unwrap();
    let sessions = db
        .create_column_family(
            "sessions",
            ColumnFamilyOptions {
                ttl: Some(Duration::from_secs(60)),
                ..Default::default()
            },
        )
        .unwrap();
    db.put(b"user", b"alice").unwrap();
    db.put_cf(&sessions, b"token", b"abc").unwrap();

    clock.advance(Duration::from_secs(3600));
    assert_eq!(db.get(b"user").unwrap(), Some(b"alice".to_vec()));
    assert_eq!(db.get_cf(&sessions, b"token").unwrap(), None);
}

// =============================================================================
// Test 7: A ttl under one second is rejected
// =============================================================================
#[test]
fn sub_second_ttl_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let result = DB::open(
        Options {
            create_if_missing: true,
            default_cf: ColumnFamilyOptions {
                ttl: Some(Duration::from_millis(500)),
                ..Default::default()
            },
            ..Default::default()
        },
        dir.path(),
    );
    assert!(matches!(result, Err(lsm_kv::Error::InvalidConfiguration(_))));
}

fn open_plain(dir: &std::path::Path) -> lsm_kv::Result<DB> {
    DB::open(
        Options {
            create_if_missing: true,
            ..Default::default()
        },
        dir,
    )
}

// =============================================================================
// Test 8: Reopening with the ttl switched on or off is rejected
// =============================================================================
#[test]
fn ttl_cannot_be_added_to_existing_family() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_plain(dir.path()).unwrap();
        db.put(b"k", b"plain").unwrap();
        db.flush(&FlushOptions::default()).unwrap();
    }
    let clock = Arc::new(ManualClock::new(START));
    let result = DB::open(
        Options {
            clock: clock.clone(),
            default_cf: ColumnFamilyOptions {
                ttl: Some(Duration::from_secs(10)),
                ..Default::default()
            },
            ..Default::default()
        },
        dir.path(),
    );
    assert!(matches!(result, Err(lsm_kv::Error::InvalidConfiguration(_))));

    // The refused open changed nothing.
    let db = open_plain(dir.path()).unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"plain".to_vec()));
}

#[test]
fn ttl_cannot_be_removed_from_existing_family() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    {
        let db = open_with_ttl(dir.path(), &clock);
        db.put(b"k", b"stamped").unwrap();
    }
    assert!(matches!(
        open_plain(dir.path()),
        Err(lsm_kv::Error::InvalidConfiguration(_))
    ));

    let db = open_with_ttl(dir.path(), &clock);
    assert_eq!(db.get(b"k").unwrap(), Some(b"stamped".to_vec()));
}

#[test]
fn ttl_duration_may_change() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    {
        let db = open_with_ttl(dir.path(), &clock);
        db.put(b"k", b"v").unwrap();
    }
    clock.advance(Duration::from_secs(15));
    let db = DB::open(
        Options {
            clock: clock.clone(),
            default_cf: ColumnFamilyOptions {
                ttl: Some(Duration::from_secs(20)),
                ..Default::default()
            },
            ..Default::default()
        },
        dir.path(),
    )
    .unwrap();
    assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()), "20s ttl keeps a 15s old record");
}
