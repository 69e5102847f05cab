// M22: Compaction tests
// Automatic leveled compaction, trivial moves, manual range compaction and
// garbage collection of deleted and shadowed records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use lsm_kv::{ColumnFamilyOptions, CompactionStyle, DB, FlushOptions, LiveFileMetadata, Options};

fn open_with(dir: &std::path::Path, cf: ColumnFamilyOptions) -> DB {
    DB::open(
        Options {
            create_if_missing: true,
            enable_statistics: true,
            default_cf: cf,
            ..Default::default()
        },
        dir,
    )
    .unwrap()
}

fn by_level(files: &[LiveFileMetadata]) -> BTreeMap<usize, Vec<&LiveFileMetadata>> {
    let mut levels: BTreeMap<usize, Vec<&LiveFileMetadata>> = BTreeMap::new();
    for file in files {
        levels.entry(file.level).or_default().push(file);
    }
    levels
}

/// Files of every level past 0 must not overlap.
fn assert_levels_disjoint(files: &[LiveFileMetadata]) {
    for (level, mut level_files) in by_level(files) {
        if level == 0 {
            continue;
        }
        level_files.sort_by(|a, b| a.smallest_key.cmp(&b.smallest_key));
        for pair in level_files.windows(2) {
            assert!(
                pair[0].largest_key < pair[1].smallest_key,
                "level {level}: {} overlaps {}",
                pair[0].file_name,
                pair[1].file_name
            );
        }
    }
}

// =============================================================================
// Test 1: Level 0 is compacted once it reaches the trigger
// =============================================================================
#[test]
fn level0_trigger_starts_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 2,
            ..Default::default()
        },
    );
    for round in 0..2 {
        for i in 0..50 {
            db.put(format!("key_{i:03}"), format!("round_{round}")).unwrap();
        }
        db.flush(&FlushOptions::default()).unwrap();
    }
    db.wait_for_compactions().unwrap();

    let files = db.live_files_metadata();
    assert!(files.iter().all(|f| f.level == 1), "{files:?}");
    // Overwritten versions are gone.
    assert_eq!(files.iter().map(|f| f.entry_count).sum::<u64>(), 50);
    assert_eq!(db.get(b"key_010").unwrap(), Some(b"round_1".to_vec()));
    assert!(db.statistics().unwrap().compactions >= 1);
}

// =============================================================================
// Test 2: A lone file moves down without being rewritten
// =============================================================================
#[test]
fn single_file_is_moved_not_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 1,
            ..Default::default()
        },
    );
    db.put(b"a", b"1").unwrap();
    db.put(b"b", b"2").unwrap();
    db.flush(&FlushOptions::default()).unwrap();
    db.wait_for_compactions().unwrap();

    let files = db.live_files_metadata();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].level, 1);
    let stats = db.statistics().unwrap();
    assert_eq!(stats.trivial_moves, 1);
    assert_eq!(stats.compactions, 0);
    assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));

    // The move is recorded durably.
    let name = files[0].file_name.clone();
    drop(db);
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            level0_file_num_compaction_trigger: 1,
            ..Default::default()
        },
    );
    let files = db.live_files_metadata();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].level, 1);
    assert_eq!(files[0].file_name, name);
}

// =============================================================================
// Test 3: Manual compaction drops deleted keys at the bottom level
// =============================================================================
#[test]
fn compact_range_removes_deleted_data() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(dir.path(), ColumnFamilyOptions::default());
    for i in 0..200 {
        db.put(format!("key_{i:03}"), vec![b'x'; 100]).unwrap();
    }
    db.flush(&FlushOptions::default()).unwrap();
    for i in 0..200 {
        db.delete(format!("key_{i:03}")).unwrap();
    }
    db.compact_range(None, None).unwrap();

    assert!(db.live_files_metadata().is_empty());
    assert_eq!(db.get(b"key_100").unwrap(), None);
    let stats = db.statistics().unwrap();
    assert!(stats.compaction_keys_dropped >= 400);
    assert!(std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| !e.file_name().to_string_lossy().ends_with(".sst")));
}

// =============================================================================
// Test 4: Compacting an already compacted range changes nothing
// =============================================================================
#[test]
fn compact_range_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(dir.path(), ColumnFamilyOptions::default());
    for i in 0..300 {
        db.put(format!("key_{i:03}"), format!("v{i}")).unwrap();
    }
    db.compact_range(None, None).unwrap();
    let first = db.live_file_names();
    assert!(!first.is_empty());

    db.compact_range(None, None).unwrap();
    assert_eq!(db.live_file_names(), first);
    for i in (0..300).step_by(37) {
        assert_eq!(
            db.get(format!("key_{i:03}")).unwrap(),
            Some(format!("v{i}").into_bytes())
        );
    }
}

// =============================================================================
// Test 5: Outputs are split at the target file size
// =============================================================================
#[test]
fn outputs_split_at_target_size() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            target_file_size_base: 8 * 1024,
            num_levels: 3,
            ..Default::default()
        },
    );
    for i in 0..1000 {
        db.put(format!("key_{i:04}"), vec![b'v'; 100]).unwrap();
    }
    db.compact_range(None, None).unwrap();

    let files = db.live_files_metadata();
    assert!(files.len() > 5, "expected several outputs, got {}", files.len());
    assert!(files.iter().all(|f| f.level == 2));
    assert_levels_disjoint(&files);
    assert_eq!(files.iter().map(|f| f.entry_count).sum::<u64>(), 1000);
}

// =============================================================================
// Test 6: With automatic compaction off, only compact_range moves data
// =============================================================================
#[test]
fn compaction_style_none_keeps_level0() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            compaction_style: CompactionStyle::None,
            level0_file_num_compaction_trigger: 2,
            ..Default::default()
        },
    );
    for round in 0..5 {
        db.put(format!("key_{round}"), b"v").unwrap();
        db.flush(&FlushOptions::default()).unwrap();
    }
    db.wait_for_compactions().unwrap();
    let files = db.live_files_metadata();
    assert_eq!(files.len(), 5);
    assert!(files.iter().all(|f| f.level == 0));

    db.compact_range(None, None).unwrap();
    assert!(db.live_files_metadata().iter().all(|f| f.level == 6));
}

// =============================================================================
// Test 7: Sustained writes settle into a valid leveled shape
// =============================================================================
#[test]
fn sustained_writes_keep_levels_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        dir.path(),
        ColumnFamilyOptions {
            write_buffer_size: 8 * 1024,
            block_size: 512,
            level0_file_num_compaction_trigger: 2,
            max_bytes_for_level_base: 32 * 1024,
            target_file_size_base: 8 * 1024,
            num_levels: 4,
            ..Default::default()
        },
    );
    for i in 0..4000u32 {
        let key = format!("key_{:05}", (i * 7919) % 3000);
        db.put(key, format!("value_{i}")).unwrap();
    }
    db.wait_for_compactions().unwrap();

    let files = db.live_files_metadata();
    assert_levels_disjoint(&files);
    assert!(files.iter().any(|f| f.level >= 1));

    let mut expected = BTreeMap::new();
    for i in 0..4000u32 {
        expected.insert(format!("key_{:05}", (i * 7919) % 3000), format!("value_{i}"));
    }
    for (key, value) in &expected {
        assert_eq!(db.get(key).unwrap(), Some(value.clone().into_bytes()), "{key}");
    }
}

// =============================================================================
// Test 8: Writers and readers run while compactions install new versions
// =============================================================================
#[test]
fn concurrent_writes_during_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_with(
        dir.path(),
        ColumnFamilyOptions {
            write_buffer_size: 16 * 1024,
            level0_file_num_compaction_trigger: 2,
            max_bytes_for_level_base: 64 * 1024,
            ..Default::default()
        },
    ));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..1000 {
                    db.put(format!("t{t}_key_{i:04}"), format!("t{t}_v{i}")).unwrap();
                }
            })
        })
        .collect();
    let reader = {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            for _ in 0..20 {
                // Whatever is visible must be a value some writer wrote.
                if let Some(value) = db.get(b"t0_key_0000").unwrap() {
                    assert_eq!(value, b"t0_v0");
                }
            }
        })
    };
    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();
    db.wait_for_compactions().unwrap();

    for t in 0..4 {
        for i in (0..1000).step_by(97) {
            assert_eq!(
                db.get(format!("t{t}_key_{i:04}")).unwrap(),
                Some(format!("t{t}_v{i}").into_bytes())
            );
        }
    }
    assert_levels_disjoint(&db.live_files_metadata());
}
