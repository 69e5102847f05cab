// M02: MemTable tests
// Versioned lookups, tombstones, the owned iterator, freezing, and
// concurrent readers next to a writer.

use std::sync::Arc;
use std::thread;

use lsm_kv::iterator::StorageIterator;
use lsm_kv::memtable::{MemTable, MemTableManager};
use lsm_kv::types::{MAX_SEQUENCE_NUMBER, ParsedInternalKey, ValueType};

fn collect(table: &Arc<MemTable>) -> Vec<(Vec<u8>, u64, ValueType, Vec<u8>)> {
    let mut iter = table.iter();
    iter.seek_to_first().unwrap();
    let mut out = Vec::new();
    while iter.is_valid() {
        let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
        out.push((
            parsed.user_key.to_vec(),
            parsed.sequence,
            parsed.value_type,
            iter.value().to_vec(),
        ));
        iter.next().unwrap();
    }
    out
}

// =============================================================================
// Test 1: Put then get
// =============================================================================
#[test]
fn put_then_get() {
    let table = MemTable::new(1024 * 1024);
    table.put(b"name", b"lsm", 1);

    let entry = table.get(b"name", MAX_SEQUENCE_NUMBER).unwrap();
    assert_eq!(entry.sequence, 1);
    assert_eq!(entry.value_type, ValueType::Put);
    assert_eq!(entry.into_value(), Some(b"lsm".to_vec()));
    assert!(table.get(b"missing", MAX_SEQUENCE_NUMBER).is_none());
}

// =============================================================================
// Test 2: The read ceiling selects the version
// =============================================================================
#[test]
fn ceiling_selects_version() {
    let table = MemTable::new(1024 * 1024);
    table.put(b"k", b"v1", 1);
    table.put(b"k", b"v5", 5);
    table.put(b"k", b"v9", 9);

    let at = |ceiling| table.get(b"k", ceiling).and_then(|e| e.into_value());
    assert_eq!(at(MAX_SEQUENCE_NUMBER), Some(b"v9".to_vec()));
    assert_eq!(at(8), Some(b"v5".to_vec()));
    assert_eq!(at(5), Some(b"v5".to_vec()));
    assert_eq!(at(4), Some(b"v1".to_vec()));
    assert_eq!(table.get(b"k", 0), None);
}

// =============================================================================
// Test 3: A tombstone is returned as a delete, not as a miss
// =============================================================================
#[test]
fn tombstone_is_visible_as_delete() {
    let table = MemTable::new(1024 * 1024);
    table.put(b"k", b"v", 1);
    table.delete(b"k", 2);

    let entry = table.get(b"k", MAX_SEQUENCE_NUMBER).unwrap();
    assert_eq!(entry.value_type, ValueType::Delete);
    assert_eq!(entry.into_value(), None);
    // Older reads still see the put.
    assert_eq!(
        table.get(b"k", 1).and_then(|e| e.into_value()),
        Some(b"v".to_vec())
    );
    assert_eq!(table.len(), 2);
}

// =============================================================================
// Test 4: The iterator yields every version in internal key order
// =============================================================================
#[test]
fn iterator_yields_all_versions_in_order() {
    let table = Arc::new(MemTable::new(1024 * 1024));
    table.put(b"b", b"b1", 1);
    table.put(b"a", b"a2", 2);
    table.delete(b"b", 3);
    table.put(b"c", b"c4", 4);

    let entries = collect(&table);
    let summary: Vec<_> = entries
        .iter()
        .map(|(k, seq, t, _)| (k.as_slice(), *seq, *t))
        .collect();
    assert_eq!(
        summary,
        vec![
            (&b"a"[..], 2, ValueType::Put),
            (&b"b"[..], 3, ValueType::Delete),
            (&b"b"[..], 1, ValueType::Put),
            (&b"c"[..], 4, ValueType::Put),
        ]
    );
}

// =============================================================================
// Test 5: Iterator moves backwards and seeks
// =============================================================================
#[test]
fn iterator_prev_and_seek() {
    let table = Arc::new(MemTable::new(1024 * 1024));
    for (i, key) in [b"a", b"c", b"e"].iter().enumerate() {
        table.put(*key, b"v", i as u64 + 1);
    }

    let mut iter = table.iter();
    iter.seek_to_last().unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"e");
    iter.prev().unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"c");

    let target = lsm_kv::types::encode_internal_key(b"b", MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK);
    iter.seek(&target).unwrap();
    assert_eq!(ParsedInternalKey::parse(iter.key()).unwrap().user_key, b"c");

    iter.seek_to_first().unwrap();
    iter.prev().unwrap();
    assert!(!iter.is_valid());
}

// =============================================================================
// Test 6: Size tracking and the full threshold
// =============================================================================
#[test]
fn becomes_full_at_size_limit() {
    let table = MemTable::new(4096);
    assert!(table.is_empty());
    assert!(!table.is_full());

    let mut seq = 1;
    while !table.is_full() {
        table.put(format!("key_{seq}").as_bytes(), &[0u8; 100], seq);
        seq += 1;
    }
    assert!(table.size() >= 4096);
    assert!(seq > 10, "filled too early at {seq}");
}

// =============================================================================
// Test 7: Freezing moves the active table to the immutable list
// =============================================================================
#[test]
fn freeze_keeps_data_readable() {
    let manager = MemTableManager::new(1024 * 1024);
    assert!(manager.freeze().is_none(), "empty table must not be frozen");

    manager.put(b"old", b"1", 1);
    let frozen = manager.freeze().unwrap();
    assert_eq!(frozen.len(), 1);
    assert_eq!(manager.immutable_count(), 1);
    assert!(manager.active_is_empty());

    manager.put(b"old", b"2", 2);
    manager.put(b"new", b"3", 3);
    assert_eq!(
        manager.get(b"old", MAX_SEQUENCE_NUMBER).and_then(|e| e.into_value()),
        Some(b"2".to_vec())
    );
    assert_eq!(
        manager.get(b"old", 1).and_then(|e| e.into_value()),
        Some(b"1".to_vec())
    );

    manager.remove_immutable(frozen.id());
    assert_eq!(manager.immutable_count(), 0);
    assert!(manager.get(b"old", 1).is_none());
}

// =============================================================================
// Test 8: Frozen tables are listed newest first
// =============================================================================
#[test]
fn snapshot_lists_immutables_newest_first() {
    let manager = MemTableManager::new(1024 * 1024);
    manager.put(b"k", b"first", 1);
    let first = manager.freeze().unwrap();
    manager.put(b"k", b"second", 2);
    let second = manager.freeze().unwrap();

    let set = manager.snapshot();
    let ids: Vec<_> = set.immutables.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec![second.id(), first.id()]);
    assert_eq!(
        set.get(b"k", MAX_SEQUENCE_NUMBER).and_then(|e| e.into_value()),
        Some(b"second".to_vec())
    );
}

// =============================================================================
// Test 9: Readers run concurrently with a writer
// =============================================================================
#[test]
fn concurrent_readers_and_writer() {
    let manager = Arc::new(MemTableManager::new(64 * 1024 * 1024));
    for i in 0..1000u64 {
        manager.put(format!("base_{i:04}").as_bytes(), b"v", i + 1);
    }

    let writer = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            for i in 0..2000u64 {
                manager.put(format!("new_{i:04}").as_bytes(), b"w", 1001 + i);
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..1000u64 {
                    let key = format!("base_{i:04}");
                    let entry = manager.get(key.as_bytes(), MAX_SEQUENCE_NUMBER);
                    assert_eq!(entry.and_then(|e| e.into_value()), Some(b"v".to_vec()));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(
        manager.get(b"new_1999", MAX_SEQUENCE_NUMBER).and_then(|e| e.into_value()),
        Some(b"w".to_vec())
    );
}
