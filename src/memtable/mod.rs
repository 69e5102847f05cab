pub mod manager;
pub mod skiplist;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use parking_lot::RwLock;

pub use manager::MemTableManager;
use skiplist::SkipList;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{
    InternalKey, LookupEntry, ParsedInternalKey, SequenceNumber, ValueType, encode_internal_key,
};

static NEXT_MEMTABLE_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory sorted buffer for writes. Wraps a SkipList.
///
/// Every write goes here first. When size exceeds the threshold,
/// the memtable is frozen (becomes immutable) and flushed to an SSTable.
///
/// Every write is a new version keyed by (key, sequence); deletes are
/// tombstone versions. You can't just remove the key because older versions
/// may exist in SSTables on disk or be needed by a snapshot.
///
/// Shared as `Arc<MemTable>`: the writer inserts under a short write lock,
/// readers and iterators take short read locks.
pub struct MemTable {
    id: u64,
    data: RwLock<SkipList>,
    size_limit: usize,
}

impl MemTable {
    /// Create a new empty memtable with given size limit.
    pub fn new(size_limit: usize) -> Self {
        MemTable {
            id: NEXT_MEMTABLE_ID.fetch_add(1, AtomicOrdering::Relaxed),
            data: RwLock::new(SkipList::new()),
            size_limit,
        }
    }

    /// Process-unique identity, used to retire the table after its flush.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Insert a new version of `key`.
    pub fn put(&self, key: &[u8], value: &[u8], sequence: SequenceNumber) {
        self.add(sequence, ValueType::Put, key, value);
    }

    /// Mark a key as deleted by writing a tombstone.
    pub fn delete(&self, key: &[u8], sequence: SequenceNumber) {
        self.add(sequence, ValueType::Delete, key, &[]);
    }

    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let internal = encode_internal_key(key, sequence, value_type);
        self.data.write().insert(internal, value.to_vec());
    }

    /// Newest version of `key` with sequence <= `ceiling`, tombstones included.
    pub fn get(&self, key: &[u8], ceiling: SequenceNumber) -> Option<LookupEntry> {
        let target = InternalKey::for_seek(key, ceiling).encode();
        let data = self.data.read();
        let index = data.find_greater_or_equal(&target)?;
        let parsed = ParsedInternalKey::parse(data.key_at(index)).ok()?;
        if parsed.user_key != key {
            return None;
        }
        Some(LookupEntry {
            sequence: parsed.sequence,
            value_type: parsed.value_type,
            value: data.value_at(index).to_vec(),
        })
    }

    /// Sorted iterator over all entries (including tombstones).
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            table: Arc::clone(self),
            current: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Current memory usage in bytes.
    pub fn size(&self) -> usize {
        self.data.read().size_bytes()
    }

    /// Number of versions stored.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Check if memtable has reached the flush threshold.
    pub fn is_full(&self) -> bool {
        self.size() >= self.size_limit
    }
}

/// Owned cursor over a memtable.
///
/// Holds the memtable alive through its `Arc` and copies the current entry
/// out, so the lock is only held while moving. Entries inserted after the
/// iterator was created may show up; readers filter them by sequence.
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn position(&mut self, list: &SkipList, index: Option<usize>) {
        self.current = index;
        if let Some(i) = index {
            self.key.clear();
            self.key.extend_from_slice(list.key_at(i));
            self.value.clear();
            self.value.extend_from_slice(list.value_at(i));
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn key(&self) -> &[u8] {
        &self.key
    }

    fn value(&self) -> &[u8] {
        &self.value
    }

    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) -> Result<()> {
        if let Some(i) = self.current {
            let table = Arc::clone(&self.table);
            let list = table.data.read();
            self.position(&list, list.next_of(i));
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if self.current.is_some() {
            let table = Arc::clone(&self.table);
            let list = table.data.read();
            let index = list.find_less_than(&self.key);
            self.position(&list, index);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.position(&list, list.find_greater_or_equal(key));
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.position(&list, list.first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.position(&list, list.find_last());
        Ok(())
    }

    fn seek_before(&mut self, key: &[u8]) -> Result<()> {
        let table = Arc::clone(&self.table);
        let list = table.data.read();
        self.position(&list, list.find_less_than(key));
        Ok(())
    }
}

