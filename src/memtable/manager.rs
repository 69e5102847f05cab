use std::sync::Arc;

use parking_lot::RwLock;

use crate::memtable::MemTable;
use crate::types::{LookupEntry, SequenceNumber, ValueType};

/// The memtables of one column family: one active table taking writes and
/// the frozen tables waiting for flush, newest first.
pub struct MemTableManager {
    tables: RwLock<MemTableSet>,
    size_limit: usize,
}

/// Point-in-time view of a column family's memtables.
#[derive(Clone)]
pub struct MemTableSet {
    pub active: Arc<MemTable>,
    /// Frozen tables, newest first.
    pub immutables: Vec<Arc<MemTable>>,
}

impl MemTableSet {
    /// Newest version at or below `ceiling` in any of the tables.
    pub fn get(&self, key: &[u8], ceiling: SequenceNumber) -> Option<LookupEntry> {
        std::iter::once(&self.active)
            .chain(self.immutables.iter())
            .find_map(|table| table.get(key, ceiling))
    }
}

impl MemTableManager {
    pub fn new(size_limit: usize) -> Self {
        MemTableManager {
            tables: RwLock::new(MemTableSet {
                active: Arc::new(MemTable::new(size_limit)),
                immutables: Vec::new(),
            }),
            size_limit,
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8], sequence: SequenceNumber) {
        self.add(sequence, ValueType::Put, key, value);
    }

    pub fn delete(&self, key: &[u8], sequence: SequenceNumber) {
        self.add(sequence, ValueType::Delete, key, &[]);
    }

    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        self.tables.read().active.add(sequence, value_type, key, value);
    }

    /// Newest version at or below `ceiling`, checking the active table first
    /// and then the frozen ones from newest to oldest.
    pub fn get(&self, key: &[u8], ceiling: SequenceNumber) -> Option<LookupEntry> {
        self.snapshot().get(key, ceiling)
    }

    /// Move the active table to the frozen list and start a fresh one.
    /// Returns the frozen table, or `None` if the active table was empty.
    pub fn freeze(&self) -> Option<Arc<MemTable>> {
        let mut tables = self.tables.write();
        if tables.active.is_empty() {
            return None;
        }
        let frozen = std::mem::replace(&mut tables.active, Arc::new(MemTable::new(self.size_limit)));
        tables.immutables.insert(0, Arc::clone(&frozen));
        Some(frozen)
    }

    /// Drop a frozen table once its SSTable is installed.
    pub fn remove_immutable(&self, id: u64) {
        self.tables.write().immutables.retain(|t| t.id() != id);
    }

    pub fn immutable_count(&self) -> usize {
        self.tables.read().immutables.len()
    }

    pub fn active_is_full(&self) -> bool {
        self.tables.read().active.is_full()
    }

    pub fn active_is_empty(&self) -> bool {
        self.tables.read().active.is_empty()
    }

    pub fn snapshot(&self) -> MemTableSet {
        self.tables.read().clone()
    }
}
