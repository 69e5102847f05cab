use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;

use crate::db::options::ColumnFamilyOptions;
use crate::error::{Error, Result};
use crate::memtable::MemTableManager;
use crate::version::Version;

/// Name of the column family every database has.
pub const DEFAULT_COLUMN_FAMILY_NAME: &str = "default";

/// A column family to open together with the database.
#[derive(Debug, Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl ColumnFamilyDescriptor {
    pub fn new(name: impl Into<String>, options: ColumnFamilyOptions) -> Self {
        ColumnFamilyDescriptor {
            name: name.into(),
            options,
        }
    }
}

/// Runtime state of one column family.
pub(crate) struct ColumnFamilyData {
    pub id: u32,
    pub name: String,
    pub options: ColumnFamilyOptions,
    pub memtables: MemTableManager,
    /// Live files. Replaced, never mutated, under the version-set lock.
    pub current: ArcSwap<Version>,
    dropped: AtomicBool,
}

impl ColumnFamilyData {
    pub fn new(id: u32, name: String, options: ColumnFamilyOptions, version: Version) -> Self {
        ColumnFamilyData {
            id,
            name,
            memtables: MemTableManager::new(options.write_buffer_size),
            options,
            current: ArcSwap::from_pointee(version),
            dropped: AtomicBool::new(false),
        }
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }

    pub fn check_not_dropped(&self) -> Result<()> {
        if self.is_dropped() {
            return Err(Error::ColumnFamilyDropped(self.name.clone()));
        }
        Ok(())
    }
}

/// Handle to a column family, used to address it in reads and writes.
///
/// A handle outlives a drop of its column family; operations through it then
/// fail with [`Error::ColumnFamilyDropped`].
#[derive(Clone)]
pub struct ColumnFamilyHandle {
    pub(crate) inner: Arc<ColumnFamilyData>,
}

impl ColumnFamilyHandle {
    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &ColumnFamilyOptions {
        &self.inner.options
    }
}

impl fmt::Debug for ColumnFamilyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnFamilyHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// The open column families, by id.
#[derive(Default)]
pub(crate) struct ColumnFamilySet {
    by_id: HashMap<u32, Arc<ColumnFamilyData>>,
    /// Names of column families dropped while the database was open.
    dropped: HashMap<u32, String>,
}

impl ColumnFamilySet {
    pub fn insert(&mut self, cf: Arc<ColumnFamilyData>) {
        self.by_id.insert(cf.id, cf);
    }

    pub fn remove(&mut self, id: u32) -> Option<Arc<ColumnFamilyData>> {
        let cf = self.by_id.remove(&id)?;
        self.dropped.insert(id, cf.name.clone());
        Some(cf)
    }

    /// The live column family with `id`.
    pub fn get(&self, id: u32) -> Result<&Arc<ColumnFamilyData>> {
        if let Some(cf) = self.by_id.get(&id) {
            return Ok(cf);
        }
        match self.dropped.get(&id) {
            Some(name) => Err(Error::ColumnFamilyDropped(name.clone())),
            None => Err(Error::ColumnFamilyNotFound(format!("id {id}"))),
        }
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<ColumnFamilyData>> {
        self.by_id.values().find(|cf| cf.name == name)
    }

    /// Every column family, ordered by id.
    pub fn all(&self) -> Vec<Arc<ColumnFamilyData>> {
        let mut all: Vec<_> = self.by_id.values().cloned().collect();
        all.sort_by_key(|cf| cf.id);
        all
    }
}
