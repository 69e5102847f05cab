//! Immutable views of a column family's file set.
//!
//! A [`Version`] is never modified: flushes and compactions build a new one
//! with [`Version::apply`] and publish it through the column family's
//! `ArcSwap`. Readers hold an `Arc<Version>` (and through it the tables) for
//! as long as they need a consistent view.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::db::stats::{Statistics, Ticker};
use crate::error::Result;
use crate::iterator::{ConcatIterator, StorageIterator};
use crate::manifest::{Manifest, ManifestRecord};
use crate::sstable::SSTable;
use crate::types::{LookupEntry, SequenceNumber};

#[derive(Default)]
pub struct Version {
    /// Level 0 newest first; deeper levels sorted by smallest key.
    levels: Vec<Vec<Arc<SSTable>>>,
}

impl Version {
    pub fn new(num_levels: usize) -> Self {
        Version {
            levels: vec![Vec::new(); num_levels],
        }
    }

    /// Build a version from unsorted per-level file lists.
    pub fn from_levels(mut levels: Vec<Vec<Arc<SSTable>>>) -> Self {
        sort_levels(&mut levels);
        Version { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<SSTable>] {
        self.levels.get(level).map_or(&[], |files| files.as_slice())
    }

    pub fn levels(&self) -> &[Vec<Arc<SSTable>>] {
        &self.levels
    }

    pub fn level_size(&self, level: usize) -> u64 {
        self.files(level).iter().map(|t| t.meta().file_size).sum()
    }

    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Newest version of `user_key` at or below `ceiling` across all levels.
    ///
    /// Level-0 files may overlap, so all candidates are checked newest
    /// first; deeper levels hold at most one candidate each.
    pub(crate) fn get(
        &self,
        user_key: &[u8],
        ceiling: SequenceNumber,
        stats: &Statistics,
    ) -> Result<Option<LookupEntry>> {
        for (level, files) in self.levels.iter().enumerate() {
            let candidates: &[Arc<SSTable>] = if level == 0 {
                files
            } else {
                let index = files.partition_point(|t| t.meta().max_key.as_slice() < user_key);
                match files.get(index) {
                    Some(t) if t.meta().min_key.as_slice() <= user_key => std::slice::from_ref(t),
                    _ => &[],
                }
            };
            for table in candidates {
                let meta = table.meta();
                if user_key < meta.min_key.as_slice() || user_key > meta.max_key.as_slice() {
                    continue;
                }
                if !table.may_contain(user_key) {
                    stats.record(Ticker::BloomFilterUseful, 1);
                    continue;
                }
                stats.record(Ticker::SstableReads, 1);
                if let Some(entry) = table.get(user_key, ceiling)? {
                    return Ok(Some(entry));
                }
            }
        }
        Ok(None)
    }

    /// Files of `level` whose user-key range intersects `[start, end]`.
    pub fn overlapping_files(
        &self,
        level: usize,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<SSTable>> {
        self.files(level)
            .iter()
            .filter(|t| t.meta().overlaps(start, end))
            .cloned()
            .collect()
    }

    /// Whether no level deeper than `level` can hold `user_key`.
    pub fn is_base_level_for(&self, user_key: &[u8], level: usize) -> bool {
        self.levels
            .iter()
            .skip(level + 1)
            .flatten()
            .all(|t| !t.meta().overlaps(Some(user_key), Some(user_key)))
    }

    /// One iterator per level-0 file, then one per deeper level.
    pub fn iterators(&self, fill_cache: bool) -> Vec<Box<dyn StorageIterator>> {
        let mut iters: Vec<Box<dyn StorageIterator>> = Vec::new();
        for table in self.files(0) {
            iters.push(Box::new(if fill_cache {
                table.iter()
            } else {
                table.iter_uncached()
            }));
        }
        for files in self.levels.iter().skip(1) {
            if !files.is_empty() {
                iters.push(Box::new(ConcatIterator::new(files.clone(), fill_cache)));
            }
        }
        iters
    }

    /// A new version with `deletes` removed and `adds` inserted.
    /// Entries are `(level, file id)` and `(level, table)`.
    pub fn apply(&self, deletes: &[(usize, u64)], adds: &[(usize, Arc<SSTable>)]) -> Version {
        let mut levels = self.levels.clone();
        for &(level, id) in deletes {
            if let Some(files) = levels.get_mut(level) {
                files.retain(|t| t.id() != id);
            }
        }
        for (level, table) in adds {
            if *level >= levels.len() {
                levels.resize(*level + 1, Vec::new());
            }
            levels[*level].push(Arc::clone(table));
        }
        sort_levels(&mut levels);
        Version { levels }
    }

    /// Every table, with its level.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<SSTable>)> {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |t| (level, t)))
    }
}

fn sort_levels(levels: &mut [Vec<Arc<SSTable>>]) {
    for (level, files) in levels.iter_mut().enumerate() {
        if level == 0 {
            files.sort_by(|a, b| b.id().cmp(&a.id()));
        } else {
            files.sort_by(|a, b| a.meta().min_key.cmp(&b.meta().min_key));
        }
    }
}

/// Compaction bookkeeping of one column family.
#[derive(Debug, Default)]
pub struct CompactionState {
    /// level → largest user key of the last size-triggered compaction.
    pub pointers: BTreeMap<usize, Vec<u8>>,
    /// Levels currently used as input or output by a running compaction.
    pub busy_levels: Vec<bool>,
}

impl CompactionState {
    pub fn is_busy(&self, level: usize) -> bool {
        self.busy_levels.get(level).copied().unwrap_or(false)
    }

    pub fn set_busy(&mut self, level: usize, busy: bool) {
        if level >= self.busy_levels.len() {
            self.busy_levels.resize(level + 1, false);
        }
        self.busy_levels[level] = busy;
    }
}

/// State guarded by the database's coordination lock: the manifest log and
/// everything that must change together with it.
pub struct VersionSet {
    manifest: Manifest,
    log_number: u64,
    next_column_family_id: u32,
    compaction: HashMap<u32, CompactionState>,
}

impl VersionSet {
    pub fn new(manifest: Manifest, log_number: u64, next_column_family_id: u32) -> Self {
        VersionSet {
            manifest,
            log_number,
            next_column_family_id,
            compaction: HashMap::new(),
        }
    }

    /// Durably append a record. Callers install the matching in-memory
    /// state only after this returns `Ok`.
    pub fn log(&mut self, record: &ManifestRecord) -> Result<()> {
        self.manifest.append(record)?;
        if let ManifestRecord::VersionEdit(edit) = record {
            if let Some(log_number) = edit.log_number {
                self.log_number = self.log_number.max(log_number);
            }
            if let Some(next_id) = edit.next_column_family_id {
                self.next_column_family_id = self.next_column_family_id.max(next_id);
            }
        }
        if let ManifestRecord::CreateColumnFamily { id, .. } = record {
            self.next_column_family_id = self.next_column_family_id.max(id + 1);
        }
        Ok(())
    }

    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    pub fn next_column_family_id(&self) -> u32 {
        self.next_column_family_id
    }

    pub fn compaction_state(&mut self, column_family: u32) -> &mut CompactionState {
        self.compaction.entry(column_family).or_default()
    }

    pub fn forget_column_family(&mut self, column_family: u32) {
        self.compaction.remove(&column_family);
    }
}
