//! Leveled compaction.
//!
//! Compaction merges SSTables to:
//! 1. Reduce read amplification (fewer files to search)
//! 2. Remove tombstones, superseded values and expired TTL records
//! 3. Keep every level within its size target
//!
//! Work happens in three phases: the picker chooses inputs while the
//! coordination lock is held, the executor merges them into new tables
//! without any lock, and the database installs the result with one
//! manifest edit.

pub mod executor;
pub mod picker;

use std::sync::Arc;

pub use executor::{CompactionContext, CompactionOutput, run_compaction};
pub use picker::{level_scores, needs_compaction, pick_compaction, pick_manual_compaction};

use crate::sstable::SSTable;

/// Inputs of one compaction of one column family.
#[derive(Clone)]
pub struct CompactionTask {
    pub column_family: u32,
    /// Source level.
    pub level: usize,
    /// Always `level + 1`.
    pub output_level: usize,
    /// Files taken from `level`.
    pub inputs: Vec<Arc<SSTable>>,
    /// Overlapping files taken from `output_level`.
    pub output_level_inputs: Vec<Arc<SSTable>>,
    /// Requested through `compact_range`; never a trivial move so that
    /// garbage collection runs over every file.
    pub manual: bool,
}

impl CompactionTask {
    /// A single file with nothing to merge against in the output level can
    /// change levels without being rewritten.
    pub fn is_trivial_move(&self) -> bool {
        !self.manual && self.inputs.len() == 1 && self.output_level_inputs.is_empty()
    }

    pub fn all_inputs(&self) -> impl Iterator<Item = &Arc<SSTable>> {
        self.inputs.iter().chain(self.output_level_inputs.iter())
    }

    pub fn input_bytes(&self) -> u64 {
        self.all_inputs().map(|t| t.meta().file_size).sum()
    }

    /// Largest user key among the source-level inputs.
    pub fn largest_input_key(&self) -> Option<&[u8]> {
        self.inputs.iter().map(|t| t.meta().max_key.as_slice()).max()
    }
}

/// Smallest and largest user key over `tables`.
pub(crate) fn key_range(tables: &[Arc<SSTable>]) -> Option<(Vec<u8>, Vec<u8>)> {
    let min = tables.iter().map(|t| &t.meta().min_key).min()?;
    let max = tables.iter().map(|t| &t.meta().max_key).max()?;
    Some((min.clone(), max.clone()))
}
