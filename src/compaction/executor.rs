use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::cache::BlockCache;
use crate::compaction::CompactionTask;
use crate::db::options::ColumnFamilyOptions;
use crate::error::Result;
use crate::iterator::{ConcatIterator, MergeIterator, StorageIterator};
use crate::sstable::{SSTable, SSTableBuilder, sst_path};
use crate::ttl;
use crate::types::{MAX_SEQUENCE_NUMBER, ParsedInternalKey, SequenceNumber, ValueType, encode_internal_key};
use crate::version::Version;

/// Everything a compaction needs besides its inputs.
pub struct CompactionContext<'a> {
    pub dir: &'a Path,
    pub options: &'a ColumnFamilyOptions,
    /// Version the task was picked from; used for base-level checks.
    pub version: &'a Version,
    /// Oldest sequence any reader may still ask for.
    pub smallest_snapshot: SequenceNumber,
    pub now_secs: u64,
    pub cache: Option<Arc<BlockCache>>,
    pub new_file_number: &'a (dyn Fn() -> u64 + Sync),
}

/// Validated output tables, in key order.
pub struct CompactionOutput {
    pub tables: Vec<Arc<SSTable>>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub entries_dropped: u64,
}

/// Merge the task's inputs into new tables at the output level.
///
/// On error every output written so far is removed and the inputs are
/// left as they were.
pub fn run_compaction(task: &CompactionTask, ctx: &CompactionContext<'_>) -> Result<CompactionOutput> {
    let mut writer = OutputWriter {
        ctx,
        target_file_size: ctx.options.target_file_size(task.output_level),
        builder: None,
        finished: Vec::new(),
        last_user_key: Vec::new(),
    };
    match merge_inputs(task, ctx, &mut writer) {
        Ok(entries_dropped) => {
            let tables = writer.finish()?;
            let bytes_written = tables.iter().map(|t| t.meta().file_size).sum();
            debug!(
                column_family = task.column_family,
                level = task.level,
                inputs = task.inputs.len() + task.output_level_inputs.len(),
                outputs = tables.len(),
                entries_dropped,
                "compaction merge finished"
            );
            Ok(CompactionOutput {
                tables,
                bytes_read: task.input_bytes(),
                bytes_written,
                entries_dropped,
            })
        }
        Err(e) => {
            writer.abandon();
            Err(e)
        }
    }
}

fn merge_inputs(
    task: &CompactionTask,
    ctx: &CompactionContext<'_>,
    writer: &mut OutputWriter<'_, '_>,
) -> Result<u64> {
    let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
    if task.level == 0 {
        for table in &task.inputs {
            children.push(Box::new(table.iter_uncached()));
        }
    } else {
        children.push(Box::new(ConcatIterator::new(task.inputs.clone(), false)));
    }
    children.push(Box::new(ConcatIterator::new(task.output_level_inputs.clone(), false)));

    let mut iter = MergeIterator::new(children)?;
    iter.seek_to_first()?;

    let ttl = ctx.options.ttl;
    let mut previous = Vec::new();
    let mut current_user_key: Option<Vec<u8>> = None;
    let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;
    let mut dropped = 0u64;

    while iter.is_valid() {
        let key = iter.key();
        // The same record can reach the merge twice when a flush raced a
        // recovery; keep one copy.
        if key == previous.as_slice() {
            iter.next()?;
            continue;
        }
        let parsed = ParsedInternalKey::parse(key)?;
        if current_user_key.as_deref() != Some(parsed.user_key) {
            current_user_key = Some(parsed.user_key.to_vec());
            last_sequence_for_key = MAX_SEQUENCE_NUMBER;
        }

        let expired = match (ttl, parsed.value_type) {
            (Some(ttl), ValueType::Put) => ttl::is_expired(iter.value(), ttl, ctx.now_secs),
            _ => false,
        };
        let value_type = if expired { ValueType::Delete } else { parsed.value_type };

        let drop = if last_sequence_for_key <= ctx.smallest_snapshot {
            // A newer record of this key is visible to every reader.
            true
        } else {
            value_type == ValueType::Delete
                && parsed.sequence <= ctx.smallest_snapshot
                && ctx.version.is_base_level_for(parsed.user_key, task.output_level)
        };
        last_sequence_for_key = parsed.sequence;

        if drop {
            dropped += 1;
        } else if expired {
            let tombstone = encode_internal_key(parsed.user_key, parsed.sequence, ValueType::Delete);
            writer.add(&tombstone, &[])?;
        } else {
            writer.add(key, iter.value())?;
        }

        previous.clear();
        previous.extend_from_slice(iter.key());
        iter.next()?;
    }
    Ok(dropped)
}

struct OutputWriter<'c, 'a> {
    ctx: &'c CompactionContext<'a>,
    target_file_size: u64,
    builder: Option<SSTableBuilder>,
    finished: Vec<Arc<SSTable>>,
    last_user_key: Vec<u8>,
}

impl OutputWriter<'_, '_> {
    /// Append a record, cutting a new file once the current one reached its
    /// target size. Files are only cut between user keys, so one key never
    /// spans two files of a level.
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let user_key = crate::types::user_key(key);
        let cut = self
            .builder
            .as_ref()
            .is_some_and(|b| b.estimated_size() >= self.target_file_size && user_key != self.last_user_key.as_slice());
        if cut {
            self.finish_current()?;
        }
        if self.builder.is_none() {
            let number = (self.ctx.new_file_number)();
            self.builder = Some(SSTableBuilder::new(
                &sst_path(self.ctx.dir, number),
                number,
                self.ctx.options.block_size,
                self.ctx.options.bloom_false_positive_rate,
            )?);
        }
        if let Some(builder) = self.builder.as_mut() {
            builder.add(key, value)?;
        }
        self.last_user_key.clear();
        self.last_user_key.extend_from_slice(user_key);
        Ok(())
    }

    /// Finish the open file and reopen it to validate what was written.
    fn finish_current(&mut self) -> Result<()> {
        let Some(builder) = self.builder.take() else {
            return Ok(());
        };
        let path = builder.path().to_path_buf();
        builder.finish()?;
        let table = SSTable::open_with_cache(&path, self.ctx.cache.clone())?;
        self.finished.push(Arc::new(table));
        Ok(())
    }

    fn finish(mut self) -> Result<Vec<Arc<SSTable>>> {
        if let Err(e) = self.finish_current() {
            self.abandon();
            return Err(e);
        }
        Ok(std::mem::take(&mut self.finished))
    }

    /// Delete every output of a failed compaction.
    fn abandon(&mut self) {
        if let Some(builder) = self.builder.take() {
            let path = builder.path().to_path_buf();
            if builder.abandon().is_err() {
                let _ = std::fs::remove_file(path);
            }
        }
        for table in self.finished.drain(..) {
            table.mark_obsolete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::{TempDir, tempdir};

    fn table(dir: &TempDir, id: u64, entries: &[(&str, u64, ValueType, &[u8])]) -> Arc<SSTable> {
        let path = sst_path(dir.path(), id);
        let mut builder = SSTableBuilder::new(&path, id, 4096, Some(0.01)).unwrap();
        for (key, seq, vt, value) in entries {
            builder
                .add(&encode_internal_key(key.as_bytes(), *seq, *vt), value)
                .unwrap();
        }
        builder.finish().unwrap();
        Arc::new(SSTable::open(&path).unwrap())
    }

    fn contents(tables: &[Arc<SSTable>]) -> Vec<(String, u64, ValueType)> {
        let mut out = Vec::new();
        for table in tables {
            let mut iter = table.iter();
            iter.seek_to_first().unwrap();
            while iter.is_valid() {
                let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
                out.push((
                    String::from_utf8(parsed.user_key.to_vec()).unwrap(),
                    parsed.sequence,
                    parsed.value_type,
                ));
                iter.next().unwrap();
            }
        }
        out
    }

    fn run(
        dir: &TempDir,
        task: &CompactionTask,
        version: &Version,
        options: &ColumnFamilyOptions,
        smallest_snapshot: u64,
        now_secs: u64,
    ) -> CompactionOutput {
        let counter = AtomicU64::new(100);
        let next = || counter.fetch_add(1, Ordering::SeqCst);
        let ctx = CompactionContext {
            dir: dir.path(),
            options,
            version,
            smallest_snapshot,
            now_secs,
            cache: None,
            new_file_number: &next,
        };
        run_compaction(task, &ctx).unwrap()
    }

    #[test]
    fn drops_shadowed_versions_and_base_level_tombstones() {
        let dir = tempdir().unwrap();
        let newer = table(&dir, 2, &[("a", 5, ValueType::Put, b"a5"), ("b", 6, ValueType::Delete, b"")]);
        let older = table(&dir, 1, &[("a", 1, ValueType::Put, b"a1"), ("b", 2, ValueType::Put, b"b2")]);
        let version = Version::from_levels(vec![vec![newer.clone(), older.clone()], vec![], vec![]]);
        let task = CompactionTask {
            column_family: 0,
            level: 0,
            output_level: 1,
            inputs: vec![newer, older],
            output_level_inputs: vec![],
            manual: false,
        };

        let output = run(&dir, &task, &version, &ColumnFamilyOptions::default(), 10, 0);
        assert_eq!(contents(&output.tables), vec![("a".to_string(), 5, ValueType::Put)]);
        assert_eq!(output.entries_dropped, 3);
    }

    #[test]
    fn snapshot_keeps_versions_it_can_see() {
        let dir = tempdir().unwrap();
        let newer = table(&dir, 2, &[("a", 5, ValueType::Put, b"a5")]);
        let older = table(&dir, 1, &[("a", 1, ValueType::Put, b"a1")]);
        let version = Version::from_levels(vec![vec![newer.clone(), older.clone()], vec![]]);
        let task = CompactionTask {
            column_family: 0,
            level: 0,
            output_level: 1,
            inputs: vec![newer, older],
            output_level_inputs: vec![],
            manual: false,
        };

        let output = run(&dir, &task, &version, &ColumnFamilyOptions::default(), 3, 0);
        let kept: Vec<u64> = contents(&output.tables).iter().map(|e| e.1).collect();
        assert_eq!(kept, vec![5, 1]);
    }

    #[test]
    fn tombstone_survives_when_deeper_level_holds_key() {
        let dir = tempdir().unwrap();
        let l0 = table(&dir, 3, &[("k", 9, ValueType::Delete, b"")]);
        let l2 = table(&dir, 1, &[("k", 1, ValueType::Put, b"old")]);
        let version = Version::from_levels(vec![vec![l0.clone()], vec![], vec![l2]]);
        let task = CompactionTask {
            column_family: 0,
            level: 0,
            output_level: 1,
            inputs: vec![l0],
            output_level_inputs: vec![],
            manual: true,
        };

        let output = run(&dir, &task, &version, &ColumnFamilyOptions::default(), 20, 0);
        assert_eq!(contents(&output.tables), vec![("k".to_string(), 9, ValueType::Delete)]);
    }

    #[test]
    fn expired_ttl_records_become_tombstones() {
        let dir = tempdir().unwrap();
        let fresh = ttl::append_timestamp(b"fresh", 1_000);
        let stale = ttl::append_timestamp(b"stale", 10);
        let l0 = table(&dir, 1, &[("f", 2, ValueType::Put, &fresh), ("s", 1, ValueType::Put, &stale)]);
        let l2 = table(&dir, 2, &[("s", 0, ValueType::Put, &stale)]);
        let version = Version::from_levels(vec![vec![l0.clone()], vec![], vec![l2]]);
        let task = CompactionTask {
            column_family: 0,
            level: 0,
            output_level: 1,
            inputs: vec![l0],
            output_level_inputs: vec![],
            manual: true,
        };
        let options = ColumnFamilyOptions {
            ttl: Some(Duration::from_secs(100)),
            ..Default::default()
        };

        let output = run(&dir, &task, &version, &options, 5, 1_050);
        assert_eq!(
            contents(&output.tables),
            vec![
                ("f".to_string(), 2, ValueType::Put),
                ("s".to_string(), 1, ValueType::Delete),
            ]
        );
    }

    #[test]
    fn outputs_are_cut_at_target_size_between_user_keys() {
        let dir = tempdir().unwrap();
        let value = vec![7u8; 200];
        let entries: Vec<(String, u64)> = (0..40).map(|i| (format!("key{i:03}"), 100 - i)).collect();
        let borrowed: Vec<(&str, u64, ValueType, &[u8])> = entries
            .iter()
            .map(|(k, s)| (k.as_str(), *s, ValueType::Put, value.as_slice()))
            .collect();
        let input = table(&dir, 1, &borrowed);
        let version = Version::from_levels(vec![vec![input.clone()], vec![]]);
        let task = CompactionTask {
            column_family: 0,
            level: 0,
            output_level: 1,
            inputs: vec![input],
            output_level_inputs: vec![],
            manual: true,
        };
        let options = ColumnFamilyOptions {
            target_file_size_base: 2048,
            ..Default::default()
        };

        let output = run(&dir, &task, &version, &options, 1000, 0);
        assert!(output.tables.len() > 1);
        for pair in output.tables.windows(2) {
            assert!(pair[0].meta().max_key < pair[1].meta().min_key);
        }
        assert_eq!(contents(&output.tables).len(), 40);
    }
}
