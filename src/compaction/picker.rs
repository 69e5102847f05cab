use std::sync::Arc;

use crate::compaction::{CompactionTask, key_range};
use crate::db::options::{ColumnFamilyOptions, CompactionStyle};
use crate::sstable::SSTable;
use crate::version::{CompactionState, Version};

/// Compaction score of every level that can be a source, highest first.
///
/// Level 0 is scored by file count against the trigger, deeper levels by
/// bytes against their size target. The last level is never a source.
pub fn level_scores(version: &Version, options: &ColumnFamilyOptions) -> Vec<(usize, f64)> {
    let last = options.num_levels.min(version.num_levels()).saturating_sub(1);
    let mut scores: Vec<(usize, f64)> = (0..last)
        .map(|level| {
            let score = if level == 0 {
                version.files(0).len() as f64 / options.level0_file_num_compaction_trigger as f64
            } else {
                version.level_size(level) as f64 / options.max_bytes_for_level(level) as f64
            };
            (level, score)
        })
        .collect();
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    scores
}

/// Whether some level is over its target. Ignores running compactions.
pub fn needs_compaction(version: &Version, options: &ColumnFamilyOptions) -> bool {
    options.compaction_style == CompactionStyle::Level
        && level_scores(version, options)
            .first()
            .is_some_and(|&(_, score)| score >= 1.0)
}

/// Pick the most urgent compaction whose levels are not in use.
pub fn pick_compaction(
    column_family: u32,
    version: &Version,
    options: &ColumnFamilyOptions,
    state: &CompactionState,
) -> Option<CompactionTask> {
    if options.compaction_style != CompactionStyle::Level {
        return None;
    }
    for (level, score) in level_scores(version, options) {
        if score < 1.0 {
            break;
        }
        if state.is_busy(level) || state.is_busy(level + 1) {
            continue;
        }
        let inputs = if level == 0 {
            version.files(0).to_vec()
        } else {
            vec![next_file_after_pointer(version.files(level), state.pointers.get(&level))?]
        };
        return Some(with_output_level_inputs(column_family, version, level, inputs, false));
    }
    None
}

/// Round-robin over the key space: the first file past the level's
/// compaction pointer, wrapping around to the start.
fn next_file_after_pointer(files: &[Arc<SSTable>], pointer: Option<&Vec<u8>>) -> Option<Arc<SSTable>> {
    let after = pointer.and_then(|p| {
        files
            .iter()
            .find(|t| t.meta().max_key.as_slice() > p.as_slice())
    });
    after.or_else(|| files.first()).cloned()
}

/// Compaction of `level` into `level + 1` restricted to `[begin, end]`.
/// Level 0 always contributes every file, since its files may overlap.
pub fn pick_manual_compaction(
    column_family: u32,
    version: &Version,
    level: usize,
    begin: Option<&[u8]>,
    end: Option<&[u8]>,
) -> Option<CompactionTask> {
    if level + 1 >= version.num_levels() {
        return None;
    }
    let overlapping = version.overlapping_files(level, begin, end);
    if overlapping.is_empty() {
        return None;
    }
    let inputs = if level == 0 {
        version.files(0).to_vec()
    } else {
        overlapping
    };
    Some(with_output_level_inputs(column_family, version, level, inputs, true))
}

fn with_output_level_inputs(
    column_family: u32,
    version: &Version,
    level: usize,
    inputs: Vec<Arc<SSTable>>,
    manual: bool,
) -> CompactionTask {
    let output_level_inputs = match key_range(&inputs) {
        Some((min, max)) => version.overlapping_files(level + 1, Some(&min), Some(&max)),
        None => Vec::new(),
    };
    CompactionTask {
        column_family,
        level,
        output_level: level + 1,
        inputs,
        output_level_inputs,
        manual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::SSTableBuilder;
    use crate::types::{ValueType, encode_internal_key};
    use tempfile::{TempDir, tempdir};

    fn table(dir: &TempDir, id: u64, keys: &[&str]) -> Arc<SSTable> {
        let path = dir.path().join(format!("{id:06}.sst"));
        let mut builder = SSTableBuilder::new(&path, id, 4096, None).unwrap();
        for key in keys {
            builder
                .add(&encode_internal_key(key.as_bytes(), id, ValueType::Put), &[0u8; 64])
                .unwrap();
        }
        builder.finish().unwrap();
        Arc::new(SSTable::open(&path).unwrap())
    }

    fn options(max_bytes_for_level_base: u64) -> ColumnFamilyOptions {
        ColumnFamilyOptions {
            num_levels: 4,
            level0_file_num_compaction_trigger: 2,
            max_bytes_for_level_base,
            ..Default::default()
        }
    }

    #[test]
    fn level0_compaction_takes_all_files_and_overlaps() {
        let dir = tempdir().unwrap();
        let version = Version::from_levels(vec![
            vec![table(&dir, 1, &["a", "c"]), table(&dir, 2, &["b", "d"])],
            vec![table(&dir, 3, &["c", "e"]), table(&dir, 4, &["x", "z"])],
            vec![],
            vec![],
        ]);
        let task =
            pick_compaction(0, &version, &options(1 << 30), &CompactionState::default()).unwrap();
        assert_eq!(task.level, 0);
        assert_eq!(task.inputs.len(), 2);
        let overlap: Vec<u64> = task.output_level_inputs.iter().map(|t| t.id()).collect();
        assert_eq!(overlap, vec![3]);
        assert!(!task.is_trivial_move());
    }

    #[test]
    fn busy_levels_are_skipped() {
        let dir = tempdir().unwrap();
        let version = Version::from_levels(vec![
            vec![table(&dir, 1, &["a"]), table(&dir, 2, &["b"])],
            vec![],
            vec![],
            vec![],
        ]);
        let mut state = CompactionState::default();
        state.set_busy(1, true);
        assert!(pick_compaction(0, &version, &options(1 << 30), &state).is_none());
    }

    #[test]
    fn deeper_levels_rotate_through_files() {
        let dir = tempdir().unwrap();
        let version = Version::from_levels(vec![
            vec![],
            vec![table(&dir, 1, &["a", "b"]), table(&dir, 2, &["m", "n"])],
            vec![],
            vec![],
        ]);
        let mut state = CompactionState::default();
        let first = pick_compaction(0, &version, &options(1), &state).unwrap();
        assert_eq!(first.inputs[0].id(), 1);
        assert!(first.is_trivial_move());

        state.pointers.insert(1, b"b".to_vec());
        let second = pick_compaction(0, &version, &options(1), &state).unwrap();
        assert_eq!(second.inputs[0].id(), 2);

        state.pointers.insert(1, b"n".to_vec());
        let wrapped = pick_compaction(0, &version, &options(1), &state).unwrap();
        assert_eq!(wrapped.inputs[0].id(), 1);
    }

    #[test]
    fn style_none_disables_automatic_picks() {
        let dir = tempdir().unwrap();
        let version = Version::from_levels(vec![
            vec![table(&dir, 1, &["a"]), table(&dir, 2, &["b"])],
            vec![],
        ]);
        let opts = ColumnFamilyOptions {
            compaction_style: CompactionStyle::None,
            ..options(1 << 30)
        };
        assert!(!needs_compaction(&version, &opts));
        assert!(pick_compaction(0, &version, &opts, &CompactionState::default()).is_none());
        assert!(pick_manual_compaction(0, &version, 0, None, None).unwrap().manual);
    }
}
