//! Opening a database directory: manifest replay, column family
//! reconciliation, WAL replay and cleanup of files nothing references.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::batch::DEFAULT_COLUMN_FAMILY_ID;
use crate::cache::BlockCache;
use crate::db::background::write_level0_table;
use crate::db::column_family::{ColumnFamilyData, ColumnFamilyDescriptor, DEFAULT_COLUMN_FAMILY_NAME};
use crate::db::options::{ColumnFamilyOptions, Options};
use crate::error::{Error, Result};
use crate::manifest::{ColumnFamilyState, Manifest, ManifestState};
use crate::sstable::{SSTable, parse_sst_file_name, sst_path};
use crate::types::SequenceNumber;
use crate::version::Version;
use crate::wal::{WALReader, list_wal_files};

/// Everything `DB::open` needs to start serving.
pub(crate) struct Recovered {
    pub manifest: Manifest,
    pub state: ManifestState,
    pub column_families: Vec<Arc<ColumnFamilyData>>,
    pub last_sequence: SequenceNumber,
    /// Next unused file number, after the new WAL's.
    pub next_file_number: u64,
    /// Number of the WAL to write to.
    pub wal_number: u64,
}

pub(crate) fn recover(
    dir: &Path,
    options: &Options,
    descriptors: &[ColumnFamilyDescriptor],
    cache: Option<Arc<BlockCache>>,
) -> Result<Recovered> {
    let mut state = load_or_init(dir, options)?;
    reconcile_column_families(&mut state, options, descriptors)?;

    let mut column_families = Vec::new();
    let mut max_table_id = 0;
    for (&id, cf_state) in &state.column_families {
        let version = open_version(dir, cf_state, cache.clone())?;
        if let Some(max) = version.all_files().map(|(_, t)| t.id()).max() {
            max_table_id = max_table_id.max(max);
        }
        column_families.push(Arc::new(ColumnFamilyData::new(
            id,
            cf_state.name.clone(),
            cf_state.options.clone(),
            version,
        )));
    }

    let by_id: HashMap<u32, Arc<ColumnFamilyData>> =
        column_families.iter().map(|cf| (cf.id, Arc::clone(cf))).collect();
    let replay = replay_wals(dir, state.log_number, &by_id)?;

    let last_sequence = state.last_sequence.max(replay.last_sequence);
    let mut next_file_number = state
        .next_file_number
        .max(replay.max_wal_number + 1)
        .max(max_table_id + 1)
        .max(max_file_number_in(dir)? + 1);

    // Replayed data goes to level 0 right away so the old WALs can go.
    for cf in &column_families {
        cf.memtables.freeze();
        let pending = cf.memtables.snapshot().immutables;
        for memtable in pending.iter().rev() {
            let table = write_level0_table(dir, next_file_number, memtable, &cf.options, cache.clone())?;
            next_file_number += 1;
            if let Some(cf_state) = state.column_families.get_mut(&cf.id) {
                let mut meta = table.meta().clone();
                meta.level = 0;
                cf_state.levels.entry(0).or_default().insert(meta.id, meta);
            }
            let next = cf.current.load().apply(&[], &[(0, table)]);
            cf.current.store(Arc::new(next));
            cf.memtables.remove_immutable(memtable.id());
        }
    }

    let wal_number = next_file_number;
    next_file_number += 1;
    state.log_number = wal_number;
    state.last_sequence = last_sequence;
    state.next_file_number = next_file_number;
    let manifest = Manifest::create(dir, &state)?;

    delete_unreferenced_files(dir, &state)?;
    info!(
        path = %dir.display(),
        column_families = column_families.len(),
        last_sequence,
        replayed_records = replay.records,
        "recovered database"
    );
    Ok(Recovered {
        manifest,
        state,
        column_families,
        last_sequence,
        next_file_number,
        wal_number,
    })
}

fn load_or_init(dir: &Path, options: &Options) -> Result<ManifestState> {
    if Manifest::exists(dir) {
        if options.error_if_exists {
            return Err(Error::InvalidArgument(format!(
                "database already exists: {}",
                dir.display()
            )));
        }
        return Manifest::load(dir);
    }
    if !options.create_if_missing {
        return Err(Error::InvalidArgument(format!(
            "database does not exist: {} (create_if_missing is false)",
            dir.display()
        )));
    }
    std::fs::create_dir_all(dir)?;
    let mut state = ManifestState {
        next_file_number: 1,
        ..Default::default()
    };
    state.column_families.insert(
        DEFAULT_COLUMN_FAMILY_ID,
        empty_column_family(DEFAULT_COLUMN_FAMILY_NAME, options.default_cf.clone()),
    );
    state.next_column_family_id = DEFAULT_COLUMN_FAMILY_ID + 1;
    debug!(path = %dir.display(), "creating new database");
    Ok(state)
}

fn empty_column_family(name: &str, options: ColumnFamilyOptions) -> ColumnFamilyState {
    ColumnFamilyState {
        name: name.to_string(),
        options,
        levels: BTreeMap::new(),
        compaction_pointers: BTreeMap::new(),
    }
}

/// Apply the options requested at open to the persisted column families
/// and create the requested ones that are missing.
fn reconcile_column_families(
    state: &mut ManifestState,
    options: &Options,
    descriptors: &[ColumnFamilyDescriptor],
) -> Result<()> {
    let mut requested: Vec<(&str, &ColumnFamilyOptions)> = Vec::new();
    if !descriptors.iter().any(|d| d.name == DEFAULT_COLUMN_FAMILY_NAME) {
        requested.push((DEFAULT_COLUMN_FAMILY_NAME, &options.default_cf));
    }
    let mut seen = HashSet::new();
    for descriptor in descriptors {
        if !seen.insert(descriptor.name.as_str()) {
            return Err(Error::InvalidArgument(format!(
                "column family listed twice: {}",
                descriptor.name
            )));
        }
        descriptor.options.validate()?;
        requested.push((descriptor.name.as_str(), &descriptor.options));
    }

    for (name, cf_options) in requested {
        let existing = state.column_family_by_name(name).map(|(id, _)| id);
        match existing {
            Some(id) => {
                if let Some(cf_state) = state.column_families.get_mut(&id) {
                    check_compatible(cf_state, cf_options)?;
                    cf_state.options = cf_options.clone();
                }
            }
            None if options.create_missing_column_families || name == DEFAULT_COLUMN_FAMILY_NAME => {
                let id = state.next_column_family_id;
                state.next_column_family_id += 1;
                state
                    .column_families
                    .insert(id, empty_column_family(name, cf_options.clone()));
                info!(name, id, "created column family at open");
            }
            None => {
                return Err(Error::InvalidArgument(format!(
                    "column family {name} does not exist (create_missing_column_families is false)"
                )));
            }
        }
    }
    Ok(())
}

/// Options given at open may retune a family but not reinterpret its data.
fn check_compatible(cf_state: &ColumnFamilyState, options: &ColumnFamilyOptions) -> Result<()> {
    // Stored values carry a timestamp suffix exactly when the family has a
    // ttl; the duration may change, its presence may not.
    if cf_state.options.ttl.is_some() != options.ttl.is_some() {
        return Err(Error::InvalidConfiguration(format!(
            "column family {} was created {} a ttl; it cannot be reopened {}",
            cf_state.name,
            if cf_state.options.ttl.is_some() { "with" } else { "without" },
            if options.ttl.is_some() { "with one" } else { "without one" },
        )));
    }
    let deepest = cf_state
        .levels
        .iter()
        .filter(|(_, files)| !files.is_empty())
        .map(|(&level, _)| level as usize)
        .max();
    match deepest {
        Some(level) if level >= options.num_levels => Err(Error::InvalidConfiguration(format!(
            "column family {} has files at level {level} but num_levels is {}",
            cf_state.name, options.num_levels
        ))),
        _ => Ok(()),
    }
}

fn open_version(dir: &Path, cf_state: &ColumnFamilyState, cache: Option<Arc<BlockCache>>) -> Result<Version> {
    let mut levels = vec![Vec::new(); cf_state.options.num_levels];
    for (&level, files) in &cf_state.levels {
        let level = level as usize;
        if level >= levels.len() {
            levels.resize(level + 1, Vec::new());
        }
        for &id in files.keys() {
            let path = sst_path(dir, id);
            if !path.exists() {
                return Err(Error::Corruption(format!(
                    "missing table {} referenced by the manifest",
                    path.display()
                )));
            }
            let table = SSTable::open_with_cache(&path, cache.clone())?;
            levels[level].push(Arc::new(table));
        }
    }
    Ok(Version::from_levels(levels))
}

struct WalReplay {
    last_sequence: SequenceNumber,
    max_wal_number: u64,
    records: usize,
}

/// Re-apply every WAL numbered `log_number` or above, oldest first.
///
/// A damaged tail of the newest WAL is the trace of an interrupted append:
/// the file is cut back to its last complete record. Damage anywhere else
/// fails the open.
fn replay_wals(
    dir: &Path,
    log_number: u64,
    column_families: &HashMap<u32, Arc<ColumnFamilyData>>,
) -> Result<WalReplay> {
    let files: Vec<_> = list_wal_files(dir)?
        .into_iter()
        .filter(|(number, _)| *number >= log_number)
        .collect();
    let mut replay = WalReplay {
        last_sequence: 0,
        max_wal_number: 0,
        records: 0,
    };

    for (index, (number, path)) in files.iter().enumerate() {
        replay.max_wal_number = replay.max_wal_number.max(*number);
        let reader = WALReader::new(path)?;
        let mut iter = reader.iter();
        for record in iter.by_ref() {
            let record = record?;
            for (i, op) in record.batch.ops().iter().enumerate() {
                // Records of dropped column families are skipped.
                let Some(cf) = column_families.get(&op.column_family) else {
                    continue;
                };
                cf.memtables
                    .add(record.sequence + i as u64, op.value_type, &op.key, &op.value);
                if cf.memtables.active_is_full() {
                    cf.memtables.freeze();
                }
            }
            replay.last_sequence = replay.last_sequence.max(record.last_sequence());
            replay.records += 1;
        }

        let valid_len = iter.valid_len();
        if valid_len < reader.len() {
            if index + 1 < files.len() {
                return Err(Error::Corruption(format!(
                    "{} is damaged at offset {valid_len} and newer logs follow it",
                    path.display()
                )));
            }
            warn!(
                path = %path.display(),
                valid_len,
                dropped_bytes = reader.len() - valid_len,
                "truncating partial record at the end of the WAL"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
    }
    Ok(replay)
}

/// Largest WAL or SSTable number present in `dir`, or 0.
fn max_file_number_in(dir: &Path) -> Result<u64> {
    let mut max = 0;
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let number = parse_sst_file_name(name).or_else(|| {
            name.strip_suffix(".wal")
                .and_then(|stem| stem.parse::<u64>().ok())
        });
        if let Some(number) = number {
            max = max.max(number);
        }
    }
    Ok(max)
}

/// Delete WALs older than the manifest's log number and tables that no
/// column family references.
fn delete_unreferenced_files(dir: &Path, state: &ManifestState) -> Result<()> {
    for (number, path) in list_wal_files(dir)? {
        if number < state.log_number {
            debug!(number, "deleting obsolete WAL");
            std::fs::remove_file(&path)?;
        }
    }
    let live: HashSet<u64> = state
        .column_families
        .values()
        .flat_map(|cf| cf.levels.values())
        .flat_map(|files| files.keys().copied())
        .collect();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(parse_sst_file_name) else {
            continue;
        };
        if !live.contains(&id) {
            warn!(file = %entry.path().display(), "deleting orphan table");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
