//! Persistent catalog of column families and their live SSTables.
//!
//! The manifest is an append-only log of bincode records, each framed as
//! `len(4) ‖ crc32(4) ‖ payload`. Replaying the log from the start rebuilds
//! a [`ManifestState`]. At every open the state is written out again as a
//! compact log (temp file + rename), so the file never grows without bound.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::db::options::ColumnFamilyOptions;
use crate::error::{Error, Result};
use crate::sstable::SSTableMeta;
use crate::types::SequenceNumber;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";
const FRAME_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ManifestRecord {
    CreateColumnFamily {
        id: u32,
        name: String,
        options: ColumnFamilyOptions,
    },
    DropColumnFamily {
        id: u32,
    },
    VersionEdit(VersionEdit),
}

/// One atomic change to the file set of one or more column families, plus
/// the counters that must move with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionEdit {
    pub adds: Vec<AddFile>,
    pub deletes: Vec<DeleteFile>,
    pub compaction_pointers: Vec<CompactionPointer>,
    /// WAL files numbered below this are fully reflected in SSTables.
    pub log_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub next_file_number: Option<u64>,
    pub next_column_family_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFile {
    pub column_family: u32,
    pub level: u32,
    pub meta: SSTableMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteFile {
    pub column_family: u32,
    pub level: u32,
    pub file_id: u64,
}

/// Where the next size-triggered compaction of `level` starts: just past
/// `largest_key` (a user key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionPointer {
    pub column_family: u32,
    pub level: u32,
    pub largest_key: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ColumnFamilyState {
    pub name: String,
    pub options: ColumnFamilyOptions,
    /// level → file id → meta.
    pub levels: BTreeMap<u32, BTreeMap<u64, SSTableMeta>>,
    pub compaction_pointers: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ManifestState {
    pub column_families: BTreeMap<u32, ColumnFamilyState>,
    pub log_number: u64,
    pub last_sequence: SequenceNumber,
    pub next_file_number: u64,
    pub next_column_family_id: u32,
}

impl ManifestState {
    pub fn apply(&mut self, record: ManifestRecord) {
        match record {
            ManifestRecord::CreateColumnFamily { id, name, options } => {
                self.column_families.insert(
                    id,
                    ColumnFamilyState {
                        name,
                        options,
                        levels: BTreeMap::new(),
                        compaction_pointers: BTreeMap::new(),
                    },
                );
                self.next_column_family_id = self.next_column_family_id.max(id + 1);
            }
            ManifestRecord::DropColumnFamily { id } => {
                self.column_families.remove(&id);
            }
            ManifestRecord::VersionEdit(edit) => self.apply_edit(edit),
        }
    }

    fn apply_edit(&mut self, edit: VersionEdit) {
        for del in edit.deletes {
            if let Some(level) = self
                .column_families
                .get_mut(&del.column_family)
                .and_then(|cf| cf.levels.get_mut(&del.level))
            {
                level.remove(&del.file_id);
            }
        }
        for add in edit.adds {
            // Adds for a column family dropped in the meantime are ignored;
            // the file is cleaned up as an orphan.
            if let Some(cf) = self.column_families.get_mut(&add.column_family) {
                cf.levels
                    .entry(add.level)
                    .or_default()
                    .insert(add.meta.id, add.meta);
            }
        }
        for pointer in edit.compaction_pointers {
            if let Some(cf) = self.column_families.get_mut(&pointer.column_family) {
                cf.compaction_pointers.insert(pointer.level, pointer.largest_key);
            }
        }
        if let Some(log_number) = edit.log_number {
            self.log_number = self.log_number.max(log_number);
        }
        if let Some(last_sequence) = edit.last_sequence {
            self.last_sequence = self.last_sequence.max(last_sequence);
        }
        if let Some(next_file_number) = edit.next_file_number {
            self.next_file_number = self.next_file_number.max(next_file_number);
        }
        if let Some(next_id) = edit.next_column_family_id {
            self.next_column_family_id = self.next_column_family_id.max(next_id);
        }
    }

    /// Records that rebuild this state from nothing.
    pub fn to_records(&self) -> Vec<ManifestRecord> {
        let mut records = Vec::new();
        for (&id, cf) in &self.column_families {
            records.push(ManifestRecord::CreateColumnFamily {
                id,
                name: cf.name.clone(),
                options: cf.options.clone(),
            });
            let mut edit = VersionEdit::default();
            for (&level, files) in &cf.levels {
                for meta in files.values() {
                    edit.adds.push(AddFile {
                        column_family: id,
                        level,
                        meta: meta.clone(),
                    });
                }
            }
            for (&level, key) in &cf.compaction_pointers {
                edit.compaction_pointers.push(CompactionPointer {
                    column_family: id,
                    level,
                    largest_key: key.clone(),
                });
            }
            records.push(ManifestRecord::VersionEdit(edit));
        }
        records.push(ManifestRecord::VersionEdit(VersionEdit {
            log_number: Some(self.log_number),
            last_sequence: Some(self.last_sequence),
            next_file_number: Some(self.next_file_number),
            next_column_family_id: Some(self.next_column_family_id),
            ..Default::default()
        }));
        records
    }

    pub fn column_family_by_name(&self, name: &str) -> Option<(u32, &ColumnFamilyState)> {
        self.column_families
            .iter()
            .find(|(_, cf)| cf.name == name)
            .map(|(&id, cf)| (id, cf))
    }
}

/// Open handle to the manifest log.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Manifest {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path_in(dir).exists()
    }

    /// Read and replay the manifest in `dir`.
    pub fn load(dir: &Path) -> Result<ManifestState> {
        let data = std::fs::read(Self::path_in(dir))?;
        replay(&data)
    }

    /// Write `state` as a fresh manifest and atomically replace the old one.
    /// Returns a handle positioned for appending further edits.
    pub fn create(dir: &Path, state: &ManifestState) -> Result<Self> {
        let tmp_path = dir.join(MANIFEST_TMP_FILE);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in state.to_records() {
                writer.write_all(&frame(&record)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        let path = Self::path_in(dir);
        std::fs::rename(&tmp_path, &path)?;
        sync_dir(dir)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        debug!(path = %path.display(), families = state.column_families.len(), "wrote manifest");
        Ok(Manifest {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Append one record and fsync it. The change is durable on return.
    pub fn append(&mut self, record: &ManifestRecord) -> Result<()> {
        self.writer.write_all(&frame(record)?)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn frame(record: &ManifestRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidArgument("manifest record too large".into()))?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Rebuild state from framed records. A record cut off by the end of the
/// file is an interrupted append and ends the replay; a complete record
/// with a bad checksum is corruption.
pub fn replay(data: &[u8]) -> Result<ManifestState> {
    let mut state = ManifestState::default();
    let mut offset = 0usize;
    while offset < data.len() {
        if offset + FRAME_HEADER_SIZE > data.len() {
            warn!(offset, "manifest ends in a partial record header");
            break;
        }
        let len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap());
        let start = offset + FRAME_HEADER_SIZE;
        if start + len > data.len() {
            warn!(offset, "manifest ends in a partial record");
            break;
        }
        let payload = &data[start..start + len];
        if crc32fast::hash(payload) != crc {
            return Err(Error::Corruption(format!(
                "manifest record at offset {offset} has a bad checksum"
            )));
        }
        let record: ManifestRecord = bincode::deserialize(payload)?;
        state.apply(record);
        offset = start + len;
    }
    Ok(state)
}

pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(id: u64, min: &[u8], max: &[u8]) -> SSTableMeta {
        SSTableMeta {
            id,
            level: 0,
            min_key: min.to_vec(),
            max_key: max.to_vec(),
            file_size: 100,
            entry_count: 3,
            smallest_sequence: 1,
            largest_sequence: 3,
        }
    }

    fn base_state() -> ManifestState {
        let mut state = ManifestState::default();
        state.apply(ManifestRecord::CreateColumnFamily {
            id: 0,
            name: "default".into(),
            options: ColumnFamilyOptions::default(),
        });
        state
    }

    #[test]
    fn edits_add_and_delete_files() {
        let mut state = base_state();
        state.apply(ManifestRecord::VersionEdit(VersionEdit {
            adds: vec![AddFile {
                column_family: 0,
                level: 0,
                meta: meta(5, b"a", b"c"),
            }],
            log_number: Some(6),
            last_sequence: Some(3),
            next_file_number: Some(7),
            ..Default::default()
        }));
        assert_eq!(state.column_families[&0].levels[&0].len(), 1);

        state.apply(ManifestRecord::VersionEdit(VersionEdit {
            adds: vec![AddFile {
                column_family: 0,
                level: 1,
                meta: meta(5, b"a", b"c"),
            }],
            deletes: vec![DeleteFile {
                column_family: 0,
                level: 0,
                file_id: 5,
            }],
            ..Default::default()
        }));
        let cf = &state.column_families[&0];
        assert!(cf.levels[&0].is_empty());
        assert!(cf.levels[&1].contains_key(&5));
        assert_eq!(state.log_number, 6);
        assert_eq!(state.next_file_number, 7);
    }

    #[test]
    fn rewrite_then_replay_preserves_state() {
        let dir = tempdir().unwrap();
        let mut state = base_state();
        state.apply(ManifestRecord::CreateColumnFamily {
            id: 1,
            name: "users".into(),
            options: ColumnFamilyOptions {
                num_levels: 4,
                ..Default::default()
            },
        });
        state.apply(ManifestRecord::VersionEdit(VersionEdit {
            adds: vec![AddFile {
                column_family: 1,
                level: 2,
                meta: meta(9, b"k", b"m"),
            }],
            next_file_number: Some(10),
            ..Default::default()
        }));

        let mut manifest = Manifest::create(dir.path(), &state).unwrap();
        manifest
            .append(&ManifestRecord::DropColumnFamily { id: 0 })
            .unwrap();
        drop(manifest);

        let loaded = Manifest::load(dir.path()).unwrap();
        assert_eq!(loaded.column_families.len(), 1);
        let (id, users) = loaded.column_family_by_name("users").unwrap();
        assert_eq!(id, 1);
        assert_eq!(users.options.num_levels, 4);
        assert!(users.levels[&2].contains_key(&9));
        assert_eq!(loaded.next_column_family_id, 2);
        assert_eq!(loaded.next_file_number, 10);
    }

    #[test]
    fn torn_tail_is_ignored_but_bad_checksum_is_corruption() {
        let record = ManifestRecord::DropColumnFamily { id: 3 };
        let framed = frame(&record).unwrap();

        let mut torn = framed.clone();
        torn.extend_from_slice(&framed[..framed.len() - 1]);
        assert!(replay(&torn).is_ok());

        let mut flipped = framed.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xFF;
        assert!(matches!(replay(&flipped), Err(Error::Corruption(_))));
    }
}
