pub mod reader;
pub mod record;
pub mod writer;

use std::path::{Path, PathBuf};

pub use reader::{WALIterator, WALReader};
pub use record::WALRecord;
pub use writer::{WALManager, WALWriter};

use crate::error::Result;

/// Controls when the WAL is fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: zero data loss, ~10x slower (each fsync waits for disk)
///   - EveryNWrites: batched durability, lose up to N writes on crash
///   - EveryNMillis: bounded loss window, much higher throughput
///
/// Records always reach the OS page cache before `append` returns, so a
/// process crash loses nothing; the policy only matters for machine crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// fsync after every record. Safest, slowest.
    EveryWrite,
    /// fsync every N records. Batched durability.
    EveryNWrites(usize),
    /// fsync when at least N ms passed since the last one, checked on append.
    EveryNMillis(u64),
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::EveryNMillis(1000)
    }
}

/// Path of WAL file `number` inside `dir`.
pub fn wal_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{number:06}.wal"))
}

/// All WAL files in `dir`, sorted by number.
pub fn list_wal_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "wal") {
            if let Some(number) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                files.push((number, path));
            }
        }
    }
    files.sort_by_key(|(number, _)| *number);
    Ok(files)
}
