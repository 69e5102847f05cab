use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::Result;
use crate::wal::record::WALRecord;
use crate::wal::{SyncPolicy, wal_path};

/// Writes WAL records to a file on disk.
///
/// Every write must reach the log before it's acknowledged to the client.
/// The WAL ensures crash recovery: on restart, replay the WAL to
/// reconstruct the memtable.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache
///   file.sync_all()    → OS page cache → physical disk
pub struct WALWriter {
    writer: BufWriter<File>,
    offset: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    last_sync: Instant,
}

impl WALWriter {
    /// Create a new WAL writer at the given path, appending to any existing content.
    pub fn new(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(WALWriter {
            writer: BufWriter::new(file),
            offset,
            sync_policy,
            writes_since_sync: 0,
            last_sync: Instant::now(),
        })
    }

    /// Append a record to the WAL.
    /// Depending on SyncPolicy, may fsync after this write.
    pub fn append(&mut self, record: &WALRecord) -> Result<()> {
        self.append_with_sync(record, false)
    }

    /// Append a record, forcing an fsync when `force_sync` is set.
    pub fn append_with_sync(&mut self, record: &WALRecord, force_sync: bool) -> Result<()> {
        let encoded = record.encode();

        self.writer.write_all(&encoded)?;
        self.writer.flush()?;
        self.offset += encoded.len() as u64;
        self.writes_since_sync += 1;

        let due = match self.sync_policy {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryNWrites(n) => self.writes_since_sync >= n,
            SyncPolicy::EveryNMillis(ms) => self.last_sync.elapsed() >= Duration::from_millis(ms),
        };
        if force_sync || due {
            self.sync()?;
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Current file offset (bytes written so far).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Appends since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }
}

/// Manages WAL file rotation.
///
/// When memtables are frozen for flush:
/// 1. Create new WAL for the new active memtables
/// 2. Keep old WAL until its memtables are flushed and the manifest says so
/// 3. Delete old WAL
///
/// Old WAL is only deleted AFTER its SSTables are fully written and the
/// manifest edit that references them is durable. Violating this loses data.
pub struct WALManager {
    dir: PathBuf,
    active_writer: WALWriter,
    active_number: u64,
    active_path: PathBuf,
    sync_policy: SyncPolicy,
}

impl WALManager {
    /// Open (or create) WAL file `number` in `dir` as the active log.
    pub fn new(dir: &Path, number: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let active_path = wal_path(dir, number);
        let active_writer = WALWriter::new(&active_path, sync_policy)?;
        Ok(WALManager {
            dir: dir.to_path_buf(),
            active_writer,
            active_number: number,
            active_path,
            sync_policy,
        })
    }

    /// Rotate: sync and freeze the current WAL, start `new_number`.
    /// Returns the path of the old WAL (caller deletes after SSTable flush).
    pub fn rotate(&mut self, new_number: u64) -> Result<PathBuf> {
        self.active_writer.sync()?;
        let new_path = wal_path(&self.dir, new_number);
        let new_writer = WALWriter::new(&new_path, self.sync_policy)?;
        self.active_writer = new_writer;
        self.active_number = new_number;
        let old_path = std::mem::replace(&mut self.active_path, new_path);
        debug!(old = %old_path.display(), new_number, "rotated WAL");
        Ok(old_path)
    }

    /// Delete an old WAL file (safe only after its data is in SSTables).
    pub fn delete_wal(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn active_writer(&mut self) -> &mut WALWriter {
        &mut self.active_writer
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn active_number(&self) -> u64 {
        self.active_number
    }
}
