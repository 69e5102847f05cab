//! The database handle.
//!
//! Write path: a batch takes the write lock, gets consecutive sequence
//! numbers, is appended to the WAL and then applied to the memtables of the
//! column families it touches. The new last sequence is published only
//! after that, so readers never see part of a batch.
//!
//! Read path: no lock beyond short reads of the memtable set and the
//! current [`Version`]; the first source holding a version of the key at or
//! below the read sequence answers.
//!
//! Flushes and compactions run on dedicated background threads.

mod background;
pub mod column_family;
pub mod iterator;
pub mod options;
mod recovery;
pub mod stats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use column_family::{ColumnFamilyDescriptor, ColumnFamilyHandle, DEFAULT_COLUMN_FAMILY_NAME};
pub use iterator::DbIterator;
pub use options::{
    ColumnFamilyOptions, CompactionStyle, FlushOptions, Options, ReadOptions, WriteOptions,
};
pub use stats::Stats;

use crate::batch::{DEFAULT_COLUMN_FAMILY_ID, WriteBatch};
use crate::cache::BlockCache;
use crate::compaction::{CompactionTask, pick_manual_compaction};
use crate::error::{Error, Result};
use crate::manifest::{MANIFEST_FILE, Manifest, ManifestRecord};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::sstable::{parse_sst_file_name, sst_file_name};
use crate::ttl;
use crate::types::{MAX_SEQUENCE_NUMBER, SequenceNumber, ValueType};
use crate::version::{Version, VersionSet};
use crate::wal::{WALManager, WALRecord, list_wal_files};
use background::{BackgroundState, FlushJob};
use column_family::{ColumnFamilyData, ColumnFamilySet};
use stats::{Statistics, Ticker};

/// Metadata of one live SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFileMetadata {
    pub column_family_name: String,
    pub level: usize,
    /// File name relative to the database directory, e.g. `000012.sst`.
    pub file_name: String,
    pub file_size: u64,
    pub entry_count: u64,
    pub smallest_key: Vec<u8>,
    pub largest_key: Vec<u8>,
    pub smallest_sequence: SequenceNumber,
    pub largest_sequence: SequenceNumber,
}

struct WriteState {
    wal: WALManager,
}

/// State shared between the handle and the background threads.
pub(crate) struct DbInner {
    path: PathBuf,
    options: Options,
    /// Serializes writers. Also held while freezing memtables.
    write: Mutex<WriteState>,
    /// Coordination lock: manifest and compaction bookkeeping. Taken after
    /// `write` and before `column_families` when several are needed.
    versions: Mutex<VersionSet>,
    column_families: RwLock<ColumnFamilySet>,
    last_sequence: AtomicU64,
    next_file_number: AtomicU64,
    snapshots: Arc<SnapshotList>,
    cache: Option<Arc<BlockCache>>,
    stats: Statistics,
    background: BackgroundState,
    shutting_down: AtomicBool,
}

impl DbInner {
    fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }
}

/// An open database.
///
/// Dropping the handle closes the database; see [`DB::close`].
pub struct DB {
    inner: Arc<DbInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DB {
    /// Open the database at `path` with only the column families it already
    /// has (and `"default"`).
    pub fn open(options: Options, path: impl AsRef<Path>) -> Result<DB> {
        Self::open_cf(options, path, Vec::new())
    }

    /// Open the database at `path`. Options of listed column families
    /// replace the persisted ones; unlisted column families keep theirs.
    pub fn open_cf(
        options: Options,
        path: impl AsRef<Path>,
        descriptors: Vec<ColumnFamilyDescriptor>,
    ) -> Result<DB> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let cache = (options.block_cache_capacity > 0)
            .then(|| Arc::new(BlockCache::new(options.block_cache_capacity)));

        let recovered = recovery::recover(&path, &options, &descriptors, cache.clone())?;
        let wal = WALManager::new(&path, recovered.wal_number, options.wal_sync_policy)?;

        let mut version_set = VersionSet::new(
            recovered.manifest,
            recovered.state.log_number,
            recovered.state.next_column_family_id,
        );
        for (&id, cf_state) in &recovered.state.column_families {
            let state = version_set.compaction_state(id);
            for (&level, key) in &cf_state.compaction_pointers {
                state.pointers.insert(level as usize, key.clone());
            }
        }
        let mut column_families = ColumnFamilySet::default();
        for cf in recovered.column_families {
            column_families.insert(cf);
        }

        let (flush_tx, flush_rx) = crossbeam_channel::unbounded();
        let (compaction_tx, compaction_rx) = crossbeam_channel::unbounded();
        let inner = Arc::new(DbInner {
            path: path.clone(),
            stats: Statistics::new(options.enable_statistics),
            options,
            write: Mutex::new(WriteState { wal }),
            versions: Mutex::new(version_set),
            column_families: RwLock::new(column_families),
            last_sequence: AtomicU64::new(recovered.last_sequence),
            next_file_number: AtomicU64::new(recovered.next_file_number),
            snapshots: Arc::new(SnapshotList::new()),
            cache,
            background: BackgroundState::new(flush_tx, compaction_tx),
            shutting_down: AtomicBool::new(false),
        });

        let mut workers = Vec::new();
        let flush_inner = Arc::clone(&inner);
        workers.push(
            std::thread::Builder::new()
                .name("lsm-flush".into())
                .spawn(move || background::flush_worker(flush_inner, flush_rx))?,
        );
        for i in 0..inner.options.max_background_compactions {
            let worker_inner = Arc::clone(&inner);
            let signals = compaction_rx.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("lsm-compaction-{i}"))
                    .spawn(move || background::compaction_worker(worker_inner, signals))?,
            );
        }

        inner.maybe_schedule_compaction();
        info!(path = %path.display(), "opened database");
        Ok(DB {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Names of the column families of the database at `path`, by id.
    pub fn list_column_families(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let state = Manifest::load(path.as_ref())?;
        Ok(state
            .column_families
            .values()
            .map(|cf| cf.name.clone())
            .collect())
    }

    /// Delete every file of the database at `path`. The database must not
    /// be open.
    pub fn destroy(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let ours = name == MANIFEST_FILE
                || name == "MANIFEST.tmp"
                || parse_sst_file_name(name).is_some()
                || name.ends_with(".wal");
            if ours {
                std::fs::remove_file(entry.path())?;
            }
        }
        if std::fs::read_dir(path)?.next().is_none() {
            std::fs::remove_dir(path)?;
        }
        info!(path = %path.display(), "destroyed database");
        Ok(())
    }

    /// Stop background work and make the WAL durable.
    ///
    /// Running flushes and compactions finish first; queued flushes are
    /// still written. Later writes fail with [`Error::ShutdownInProgress`].
    /// Calling it more than once is harmless.
    pub fn close(&self) -> Result<()> {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return Ok(());
        }
        self.inner.shutting_down.store(true, Ordering::Release);
        self.inner.background.close_queues();
        self.inner.background.cond.notify_all();
        for worker in workers {
            if worker.join().is_err() {
                warn!("background worker panicked");
            }
        }
        self.inner.write.lock().wal.active_writer().sync()?;
        info!(path = %self.inner.path.display(), "closed database");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    // ---- writes ----

    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.as_ref(), value.as_ref());
        self.write(batch)
    }

    pub fn put_cf(
        &self,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put_cf(cf, key.as_ref(), value.as_ref());
        self.write(batch)
    }

    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key.as_ref());
        self.write(batch)
    }

    pub fn delete_cf(&self, cf: &ColumnFamilyHandle, key: impl AsRef<[u8]>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete_cf(cf, key.as_ref());
        self.write(batch)
    }

    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_opt(batch, &WriteOptions::default())
    }

    /// Apply `batch` atomically.
    pub fn write_opt(&self, mut batch: WriteBatch, options: &WriteOptions) -> Result<()> {
        self.check_writable()?;
        if batch.is_empty() {
            return Ok(());
        }
        let inner = &self.inner;
        let mut write = inner.write.lock();
        self.check_writable()?;

        let now = inner.options.clock.now_secs();
        let mut targets = Vec::with_capacity(batch.len());
        {
            let column_families = inner.column_families.read();
            for op in batch.ops_mut() {
                let cf = Arc::clone(column_families.get(op.column_family)?);
                if cf.options.ttl.is_some() && op.value_type == ValueType::Put {
                    op.value = ttl::append_timestamp(&op.value, now);
                }
                targets.push(cf);
            }
        }

        self.make_room_for_write(&mut write)?;

        let count = batch.len() as u64;
        let first = inner.last_sequence.load(Ordering::Acquire) + 1;
        if first + count - 1 > MAX_SEQUENCE_NUMBER {
            return Err(Error::InvalidArgument("sequence numbers exhausted".into()));
        }
        let bytes = batch.size_bytes() as u64;
        let record = WALRecord::new(first, batch);
        let writer = write.wal.active_writer();
        if let Err(e) = writer.append_with_sync(&record, options.sync) {
            inner.set_background_error(&e);
            return Err(e);
        }
        inner.stats.record(Ticker::WalBytes, record.encoded_size() as u64);
        if writer.writes_since_sync() == 0 {
            inner.stats.record(Ticker::WalSyncs, 1);
        }

        for (i, (op, cf)) in record.batch.ops().iter().zip(&targets).enumerate() {
            cf.memtables
                .add(first + i as u64, op.value_type, &op.key, &op.value);
        }
        inner.last_sequence.store(first + count - 1, Ordering::Release);
        inner.stats.record(Ticker::KeysWritten, count);
        inner.stats.record(Ticker::BytesWritten, bytes);
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShutdownInProgress);
        }
        match self.inner.background_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Freeze the memtables once one is full, stalling while a column
    /// family already has the most memtables it may hold.
    fn make_room_for_write(&self, write: &mut WriteState) -> Result<()> {
        let inner = &self.inner;
        let mut stall_started: Option<Instant> = None;
        loop {
            let column_families = inner.column_families.read().all();
            if !column_families.iter().any(|cf| cf.memtables.active_is_full()) {
                break;
            }
            let too_many = |cfs: &[Arc<ColumnFamilyData>]| {
                cfs.iter().any(|cf| {
                    cf.memtables.immutable_count() + 1 >= cf.options.max_write_buffer_number
                })
            };
            if !too_many(&column_families) {
                self.freeze_and_rotate(write, &column_families)?;
                break;
            }

            let mut counters = inner.background.counters.lock();
            if let Some(msg) = &counters.error {
                return Err(Error::Background(msg.clone()));
            }
            if inner.shutting_down.load(Ordering::Acquire) {
                return Err(Error::ShutdownInProgress);
            }
            if stall_started.is_none() {
                stall_started = Some(Instant::now());
                inner.stats.record(Ticker::WriteStalls, 1);
                debug!("stalling writes until a flush completes");
            }
            // Rechecked under the lock the flush thread signals with.
            if too_many(&column_families) {
                inner
                    .background
                    .cond
                    .wait_for(&mut counters, Duration::from_millis(100));
            }
        }
        if let Some(started) = stall_started {
            inner
                .stats
                .record(Ticker::WriteStallMicros, started.elapsed().as_micros() as u64);
        }
        Ok(())
    }

    /// Switch to a new WAL and freeze every non-empty active memtable into
    /// one flush job.
    fn freeze_and_rotate(
        &self,
        write: &mut WriteState,
        column_families: &[Arc<ColumnFamilyData>],
    ) -> Result<()> {
        let inner = &self.inner;
        let number = inner.new_file_number();
        write.wal.rotate(number)?;
        let memtables: Vec<_> = column_families
            .iter()
            .filter(|cf| !cf.is_dropped())
            .filter_map(|cf| cf.memtables.freeze().map(|m| (Arc::clone(cf), m)))
            .collect();
        debug!(tables = memtables.len(), log_number = number, "froze memtables");
        inner.schedule_flush(FlushJob {
            memtables,
            log_number: number,
        });
        Ok(())
    }

    // ---- reads ----

    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_cf_opt(&self.default_cf()?, key, &ReadOptions::default())
    }

    pub fn get_opt(&self, key: impl AsRef<[u8]>, options: &ReadOptions) -> Result<Option<Vec<u8>>> {
        self.get_cf_opt(&self.default_cf()?, key, options)
    }

    pub fn get_cf(&self, cf: &ColumnFamilyHandle, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_cf_opt(cf, key, &ReadOptions::default())
    }

    /// Newest value of `key` visible at the read sequence, or `None`.
    pub fn get_cf_opt(
        &self,
        cf: &ColumnFamilyHandle,
        key: impl AsRef<[u8]>,
        options: &ReadOptions,
    ) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let (ceiling, _pin) = self.read_view(options.snapshot.as_ref())?;
        let cf = &cf.inner;
        cf.check_not_dropped()?;
        let stats = &self.inner.stats;
        stats.record(Ticker::KeysRead, 1);

        // Memtables first: a flush installs its table before retiring the
        // memtable, so this order never misses a record.
        let memtables = cf.memtables.snapshot();
        let version = cf.current.load_full();
        let entry = match memtables.get(key, ceiling) {
            Some(entry) => {
                stats.record(Ticker::MemtableHits, 1);
                Some(entry)
            }
            None => {
                stats.record(Ticker::MemtableMisses, 1);
                version.get(key, ceiling, stats)?
            }
        };

        let value = match (entry.and_then(|e| e.into_value()), cf.options.ttl) {
            (Some(stored), Some(ttl)) => {
                if ttl::is_expired(&stored, ttl, self.inner.options.clock.now_secs()) {
                    None
                } else {
                    Some(ttl::strip_timestamp(&stored)?.0.to_vec())
                }
            }
            (value, _) => value,
        };
        if let Some(value) = &value {
            stats.record(Ticker::KeysFound, 1);
            stats.record(Ticker::BytesRead, value.len() as u64);
        }
        Ok(value)
    }

    /// Read sequence for `snapshot`, or a fresh pin on the latest sequence.
    /// Holding the pin keeps compaction from collecting versions the read
    /// can still see.
    fn read_view(&self, snapshot: Option<&Snapshot>) -> Result<(SequenceNumber, Snapshot)> {
        match snapshot {
            Some(snapshot) if !snapshot.belongs_to(&self.inner.snapshots) => Err(
                Error::InvalidArgument("snapshot belongs to another database".into()),
            ),
            Some(snapshot) => Ok((snapshot.sequence(), snapshot.clone())),
            None => {
                let pin = self.create_snapshot();
                Ok((pin.sequence(), pin))
            }
        }
    }

    pub fn iterator(&self, options: ReadOptions) -> Result<DbIterator> {
        self.iterator_cf(&self.default_cf()?, options)
    }

    /// Iterator over `cf` as of `options.snapshot`, or the latest state.
    /// Call a seek method before reading from it.
    pub fn iterator_cf(&self, cf: &ColumnFamilyHandle, mut options: ReadOptions) -> Result<DbIterator> {
        let (sequence, pin) = self.read_view(options.snapshot.as_ref())?;
        options.snapshot = Some(pin);
        let cf = &cf.inner;
        cf.check_not_dropped()?;
        let memtables = cf.memtables.snapshot();
        let version = cf.current.load_full();
        DbIterator::new(
            memtables,
            version,
            sequence,
            cf.options.ttl,
            self.inner.options.clock.now_secs(),
            options,
        )
    }

    // ---- snapshots ----

    pub fn create_snapshot(&self) -> Snapshot {
        self.inner.snapshots.acquire(&self.inner.last_sequence)
    }

    /// Same as dropping the handle.
    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.inner.last_sequence.load(Ordering::Acquire)
    }

    // ---- flush and compaction ----

    /// Flush the memtables of every column family. Column families share
    /// the WAL, so they are always flushed together.
    pub fn flush(&self, options: &FlushOptions) -> Result<()> {
        self.check_writable()?;
        {
            let mut write = self.inner.write.lock();
            let column_families = self.inner.column_families.read().all();
            if column_families.iter().any(|cf| !cf.memtables.active_is_empty()) {
                self.freeze_and_rotate(&mut write, &column_families)?;
            }
        }
        if options.wait {
            self.inner.wait_for_flushes()?;
        }
        Ok(())
    }

    pub fn flush_cf(&self, cf: &ColumnFamilyHandle, options: &FlushOptions) -> Result<()> {
        cf.inner.check_not_dropped()?;
        self.flush(options)
    }

    /// Compact the default column family's keys in `[begin, end]` down to
    /// the last level. `None` is unbounded.
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.compact_range_cf(&self.default_cf()?, begin, end)
    }

    /// Flush, then compact every level's files overlapping `[begin, end]`
    /// into the next level, from level 0 down. Runs on the calling thread.
    pub fn compact_range_cf(
        &self,
        cf: &ColumnFamilyHandle,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<()> {
        self.flush(&FlushOptions { wait: true })?;
        let inner = &self.inner;
        let cf = &cf.inner;
        let num_levels = cf.current.load().num_levels();
        for level in 0..num_levels.saturating_sub(1) {
            let Some(task) = self.reserve_manual_compaction(cf, level, begin, end)? else {
                continue;
            };
            let result = inner.run_compaction_task(cf, &task);
            inner.release_levels(cf, &task);
            if let Err(e) = result {
                inner.set_background_error(&e);
                return Err(e);
            }
        }
        debug!(column_family = %cf.name, "manual compaction finished");
        inner.maybe_schedule_compaction();
        Ok(())
    }

    /// Pick the manual compaction of `level`, waiting until no running
    /// compaction uses its levels.
    fn reserve_manual_compaction(
        &self,
        cf: &Arc<ColumnFamilyData>,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Option<CompactionTask>> {
        let inner = &self.inner;
        loop {
            self.check_writable()?;
            cf.check_not_dropped()?;
            {
                let mut versions = inner.versions.lock();
                let state = versions.compaction_state(cf.id);
                if !state.is_busy(level) && !state.is_busy(level + 1) {
                    let version = cf.current.load();
                    let task = pick_manual_compaction(cf.id, &version, level, begin, end);
                    if let Some(task) = &task {
                        state.set_busy(task.level, true);
                        state.set_busy(task.output_level, true);
                    }
                    return Ok(task);
                }
            }
            let mut counters = inner.background.counters.lock();
            inner
                .background
                .cond
                .wait_for(&mut counters, Duration::from_millis(10));
        }
    }

    /// Block until no flush or compaction is queued or running.
    pub fn wait_for_compactions(&self) -> Result<()> {
        let inner = &self.inner;
        inner.maybe_schedule_compaction();
        let mut counters = inner.background.counters.lock();
        loop {
            if let Some(msg) = &counters.error {
                return Err(Error::Background(msg.clone()));
            }
            if counters.pending_flushes == 0 && counters.compactions_scheduled == 0 {
                return Ok(());
            }
            inner
                .background
                .cond
                .wait_for(&mut counters, Duration::from_millis(100));
        }
    }

    // ---- column families ----

    fn default_cf(&self) -> Result<ColumnFamilyHandle> {
        let column_families = self.inner.column_families.read();
        let cf = column_families.get(DEFAULT_COLUMN_FAMILY_ID)?;
        Ok(ColumnFamilyHandle {
            inner: Arc::clone(cf),
        })
    }

    pub fn cf_handle(&self, name: &str) -> Option<ColumnFamilyHandle> {
        self.inner
            .column_families
            .read()
            .by_name(name)
            .map(|cf| ColumnFamilyHandle {
                inner: Arc::clone(cf),
            })
    }

    pub fn create_column_family(
        &self,
        name: &str,
        options: ColumnFamilyOptions,
    ) -> Result<ColumnFamilyHandle> {
        options.validate()?;
        self.check_writable()?;
        let inner = &self.inner;
        let _write = inner.write.lock();
        let mut versions = inner.versions.lock();
        if inner.column_families.read().by_name(name).is_some() {
            return Err(Error::InvalidArgument(format!(
                "column family already exists: {name}"
            )));
        }
        let id = versions.next_column_family_id();
        versions.log(&ManifestRecord::CreateColumnFamily {
            id,
            name: name.to_string(),
            options: options.clone(),
        })?;
        let cf = Arc::new(ColumnFamilyData::new(
            id,
            name.to_string(),
            options.clone(),
            Version::new(options.num_levels),
        ));
        inner.column_families.write().insert(Arc::clone(&cf));
        info!(name, id, "created column family");
        Ok(ColumnFamilyHandle { inner: cf })
    }

    /// Drop a column family. Its files are deleted once no iterator or
    /// running job uses them. `"default"` cannot be dropped.
    pub fn drop_column_family(&self, name: &str) -> Result<()> {
        if name == DEFAULT_COLUMN_FAMILY_NAME {
            return Err(Error::InvalidArgument(
                "the default column family cannot be dropped".into(),
            ));
        }
        self.check_writable()?;
        let inner = &self.inner;
        let _write = inner.write.lock();
        let mut versions = inner.versions.lock();
        let cf = inner
            .column_families
            .read()
            .by_name(name)
            .cloned()
            .ok_or_else(|| Error::ColumnFamilyNotFound(name.to_string()))?;
        versions.log(&ManifestRecord::DropColumnFamily { id: cf.id })?;
        cf.mark_dropped();
        inner.column_families.write().remove(cf.id);
        versions.forget_column_family(cf.id);
        for (_, table) in cf.current.load().all_files() {
            table.mark_obsolete();
        }
        cf.current.store(Arc::new(Version::new(cf.options.num_levels)));
        info!(name, id = cf.id, "dropped column family");
        Ok(())
    }

    // ---- introspection ----

    /// Every live SSTable of every column family.
    pub fn live_files_metadata(&self) -> Vec<LiveFileMetadata> {
        let mut files = Vec::new();
        for cf in self.inner.column_families.read().all() {
            let version = cf.current.load();
            for (level, table) in version.all_files() {
                let meta = table.meta();
                files.push(LiveFileMetadata {
                    column_family_name: cf.name.clone(),
                    level,
                    file_name: sst_file_name(meta.id),
                    file_size: meta.file_size,
                    entry_count: meta.entry_count,
                    smallest_key: meta.min_key.clone(),
                    largest_key: meta.max_key.clone(),
                    smallest_sequence: meta.smallest_sequence,
                    largest_sequence: meta.largest_sequence,
                });
            }
        }
        files
    }

    pub fn live_file_names(&self) -> Vec<String> {
        self.live_files_metadata()
            .into_iter()
            .map(|meta| meta.file_name)
            .collect()
    }

    /// Counters, or `None` unless `Options::enable_statistics` is set.
    pub fn statistics(&self) -> Option<Stats> {
        let inner = &self.inner;
        if !inner.stats.enabled() {
            return None;
        }
        let mut stats = Stats::from_statistics(&inner.stats);
        if let Some(cache) = &inner.cache {
            stats.block_cache_hits = cache.hits();
            stats.block_cache_misses = cache.misses();
            stats.block_cache_usage = cache.usage() as u64;
        }
        stats.live_sstables = inner
            .column_families
            .read()
            .all()
            .iter()
            .map(|cf| cf.current.load().file_count() as u64)
            .sum();
        Some(stats)
    }

    /// Number of WAL files in the database directory.
    pub fn wal_file_count(&self) -> Result<usize> {
        Ok(list_wal_files(&self.inner.path)?.len())
    }
}

impl Drop for DB {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error while closing database");
        }
    }
}
