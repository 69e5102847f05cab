//! Flush and compaction workers.
//!
//! One flush thread drains a FIFO of frozen memtable sets; compaction
//! threads wake on signals sent by [`DbInner::maybe_schedule_compaction`].
//! Both retry retryable failures with exponential backoff and put the
//! database into the background-error state when retries run out.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::compaction::{
    CompactionContext, CompactionTask, needs_compaction, pick_compaction, run_compaction,
};
use crate::db::DbInner;
use crate::db::column_family::ColumnFamilyData;
use crate::db::options::ColumnFamilyOptions;
use crate::db::stats::Ticker;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::manifest::{AddFile, CompactionPointer, DeleteFile, ManifestRecord, VersionEdit};
use crate::memtable::MemTable;
use crate::sstable::{SSTable, SSTableBuilder, sst_path};
use crate::wal::{WALManager, list_wal_files};

/// Memtables frozen together, plus the WAL that took over from them.
pub(crate) struct FlushJob {
    pub memtables: Vec<(Arc<ColumnFamilyData>, Arc<MemTable>)>,
    /// Every WAL numbered below this only holds records of `memtables`
    /// or of older jobs.
    pub log_number: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BackgroundCounters {
    pub pending_flushes: usize,
    /// Compaction signals sent and not yet finished.
    pub compactions_scheduled: usize,
    pub error: Option<String>,
}

pub(crate) struct BackgroundState {
    pub counters: Mutex<BackgroundCounters>,
    pub cond: Condvar,
    pub flush_tx: Mutex<Option<Sender<FlushJob>>>,
    pub compaction_tx: Mutex<Option<Sender<()>>>,
}

impl BackgroundState {
    pub fn new(flush_tx: Sender<FlushJob>, compaction_tx: Sender<()>) -> Self {
        BackgroundState {
            counters: Mutex::new(BackgroundCounters::default()),
            cond: Condvar::new(),
            flush_tx: Mutex::new(Some(flush_tx)),
            compaction_tx: Mutex::new(Some(compaction_tx)),
        }
    }

    /// Drop the senders so the workers exit once their queues are empty.
    pub fn close_queues(&self) {
        self.flush_tx.lock().take();
        self.compaction_tx.lock().take();
    }
}

/// Write a memtable out as one level-0 table and reopen it for reads.
pub(crate) fn write_level0_table(
    dir: &Path,
    number: u64,
    memtable: &Arc<MemTable>,
    options: &ColumnFamilyOptions,
    cache: Option<Arc<BlockCache>>,
) -> Result<Arc<SSTable>> {
    let path = sst_path(dir, number);
    let mut builder = SSTableBuilder::new(
        &path,
        number,
        options.block_size,
        options.bloom_false_positive_rate,
    )?;
    let mut iter = memtable.iter();
    let filled = (|| {
        iter.seek_to_first()?;
        while iter.is_valid() {
            builder.add(iter.key(), iter.value())?;
            iter.next()?;
        }
        Ok::<_, Error>(())
    })();
    if let Err(e) = filled {
        let _ = builder.abandon();
        return Err(e);
    }
    builder.finish()?;
    match SSTable::open_with_cache(&path, cache) {
        Ok(table) => Ok(Arc::new(table)),
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            Err(e)
        }
    }
}

pub(crate) fn flush_worker(inner: Arc<DbInner>, jobs: Receiver<FlushJob>) {
    for job in jobs.iter() {
        let failed = inner.background.counters.lock().error.is_some();
        // After a fatal error later jobs are skipped: their WALs must
        // survive for the next open to replay.
        if !failed {
            if let Err(e) = inner.with_retry("flush", || inner.run_flush(&job)) {
                inner.set_background_error(&e);
            }
        }
        {
            let mut counters = inner.background.counters.lock();
            counters.pending_flushes -= 1;
        }
        inner.background.cond.notify_all();
        inner.maybe_schedule_compaction();
    }
    debug!("flush worker stopped");
}

pub(crate) fn compaction_worker(inner: Arc<DbInner>, signals: Receiver<()>) {
    for () in signals.iter() {
        let idle = inner.shutting_down.load(Ordering::Acquire)
            || inner.background.counters.lock().error.is_some();
        let did_work = !idle && inner.background_compaction();
        inner.finish_compaction(did_work);
    }
    debug!("compaction worker stopped");
}

impl DbInner {
    /// Run `job`, retrying retryable errors with exponential backoff.
    pub(crate) fn with_retry<T>(&self, what: &str, mut job: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0u32;
        loop {
            match job() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.options.max_background_retries => {
                    let backoff = self.options.background_retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(job = what, attempt, error = %e, ?backoff, "background job failed, retrying");
                    self.stats.record(Ticker::BackgroundRetries, 1);
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub(crate) fn set_background_error(&self, e: &Error) {
        error!(error = %e, "background error, refusing further writes");
        {
            let mut counters = self.background.counters.lock();
            if counters.error.is_none() {
                counters.error = Some(e.to_string());
            }
        }
        self.background.cond.notify_all();
    }

    pub(crate) fn background_error(&self) -> Option<Error> {
        self.background
            .counters
            .lock()
            .error
            .as_ref()
            .map(|msg| Error::Background(msg.clone()))
    }

    pub(crate) fn schedule_flush(&self, job: FlushJob) {
        let mut counters = self.background.counters.lock();
        let sender = self.background.flush_tx.lock();
        match sender.as_ref() {
            Some(tx) => {
                counters.pending_flushes += 1;
                if tx.send(job).is_err() {
                    counters.pending_flushes -= 1;
                }
            }
            // Closing: the WAL still holds the frozen memtables.
            None => debug!("flush not scheduled during shutdown"),
        }
    }

    /// Write every memtable of `job` to level 0 and install the tables
    /// with one manifest edit.
    fn run_flush(&self, job: &FlushJob) -> Result<()> {
        let started = Instant::now();
        let mut outputs: Vec<(Arc<ColumnFamilyData>, Arc<SSTable>)> = Vec::new();
        for (cf, memtable) in &job.memtables {
            if cf.is_dropped() || memtable.is_empty() {
                continue;
            }
            let number = self.new_file_number();
            match write_level0_table(&self.path, number, memtable, &cf.options, self.cache.clone()) {
                Ok(table) => outputs.push((Arc::clone(cf), table)),
                Err(e) => {
                    for (_, table) in &outputs {
                        table.mark_obsolete();
                    }
                    return Err(e);
                }
            }
        }

        {
            let mut versions = self.versions.lock();
            outputs.retain(|(cf, table)| {
                if cf.is_dropped() {
                    table.mark_obsolete();
                }
                !cf.is_dropped()
            });
            let edit = VersionEdit {
                adds: outputs
                    .iter()
                    .map(|(cf, table)| AddFile {
                        column_family: cf.id,
                        level: 0,
                        meta: table.meta().clone(),
                    })
                    .collect(),
                log_number: Some(job.log_number),
                last_sequence: Some(self.last_sequence.load(Ordering::Acquire)),
                next_file_number: Some(self.next_file_number.load(Ordering::Acquire)),
                ..Default::default()
            };
            if let Err(e) = versions.log(&ManifestRecord::VersionEdit(edit)) {
                for (_, table) in &outputs {
                    table.mark_obsolete();
                }
                return Err(e);
            }
            for (cf, table) in &outputs {
                let next = cf.current.load().apply(&[], &[(0, Arc::clone(table))]);
                cf.current.store(Arc::new(next));
            }
        }

        // Readers load memtables before the version, so the tables must be
        // installed before the memtables go away.
        for (cf, memtable) in &job.memtables {
            cf.memtables.remove_immutable(memtable.id());
        }
        self.delete_wals_before(job.log_number);

        let bytes: u64 = outputs.iter().map(|(_, t)| t.meta().file_size).sum();
        self.stats.record(Ticker::Flushes, 1);
        self.stats.record(Ticker::FlushBytes, bytes);
        info!(
            tables = outputs.len(),
            bytes,
            log_number = job.log_number,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed memtables"
        );
        Ok(())
    }

    fn delete_wals_before(&self, log_number: u64) {
        match list_wal_files(&self.path) {
            Ok(files) => {
                for (number, path) in files.into_iter().filter(|(n, _)| *n < log_number) {
                    if let Err(e) = WALManager::delete_wal(&path) {
                        warn!(number, error = %e, "could not delete obsolete WAL");
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not list WAL files"),
        }
    }

    fn any_needs_compaction(&self) -> bool {
        self.column_families
            .read()
            .all()
            .iter()
            .any(|cf| needs_compaction(&cf.current.load(), &cf.options))
    }

    /// Signal a compaction thread if some level is over its target and a
    /// thread is free.
    pub(crate) fn maybe_schedule_compaction(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let needed = self.any_needs_compaction();
        let mut counters = self.background.counters.lock();
        self.signal_compaction(&mut counters, needed);
    }

    fn signal_compaction(&self, counters: &mut BackgroundCounters, needed: bool) {
        if !needed
            || counters.error.is_some()
            || counters.compactions_scheduled >= self.options.max_background_compactions
            || self.shutting_down.load(Ordering::Acquire)
        {
            return;
        }
        if let Some(tx) = self.background.compaction_tx.lock().as_ref() {
            if tx.send(()).is_ok() {
                counters.compactions_scheduled += 1;
            }
        }
    }

    /// Release a compaction slot. A worker that did work looks for more
    /// before giving the slot up, so waiters never observe an idle moment
    /// while compaction is still needed.
    fn finish_compaction(&self, did_work: bool) {
        let needed = did_work && self.any_needs_compaction();
        {
            let mut counters = self.background.counters.lock();
            counters.compactions_scheduled -= 1;
            self.signal_compaction(&mut counters, needed);
        }
        self.background.cond.notify_all();
    }

    /// Pick, run and install one automatic compaction. Returns whether a
    /// compaction was found.
    fn background_compaction(&self) -> bool {
        let picked = {
            let mut versions = self.versions.lock();
            let mut picked = None;
            for cf in self.column_families.read().all() {
                let version = cf.current.load();
                let state = versions.compaction_state(cf.id);
                if let Some(task) = pick_compaction(cf.id, &version, &cf.options, state) {
                    state.set_busy(task.level, true);
                    state.set_busy(task.output_level, true);
                    picked = Some((cf, task));
                    break;
                }
            }
            picked
        };
        let Some((cf, task)) = picked else {
            return false;
        };

        let result = self.run_compaction_task(&cf, &task);
        self.release_levels(&cf, &task);
        if let Err(e) = result {
            self.set_background_error(&e);
            return false;
        }
        true
    }

    pub(crate) fn release_levels(&self, cf: &ColumnFamilyData, task: &CompactionTask) {
        {
            let mut versions = self.versions.lock();
            if !cf.is_dropped() {
                let state = versions.compaction_state(cf.id);
                state.set_busy(task.level, false);
                state.set_busy(task.output_level, false);
            }
        }
        self.background.cond.notify_all();
    }

    /// Execute a picked task whose levels are reserved by the caller.
    pub(crate) fn run_compaction_task(&self, cf: &Arc<ColumnFamilyData>, task: &CompactionTask) -> Result<()> {
        let started = Instant::now();
        if task.is_trivial_move() {
            self.install_compaction(cf, task, Vec::new())?;
            self.stats.record(Ticker::TrivialMoves, 1);
            debug!(
                column_family = %cf.name,
                level = task.level,
                file = task.inputs[0].id(),
                "moved file down one level"
            );
            return Ok(());
        }

        let output = self.with_retry("compaction", || {
            let version = cf.current.load_full();
            let smallest_snapshot = self.snapshots.smallest(&self.last_sequence);
            let new_file_number = || self.new_file_number();
            let ctx = CompactionContext {
                dir: &self.path,
                options: &cf.options,
                version: &version,
                smallest_snapshot,
                now_secs: self.options.clock.now_secs(),
                cache: self.cache.clone(),
                new_file_number: &new_file_number,
            };
            let output = run_compaction(task, &ctx)?;
            if let Err(e) = self.install_compaction(cf, task, output.tables.clone()) {
                for table in &output.tables {
                    table.mark_obsolete();
                }
                return Err(e);
            }
            Ok(output)
        })?;

        self.stats.record(Ticker::Compactions, 1);
        self.stats.record(Ticker::CompactionBytesRead, output.bytes_read);
        self.stats.record(Ticker::CompactionBytesWritten, output.bytes_written);
        self.stats.record(Ticker::CompactionKeysDropped, output.entries_dropped);
        info!(
            column_family = %cf.name,
            level = task.level,
            inputs = task.inputs.len() + task.output_level_inputs.len(),
            outputs = output.tables.len(),
            bytes_read = output.bytes_read,
            bytes_written = output.bytes_written,
            dropped = output.entries_dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(())
    }

    /// Replace the task's inputs with `outputs` in one manifest edit. With
    /// no outputs and a trivial-move task the input changes level instead.
    fn install_compaction(
        &self,
        cf: &ColumnFamilyData,
        task: &CompactionTask,
        outputs: Vec<Arc<SSTable>>,
    ) -> Result<()> {
        let mut versions = self.versions.lock();
        if cf.is_dropped() {
            for table in &outputs {
                table.mark_obsolete();
            }
            return Ok(());
        }

        let trivial = task.is_trivial_move();
        let added: Vec<(usize, Arc<SSTable>)> = if trivial {
            task.inputs.iter().map(|t| (task.output_level, Arc::clone(t))).collect()
        } else {
            outputs.into_iter().map(|t| (task.output_level, t)).collect()
        };
        let deleted: Vec<(usize, u64)> = task
            .inputs
            .iter()
            .map(|t| (task.level, t.id()))
            .chain(task.output_level_inputs.iter().map(|t| (task.output_level, t.id())))
            .collect();

        let mut edit = VersionEdit {
            deletes: deleted
                .iter()
                .map(|&(level, file_id)| DeleteFile {
                    column_family: cf.id,
                    level: level as u32,
                    file_id,
                })
                .collect(),
            adds: added
                .iter()
                .map(|(level, table)| {
                    let mut meta = table.meta().clone();
                    meta.level = *level as u32;
                    AddFile {
                        column_family: cf.id,
                        level: *level as u32,
                        meta,
                    }
                })
                .collect(),
            next_file_number: Some(self.next_file_number.load(Ordering::Acquire)),
            ..Default::default()
        };
        let pointer = match task.largest_input_key() {
            Some(key) if !task.manual && task.level > 0 => Some(key.to_vec()),
            _ => None,
        };
        if let Some(key) = &pointer {
            edit.compaction_pointers.push(CompactionPointer {
                column_family: cf.id,
                level: task.level as u32,
                largest_key: key.clone(),
            });
        }

        versions.log(&ManifestRecord::VersionEdit(edit))?;
        if let Some(key) = pointer {
            versions.compaction_state(cf.id).pointers.insert(task.level, key);
        }
        let next = cf.current.load().apply(&deleted, &added);
        cf.current.store(Arc::new(next));
        if !trivial {
            for table in task.all_inputs() {
                table.mark_obsolete();
            }
        }
        Ok(())
    }

    /// Block until no flush is pending, or a background error occurs.
    pub(crate) fn wait_for_flushes(&self) -> Result<()> {
        let mut counters = self.background.counters.lock();
        loop {
            if let Some(msg) = &counters.error {
                return Err(Error::Background(msg.clone()));
            }
            if counters.pending_flushes == 0 {
                return Ok(());
            }
            self.background
                .cond
                .wait_for(&mut counters, Duration::from_millis(100));
        }
    }
}
