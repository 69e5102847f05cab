use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use crate::ttl::{Clock, SystemClock};
use crate::wal::SyncPolicy;

/// How a column family's files move between levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompactionStyle {
    /// Leveled compaction, scheduled automatically by level scores.
    #[default]
    Level,
    /// No automatic compaction; only `compact_range` moves data.
    None,
}

/// Per column family tuning. Persisted in the manifest, so a column family
/// reopened without explicit options keeps the ones it was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFamilyOptions {
    /// Number of levels, level 0 included.
    pub num_levels: usize,
    /// Level-0 file count that triggers a level-0 compaction.
    pub level0_file_num_compaction_trigger: usize,
    /// Size target of level 1 in bytes.
    pub max_bytes_for_level_base: u64,
    /// Growth factor of the size target for each level past 1.
    pub max_bytes_for_level_multiplier: f64,
    /// Output file size target at level 1.
    pub target_file_size_base: u64,
    /// Growth factor of the output file size for each level past 1.
    pub target_file_size_multiplier: u64,
    pub compaction_style: CompactionStyle,
    /// Memtable size that triggers a flush.
    pub write_buffer_size: usize,
    /// Active plus immutable memtables allowed before writers stall.
    pub max_write_buffer_number: usize,
    /// Target size of SSTable data blocks.
    pub block_size: usize,
    /// `None` writes tables without a bloom filter.
    pub bloom_false_positive_rate: Option<f64>,
    /// Records older than this are invisible to reads and are dropped by
    /// compaction. Resolution is one second.
    pub ttl: Option<Duration>,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        ColumnFamilyOptions {
            num_levels: 7,
            level0_file_num_compaction_trigger: 4,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            target_file_size_base: 2 * 1024 * 1024,
            target_file_size_multiplier: 1,
            compaction_style: CompactionStyle::Level,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            block_size: 4096,
            bloom_false_positive_rate: Some(0.01),
            ttl: None,
        }
    }
}

impl ColumnFamilyOptions {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfiguration(msg.to_string()));
        if self.num_levels < 2 {
            return invalid("num_levels must be at least 2");
        }
        if self.level0_file_num_compaction_trigger == 0 {
            return invalid("level0_file_num_compaction_trigger must be positive");
        }
        if self.max_bytes_for_level_base == 0 {
            return invalid("max_bytes_for_level_base must be positive");
        }
        if !self.max_bytes_for_level_multiplier.is_finite() || self.max_bytes_for_level_multiplier < 1.0 {
            return invalid("max_bytes_for_level_multiplier must be a finite value >= 1.0");
        }
        if self.target_file_size_base == 0 || self.target_file_size_multiplier == 0 {
            return invalid("target file size base and multiplier must be positive");
        }
        if self.write_buffer_size == 0 {
            return invalid("write_buffer_size must be positive");
        }
        if self.max_write_buffer_number < 2 {
            return invalid("max_write_buffer_number must be at least 2");
        }
        if self.block_size < 64 {
            return invalid("block_size must be at least 64 bytes");
        }
        if let Some(rate) = self.bloom_false_positive_rate {
            if !(rate > 0.0 && rate < 1.0) {
                return invalid("bloom_false_positive_rate must be in (0, 1)");
            }
        }
        if self.ttl.is_some_and(|ttl| ttl.as_secs() == 0) {
            return invalid("ttl must be at least one second");
        }
        Ok(())
    }

    /// Size target of `level` (>= 1).
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let exponent = level.saturating_sub(1) as i32;
        (self.max_bytes_for_level_base as f64 * self.max_bytes_for_level_multiplier.powi(exponent)) as u64
    }

    /// Output file size target for compactions into `level`.
    pub fn target_file_size(&self, level: usize) -> u64 {
        let exponent = level.saturating_sub(1) as u32;
        self.target_file_size_base
            .saturating_mul(self.target_file_size_multiplier.saturating_pow(exponent))
    }
}

/// Database-wide options.
#[derive(Debug, Clone)]
pub struct Options {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    /// Create column families listed at open that the database lacks.
    pub create_missing_column_families: bool,
    /// Collect counters readable through `DB::statistics`.
    pub enable_statistics: bool,
    pub wal_sync_policy: SyncPolicy,
    /// Bytes of decoded data blocks kept in memory. 0 disables the cache.
    pub block_cache_capacity: usize,
    /// Compaction threads.
    pub max_background_compactions: usize,
    /// Attempts after the first failure before a background job error
    /// becomes fatal.
    pub max_background_retries: u32,
    /// Base of the exponential backoff between retries.
    pub background_retry_backoff: Duration,
    /// Options of the `"default"` column family.
    pub default_cf: ColumnFamilyOptions,
    /// Time source for TTL expiry.
    pub clock: Arc<dyn Clock>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            create_if_missing: false,
            error_if_exists: false,
            create_missing_column_families: false,
            enable_statistics: false,
            wal_sync_policy: SyncPolicy::default(),
            block_cache_capacity: 8 * 1024 * 1024,
            max_background_compactions: 1,
            max_background_retries: 3,
            background_retry_backoff: Duration::from_millis(100),
            default_cf: ColumnFamilyOptions::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Options {
    pub fn validate(&self) -> Result<()> {
        if self.max_background_compactions == 0 {
            return Err(Error::InvalidConfiguration(
                "max_background_compactions must be at least 1".into(),
            ));
        }
        if self.wal_sync_policy == SyncPolicy::EveryNWrites(0) {
            return Err(Error::InvalidConfiguration(
                "EveryNWrites needs a positive write count".into(),
            ));
        }
        self.default_cf.validate()
    }
}

/// Options for reads and iterators.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest committed state.
    pub snapshot: Option<Snapshot>,
    /// Inclusive lower bound for iterators.
    pub iterate_lower_bound: Option<Vec<u8>>,
    /// Exclusive upper bound for iterators.
    pub iterate_upper_bound: Option<Vec<u8>>,
    /// Whether blocks read for this operation enter the block cache.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            snapshot: None,
            iterate_lower_bound: None,
            iterate_upper_bound: None,
            fill_cache: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the WAL before the write returns, whatever the sync policy.
    pub sync: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    /// Block until the flushed memtables are installed as SSTables.
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        FlushOptions { wait: true }
    }
}
