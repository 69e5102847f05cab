use std::sync::atomic::{AtomicU64, Ordering};

/// Counters bumped on the hot paths. Only recorded when
/// `Options::enable_statistics` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ticker {
    KeysWritten,
    KeysRead,
    KeysFound,
    BytesWritten,
    BytesRead,
    MemtableHits,
    MemtableMisses,
    SstableReads,
    BloomFilterUseful,
    WalBytes,
    WalSyncs,
    Flushes,
    FlushBytes,
    Compactions,
    TrivialMoves,
    CompactionBytesRead,
    CompactionBytesWritten,
    CompactionKeysDropped,
    WriteStalls,
    WriteStallMicros,
    BackgroundRetries,
}

const TICKER_COUNT: usize = Ticker::BackgroundRetries as usize + 1;

#[derive(Debug)]
pub(crate) struct Statistics {
    enabled: bool,
    tickers: [AtomicU64; TICKER_COUNT],
}

impl Statistics {
    pub fn new(enabled: bool) -> Self {
        Statistics {
            enabled,
            tickers: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record(&self, ticker: Ticker, n: u64) {
        if self.enabled {
            self.tickers[ticker as usize].fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(&self, ticker: Ticker) -> u64 {
        self.tickers[ticker as usize].load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of the engine's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub keys_written: u64,
    pub keys_read: u64,
    /// Point lookups that returned a value.
    pub keys_found: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub memtable_hits: u64,
    pub memtable_misses: u64,
    /// SSTable point lookups performed.
    pub sstable_reads: u64,
    /// SSTable lookups skipped because the bloom filter excluded the key.
    pub bloom_filter_useful: u64,
    pub block_cache_hits: u64,
    pub block_cache_misses: u64,
    pub block_cache_usage: u64,
    pub wal_bytes: u64,
    pub wal_syncs: u64,
    pub flushes: u64,
    pub flush_bytes: u64,
    pub compactions: u64,
    pub trivial_moves: u64,
    pub compaction_bytes_read: u64,
    pub compaction_bytes_written: u64,
    /// Records discarded by compaction garbage collection.
    pub compaction_keys_dropped: u64,
    pub write_stalls: u64,
    pub write_stall_micros: u64,
    pub background_retries: u64,
    /// Live SSTables across all column families.
    pub live_sstables: u64,
}

impl Stats {
    pub(crate) fn from_statistics(stats: &Statistics) -> Self {
        Stats {
            keys_written: stats.get(Ticker::KeysWritten),
            keys_read: stats.get(Ticker::KeysRead),
            keys_found: stats.get(Ticker::KeysFound),
            bytes_written: stats.get(Ticker::BytesWritten),
            bytes_read: stats.get(Ticker::BytesRead),
            memtable_hits: stats.get(Ticker::MemtableHits),
            memtable_misses: stats.get(Ticker::MemtableMisses),
            sstable_reads: stats.get(Ticker::SstableReads),
            bloom_filter_useful: stats.get(Ticker::BloomFilterUseful),
            wal_bytes: stats.get(Ticker::WalBytes),
            wal_syncs: stats.get(Ticker::WalSyncs),
            flushes: stats.get(Ticker::Flushes),
            flush_bytes: stats.get(Ticker::FlushBytes),
            compactions: stats.get(Ticker::Compactions),
            trivial_moves: stats.get(Ticker::TrivialMoves),
            compaction_bytes_read: stats.get(Ticker::CompactionBytesRead),
            compaction_bytes_written: stats.get(Ticker::CompactionBytesWritten),
            compaction_keys_dropped: stats.get(Ticker::CompactionKeysDropped),
            write_stalls: stats.get(Ticker::WriteStalls),
            write_stall_micros: stats.get(Ticker::WriteStallMicros),
            background_retries: stats.get(Ticker::BackgroundRetries),
            ..Default::default()
        }
    }
}
