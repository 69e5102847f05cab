use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::sstable::block::reader::Block;

/// (table file number, block offset)
pub type BlockCacheKey = (u64, u64);

/// LRU cache of decoded data blocks shared by every table of a database.
///
/// Capacity is in bytes of decoded block data, so the underlying
/// [`LruCache`] is unbounded and trimmed from its cold end on insert.
pub struct BlockCache {
    inner: Mutex<LruState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct LruState {
    blocks: LruCache<BlockCacheKey, Arc<Block>>,
    usage: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Self {
        BlockCache {
            inner: Mutex::new(LruState {
                blocks: LruCache::unbounded(),
                usage: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: BlockCacheKey) -> Option<Arc<Block>> {
        let block = self.inner.lock().blocks.get(&key).cloned();
        if block.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        block
    }

    /// Insert a block, evicting least recently used blocks past capacity.
    /// A block larger than the whole cache is not retained.
    pub fn insert(&self, key: BlockCacheKey, block: Arc<Block>) {
        let size = block.size_bytes();
        if size > self.capacity {
            return;
        }
        let mut state = self.inner.lock();
        if let Some(old) = state.blocks.put(key, block) {
            state.usage -= old.size_bytes();
        }
        state.usage += size;

        while state.usage > self.capacity {
            let Some((_, evicted)) = state.blocks.pop_lru() else {
                break;
            };
            state.usage -= evicted.size_bytes();
        }
    }

    /// Drop every cached block of one table, e.g. after it was deleted.
    pub fn evict_table(&self, table_id: u64) {
        let mut state = self.inner.lock();
        let victims: Vec<BlockCacheKey> = state
            .blocks
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| key.0 == table_id)
            .collect();
        for key in victims {
            if let Some(block) = state.blocks.pop(&key) {
                state.usage -= block.size_bytes();
            }
        }
    }

    /// Bytes of decoded blocks currently held.
    pub fn usage(&self) -> usize {
        self.inner.lock().usage
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
