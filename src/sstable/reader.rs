use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::cache::BlockCache;
use crate::error::{Error, Result};
use crate::sstable::block::reader::Block;
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, Footer, IndexEntry, SSTableMeta};
use crate::sstable::iterator::SSTableIterator;
use crate::types::{InternalKey, LookupEntry, ParsedInternalKey, SequenceNumber, compare_internal_keys};

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last N bytes) → find index, properties and filter blocks
/// 2. Read and parse index block → Vec<IndexEntry>
/// 3. Read and deserialize bloom filter
/// 4. Ready for queries (data blocks read on demand, through the block cache)
///
/// Tables are shared as `Arc<SSTable>` by versions and iterators. Once a
/// compaction retires a table it is marked obsolete, and the file is
/// deleted when the last reference goes away.
pub struct SSTable {
    /// Path to the SSTable file (for debugging/error messages).
    path: PathBuf,
    /// Open file handle for reading data blocks.
    file: Mutex<File>,
    /// Index entries parsed from the index block.
    /// Each entry maps a block's last internal key to its file location.
    index: Vec<IndexEntry>,
    /// Metadata about this SSTable (key range, entry count, sequences).
    meta: SSTableMeta,
    filter: Option<BloomFilter>,
    cache: Option<Arc<BlockCache>>,
    obsolete: AtomicBool,
}

impl SSTable {
    /// Open an SSTable file without a block cache.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_cache(path, None)
    }

    /// Open an SSTable file.
    ///
    /// Reads the footer from the end of the file, then uses footer
    /// offsets to read the index, properties and filter blocks into memory.
    /// Every block's checksum is verified.
    pub fn open_with_cache(path: &Path, cache: Option<Arc<BlockCache>>) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::Corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let footer_offset = file_size - Footer::SIZE as u64;
        file.seek(SeekFrom::Start(footer_offset))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        for (offset, size) in [
            (footer.index_block_offset, footer.index_block_size),
            (footer.meta_block_offset, footer.meta_block_size),
            (footer.filter_block_offset, footer.filter_block_size),
        ] {
            if offset + size > footer_offset {
                return Err(Error::Corruption(format!(
                    "{}: block handle beyond footer",
                    path.display()
                )));
            }
        }

        let index_buf = read_checked(&mut file, footer.index_block_offset, footer.index_block_size)?;
        let mut index = Vec::new();
        let mut offset = 0usize;
        while offset < index_buf.len() {
            let (entry, consumed) = IndexEntry::decode(&index_buf[offset..])?;
            index.push(entry);
            offset += consumed;
        }

        let meta_buf = read_checked(&mut file, footer.meta_block_offset, footer.meta_block_size)?;
        let meta = SSTableMeta::decode_properties(&meta_buf, file_size)?;

        let filter = if footer.filter_block_size > 0 {
            let filter_buf =
                read_checked(&mut file, footer.filter_block_offset, footer.filter_block_size)?;
            Some(BloomFilter::deserialize(&filter_buf)?)
        } else {
            None
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            meta,
            filter,
            cache,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Whether `user_key` may be stored here: inside the key range and
    /// not excluded by the bloom filter.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        if user_key < self.meta.min_key.as_slice() || user_key > self.meta.max_key.as_slice() {
            return false;
        }
        self.filter.as_ref().is_none_or(|f| f.may_contain(user_key))
    }

    /// Point lookup: newest version of `user_key` with sequence <= `ceiling`.
    ///
    /// Algorithm:
    /// 1. Range and bloom check → return None
    /// 2. Binary search index → first block whose last key >= seek target
    /// 3. Read that block (cache first)
    /// 4. Binary search within the block
    pub fn get(&self, user_key: &[u8], ceiling: SequenceNumber) -> Result<Option<LookupEntry>> {
        if !self.may_contain(user_key) {
            return Ok(None);
        }

        let target = InternalKey::for_seek(user_key, ceiling).encode();
        let block_idx = self.find_block(&target);
        if block_idx >= self.index.len() {
            return Ok(None);
        }

        let block = self.read_block(block_idx, true)?;
        let entry_idx = block.seek_index(&target);
        if entry_idx >= block.len() {
            return Ok(None);
        }
        let (key, value) = block.entry(entry_idx);
        let parsed = ParsedInternalKey::parse(key)?;
        if parsed.user_key != user_key {
            return Ok(None);
        }
        Ok(Some(LookupEntry {
            sequence: parsed.sequence,
            value_type: parsed.value_type,
            value: value.to_vec(),
        }))
    }

    /// Index of the first block whose last key >= `target`.
    pub(crate) fn find_block(&self, target: &[u8]) -> usize {
        self.index
            .partition_point(|entry| compare_internal_keys(&entry.last_key, target) == Ordering::Less)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Load data block `block_idx`, consulting the shared block cache.
    pub(crate) fn read_block(&self, block_idx: usize, fill_cache: bool) -> Result<Arc<Block>> {
        let entry = &self.index[block_idx];
        let cache_key = (self.meta.id, entry.offset);
        if let Some(block) = self.cache.as_ref().and_then(|c| c.get(cache_key)) {
            return Ok(block);
        }

        let data = {
            let mut file = self.file.lock();
            read_checked(&mut file, entry.offset, entry.size)?
        };
        let block = Arc::new(Block::decode(data)?);
        if fill_cache {
            if let Some(cache) = &self.cache {
                cache.insert(cache_key, Arc::clone(&block));
            }
        }
        Ok(block)
    }

    /// Create an iterator over all entries in the SSTable.
    /// The iterator starts unpositioned.
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), true)
    }

    /// Iterator that does not populate the block cache.
    pub fn iter_uncached(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), false)
    }

    /// Get metadata about this SSTable.
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Schedule the file for deletion once the last reference is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, AtomicOrdering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(AtomicOrdering::Acquire)
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.evict_table(self.meta.id);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "deleted obsolete sstable"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete obsolete sstable"),
        }
    }
}

/// Read `size` bytes at `offset` plus the CRC32 trailer, and verify it.
fn read_checked(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize + BLOCK_TRAILER_SIZE];
    file.read_exact(&mut buf)?;
    let stored = u32::from_le_bytes(buf[size as usize..].try_into().unwrap());
    buf.truncate(size as usize);
    let actual = crc32fast::hash(&buf);
    if stored != actual {
        return Err(Error::Corruption(format!(
            "block checksum mismatch at offset {offset}: stored {stored:#x}, computed {actual:#x}"
        )));
    }
    Ok(buf)
}
