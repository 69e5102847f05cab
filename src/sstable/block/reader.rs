use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::sstable::block::builder::ENTRY_HEADER_SIZE;
use crate::types::compare_internal_keys;

/// A decoded data block. See [`BlockBuilder`](super::builder::BlockBuilder)
/// for the layout.
///
/// Decoding validates every entry's bounds once, so lookups can slice
/// without further checks.
pub struct Block {
    data: Vec<u8>,
    offsets: Vec<u32>,
}

impl Block {
    /// Parse a block produced by `BlockBuilder::build` (CRC already stripped).
    pub fn decode(data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::Corruption("block too short".into()));
        }
        let count = u32::from_le_bytes(data[data.len() - 4..].try_into().unwrap()) as usize;
        let offsets_len = count
            .checked_mul(4)
            .filter(|n| n + 4 <= data.len())
            .ok_or_else(|| Error::Corruption(format!("block entry count {count} too large")))?;
        let entries_end = data.len() - 4 - offsets_len;

        let offsets: Vec<u32> = data[entries_end..data.len() - 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        for (i, &offset) in offsets.iter().enumerate() {
            let start = offset as usize;
            if start + ENTRY_HEADER_SIZE > entries_end {
                return Err(Error::Corruption(format!("block entry {i} header out of bounds")));
            }
            let key_len = u32::from_le_bytes(data[start..start + 4].try_into().unwrap()) as usize;
            let val_len = u32::from_le_bytes(data[start + 4..start + 8].try_into().unwrap()) as usize;
            if start + ENTRY_HEADER_SIZE + key_len + val_len > entries_end {
                return Err(Error::Corruption(format!("block entry {i} out of bounds")));
            }
        }

        Ok(Block { data, offsets })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Size of the decoded block in bytes, used for cache accounting.
    pub fn size_bytes(&self) -> usize {
        self.data.len() + self.offsets.len() * 4
    }

    /// Key and value of entry `index`.
    pub fn entry(&self, index: usize) -> (&[u8], &[u8]) {
        let start = self.offsets[index] as usize;
        let key_len = u32::from_le_bytes(self.data[start..start + 4].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(self.data[start + 4..start + 8].try_into().unwrap()) as usize;
        let key_start = start + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;
        (
            &self.data[key_start..val_start],
            &self.data[val_start..val_start + val_len],
        )
    }

    /// Index of the first entry with key >= `target`, or `len()` if none.
    pub fn seek_index(&self, target: &[u8]) -> usize {
        let (mut lo, mut hi) = (0, self.offsets.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if compare_internal_keys(self.entry(mid).0, target) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Exact-match lookup by internal key.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let index = self.seek_index(key);
        if index >= self.len() {
            return None;
        }
        let (k, v) = self.entry(index);
        (compare_internal_keys(k, key) == Ordering::Equal).then_some(v)
    }

    pub fn iter(self: &Arc<Self>) -> BlockIterator {
        BlockIterator {
            block: Arc::clone(self),
            index: 0,
        }
    }
}

/// Cursor over one block. Starts positioned at the first entry.
pub struct BlockIterator {
    block: Arc<Block>,
    index: usize,
}

impl StorageIterator for BlockIterator {
    fn key(&self) -> &[u8] {
        self.block.entry(self.index).0
    }

    fn value(&self) -> &[u8] {
        self.block.entry(self.index).1
    }

    fn is_valid(&self) -> bool {
        self.index < self.block.len()
    }

    fn next(&mut self) -> Result<()> {
        if self.is_valid() {
            self.index += 1;
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        self.index = match self.index {
            0 => self.block.len(),
            i if i >= self.block.len() => self.block.len(),
            i => i - 1,
        };
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        self.index = self.block.seek_index(key);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.index = 0;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        self.index = self.block.len().saturating_sub(1);
        if self.block.is_empty() {
            self.index = 0;
        }
        Ok(())
    }
}
