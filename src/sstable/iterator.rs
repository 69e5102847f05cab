use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::block::reader::BlockIterator;
use crate::sstable::reader::SSTable;

/// Two-level cursor over an SSTable: index position plus a cursor inside
/// the current data block. Blocks are loaded lazily as the cursor crosses
/// block boundaries.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
    fill_cache: bool,
}

impl SSTableIterator {
    pub(crate) fn new(table: Arc<SSTable>, fill_cache: bool) -> Self {
        SSTableIterator {
            table,
            block_idx: 0,
            block_iter: None,
            fill_cache,
        }
    }

    fn load_block(&mut self, block_idx: usize) -> Result<()> {
        let block = self.table.read_block(block_idx, self.fill_cache)?;
        self.block_idx = block_idx;
        self.block_iter = Some(block.iter());
        Ok(())
    }
}

impl StorageIterator for SSTableIterator {
    fn key(&self) -> &[u8] {
        self.block_iter.as_ref().map_or(&[][..], |b| b.key())
    }

    fn value(&self) -> &[u8] {
        self.block_iter.as_ref().map_or(&[][..], |b| b.value())
    }

    fn is_valid(&self) -> bool {
        self.block_iter.as_ref().is_some_and(|b| b.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        let Some(block_iter) = self.block_iter.as_mut() else {
            return Ok(());
        };
        block_iter.next()?;
        if !block_iter.is_valid() {
            if self.block_idx + 1 < self.table.block_count() {
                self.load_block(self.block_idx + 1)?;
            } else {
                self.block_iter = None;
            }
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(block_iter) = self.block_iter.as_mut() else {
            return Ok(());
        };
        block_iter.prev()?;
        if !block_iter.is_valid() {
            if self.block_idx > 0 {
                self.load_block(self.block_idx - 1)?;
                if let Some(block_iter) = self.block_iter.as_mut() {
                    block_iter.seek_to_last()?;
                }
            } else {
                self.block_iter = None;
            }
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let block_idx = self.table.find_block(key);
        if block_idx >= self.table.block_count() {
            self.block_iter = None;
            return Ok(());
        }
        self.load_block(block_idx)?;
        if let Some(block_iter) = self.block_iter.as_mut() {
            block_iter.seek(key)?;
        }
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.table.block_count() == 0 {
            self.block_iter = None;
            return Ok(());
        }
        self.load_block(0)
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let count = self.table.block_count();
        if count == 0 {
            self.block_iter = None;
            return Ok(());
        }
        self.load_block(count - 1)?;
        if let Some(block_iter) = self.block_iter.as_mut() {
            block_iter.seek_to_last()?;
        }
        Ok(())
    }
}
