use std::sync::Arc;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::sstable::{SSTable, SSTableIterator};
use crate::types::user_key;

/// Iterates a level of non-overlapping tables sorted by key range, opening
/// one table at a time. Levels 1 and deeper use this instead of one child
/// per file in the merge.
pub struct ConcatIterator {
    tables: Vec<Arc<SSTable>>,
    index: usize,
    current: Option<SSTableIterator>,
    fill_cache: bool,
}

impl ConcatIterator {
    pub fn new(tables: Vec<Arc<SSTable>>, fill_cache: bool) -> Self {
        ConcatIterator {
            tables,
            index: 0,
            current: None,
            fill_cache,
        }
    }

    fn open(&mut self, index: usize) -> Option<&mut SSTableIterator> {
        self.index = index;
        let fill_cache = self.fill_cache;
        self.current = self.tables.get(index).map(|table| {
            if fill_cache {
                table.iter()
            } else {
                table.iter_uncached()
            }
        });
        self.current.as_mut()
    }

    /// Move forward past exhausted tables.
    fn skip_forward(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|c| !c.is_valid()) {
            if let Some(iter) = self.open(self.index + 1) {
                iter.seek_to_first()?;
            }
        }
        Ok(())
    }

    /// Move backward past exhausted tables.
    fn skip_backward(&mut self) -> Result<()> {
        while self.current.as_ref().is_some_and(|c| !c.is_valid()) {
            if self.index == 0 {
                self.current = None;
                break;
            }
            if let Some(iter) = self.open(self.index - 1) {
                iter.seek_to_last()?;
            }
        }
        Ok(())
    }
}

impl StorageIterator for ConcatIterator {
    fn key(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.key())
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map_or(&[][..], |c| c.value())
    }

    fn is_valid(&self) -> bool {
        self.current.as_ref().is_some_and(|c| c.is_valid())
    }

    fn next(&mut self) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            current.next()?;
            self.skip_forward()?;
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            current.prev()?;
            self.skip_backward()?;
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        let target = user_key(key);
        let index = self
            .tables
            .partition_point(|t| t.meta().max_key.as_slice() < target);
        if let Some(iter) = self.open(index) {
            iter.seek(key)?;
        }
        self.skip_forward()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if let Some(iter) = self.open(0) {
            iter.seek_to_first()?;
        }
        self.skip_forward()
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let Some(last) = self.tables.len().checked_sub(1) else {
            self.current = None;
            return Ok(());
        };
        if let Some(iter) = self.open(last) {
            iter.seek_to_last()?;
        }
        self.skip_backward()
    }
}
