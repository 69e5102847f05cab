use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::compare_internal_keys;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Heap slot: a copy of a child's current key plus the child's index.
///
/// `BinaryHeap` is a max-heap, so in forward mode the comparison is flipped
/// to pop the smallest key. Ties go to the lower index (the newer source).
struct HeapEntry {
    key: Vec<u8>,
    index: usize,
    direction: Direction,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_key = match self.direction {
            Direction::Forward => compare_internal_keys(&other.key, &self.key),
            Direction::Reverse => compare_internal_keys(&self.key, &other.key),
        };
        by_key.then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Merges multiple sorted iterators into a single sorted stream.
///
/// Used for:
/// - Range scans across memtables + all SSTable levels
/// - Compaction (merging SSTables)
///
/// Ordering guarantee: entries are yielded in internal-key order
/// (user_key ASC, sequence DESC). Every version is yielded; resolving
/// versions against a snapshot is the caller's job. This is the same
/// algorithm as external merge sort, run in either direction.
pub struct MergeIterator {
    iters: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<HeapEntry>,
    direction: Direction,
}

impl MergeIterator {
    /// Create a new MergeIterator from multiple sorted sources.
    /// Sources are ordered by priority: index 0 = newest (memtable),
    /// higher indices = older (deeper SSTable levels).
    ///
    /// Children are taken as positioned; call a seek method before use.
    pub fn new(iters: Vec<Box<dyn StorageIterator>>) -> Result<Self> {
        let mut merged = MergeIterator {
            iters,
            heap: BinaryHeap::new(),
            direction: Direction::Forward,
        };
        merged.rebuild(Direction::Forward);
        Ok(merged)
    }

    fn current(&self) -> Option<usize> {
        self.heap.peek().map(|entry| entry.index)
    }

    fn push(&mut self, index: usize) {
        if self.iters[index].is_valid() {
            self.heap.push(HeapEntry {
                key: self.iters[index].key().to_vec(),
                index,
                direction: self.direction,
            });
        }
    }

    fn rebuild(&mut self, direction: Direction) {
        self.direction = direction;
        self.heap.clear();
        for index in 0..self.iters.len() {
            self.push(index);
        }
    }

    /// Reposition every child other than the current one just past the
    /// current key, so the merged stream can continue forward.
    fn switch_to_forward(&mut self, current: usize) -> Result<()> {
        let key = self.iters[current].key().to_vec();
        for (index, iter) in self.iters.iter_mut().enumerate() {
            if index == current {
                continue;
            }
            iter.seek(&key)?;
            if iter.is_valid() && compare_internal_keys(iter.key(), &key) == Ordering::Equal {
                iter.next()?;
            }
        }
        self.rebuild(Direction::Forward);
        Ok(())
    }

    /// Reposition every child other than the current one just before the
    /// current key.
    fn switch_to_reverse(&mut self, current: usize) -> Result<()> {
        let key = self.iters[current].key().to_vec();
        for (index, iter) in self.iters.iter_mut().enumerate() {
            if index != current {
                iter.seek_before(&key)?;
            }
        }
        self.rebuild(Direction::Reverse);
        Ok(())
    }
}

impl StorageIterator for MergeIterator {
    fn key(&self) -> &[u8] {
        self.current().map_or(&[][..], |index| self.iters[index].key())
    }

    fn value(&self) -> &[u8] {
        self.current().map_or(&[][..], |index| self.iters[index].value())
    }

    fn is_valid(&self) -> bool {
        !self.heap.is_empty()
    }

    fn next(&mut self) -> Result<()> {
        let Some(current) = self.current() else {
            return Ok(());
        };
        if self.direction == Direction::Reverse {
            self.switch_to_forward(current)?;
        }
        if let Some(top) = self.heap.pop() {
            self.iters[top.index].next()?;
            self.push(top.index);
        }
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        let Some(current) = self.current() else {
            return Ok(());
        };
        if self.direction == Direction::Forward {
            self.switch_to_reverse(current)?;
        }
        if let Some(top) = self.heap.pop() {
            self.iters[top.index].prev()?;
            self.push(top.index);
        }
        Ok(())
    }

    fn seek(&mut self, key: &[u8]) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek(key)?;
        }
        self.rebuild(Direction::Forward);
        Ok(())
    }

    fn seek_to_first(&mut self) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_to_first()?;
        }
        self.rebuild(Direction::Forward);
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_to_last()?;
        }
        self.rebuild(Direction::Reverse);
        Ok(())
    }

    fn seek_before(&mut self, key: &[u8]) -> Result<()> {
        for iter in &mut self.iters {
            iter.seek_before(key)?;
        }
        self.rebuild(Direction::Reverse);
        Ok(())
    }
}
