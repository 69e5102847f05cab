pub mod concat;
pub mod merge;

pub use concat::ConcatIterator;
pub use merge::MergeIterator;

use crate::error::Result;

/// The central iteration abstraction for the storage engine.
///
/// Every sorted data source (memtable, block, SSTable, merged view)
/// implements this trait over encoded internal keys, so a MergeIterator
/// can take any mix of them as `Box<dyn StorageIterator>`.
pub trait StorageIterator: Send {
    /// Returns the current key. Only valid when is_valid() is true.
    fn key(&self) -> &[u8];

    /// Returns the current value. Only valid when is_valid() is true.
    fn value(&self) -> &[u8];

    /// Returns true if the iterator is positioned at a valid entry.
    fn is_valid(&self) -> bool;

    /// Advances to the next entry. Returns error on IO failure.
    fn next(&mut self) -> Result<()>;

    /// Moves to the previous entry.
    fn prev(&mut self) -> Result<()>;

    /// Positions the iterator at the first entry with key >= target.
    fn seek(&mut self, key: &[u8]) -> Result<()>;

    fn seek_to_first(&mut self) -> Result<()>;

    fn seek_to_last(&mut self) -> Result<()>;

    /// Positions the iterator at the last entry with key < target.
    fn seek_before(&mut self, key: &[u8]) -> Result<()> {
        self.seek(key)?;
        if self.is_valid() {
            self.prev()
        } else {
            self.seek_to_last()
        }
    }
}
