use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::wal::record::WALRecord;

/// Reads WAL records from a file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// On startup:
/// 1. Find all WAL files newer than the manifest's log number
/// 2. Replay each record into fresh memtables
/// 3. A bad record at the very end was a partial write from a crash:
///    all preceding records are valid and the tail is truncated.
///    A bad record with more data behind it is real corruption.
pub struct WALReader {
    path: PathBuf,
    data: Vec<u8>,
}

impl WALReader {
    /// Open a WAL file for reading.
    pub fn new(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WALReader {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Create an iterator over all valid records in the WAL.
    pub fn iter(&self) -> WALIterator<'_> {
        WALIterator {
            path: &self.path,
            data: &self.data,
            offset: 0,
            done: false,
        }
    }

    /// File length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over WAL records.
///
/// Yields records until EOF or a damaged tail, then stops; `valid_len()`
/// tells how many leading bytes were good. Yields one `Err` and stops if a
/// damaged record is followed by more log data.
pub struct WALIterator<'a> {
    path: &'a Path,
    data: &'a [u8],
    offset: usize,
    done: bool,
}

impl WALIterator<'_> {
    /// Byte length of the prefix made of complete, valid records.
    pub fn valid_len(&self) -> usize {
        self.offset
    }

    fn is_tail(&self, record_end: usize) -> bool {
        record_end >= self.data.len() || self.data[self.offset..].iter().all(|b| *b == 0)
    }
}

impl<'a> Iterator for WALIterator<'a> {
    type Item = Result<WALRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        let Some(total_len) = WALRecord::framed_len(remaining) else {
            // Not even a full header left: partial write.
            self.done = true;
            return None;
        };

        match WALRecord::decode(remaining) {
            Ok(record) => {
                self.offset += total_len;
                Some(Ok(record))
            }
            Err(_) if self.is_tail(self.offset + total_len) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(Error::Corruption(format!(
                    "{} at offset {}: {}",
                    self.path.display(),
                    self.offset,
                    e
                ))))
            }
        }
    }
}
