//! Sorted string tables: immutable on-disk runs of internal keys.
//!
//! File layout:
//! ```text
//! [data block + crc]...[filter block + crc][properties block + crc][index block + crc][footer]
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

use std::path::{Path, PathBuf};

pub use builder::SSTableBuilder;
pub use footer::{Footer, IndexEntry, SSTableMeta};
pub use iterator::SSTableIterator;
pub use reader::SSTable;

/// File name of table number `number`.
pub fn sst_file_name(number: u64) -> String {
    format!("{number:06}.sst")
}

pub fn sst_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(sst_file_name(number))
}

/// Parse a table number out of a file name like `000042.sst`.
pub fn parse_sst_file_name(name: &str) -> Option<u64> {
    name.strip_suffix(".sst")?.parse().ok()
}
