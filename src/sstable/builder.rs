use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::bloom::builder::BloomFilterBuilder;
use crate::error::{Error, Result};
use crate::sstable::block::builder::BlockBuilder;
use crate::sstable::footer::{Footer, IndexEntry, SSTABLE_MAGIC, SSTableMeta};
use crate::types::{ParsedInternalKey, SequenceNumber, compare_internal_keys};

/// Builds an SSTable file from a sorted stream of internal keys.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
///
/// Build process:
/// 1. Add entries one by one (must be in strictly increasing internal-key order)
/// 2. Entries fill up blocks; when a block is full it's written with its CRC32
/// 3. finish() flushes the last block, writes filter, properties, index,
///    footer, fsync
pub struct SSTableBuilder {
    /// Current block being filled with entries.
    block_builder: BlockBuilder,
    /// Index entries: one per flushed data block.
    index_entries: Vec<IndexEntry>,
    /// Tracks current write position in the file.
    data_offset: u64,
    /// Buffered file writer.
    writer: BufWriter<File>,
    path: PathBuf,
    /// File number of the table.
    sst_id: u64,
    /// Target block size.
    block_size: usize,
    /// User keys for the filter block, if filters are enabled.
    bloom: Option<BloomFilterBuilder>,
    /// Smallest user key added (first key, since entries are sorted).
    min_key: Option<Vec<u8>>,
    /// Largest user key added (updated on every add).
    max_key: Option<Vec<u8>>,
    smallest_sequence: SequenceNumber,
    largest_sequence: SequenceNumber,
    /// Total entries added.
    entry_count: u64,
    /// Last internal key added; closes the current block's index entry.
    last_key: Vec<u8>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    /// `bloom_false_positive_rate` of `None` writes no filter block.
    pub fn new(
        path: &Path,
        sst_id: u64,
        block_size: usize,
        bloom_false_positive_rate: Option<f64>,
    ) -> Result<Self> {
        let file = File::create(path)?;
        Ok(SSTableBuilder {
            block_builder: BlockBuilder::new(block_size),
            index_entries: Vec::new(),
            data_offset: 0,
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            sst_id,
            block_size,
            bloom: bloom_false_positive_rate.map(|fpr| BloomFilterBuilder::new(1024, fpr)),
            min_key: None,
            max_key: None,
            smallest_sequence: SequenceNumber::MAX,
            largest_sequence: 0,
            entry_count: 0,
            last_key: Vec::new(),
        })
    }

    /// Add an internal key and its value. Keys MUST be strictly increasing.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let parsed = ParsedInternalKey::parse(key)?;
        if self.entry_count > 0 && compare_internal_keys(&self.last_key, key) != Ordering::Less {
            return Err(Error::InvalidArgument(format!(
                "sstable {} keys out of order",
                self.sst_id
            )));
        }

        if self.min_key.is_none() {
            self.min_key = Some(parsed.user_key.to_vec());
        }
        if self.max_key.as_deref() != Some(parsed.user_key) {
            self.max_key = Some(parsed.user_key.to_vec());
        }
        self.smallest_sequence = self.smallest_sequence.min(parsed.sequence);
        self.largest_sequence = self.largest_sequence.max(parsed.sequence);
        if let Some(bloom) = self.bloom.as_mut() {
            bloom.add_key(parsed.user_key);
        }
        self.entry_count += 1;

        if !self.block_builder.add(key, value) {
            // Block is full; flush it and start a fresh one.
            self.flush_block()?;
            let accepted = self.block_builder.add(key, value);
            debug_assert!(accepted, "first entry of a block is always accepted");
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        Ok(())
    }

    /// Bytes written so far plus the pending block. Compaction uses this to
    /// decide when to cut a new output file.
    pub fn estimated_size(&self) -> u64 {
        self.data_offset + self.block_builder.estimated_size() as u64
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `data` followed by its CRC32. Returns (offset, size) of `data`.
    fn write_block(&mut self, data: &[u8]) -> Result<(u64, u64)> {
        let offset = self.data_offset;
        self.writer.write_all(data)?;
        self.writer.write_all(&crc32fast::hash(data).to_le_bytes())?;
        self.data_offset += data.len() as u64 + 4;
        Ok((offset, data.len() as u64))
    }

    /// Flush the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.block_builder.is_empty() {
            return Ok(());
        }

        let old_builder =
            std::mem::replace(&mut self.block_builder, BlockBuilder::new(self.block_size));
        let block_data = old_builder.build();
        let (offset, size) = self.write_block(&block_data)?;

        self.index_entries.push(IndexEntry {
            last_key: self.last_key.clone(),
            offset,
            size,
        });
        Ok(())
    }

    /// Finalize the SSTable: flush last block, write filter, properties,
    /// index, footer, fsync.
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.flush_block()?;

        let (filter_block_offset, filter_block_size) = match self.bloom.take() {
            Some(bloom) if !bloom.is_empty() => self.write_block(&bloom.build().serialize())?,
            _ => (self.data_offset, 0),
        };

        let mut meta = SSTableMeta {
            id: self.sst_id,
            level: 0,
            min_key: self.min_key.take().unwrap_or_default(),
            max_key: self.max_key.take().unwrap_or_default(),
            file_size: 0,
            entry_count: self.entry_count,
            smallest_sequence: if self.entry_count == 0 { 0 } else { self.smallest_sequence },
            largest_sequence: self.largest_sequence,
        };
        let (meta_block_offset, meta_block_size) = self.write_block(&meta.encode_properties())?;

        let mut index_data = Vec::new();
        for entry in &self.index_entries {
            index_data.extend_from_slice(&entry.encode());
        }
        let (index_block_offset, index_block_size) = self.write_block(&index_data)?;

        let footer = Footer {
            index_block_offset,
            index_block_size,
            meta_block_offset,
            meta_block_size,
            filter_block_offset,
            filter_block_size,
            magic: SSTABLE_MAGIC,
        };
        self.writer.write_all(&footer.encode())?;

        // Flush buffer + fsync to guarantee durability
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        meta.file_size = self.data_offset + Footer::SIZE as u64;
        Ok(meta)
    }

    /// Give up on the table and delete the partial file.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::footer::Footer;
    use crate::types::{ValueType, encode_internal_key};
    use tempfile::tempdir;

    fn ikey(key: &str, seq: u64) -> Vec<u8> {
        encode_internal_key(key.as_bytes(), seq, ValueType::Put)
    }

    #[test]
    fn build_sstable_from_sorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000001.sst");

        let mut builder = SSTableBuilder::new(&path, 1, 4096, Some(0.01)).unwrap();
        for i in 0..100u64 {
            let key = format!("key_{:05}", i);
            let val = format!("val_{:05}", i);
            builder.add(&ikey(&key, i + 1), val.as_bytes()).unwrap();
        }
        let meta = builder.finish().unwrap();

        assert_eq!(meta.id, 1);
        assert_eq!(meta.entry_count, 100);
        assert_eq!(meta.min_key, b"key_00000");
        assert_eq!(meta.max_key, b"key_00099");
        assert_eq!(meta.smallest_sequence, 1);
        assert_eq!(meta.largest_sequence, 100);
        assert_eq!(meta.file_size, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn rejects_out_of_order_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000002.sst");

        let mut builder = SSTableBuilder::new(&path, 2, 4096, None).unwrap();
        builder.add(&ikey("b", 1), b"v").unwrap();
        assert!(matches!(
            builder.add(&ikey("a", 2), b"v"),
            Err(Error::InvalidArgument(_))
        ));
        // Same user key must arrive newest first.
        builder.add(&ikey("c", 5), b"v").unwrap();
        assert!(builder.add(&ikey("c", 6), b"v").is_err());
    }

    #[test]
    fn file_ends_with_valid_footer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000003.sst");

        let mut builder = SSTableBuilder::new(&path, 3, 4096, None).unwrap();
        for i in 0..50u64 {
            builder.add(&ikey(&format!("k{:04}", i), 1), b"v").unwrap();
        }
        builder.finish().unwrap();

        let buf = std::fs::read(&path).unwrap();
        let footer = Footer::decode(&buf[buf.len() - Footer::SIZE..]).unwrap();
        assert_eq!(footer.magic, SSTABLE_MAGIC);
        assert_eq!(footer.filter_block_size, 0);
        assert!(footer.index_block_offset > 0);
        assert!(footer.index_block_size > 0);
    }

    #[test]
    fn abandon_removes_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000004.sst");

        let mut builder = SSTableBuilder::new(&path, 4, 64, None).unwrap();
        builder.add(&ikey("a", 1), b"v").unwrap();
        builder.abandon().unwrap();
        assert!(!path.exists());
    }
}
