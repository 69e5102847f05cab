use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::SequenceNumber;

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D_4B5653_5431; // "LSMKVST1"

/// Every block (data, filter, properties, index) is followed by a CRC32
/// of its bytes. Handles in the index and footer exclude the checksum.
pub const BLOCK_TRAILER_SIZE: usize = 4;

/// Metadata about an SSTable file, stored in the manifest and echoed in the
/// table's properties block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SSTableMeta {
    /// File number; the file is `{id:06}.sst`.
    pub id: u64,
    /// Level this SSTable belongs to (0 = freshly flushed).
    pub level: u32,
    /// Smallest user key in the SSTable.
    pub min_key: Vec<u8>,
    /// Largest user key in the SSTable.
    pub max_key: Vec<u8>,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of entries (including tombstones).
    pub entry_count: u64,
    pub smallest_sequence: SequenceNumber,
    pub largest_sequence: SequenceNumber,
}

impl SSTableMeta {
    /// Whether `[min_key, max_key]` intersects the user-key range `[start, end]`.
    /// `None` is unbounded on that side.
    pub fn overlaps(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> bool {
        let before = end.is_some_and(|end| self.min_key.as_slice() > end);
        let after = start.is_some_and(|start| self.max_key.as_slice() < start);
        !before && !after
    }

    /// Encode the properties block.
    /// Format: [id(8B)][level(4B)][min_len(4B)][min][max_len(4B)][max]
    ///         [entry_count(8B)][smallest_seq(8B)][largest_seq(8B)]
    pub fn encode_properties(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(44 + self.min_key.len() + self.max_key.len());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.level.to_le_bytes());
        buf.extend_from_slice(&(self.min_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_key);
        buf.extend_from_slice(&(self.max_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.max_key);
        buf.extend_from_slice(&self.entry_count.to_le_bytes());
        buf.extend_from_slice(&self.smallest_sequence.to_le_bytes());
        buf.extend_from_slice(&self.largest_sequence.to_le_bytes());
        buf
    }

    /// Decode the properties block. `file_size` comes from the file itself.
    pub fn decode_properties(data: &[u8], file_size: u64) -> Result<Self> {
        let mut cursor = Cursor { data, offset: 0 };
        let id = cursor.u64("id")?;
        let level = cursor.u32("level")?;
        let min_len = cursor.u32("min_key_len")? as usize;
        let min_key = cursor.bytes(min_len, "min_key")?.to_vec();
        let max_len = cursor.u32("max_key_len")? as usize;
        let max_key = cursor.bytes(max_len, "max_key")?.to_vec();
        let entry_count = cursor.u64("entry_count")?;
        let smallest_sequence = cursor.u64("smallest_sequence")?;
        let largest_sequence = cursor.u64("largest_sequence")?;

        Ok(SSTableMeta {
            id,
            level,
            min_key,
            max_key,
            file_size,
            entry_count,
            smallest_sequence,
            largest_sequence,
        })
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if self.data.len() < self.offset + len {
            return Err(Error::Corruption(format!("properties block too short for {field}")));
        }
        let out = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(out)
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4, field)?.try_into().unwrap()))
    }

    fn u64(&mut self, field: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(8, field)?.try_into().unwrap()))
    }
}

/// An entry in the SSTable's index block.
/// Maps a block's last internal key to its location in the file.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Last (largest) internal key in the block.
    pub last_key: Vec<u8>,
    /// Byte offset of the block in the file.
    pub offset: u64,
    /// Size of the block in bytes, excluding its checksum.
    pub size: u64,
}

impl IndexEntry {
    /// Encode this index entry to bytes.
    /// Format: [key_len(4B)][key][offset(8B)][size(8B)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.last_key.len() + 16);
        buf.extend_from_slice(&(self.last_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.last_key);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode an index entry from bytes, returning (entry, bytes_consumed).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 4 {
            return Err(Error::Corruption("index entry too short".into()));
        }
        let key_len = u32::from_le_bytes(data[0..4].try_into().unwrap()) as usize;
        let total = 4 + key_len + 16;
        if data.len() < total {
            return Err(Error::Corruption("index entry truncated".into()));
        }
        let last_key = data[4..4 + key_len].to_vec();
        let offset = u64::from_le_bytes(data[4 + key_len..12 + key_len].try_into().unwrap());
        let size = u64::from_le_bytes(data[12 + key_len..20 + key_len].try_into().unwrap());
        Ok((IndexEntry { last_key, offset, size }, total))
    }
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index, properties and filter blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Index block offset (8B)              │
/// │ Index block size (8B)                │
/// │ Properties block offset (8B)         │
/// │ Properties block size (8B)           │
/// │ Filter block offset (8B)             │
/// │ Filter block size (8B, 0 = none)     │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub index_block_offset: u64,
    pub index_block_size: u64,
    pub meta_block_offset: u64,
    pub meta_block_size: u64,
    pub filter_block_offset: u64,
    pub filter_block_size: u64,
    pub magic: u64,
}

impl Footer {
    /// Size of the footer in bytes (fixed).
    pub const SIZE: usize = 8 * 7;

    /// Encode footer to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.index_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.index_block_size.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.meta_block_size.to_le_bytes());
        buf.extend_from_slice(&self.filter_block_offset.to_le_bytes());
        buf.extend_from_slice(&self.filter_block_size.to_le_bytes());
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf
    }

    /// Decode footer from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("footer too short".into()));
        }
        let field = |i: usize| u64::from_le_bytes(data[i * 8..i * 8 + 8].try_into().unwrap());
        let magic = field(6);
        if magic != SSTABLE_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                SSTABLE_MAGIC, magic
            )));
        }

        Ok(Footer {
            index_block_offset: field(0),
            index_block_size: field(1),
            meta_block_offset: field(2),
            meta_block_size: field(3),
            filter_block_offset: field(4),
            filter_block_size: field(5),
            magic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn footer() -> Footer {
        Footer {
            index_block_offset: 4096,
            index_block_size: 512,
            meta_block_offset: 4000,
            meta_block_size: 60,
            filter_block_offset: 3900,
            filter_block_size: 96,
            magic: SSTABLE_MAGIC,
        }
    }

    #[test]
    fn footer_roundtrip() {
        let encoded = footer().encode();
        assert_eq!(encoded.len(), Footer::SIZE);
        assert_eq!(Footer::decode(&encoded).unwrap(), footer());
    }

    #[test]
    fn footer_bad_magic() {
        let mut encoded = footer().encode();
        encoded[Footer::SIZE - 8] ^= 0xFF;
        assert!(matches!(Footer::decode(&encoded), Err(Error::Corruption(_))));
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn index_entry_roundtrip() {
        let entry = IndexEntry {
            last_key: b"cherry\x01\x00\x00\x00\x00\x00\x00\x00".to_vec(),
            offset: 0,
            size: 4096,
        };
        let encoded = entry.encode();
        let (decoded, consumed) = IndexEntry::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.last_key, entry.last_key);
        assert_eq!(decoded.size, 4096);
    }

    #[test]
    fn properties_roundtrip_and_truncation() {
        let meta = SSTableMeta {
            id: 7,
            level: 2,
            min_key: b"apple".to_vec(),
            max_key: b"pear".to_vec(),
            file_size: 1234,
            entry_count: 10,
            smallest_sequence: 3,
            largest_sequence: 99,
        };
        let encoded = meta.encode_properties();
        assert_eq!(SSTableMeta::decode_properties(&encoded, 1234).unwrap(), meta);
        assert!(SSTableMeta::decode_properties(&encoded[..encoded.len() - 1], 1234).is_err());
    }

    #[test]
    fn overlap_checks_user_key_ranges() {
        let meta = SSTableMeta {
            id: 1,
            level: 1,
            min_key: b"c".to_vec(),
            max_key: b"f".to_vec(),
            file_size: 0,
            entry_count: 0,
            smallest_sequence: 0,
            largest_sequence: 0,
        };
        assert!(meta.overlaps(Some(b"a"), Some(b"c")));
        assert!(meta.overlaps(Some(b"f"), None));
        assert!(meta.overlaps(None, None));
        assert!(!meta.overlaps(Some(b"g"), Some(b"z")));
        assert!(!meta.overlaps(None, Some(b"b")));
    }
}
