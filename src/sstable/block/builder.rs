/// Length prefix of every entry: key length then value length, u32 LE each.
pub const ENTRY_HEADER_SIZE: usize = 8;

/// Bytes per slot of the trailing offset array, and of the entry count.
const SLOT_SIZE: usize = 4;

/// Serializes sorted internal-key entries into one data block.
///
/// ```text
/// [klen u32][vlen u32][key][value]   entry 0
/// ...                                entry n-1
/// [offset of entry 0 u32] ... [offset of entry n-1 u32]
/// [n u32]
/// ```
///
/// The offset array lets a reader binary search entries without a scan.
/// The block checksum is added by the table builder, not here.
pub struct BlockBuilder {
    buf: Vec<u8>,
    entry_offsets: Vec<u32>,
    target_size: usize,
}

impl BlockBuilder {
    pub fn new(target_size: usize) -> Self {
        BlockBuilder {
            buf: Vec::with_capacity(target_size),
            entry_offsets: Vec::new(),
            target_size,
        }
    }

    /// Append an entry; keys must arrive in internal-key order.
    ///
    /// Returns false, leaving the block untouched, when the entry would push
    /// the block past its target size. An empty block accepts any entry so
    /// that oversized records still get a block of their own.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> bool {
        let grows_by = ENTRY_HEADER_SIZE + key.len() + value.len() + SLOT_SIZE;
        if !self.is_empty() && self.estimated_size() + grows_by > self.target_size {
            return false;
        }

        self.entry_offsets.push(self.buf.len() as u32);
        put_u32(&mut self.buf, key.len());
        put_u32(&mut self.buf, value.len());
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(value);
        true
    }

    pub fn build(mut self) -> Vec<u8> {
        let count = self.entry_offsets.len();
        self.buf.reserve((count + 1) * SLOT_SIZE);
        for &offset in &self.entry_offsets {
            self.buf.extend_from_slice(&offset.to_le_bytes());
        }
        put_u32(&mut self.buf, count);
        self.buf
    }

    /// Size `build` would return right now.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + (self.entry_offsets.len() + 1) * SLOT_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.entry_offsets.is_empty()
    }
}

fn put_u32(buf: &mut Vec<u8>, n: usize) {
    buf.extend_from_slice(&(n as u32).to_le_bytes());
}
