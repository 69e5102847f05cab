use crate::db::ColumnFamilyHandle;
use crate::error::{Error, Result};
use crate::types::{Key, Value, ValueType};

/// Id of the column family every database starts with.
pub const DEFAULT_COLUMN_FAMILY_ID: u32 = 0;

/// One operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOp {
    pub value_type: ValueType,
    pub column_family: u32,
    pub key: Key,
    pub value: Value,
}

/// An ordered list of puts and deletes applied atomically.
///
/// All operations become visible together and receive consecutive sequence
/// numbers at commit time, in the order they were added. A batch may touch
/// several column families.
///
/// Encoding (the WAL payload after the sequence number):
/// ```text
/// count (4B) | { type (1B) | cf (4B) | key_len (4B) | key | val_len (4B) | val } * count
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

const OP_HEADER_SIZE: usize = 1 + 4 + 4 + 4;

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch::default()
    }

    pub fn put(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> &mut Self {
        self.push(ValueType::Put, DEFAULT_COLUMN_FAMILY_ID, key.into(), value.into())
    }

    pub fn delete(&mut self, key: impl Into<Key>) -> &mut Self {
        self.push(ValueType::Delete, DEFAULT_COLUMN_FAMILY_ID, key.into(), Vec::new())
    }

    pub fn put_cf(
        &mut self,
        cf: &ColumnFamilyHandle,
        key: impl Into<Key>,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.push(ValueType::Put, cf.id(), key.into(), value.into())
    }

    pub fn delete_cf(&mut self, cf: &ColumnFamilyHandle, key: impl Into<Key>) -> &mut Self {
        self.push(ValueType::Delete, cf.id(), key.into(), Vec::new())
    }

    pub(crate) fn push(
        &mut self,
        value_type: ValueType,
        column_family: u32,
        key: Key,
        value: Value,
    ) -> &mut Self {
        self.ops.push(BatchOp {
            value_type,
            column_family,
            key,
            value,
        });
        self
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn ops_mut(&mut self) -> &mut [BatchOp] {
        &mut self.ops
    }

    /// Approximate encoded size in bytes.
    pub fn size_bytes(&self) -> usize {
        4 + self
            .ops
            .iter()
            .map(|op| OP_HEADER_SIZE + op.key.len() + op.value.len())
            .sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size_bytes());
        buf.extend_from_slice(&(self.ops.len() as u32).to_le_bytes());
        for op in &self.ops {
            buf.push(op.value_type as u8);
            buf.extend_from_slice(&op.column_family.to_le_bytes());
            buf.extend_from_slice(&(op.key.len() as u32).to_le_bytes());
            buf.extend_from_slice(&op.key);
            buf.extend_from_slice(&(op.value.len() as u32).to_le_bytes());
            buf.extend_from_slice(&op.value);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, offset: 0 };
        let count = reader.u32()? as usize;
        let mut ops = Vec::with_capacity(count.min(data.len() / OP_HEADER_SIZE + 1));
        for _ in 0..count {
            let value_type = ValueType::from_u8(reader.u8()?)?;
            let column_family = reader.u32()?;
            let key_len = reader.u32()? as usize;
            let key = reader.bytes(key_len)?.to_vec();
            let value_len = reader.u32()? as usize;
            let value = reader.bytes(value_len)?.to_vec();
            ops.push(BatchOp {
                value_type,
                column_family,
                key,
                value,
            });
        }
        if reader.offset != data.len() {
            return Err(Error::Corruption(format!(
                "write batch has {} trailing bytes",
                data.len() - reader.offset
            )));
        }
        Ok(WriteBatch { ops })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(Error::Corruption("write batch truncated".into()));
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(4)?.try_into().unwrap()))
    }
}
