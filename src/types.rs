use std::cmp::Ordering;

use crate::error::{Error, Result};

/// Raw key bytes.
pub type Key = Vec<u8>;

/// Raw value bytes.
pub type Value = Vec<u8>;

/// Monotonic write counter. Totally orders every write in a database.
pub type SequenceNumber = u64;

/// Largest sequence number that fits in the 56 bits left in the trailer.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Size of the `(sequence << 8 | type)` trailer appended to user keys.
pub const TRAILER_SIZE: usize = 8;

/// Distinguishes puts from deletes in the storage engine.
/// A Delete writes a tombstone: the key isn't removed, it's marked as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// A delete (tombstone marker).
    Delete = 0x00,
    /// A normal put operation.
    Put = 0x01,
}

impl ValueType {
    /// The type used when seeking: sorts first among equal (key, sequence).
    pub const FOR_SEEK: ValueType = ValueType::Put;

    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(ValueType::Delete),
            0x01 => Ok(ValueType::Put),
            _ => Err(Error::Corruption(format!("invalid value type: {byte}"))),
        }
    }
}

/// Internal key format: user key + sequence number + value type.
///
/// Ordering: (user_key ASC, sequence DESC).
/// The newest version of a key comes first during merging.
///
/// On disk and in the memtable the key is flattened to
/// `user_key ‖ le_u64(sequence << 8 | type)` so that every sorted structure
/// can store plain byte strings and order them with [`compare_internal_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalKey {
    pub user_key: Key,
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Key>, sequence: SequenceNumber, value_type: ValueType) -> Self {
        InternalKey {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    /// Key that sorts before every version of `user_key` visible at `sequence`.
    pub fn for_seek(user_key: &[u8], sequence: SequenceNumber) -> Self {
        InternalKey::new(user_key.to_vec(), sequence, ValueType::FOR_SEEK)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_internal_key(&self.user_key, self.sequence, self.value_type)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let parsed = ParsedInternalKey::parse(data)?;
        Ok(InternalKey {
            user_key: parsed.user_key.to_vec(),
            sequence: parsed.sequence,
            value_type: parsed.value_type,
        })
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.user_key
            .cmp(&other.user_key)
            .then_with(|| other.sequence.cmp(&self.sequence))
            .then_with(|| (other.value_type as u8).cmp(&(self.value_type as u8)))
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Borrowed view of an encoded internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < TRAILER_SIZE {
            return Err(Error::Corruption(format!(
                "internal key too short: {} bytes",
                data.len()
            )));
        }
        let split = data.len() - TRAILER_SIZE;
        let trailer = u64::from_le_bytes(data[split..].try_into().unwrap());
        Ok(ParsedInternalKey {
            user_key: &data[..split],
            sequence: trailer >> 8,
            value_type: ValueType::from_u8((trailer & 0xff) as u8)?,
        })
    }
}

/// Flatten a user key, sequence and type into internal key bytes.
pub fn encode_internal_key(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Vec<u8> {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    let mut buf = Vec::with_capacity(user_key.len() + TRAILER_SIZE);
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&((sequence << 8) | value_type as u64).to_le_bytes());
    buf
}

/// User-key part of an encoded internal key.
///
/// Keys shorter than the trailer cannot come out of this crate's encoders;
/// they are treated as bare user keys.
pub fn user_key(internal_key: &[u8]) -> &[u8] {
    if internal_key.len() < TRAILER_SIZE {
        return internal_key;
    }
    &internal_key[..internal_key.len() - TRAILER_SIZE]
}

fn trailer(internal_key: &[u8]) -> u64 {
    if internal_key.len() < TRAILER_SIZE {
        return 0;
    }
    let split = internal_key.len() - TRAILER_SIZE;
    u64::from_le_bytes(internal_key[split..].try_into().unwrap())
}

/// Order two encoded internal keys: user key ascending, trailer descending.
pub fn compare_internal_keys(a: &[u8], b: &[u8]) -> Ordering {
    user_key(a)
        .cmp(user_key(b))
        .then_with(|| trailer(b).cmp(&trailer(a)))
}

/// Result of a point lookup in one sorted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEntry {
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
    pub value: Value,
}

impl LookupEntry {
    /// The value, or `None` for a tombstone.
    pub fn into_value(self) -> Option<Value> {
        match self.value_type {
            ValueType::Put => Some(self.value),
            ValueType::Delete => None,
        }
    }
}
