use crate::batch::WriteBatch;
use crate::error::{Error, Result};
use crate::types::SequenceNumber;

/// A single record in the WAL: one committed write batch.
///
/// On-disk format:
/// ```text
/// ┌──────────┬─────────┬──────────────┬──────────────────────┐
/// │ CRC (4B) │ Len (4B)│ Sequence (8B)│ Encoded batch (var)  │
/// └──────────┴─────────┴──────────────┴──────────────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself. The batch's operations
/// own sequence numbers `sequence .. sequence + batch.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub sequence: SequenceNumber,
    pub batch: WriteBatch,
}

// Header sizes
const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
const SEQUENCE_SIZE: usize = 8;

/// Bytes before the payload: CRC + length.
pub const FRAME_HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE;

impl WALRecord {
    pub fn new(sequence: SequenceNumber, batch: WriteBatch) -> Self {
        WALRecord { sequence, batch }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let batch = self.batch.encode();
        let payload_len = SEQUENCE_SIZE + batch.len();
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload_len);

        // Reserve space for CRC (we'll fill it at the end)
        buf.extend_from_slice(&[0u8; CRC_SIZE]);
        buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&batch);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Total framed length declared by the header at the start of `data`,
    /// or `None` if the header itself is incomplete.
    pub fn framed_len(data: &[u8]) -> Option<usize> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let payload_len = u32::from_le_bytes(data[CRC_SIZE..FRAME_HEADER_SIZE].try_into().unwrap());
        Some(FRAME_HEADER_SIZE + payload_len as usize)
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let total_len = Self::framed_len(data)
            .ok_or_else(|| Error::Corruption("record too short".into()))?;
        if data.len() < total_len {
            return Err(Error::Corruption("record truncated".into()));
        }
        if total_len < FRAME_HEADER_SIZE + SEQUENCE_SIZE {
            return Err(Error::Corruption("record payload too short".into()));
        }

        let stored_crc = u32::from_le_bytes(data[0..CRC_SIZE].try_into().unwrap());
        let computed_crc = crc32fast::hash(&data[CRC_SIZE..total_len]);
        if stored_crc != computed_crc {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let mut offset = FRAME_HEADER_SIZE;
        let sequence = u64::from_le_bytes(data[offset..offset + SEQUENCE_SIZE].try_into().unwrap());
        offset += SEQUENCE_SIZE;
        let batch = WriteBatch::decode(&data[offset..total_len])?;

        Ok(WALRecord { sequence, batch })
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        FRAME_HEADER_SIZE + SEQUENCE_SIZE + self.batch.size_bytes()
    }

    /// Sequence number of the last operation in the batch.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.sequence + self.batch.len().saturating_sub(1) as u64
    }
}
