//! Per-table bloom filters over user keys.
//!
//! A point lookup consults the filter before touching any data block; a
//! negative answer is definite, so a table that cannot hold the key costs
//! no I/O at all.

pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::error::{Error, Result};

/// Upper bound on probes per key. Past this, extra hashing costs more than
/// the false positives it saves.
const MAX_PROBES: u32 = 30;

/// Serialized header: probe count then bit count, both u32 LE.
const HEADER_SIZE: usize = 8;

/// Bit array plus probe count. Probe positions come from one 128-bit xxh3
/// hash split into two halves `(h1, h2)`; probe `i` tests bit
/// `(h1 + i * h2) mod num_bits`.
///
/// Sized as `bits_per_key = -1.44 * log2(fpr)` and
/// `probes = bits_per_key * ln 2`, which gives about 10 bits and 7 probes
/// per key at a 1% rate.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u32,
    num_hashes: u32,
}

impl BloomFilter {
    /// Empty filter for about `expected_items` keys at `false_positive_rate`.
    ///
    /// # Panics
    /// If `expected_items` is 0 or the rate is outside (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false positive rate must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items as f64 * bits_per_key).ceil() as u32).max(64);
        let num_hashes = ((bits_per_key * std::f64::consts::LN_2).round() as u32).clamp(1, MAX_PROBES);

        BloomFilter {
            bits: vec![0; (num_bits as usize).div_ceil(8)],
            num_bits,
            num_hashes,
        }
    }

    pub fn insert(&mut self, key: &[u8]) {
        for bit in self.probes(key) {
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    /// False means the key was never inserted.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.probes(key)
            .all(|bit| self.bits[bit / 8] & (1 << (bit % 8)) != 0)
    }

    /// `[num_hashes u32][num_bits u32][bit bytes]`, all little-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.bits.len());
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.bits);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let Some((header, bits)) = data.split_first_chunk::<HEADER_SIZE>() else {
            return Err(Error::Corruption(format!(
                "bloom filter truncated: {} bytes",
                data.len()
            )));
        };
        let num_hashes = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let num_bits = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if num_hashes == 0 || num_hashes > MAX_PROBES {
            return Err(Error::Corruption(format!("bloom filter probe count {num_hashes}")));
        }
        if num_bits == 0 || bits.len() != (num_bits as usize).div_ceil(8) {
            return Err(Error::Corruption(format!(
                "bloom filter holds {} bytes for {num_bits} bits",
                bits.len()
            )));
        }
        Ok(BloomFilter {
            bits: bits.to_vec(),
            num_bits,
            num_hashes,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Bit positions tested for `key`.
    fn probes(&self, key: &[u8]) -> impl Iterator<Item = usize> + use<> {
        let hash = xxh3_128(key);
        let h1 = hash as u64;
        let h2 = (hash >> 64) as u64;
        let num_bits = u64::from(self.num_bits);
        (0..u64::from(self.num_hashes)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % num_bits) as usize)
    }
}
