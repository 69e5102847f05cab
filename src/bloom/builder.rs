use crate::bloom::BloomFilter;

/// Collects the user keys of an SSTable while it is being built.
///
/// The final key count is only known at `finish()`, so keys are hashed into
/// the filter then rather than up front:
/// 1. Create BloomFilterBuilder with the target false positive rate
/// 2. Call add_key() for every user key written to the SSTable
/// 3. Call build() to get the final BloomFilter for serialization
///
/// Consecutive duplicates (several versions of one user key) are stored once.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    /// Create a builder expecting approximately `estimated_keys` keys.
    pub fn new(estimated_keys: usize, false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::with_capacity(estimated_keys),
            false_positive_rate,
        }
    }

    /// Add a key to the bloom filter being built.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().is_some_and(|last| last.as_slice() == key) {
            return;
        }
        self.keys.push(key.to_vec());
    }

    /// Number of distinct keys added so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Finalize and return the bloom filter, sized for the keys actually seen.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len().max(1), self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
