use std::sync::Arc;
use std::time::Duration;

use crate::db::options::ReadOptions;
use crate::error::Result;
use crate::iterator::{MergeIterator, StorageIterator};
use crate::memtable::manager::MemTableSet;
use crate::snapshot::Snapshot;
use crate::ttl;
use crate::types::{MAX_SEQUENCE_NUMBER, ParsedInternalKey, SequenceNumber, ValueType, encode_internal_key};
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The merged cursor sits on the entry that produced the current key.
    Forward,
    /// The merged cursor sits just before every entry of the current key.
    Reverse,
}

/// Cursor over the user-visible state of one column family.
///
/// Merges the memtables and every level, hides versions newer than the read
/// sequence, tombstones and expired TTL records, and yields each user key at
/// most once. Moves in both directions and may switch at any time.
///
/// The iterator owns everything it reads: the memtables, the version (and
/// through it the SSTables) and the snapshot stay alive until it is dropped.
pub struct DbIterator {
    inner: MergeIterator,
    sequence: SequenceNumber,
    ttl: Option<Duration>,
    now_secs: u64,
    lower_bound: Option<Vec<u8>>,
    upper_bound: Option<Vec<u8>>,
    direction: Direction,
    valid: bool,
    key: Vec<u8>,
    value: Vec<u8>,
    _snapshot: Option<Snapshot>,
    _version: Arc<Version>,
    _memtables: MemTableSet,
}

impl DbIterator {
    pub(crate) fn new(
        memtables: MemTableSet,
        version: Arc<Version>,
        sequence: SequenceNumber,
        ttl: Option<Duration>,
        now_secs: u64,
        options: ReadOptions,
    ) -> Result<Self> {
        let mut children: Vec<Box<dyn StorageIterator>> = Vec::new();
        children.push(Box::new(memtables.active.iter()));
        for table in &memtables.immutables {
            children.push(Box::new(table.iter()));
        }
        children.extend(version.iterators(options.fill_cache));
        Ok(DbIterator {
            inner: MergeIterator::new(children)?,
            sequence,
            ttl,
            now_secs,
            lower_bound: options.iterate_lower_bound,
            upper_bound: options.iterate_upper_bound,
            direction: Direction::Forward,
            valid: false,
            key: Vec::new(),
            value: Vec::new(),
            _snapshot: options.snapshot,
            _version: version,
            _memtables: memtables,
        })
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Current user key. Empty when not [`valid`](Self::valid).
    pub fn key(&self) -> &[u8] {
        if self.valid { &self.key } else { &[] }
    }

    /// Current value. Empty when not [`valid`](Self::valid).
    pub fn value(&self) -> &[u8] {
        if self.valid { &self.value } else { &[] }
    }

    pub fn seek_to_first(&mut self) -> Result<()> {
        self.direction = Direction::Forward;
        match &self.lower_bound {
            Some(lower) => {
                let target = encode_internal_key(lower, MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK);
                self.inner.seek(&target)?;
            }
            None => self.inner.seek_to_first()?,
        }
        self.find_next_user_entry(false)
    }

    pub fn seek_to_last(&mut self) -> Result<()> {
        self.direction = Direction::Reverse;
        match &self.upper_bound {
            Some(upper) => {
                let target = encode_internal_key(upper, MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK);
                self.inner.seek_before(&target)?;
            }
            None => self.inner.seek_to_last()?,
        }
        self.find_prev_user_entry()
    }

    /// Position at the first key `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        let target = match &self.lower_bound {
            Some(lower) if target < lower.as_slice() => lower.clone(),
            _ => target.to_vec(),
        };
        self.direction = Direction::Forward;
        self.inner
            .seek(&encode_internal_key(&target, self.sequence, ValueType::FOR_SEEK))?;
        self.find_next_user_entry(false)
    }

    /// Position at the last key `<= target`.
    pub fn seek_for_prev(&mut self, target: &[u8]) -> Result<()> {
        if self
            .upper_bound
            .as_ref()
            .is_some_and(|upper| target >= upper.as_slice())
        {
            return self.seek_to_last();
        }
        self.direction = Direction::Reverse;
        // Sequence 0 with the lowest type sorts after every version of `target`.
        self.inner
            .seek_before(&encode_internal_key(target, 0, ValueType::Delete))?;
        self.find_prev_user_entry()
    }

    pub fn next(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;
            if self.inner.is_valid() {
                self.inner.next()?;
            } else {
                self.inner.seek_to_first()?;
            }
        } else {
            self.inner.next()?;
        }
        // `self.key` holds the key to skip past.
        self.find_next_user_entry(true)
    }

    pub fn prev(&mut self) -> Result<()> {
        if !self.valid {
            return Ok(());
        }
        if self.direction == Direction::Forward {
            // Back up to just before every entry of the current key.
            loop {
                self.inner.prev()?;
                if !self.inner.is_valid() {
                    self.invalidate();
                    return Ok(());
                }
                if crate::types::user_key(self.inner.key()) < self.key.as_slice() {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }
        self.find_prev_user_entry()
    }

    /// Type of the entry under the cursor once TTL expiry is applied.
    fn effective_type(&self, parsed: &ParsedInternalKey<'_>) -> ValueType {
        match (self.ttl, parsed.value_type) {
            (Some(ttl), ValueType::Put) if ttl::is_expired(self.inner.value(), ttl, self.now_secs) => {
                ValueType::Delete
            }
            (_, value_type) => value_type,
        }
    }

    fn save_value(&mut self) -> Result<()> {
        let stored = self.inner.value();
        let value = match self.ttl {
            Some(_) => ttl::strip_timestamp(stored)?.0,
            None => stored,
        };
        self.value.clear();
        self.value.extend_from_slice(value);
        Ok(())
    }

    fn find_next_user_entry(&mut self, mut skipping: bool) -> Result<()> {
        while self.inner.is_valid() {
            let parsed = ParsedInternalKey::parse(self.inner.key())?;
            if self
                .upper_bound
                .as_ref()
                .is_some_and(|upper| parsed.user_key >= upper.as_slice())
            {
                break;
            }
            if parsed.sequence <= self.sequence {
                match self.effective_type(&parsed) {
                    ValueType::Delete => {
                        // Hide every older entry of this key.
                        self.key.clear();
                        self.key.extend_from_slice(parsed.user_key);
                        skipping = true;
                    }
                    ValueType::Put => {
                        let hidden = skipping && parsed.user_key <= self.key.as_slice();
                        if !hidden {
                            let user_key = parsed.user_key.to_vec();
                            self.key = user_key;
                            self.save_value()?;
                            self.valid = true;
                            return Ok(());
                        }
                    }
                }
            }
            self.inner.next()?;
        }
        self.invalidate();
        Ok(())
    }

    fn find_prev_user_entry(&mut self) -> Result<()> {
        let mut found = ValueType::Delete;
        while self.inner.is_valid() {
            let parsed = ParsedInternalKey::parse(self.inner.key())?;
            if self
                .lower_bound
                .as_ref()
                .is_some_and(|lower| parsed.user_key < lower.as_slice())
            {
                break;
            }
            if parsed.sequence <= self.sequence {
                if found != ValueType::Delete && parsed.user_key < self.key.as_slice() {
                    // Moved past the newest visible entry of `self.key`.
                    break;
                }
                found = self.effective_type(&parsed);
                if found == ValueType::Delete {
                    self.key.clear();
                    self.value.clear();
                } else {
                    let user_key = parsed.user_key.to_vec();
                    self.key = user_key;
                    self.save_value()?;
                }
            }
            self.inner.prev()?;
        }

        if found == ValueType::Delete {
            self.invalidate();
        } else {
            self.valid = true;
        }
        Ok(())
    }

    fn invalidate(&mut self) {
        self.valid = false;
        self.direction = Direction::Forward;
        self.key.clear();
        self.value.clear();
    }
}
