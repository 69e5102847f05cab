//! Time-to-live support for column families opened with a `ttl`.
//!
//! A put into such a column family stores its write time, in seconds since
//! the Unix epoch, as 8 little-endian bytes after the user value. The suffix
//! travels through the WAL, memtables and SSTables untouched; reads strip it
//! and hide records whose age reached the ttl, and compaction rewrites them
//! as tombstones.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

pub const TIMESTAMP_SIZE: usize = 8;

/// Source of wall-clock time for TTL decisions.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_secs(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Handy for exercising expiry.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicU64,
}

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        ManualClock {
            secs: AtomicU64::new(secs),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.secs.fetch_add(by.as_secs(), Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Append the write timestamp to a user value.
pub fn append_timestamp(value: &[u8], now_secs: u64) -> Vec<u8> {
    let mut stored = Vec::with_capacity(value.len() + TIMESTAMP_SIZE);
    stored.extend_from_slice(value);
    stored.extend_from_slice(&now_secs.to_le_bytes());
    stored
}

/// Split a stored value into the user value and its write timestamp.
pub fn strip_timestamp(stored: &[u8]) -> Result<(&[u8], u64)> {
    if stored.len() < TIMESTAMP_SIZE {
        return Err(Error::Corruption(format!(
            "ttl value too short: {} bytes",
            stored.len()
        )));
    }
    let split = stored.len() - TIMESTAMP_SIZE;
    let ts = u64::from_le_bytes(stored[split..].try_into().unwrap());
    Ok((&stored[..split], ts))
}

/// Whether a stored value written at its embedded timestamp has outlived `ttl`.
pub fn is_expired(stored: &[u8], ttl: Duration, now_secs: u64) -> bool {
    match strip_timestamp(stored) {
        Ok((_, written)) => written.saturating_add(ttl.as_secs()) <= now_secs,
        // A value too short to carry a timestamp was not written in ttl mode.
        Err(_) => false,
    }
}
