use std::io;

use thiserror::Error;

/// Unified error type for the storage engine.
///
/// A read miss is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("Corruption: {0}")]
    Corruption(String),

    /// Options that contradict each other or are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller asked for something the current state does not allow.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    #[error("Column family dropped: {0}")]
    ColumnFamilyDropped(String),

    /// Background flush or compaction exhausted its retries. Writes are
    /// refused from then on; reads keep working.
    #[error("Background error: {0}")]
    Background(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Shutdown in progress")]
    ShutdownInProgress,
}

impl Error {
    /// Whether a background job may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
