//! # LSM-Tree Storage Engine
//!
//! An embedded key-value store built on a log-structured merge tree.
//!
//! ## Core idea
//! Instead of updating data in place (B-Tree), buffer writes in memory,
//! flush them as sorted files, and merge those files in the background.
//! This turns random writes into sequential writes.
//!
//! ## Layout
//! - [`wal`] makes every write durable before it is acknowledged.
//! - [`memtable`] buffers recent writes in sorted order.
//! - [`sstable`] holds immutable sorted runs on disk, with a [`bloom`]
//!   filter per table and a shared block [`cache`].
//! - [`version`] and [`manifest`] track which tables are live at which level.
//! - [`compaction`] merges tables level by level.
//! - [`db`] ties it together: column families, snapshots, iterators and the
//!   background workers.
//!
//! ```no_run
//! use lsm_kv::{DB, Options};
//!
//! let options = Options { create_if_missing: true, ..Default::default() };
//! let db = DB::open(options, "/tmp/lsm-demo")?;
//! db.put(b"k1", b"v1")?;
//! assert_eq!(db.get(b"k1")?, Some(b"v1".to_vec()));
//! # Ok::<(), lsm_kv::Error>(())
//! ```

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod compaction;
pub mod db;
pub mod error;
pub mod iterator;
pub mod manifest;
pub mod memtable;
pub mod snapshot;
pub mod sstable;
pub mod ttl;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use db::{
    ColumnFamilyDescriptor, ColumnFamilyHandle, ColumnFamilyOptions, CompactionStyle, DB,
    DEFAULT_COLUMN_FAMILY_NAME, DbIterator, FlushOptions, LiveFileMetadata, Options, ReadOptions,
    Stats, WriteOptions,
};
pub use error::{Error, Result};
pub use snapshot::Snapshot;
pub use ttl::{Clock, ManualClock, SystemClock};
pub use wal::SyncPolicy;
