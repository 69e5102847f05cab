use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Registry of live snapshots and the sequence numbers they pin.
///
/// Compaction asks for the oldest pinned sequence: every record that is the
/// newest version at or below a pinned sequence must survive.
#[derive(Debug, Default)]
pub struct SnapshotList {
    next_id: AtomicU64,
    pinned: Mutex<BTreeMap<u64, SequenceNumber>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        SnapshotList {
            next_id: AtomicU64::new(1),
            pinned: Mutex::new(BTreeMap::new()),
        }
    }

    /// Pin the current value of `last_sequence` and return a handle that
    /// unpins it when dropped.
    ///
    /// The sequence is read under the registry lock, so a concurrent
    /// [`SnapshotList::smallest`] either sees the pin or returns a bound no
    /// newer than the pinned sequence.
    pub fn acquire(self: &Arc<Self>, last_sequence: &AtomicU64) -> Snapshot {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let sequence = {
            let mut pinned = self.pinned.lock();
            let sequence = last_sequence.load(Ordering::Acquire);
            pinned.insert(id, sequence);
            sequence
        };
        Snapshot {
            inner: Arc::new(SnapshotInner {
                id,
                sequence,
                list: Arc::clone(self),
            }),
        }
    }

    /// Oldest pinned sequence, if any snapshot is live.
    pub fn oldest(&self) -> Option<SequenceNumber> {
        self.pinned.lock().values().copied().min()
    }

    /// Lowest sequence any current or future reader may read at: the oldest
    /// pin, or `last_sequence` when nothing is pinned.
    pub fn smallest(&self, last_sequence: &AtomicU64) -> SequenceNumber {
        let pinned = self.pinned.lock();
        let last = last_sequence.load(Ordering::Acquire);
        pinned.values().copied().min().map_or(last, |oldest| oldest.min(last))
    }

    pub fn len(&self) -> usize {
        self.pinned.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.lock().is_empty()
    }

    fn release(&self, id: u64) {
        self.pinned.lock().remove(&id);
    }
}

struct SnapshotInner {
    id: u64,
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
}

impl Drop for SnapshotInner {
    fn drop(&mut self) {
        self.list.release(self.id);
    }
}

/// A consistent read view: reads through it see exactly the writes with
/// sequence numbers up to [`Snapshot::sequence`].
///
/// Cloning shares the pin; it is released when the last clone is dropped.
/// Iterators created with a snapshot hold a clone, so the caller may drop
/// its handle while iteration continues.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }

    /// Whether the snapshot was taken from the database owning `list`.
    pub(crate) fn belongs_to(&self, list: &Arc<SnapshotList>) -> bool {
        Arc::ptr_eq(&self.inner.list, list)
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("id", &self.inner.id)
            .field("sequence", &self.inner.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_tracks_live_handles() {
        let list = Arc::new(SnapshotList::new());
        let sequence = AtomicU64::new(5);
        let b = list.acquire(&sequence);
        sequence.store(10, Ordering::Release);
        let a = list.acquire(&sequence);
        let c = b.clone();
        assert_eq!(list.oldest(), Some(5));

        drop(b);
        assert_eq!(list.oldest(), Some(5), "clone keeps the pin alive");
        drop(c);
        assert_eq!(list.oldest(), Some(10));
        drop(a);
        assert_eq!(list.oldest(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn snapshot_knows_its_owner() {
        let list = Arc::new(SnapshotList::new());
        let other = Arc::new(SnapshotList::new());
        let snap = list.acquire(&AtomicU64::new(1));
        assert!(snap.belongs_to(&list));
        assert!(!snap.belongs_to(&other));
    }

    #[test]
    fn smallest_falls_back_to_last_sequence() {
        let list = Arc::new(SnapshotList::new());
        let sequence = AtomicU64::new(7);
        assert_eq!(list.smallest(&sequence), 7);

        let snap = list.acquire(&sequence);
        assert_eq!(snap.sequence(), 7);
        sequence.store(20, Ordering::Release);
        assert_eq!(list.smallest(&sequence), 7, "pin holds the bound down");

        drop(snap);
        assert_eq!(list.smallest(&sequence), 20);
    }
}
