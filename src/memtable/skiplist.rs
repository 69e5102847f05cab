use std::cmp::Ordering;

use rand::Rng;

use crate::types::compare_internal_keys;

/// Maximum height of the skip list. LevelDB uses 12.
pub const MAX_HEIGHT: usize = 12;

/// One in BRANCHING nodes is promoted to the next level.
const BRANCHING: u32 = 4;

/// Index of the head sentinel in the arena.
const HEAD: usize = 0;

/// A single node in the skip list.
///
/// Each node has `height` forward pointers. Level 0 contains all nodes
/// (a regular linked list). Higher levels skip over nodes, enabling
/// O(log n) average-case search.
///
/// ```text
/// Level 3:  HEAD ──────────────────────────────► 50 ──────────► NIL
/// Level 2:  HEAD ──────────► 20 ────────────────► 50 ──────────► NIL
/// Level 1:  HEAD ──► 10 ──► 20 ────► 35 ────────► 50 ──► 60 ──► NIL
/// Level 0:  HEAD ──► 10 ──► 20 ──► 25 ──► 35 ──► 50 ──► 60 ──► 70 ► NIL
/// ```
///
/// Nodes live in an arena (`SkipList.nodes`) and point at each other by
/// index. Nodes are never removed, so an index stays valid for the life of
/// the list; iterators rely on that.
struct SkipNode {
    key: Vec<u8>,
    value: Vec<u8>,
    forward: Vec<Option<usize>>,
}

/// A probabilistic sorted map from encoded internal keys to values.
///
/// Keys are ordered with [`compare_internal_keys`], so all versions of a user
/// key sit next to each other, newest first.
///
/// Average case: O(log n) insert, O(log n) lookup, O(n) iteration.
pub struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    len: usize,
    size_bytes: usize,
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

impl SkipList {
    /// Create a new empty skip list.
    pub fn new() -> Self {
        let head = SkipNode {
            key: Vec::new(),
            value: Vec::new(),
            forward: vec![None; MAX_HEIGHT],
        };
        SkipList {
            nodes: vec![head],
            height: 1,
            len: 0,
            size_bytes: 0,
        }
    }

    /// Insert a key-value pair. Overwrites if key already exists.
    ///
    /// Algorithm:
    ///   1. Find the insertion point at each level (track predecessors)
    ///   2. Generate a random height for the new node (coin flip per level)
    ///   3. Create node with that height
    ///   4. Splice into the list at each level up to the node's height
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.compare(next, &key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
            prev[level] = x;
        }

        if let Some(next) = self.nodes[prev[0]].forward[0] {
            if self.compare(next, &key) == Ordering::Equal {
                let node = &mut self.nodes[next];
                self.size_bytes = self.size_bytes - node.value.len() + value.len();
                node.value = value;
                return;
            }
        }

        let height = self.random_height();
        if height > self.height {
            for slot in prev.iter_mut().take(height).skip(self.height) {
                *slot = HEAD;
            }
            self.height = height;
        }

        let index = self.nodes.len();
        let mut forward = vec![None; height];
        for (level, slot) in forward.iter_mut().enumerate() {
            *slot = self.nodes[prev[level]].forward[level];
        }
        self.size_bytes += key.len() + value.len() + height * std::mem::size_of::<Option<usize>>();
        self.nodes.push(SkipNode {
            key,
            value,
            forward,
        });
        for (level, p) in prev.iter().enumerate().take(height) {
            self.nodes[*p].forward[level] = Some(index);
        }
        self.len += 1;
    }

    /// Look up an exact key. Returns the value if found.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let index = self.find_greater_or_equal(key)?;
        let node = &self.nodes[index];
        (compare_internal_keys(&node.key, key) == Ordering::Equal).then_some(node.value.as_slice())
    }

    /// First node whose key is >= `key`.
    ///
    /// Algorithm:
    ///   1. Start at head, highest level
    ///   2. Move forward while next key < target
    ///   3. Drop down one level
    ///   4. Repeat until level 0
    pub fn find_greater_or_equal(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.compare(next, key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
        }
        self.nodes[x].forward[0]
    }

    /// Last node whose key is < `key`.
    pub fn find_less_than(&self, key: &[u8]) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                if self.compare(next, key) == Ordering::Less {
                    x = next;
                } else {
                    break;
                }
            }
        }
        (x != HEAD).then_some(x)
    }

    /// Last node in the list.
    pub fn find_last(&self) -> Option<usize> {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while let Some(next) = self.nodes[x].forward[level] {
                x = next;
            }
        }
        (x != HEAD).then_some(x)
    }

    pub fn first(&self) -> Option<usize> {
        self.nodes[HEAD].forward[0]
    }

    pub fn next_of(&self, index: usize) -> Option<usize> {
        self.nodes[index].forward[0]
    }

    pub fn key_at(&self, index: usize) -> &[u8] {
        &self.nodes[index].key
    }

    pub fn value_at(&self, index: usize) -> &[u8] {
        &self.nodes[index].value
    }

    /// Number of entries in the skip list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the skip list is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Approximate memory usage in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// All entries in sorted order.
    /// Traverses level 0 (the bottom level contains all entries).
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        std::iter::successors(self.first(), move |i| self.next_of(*i))
            .map(move |i| (self.key_at(i), self.value_at(i)))
    }

    fn compare(&self, index: usize, key: &[u8]) -> Ordering {
        compare_internal_keys(&self.nodes[index].key, key)
    }

    /// Generate a random level for a new node.
    /// Each level has a 1/4 probability (LevelDB uses 1/4, not 1/2).
    fn random_height(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(0..BRANCHING) == 0 {
            height += 1;
        }
        height
    }
}
