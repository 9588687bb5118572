//! Node sets: fixed-capacity bitmaps over configured node indices.
//!
//! A node set tracks which members of a site have acknowledged a given
//! phase of a round (prepare or accept), and doubles as the receiver set
//! carried in outgoing messages. Capacity is fixed at creation — it is
//! derived from the site's maximum node count for the relevant epoch —
//! and never resized in place; growing membership means creating a new
//! node set sized to the new epoch.

use serde::{Deserialize, Serialize};

use crate::synode::NodeNo;

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-capacity bitmap over node indices.
///
/// Cloning deep-copies the underlying storage; equality compares capacity
/// and bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSet {
    capacity: usize,
    words: Vec<u64>,
}

impl NodeSet {
    /// Create a zero-initialized node set holding `capacity` node indices.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            words: vec![0; capacity.div_ceil(WORD_BITS)],
        }
    }

    /// The number of node indices this set can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether node `i` is in the set.
    ///
    /// Out-of-range indices are not in the set.
    pub fn is_set(&self, i: NodeNo) -> bool {
        let i = i as usize;
        if i >= self.capacity {
            return false;
        }
        self.words[i / WORD_BITS] & (1u64 << (i % WORD_BITS)) != 0
    }

    /// Add node `i` to the set.
    ///
    /// Out-of-range indices are debug-asserted and ignored in release.
    pub fn set(&mut self, i: NodeNo) {
        let i = i as usize;
        debug_assert!(i < self.capacity, "node {i} out of range {}", self.capacity);
        if i < self.capacity {
            self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
        }
    }

    /// Remove node `i` from the set.
    pub fn clear(&mut self, i: NodeNo) {
        let i = i as usize;
        debug_assert!(i < self.capacity, "node {i} out of range {}", self.capacity);
        if i < self.capacity {
            self.words[i / WORD_BITS] &= !(1u64 << (i % WORD_BITS));
        }
    }

    /// Clear every bit, keeping the allocated storage.
    ///
    /// This is the reincarnation path: a cached state machine reuses its
    /// node sets across resets instead of reallocating them.
    pub fn zero_all(&mut self) {
        self.words.fill(0);
    }

    /// Number of nodes currently in the set.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Whether no node is in the set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Size in bytes of the underlying bit storage.
    ///
    /// Used by the cache's payload byte accounting.
    pub fn size_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }
}
