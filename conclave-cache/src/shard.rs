//! Time-partitioned hash shards.
//!
//! The cache's hash index is a stack of shards, each covering a half-open
//! range of message numbers starting at its `start_msgno`. A synode is
//! resolved by walking the stack newest-first and taking the first shard
//! whose `start_msgno` is at or below the synode's message number (the
//! oldest shard is the catch-all).
//!
//! Every shard appended by cache growth is stamped *strictly above* every
//! message number hashed so far. That pins each hashed entry to its
//! shard: nothing pushed later can cover the entry's message number, so
//! hashing out is the same deterministic walk as hashing in. It also
//! means an old shard drains as its range is evicted and can eventually
//! be dropped whole, without rehashing anything.

use conclave_core::Synode;

use crate::lru::{SlotIdx, NIL};

/// One shard: bucket heads for synodes with `msgno >= start_msgno` (up to
/// the next newer shard).
#[derive(Debug)]
pub(crate) struct HashShard {
    /// First message number this shard covers.
    pub start_msgno: u64,
    /// Bucket chain heads into the slot arena.
    pub buckets: Vec<SlotIdx>,
    /// Number of slots currently hashed into this shard.
    pub occupied: usize,
}

impl HashShard {
    pub fn new(start_msgno: u64, n_buckets: usize) -> Self {
        Self {
            start_msgno,
            buckets: vec![NIL; n_buckets],
            occupied: 0,
        }
    }

    /// Bucket index for `synode` within this shard.
    pub fn bucket_of(&self, synode: &Synode) -> usize {
        (synode_hash(synode) % self.buckets.len() as u64) as usize
    }
}

/// Mix a synode into a bucket-independent hash.
///
/// Small-prime mixing is plenty here: message numbers are sequential, so
/// the multiplier spreads consecutive synodes across buckets. This is an
/// in-memory index only — the hash owes no stability across restarts.
pub(crate) fn synode_hash(synode: &Synode) -> u64 {
    synode
        .msgno
        .wrapping_mul(4711)
        .wrapping_add((synode.group_id as u64).wrapping_mul(131))
        .wrapping_add((synode.node as u64).wrapping_mul(73))
}
