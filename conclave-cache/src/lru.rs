//! Slot arena and intrusive LRU chains.
//!
//! Machines live in a slot arena indexed by `u32`; the probation (free)
//! and protected (in-use) lists are doubly linked chains threaded through
//! index fields embedded in each slot, giving O(1) move-to-front and
//! remove-from-middle without per-node allocation.

use conclave_paxos::PaxMachine;

/// Index of a slot in the arena.
pub(crate) type SlotIdx = u32;

/// "No slot" chain terminator.
pub(crate) const NIL: SlotIdx = u32::MAX;

/// One arena slot: a machine plus its chain linkage.
#[derive(Debug)]
pub(crate) struct Slot {
    pub machine: PaxMachine,
    /// LRU chain linkage (probation or protected, never both).
    pub lru_prev: SlotIdx,
    pub lru_next: SlotIdx,
    /// Hash bucket chain linkage.
    pub hash_prev: SlotIdx,
    pub hash_next: SlotIdx,
    /// Whether the slot is currently linked into a hash bucket.
    pub hashed: bool,
    /// Whether the slot has been released by a capacity decrease.
    pub vacant: bool,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            machine: PaxMachine::new(),
            lru_prev: NIL,
            lru_next: NIL,
            hash_prev: NIL,
            hash_next: NIL,
            hashed: false,
            vacant: false,
        }
    }
}

/// A doubly linked chain of slots, head = most recent.
#[derive(Debug)]
pub(crate) struct LruList {
    head: SlotIdx,
    tail: SlotIdx,
    len: usize,
}

impl LruList {
    pub fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Least recently used slot, or `NIL` when empty.
    pub fn tail(&self) -> SlotIdx {
        self.tail
    }

    /// Link `idx` in as the most recent slot.
    pub fn push_front(&mut self, slots: &mut [Slot], idx: SlotIdx) {
        let slot = &mut slots[idx as usize];
        debug_assert!(!slot.vacant, "vacant slot linked into a list");
        debug_assert!(slot.lru_prev == NIL && slot.lru_next == NIL);
        slot.lru_prev = NIL;
        slot.lru_next = self.head;
        if self.head != NIL {
            slots[self.head as usize].lru_prev = idx;
        } else {
            self.tail = idx;
        }
        self.head = idx;
        self.len += 1;
    }

    /// Splice `idx` out of the chain.
    pub fn unlink(&mut self, slots: &mut [Slot], idx: SlotIdx) {
        let (prev, next) = {
            let slot = &mut slots[idx as usize];
            let links = (slot.lru_prev, slot.lru_next);
            slot.lru_prev = NIL;
            slot.lru_next = NIL;
            links
        };
        if prev != NIL {
            slots[prev as usize].lru_next = next;
        } else {
            debug_assert_eq!(self.head, idx);
            self.head = next;
        }
        if next != NIL {
            slots[next as usize].lru_prev = prev;
        } else {
            debug_assert_eq!(self.tail, idx);
            self.tail = prev;
        }
        self.len -= 1;
    }

    /// Unlink and return the most recent slot.
    pub fn pop_front(&mut self, slots: &mut [Slot]) -> Option<SlotIdx> {
        if self.head == NIL {
            return None;
        }
        let idx = self.head;
        self.unlink(slots, idx);
        Some(idx)
    }

    /// Unlink and return the least recent slot.
    pub fn pop_back(&mut self, slots: &mut [Slot]) -> Option<SlotIdx> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(slots, idx);
        Some(idx)
    }
}
