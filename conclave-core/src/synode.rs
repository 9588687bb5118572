//! Synode addressing: the (group, message-number, node) triple that names
//! one consensus round.
//!
//! Every message, every cached state machine, and every watermark in the
//! system is keyed by a [`Synode`]. Within a group, synodes are totally
//! ordered by `(msgno, node)`; across groups they are **not comparable** —
//! a group id partitions unrelated clusters or epochs, and any logic that
//! compares synodes from different groups must treat the answer as
//! "unknown" rather than picking an arbitrary winner.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Index of a node within a group's configured member list.
pub type NodeNo = u32;

/// Sentinel node number meaning "no node".
///
/// Used for messages created without a site (no sender yet) and for the
/// null synode.
pub const VOID_NODE: NodeNo = u32::MAX;

/// The (group, message-number, node) triple addressing one consensus
/// round/slot.
///
/// Synodes never change once assigned; they are the cache key and the
/// wire-level instance identifier.
///
/// # Ordering
///
/// [`PartialOrd`] is implemented, not [`Ord`]: two synodes from different
/// groups have no defined order (`partial_cmp` returns `None`). Within a
/// group the order is lexicographic on `(msgno, node)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Synode {
    /// Partition id separating unrelated clusters/epochs.
    pub group_id: u32,

    /// Message number: the monotonically assigned slot within the group.
    pub msgno: u64,

    /// The node that owns this slot (proposer rotation index).
    pub node: NodeNo,
}

impl Synode {
    /// The null synode: "no instance".
    ///
    /// Recognizable by `msgno == 0` with the [`VOID_NODE`] sentinel.
    pub const NULL: Self = Self {
        group_id: 0,
        msgno: 0,
        node: VOID_NODE,
    };

    /// Create a new synode.
    pub const fn new(group_id: u32, msgno: u64, node: NodeNo) -> Self {
        Self {
            group_id,
            msgno,
            node,
        }
    }

    /// Whether this is the null synode (no instance).
    pub const fn is_null(&self) -> bool {
        self.msgno == 0 && self.node == VOID_NODE
    }

    /// The same slot re-addressed to a different node.
    pub const fn with_node(self, node: NodeNo) -> Self {
        Self { node, ..self }
    }
}

impl PartialOrd for Synode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.group_id != other.group_id {
            return None;
        }
        Some((self.msgno, self.node).cmp(&(other.msgno, other.node)))
    }
}

impl std::fmt::Display for Synode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "synode({:x}:{}:{})",
            self.group_id, self.msgno, self.node
        )
    }
}
