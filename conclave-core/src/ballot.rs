//! Ballot numbers: the (counter, node) pairs that totally order competing
//! proposals within one consensus round.
//!
//! A ballot with a higher counter always wins; ties break on the proposing
//! node's number. Counter `-1` is reserved as "less than any real
//! proposal" — it seeds a fresh proposer so that the first round a leader
//! runs without a prepare phase is outranked by any contender that did
//! prepare.

use serde::{Deserialize, Serialize};

use crate::synode::NodeNo;

/// A (counter, node) proposal ballot.
///
/// # Ordering
///
/// `(c1, n1) > (c2, n2)` iff `c1 > c2`, or `c1 == c2 && n1 > n2`. The
/// derived [`Ord`] over the declared field order is exactly this relation.
///
/// # Invariants
///
/// - A proposer only ever raises its own ballot counter.
/// - An acceptor never promises below a ballot it has already promised.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ballot {
    /// Proposal round counter. `-1` sorts below every real proposal.
    pub counter: i32,

    /// The proposing node, breaking ties between equal counters.
    pub node: NodeNo,
}

impl Ballot {
    /// Create a new ballot.
    pub const fn new(counter: i32, node: NodeNo) -> Self {
        Self { counter, node }
    }

    /// The reserved pre-proposal ballot `(-1, node)`.
    ///
    /// Less than any ballot a proposer can actually send, so a fresh
    /// instance never outranks a real contender.
    pub const fn initial(node: NodeNo) -> Self {
        Self { counter: -1, node }
    }

    /// The next ballot this node would propose with.
    pub const fn next_for(self, node: NodeNo) -> Self {
        Self {
            counter: self.counter + 1,
            node,
        }
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({}.{})", self.counter, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_dominates() {
        assert!(Ballot::new(2, 0) > Ballot::new(1, 9));
        assert!(Ballot::new(1, 9) < Ballot::new(2, 0));
    }

    #[test]
    fn test_node_breaks_ties() {
        assert!(Ballot::new(1, 2) > Ballot::new(1, 1));
        assert_eq!(Ballot::new(1, 1), Ballot::new(1, 1));
    }

    #[test]
    fn test_initial_below_any_real_proposal() {
        let init = Ballot::initial(42);
        assert!(init < Ballot::new(0, 0));
        assert!(init < Ballot::new(1, 0));
        // but still ordered among initials by node
        assert!(init > Ballot::initial(0));
    }

    #[test]
    fn test_trichotomy() {
        let ballots = [
            Ballot::initial(0),
            Ballot::new(0, 0),
            Ballot::new(0, 1),
            Ballot::new(1, 0),
            Ballot::new(1, 1),
        ];
        for a in &ballots {
            for b in &ballots {
                let holds = [(a == b), (a > b), (a < b)];
                assert_eq!(
                    holds.iter().filter(|h| **h).count(),
                    1,
                    "exactly one of ==, >, < must hold for {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_transitivity() {
        let a = Ballot::new(1, 0);
        let b = Ballot::new(1, 3);
        let c = Ballot::new(2, 0);
        assert!(b > a && c > b && c > a);
    }

    #[test]
    fn test_next_for() {
        let b = Ballot::initial(3).next_for(3);
        assert_eq!(b, Ballot::new(0, 3));
        assert_eq!(b.next_for(1), Ballot::new(1, 1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Ballot::new(7, 2).to_string(), "ballot(7.2)");
    }

    #[test]
    fn test_serde_roundtrip() {
        let b = Ballot::new(-1, 4);
        let json = serde_json::to_string(&b).expect("serialize");
        let decoded: Ballot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(b, decoded);
    }
}
