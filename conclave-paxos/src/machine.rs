//! Per-synode state machines.
//!
//! One [`PaxMachine`] exists per synode while it is cached, holding the
//! proposer, acceptor, and learner sub-state for that round. Machines are
//! provisioned in bulk by the cache and *reincarnated* — [`PaxMachine::reset`]
//! re-keys an existing machine under a new synode rather than allocating a
//! fresh one — so the reset contract is precise about what is reused
//! (node-set storage of unchanged capacity) and what is released (every
//! held message handle).
//!
//! ## Lock discipline
//!
//! The `lock`/`unlock`/`is_busy` flag is advisory: the machine does not
//! serialize concurrent mutation of its own sub-state. The contract is
//! that exactly one logical owner drives a synode's transitions at a
//! time, taking the lock first; the cache in turn refuses to evict or
//! re-key a locked machine.

use std::time::Duration;

use tracing::trace;

use conclave_core::{Ballot, NodeSet, Synode};

use crate::app_data;
use crate::msg::{MsgRef, PaxOp};

/// Where a round stands, from this node's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaxState {
    /// Nothing has happened yet (also the state after a reset).
    Idle,
    /// This node sent a prepare and is collecting promises.
    PrepareSent,
    /// A majority promised; this node may send its accept.
    PromiseReceived,
    /// This node sent an accept and is collecting acknowledgements.
    AcceptSent,
    /// The value is accepted by a majority (or by this acceptor).
    Accepted,
    /// The decided value is known. Terminal until the delivered
    /// watermark passes the synode and the machine is reincarnated.
    Learned,
}

/// Proposer-role state: the ballots this node has used and the
/// acknowledgements it has collected.
#[derive(Debug)]
pub struct Proposer {
    /// The ballot this node currently proposes under.
    pub ballot: Ballot,

    /// The highest ballot this node has actually sent an accept with.
    pub sent_propose: Ballot,

    /// The highest ballot this node has sent a learn with.
    pub sent_learn: Ballot,

    /// Which nodes have answered our prepare.
    pub prep_nodeset: NodeSet,

    /// Which nodes have acknowledged our accept.
    pub prop_nodeset: NodeSet,

    /// The proposal message this node is currently pushing, if any.
    pub msg: Option<MsgRef>,
}

/// Acceptor-role state: the promise and the accepted message.
#[derive(Debug)]
pub struct Acceptor {
    /// The highest ballot this node has promised not to undercut.
    pub promise: Ballot,

    /// The message whose value this node has accepted, if any.
    pub msg: Option<MsgRef>,
}

/// Learner-role state: the decided message.
#[derive(Debug)]
pub struct Learner {
    /// The decided message, once known.
    pub msg: Option<MsgRef>,
}

/// The full per-synode state machine.
#[derive(Debug)]
pub struct PaxMachine {
    /// The round this machine currently represents.
    pub synode: Synode,

    /// When the cache last touched this machine (recency stamp).
    pub last_modified: Duration,

    /// The phase this round has reached locally.
    pub state: PaxState,

    /// The last operation applied to this machine.
    pub op: PaxOp,

    /// Deliver decisions for this round even to deferring nodes.
    pub force_delivery: bool,

    /// This node is currently enforcing progress on the round
    /// (retransmission ownership).
    pub enforcer: bool,

    /// Proposer sub-state.
    pub proposer: Proposer,

    /// Acceptor sub-state.
    pub acceptor: Acceptor,

    /// Learner sub-state.
    pub learner: Learner,

    locked: bool,
}

impl PaxMachine {
    /// Create an empty machine keyed to the null synode.
    ///
    /// Node sets start with zero capacity; the first [`reset`](Self::reset)
    /// sizes them to the governing site.
    pub fn new() -> Self {
        Self {
            synode: Synode::NULL,
            last_modified: Duration::ZERO,
            state: PaxState::Idle,
            op: PaxOp::Initial,
            force_delivery: false,
            enforcer: false,
            proposer: Proposer {
                ballot: Ballot::initial(0),
                sent_propose: Ballot::new(0, 0),
                sent_learn: Ballot::initial(0),
                prep_nodeset: NodeSet::new(0),
                prop_nodeset: NodeSet::new(0),
                msg: None,
            },
            acceptor: Acceptor {
                promise: Ballot::new(0, 0),
                msg: None,
            },
            learner: Learner { msg: None },
            locked: false,
        }
    }

    /// Re-key this machine for a new incarnation under `synode`.
    ///
    /// Releases every held message handle, restores the ballot seeds
    /// (proposer `(-1, 0)`, sent-propose `(0, 0)`, sent-learn `(-1, 0)`,
    /// promise `(0, 0)`), clears the lock and flags, and returns the
    /// state to [`PaxState::Idle`]. Node-set storage is reused when the
    /// site's node count is unchanged, only zeroed; otherwise the sets
    /// are re-created at `n_nodes`.
    ///
    /// The caller (the cache) settles byte accounting *before* calling
    /// this — by the time the reset runs, the machine's footprint has
    /// already been subtracted.
    pub fn reset(&mut self, synode: Synode, n_nodes: usize) {
        trace!(old = %self.synode, new = %synode, "resetting pax machine");
        self.synode = synode;
        self.last_modified = Duration::ZERO;
        self.state = PaxState::Idle;
        self.op = PaxOp::Initial;
        self.force_delivery = false;
        self.enforcer = false;
        self.locked = false;

        self.proposer.ballot = Ballot::initial(0);
        self.proposer.sent_propose = Ballot::new(0, 0);
        self.proposer.sent_learn = Ballot::initial(0);
        if self.proposer.prep_nodeset.capacity() == n_nodes {
            self.proposer.prep_nodeset.zero_all();
            self.proposer.prop_nodeset.zero_all();
        } else {
            self.proposer.prep_nodeset = NodeSet::new(n_nodes);
            self.proposer.prop_nodeset = NodeSet::new(n_nodes);
        }
        self.proposer.msg = None;

        self.acceptor.promise = Ballot::new(0, 0);
        self.acceptor.msg = None;

        self.learner.msg = None;
    }

    /// Take the advisory busy flag. Returns the *previous* value, so a
    /// caller that gets `true` back knows someone else already holds it.
    pub fn lock(&mut self) -> bool {
        let was = self.locked;
        self.locked = true;
        was
    }

    /// Release the advisory busy flag.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Whether the machine is currently locked by an owner.
    pub fn is_busy(&self) -> bool {
        self.locked
    }

    /// Stamp the recency clock.
    pub fn touch(&mut self, now: Duration) {
        self.last_modified = now;
    }

    /// Byte footprint of the message payloads this machine references.
    ///
    /// The three roles frequently alias the same message (a proposer is
    /// its own acceptor and learner on the happy path); each distinct
    /// allocation is counted once, by handle identity.
    pub fn payload_size(&self) -> u64 {
        let mut size = 0;
        if let Some(prop) = &self.proposer.msg {
            size += app_data::list_size(&prop.payload);
        }
        if let Some(acc) = &self.acceptor.msg {
            let aliased = self
                .proposer
                .msg
                .as_ref()
                .is_some_and(|prop| MsgRef::same(prop, acc));
            if !aliased {
                size += app_data::list_size(&acc.payload);
            }
        }
        if let Some(learn) = &self.learner.msg {
            let aliased = [&self.proposer.msg, &self.acceptor.msg]
                .into_iter()
                .flatten()
                .any(|other| MsgRef::same(other, learn));
            if !aliased {
                size += app_data::list_size(&learn.payload);
            }
        }
        size
    }

    /// Capacity of the machine's ack node sets (the site's node count at
    /// the last reset).
    pub fn nodeset_capacity(&self) -> usize {
        self.proposer.prep_nodeset.capacity()
    }
}

impl Default for PaxMachine {
    fn default() -> Self {
        Self::new()
    }
}
