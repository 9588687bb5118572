//! Phase handlers: how incoming messages drive a [`PaxMachine`].
//!
//! The transport and routing above this layer decide *which* machine a
//! message is for (via the cache) and take the machine's advisory lock;
//! these functions then apply the protocol step and hand back the reply
//! to send, if any. They are pure state bookkeeping — no I/O, no
//! suspension.
//!
//! ## Protocol sketch
//!
//! ```text
//! Proposer                                Acceptors
//!   │ start_prepare ── Prepare ──────────>│ handle_prepare
//!   │<───────── AckPrepare[Empty] ────────│   (promise if ballot is current)
//!   │ note_ack_prepare × majority          │
//!   │ start_accept ──── Accept ──────────>│ handle_accept
//!   │<───────────── AckAccept ────────────│   (accept if ballot is current)
//!   │ note_ack_accept × majority           │
//!   │ ───────────────── Learn ───────────>│ handle_learn
//! ```
//!
//! Stale messages (ballot below the acceptor's promise) are **ignored**,
//! not answered: the proposer's retry machinery times out and re-prepares
//! with a higher ballot.

use tracing::{debug, warn};

use conclave_core::{NodeNo, SiteDef};

use crate::app_data::AppDataList;
use crate::machine::{PaxMachine, PaxState};
use crate::msg::{MsgRef, PaxMsg, PaxOp};

/// Whether `acks` out of `n_nodes` is a strict majority.
fn majority(acks: usize, n_nodes: usize) -> bool {
    2 * acks > n_nodes
}

/// Begin phase 1 for this machine's synode: raise our ballot and build
/// the prepare to broadcast.
///
/// Both acknowledgement sets are cleared; promises for the previous
/// ballot no longer count. The built message is retained in the proposer
/// sub-state (for retransmission) and a handle to it is returned for
/// sending.
pub fn start_prepare(pm: &mut PaxMachine, site: &SiteDef) -> MsgRef {
    pm.proposer.ballot = pm.proposer.ballot.next_for(site.this_node);
    pm.proposer.prep_nodeset.zero_all();
    pm.proposer.prop_nodeset.zero_all();

    let mut prepare = PaxMsg::new(pm.synode, Some(site));
    prepare.op = PaxOp::Prepare;
    prepare.proposal = pm.proposer.ballot;

    pm.state = PaxState::PrepareSent;
    pm.op = PaxOp::Prepare;

    debug!(synode = %pm.synode, ballot = %pm.proposer.ballot, "sending prepare");

    let handle = MsgRef::new(prepare);
    pm.proposer.msg = Some(handle.clone());
    handle
}

/// Acceptor side of phase 1: promise iff the prepare's ballot is at or
/// above our current promise.
///
/// The reply re-attaches any previously accepted value (ballot and
/// payload) so the proposer is bound by it; with no prior vote the reply
/// is [`PaxOp::AckPrepareEmpty`]. A stale prepare returns `None` and is
/// not answered.
pub fn handle_prepare(pm: &mut PaxMachine, msg: &MsgRef, site: &SiteDef) -> Option<PaxMsg> {
    if msg.proposal < pm.acceptor.promise {
        debug!(
            synode = %pm.synode,
            proposal = %msg.proposal,
            promise = %pm.acceptor.promise,
            "ignoring prepare with stale ballot"
        );
        return None;
    }

    pm.acceptor.promise = msg.proposal;
    pm.op = PaxOp::Prepare;

    let mut reply = PaxMsg::new(pm.synode, Some(site));
    reply.to = msg.from;
    reply.reply_to = msg.proposal;
    match &pm.acceptor.msg {
        Some(accepted) => {
            // Bound: report the ballot we accepted under and the value.
            reply.op = PaxOp::AckPrepare;
            reply.proposal = accepted.proposal;
            reply.payload = accepted.payload.clone();
        }
        None => {
            reply.op = PaxOp::AckPrepareEmpty;
            reply.proposal = msg.proposal;
        }
    }

    debug!(
        synode = %pm.synode,
        promise = %pm.acceptor.promise,
        bound = pm.acceptor.msg.is_some(),
        "promised"
    );

    Some(reply)
}

/// Record a promise for our outstanding prepare. Returns `true` once a
/// strict majority of the site has promised (the machine then moves to
/// [`PaxState::PromiseReceived`]).
///
/// Promises answering a different ballot than the one we are currently
/// running are stale and ignored.
pub fn note_ack_prepare(pm: &mut PaxMachine, msg: &PaxMsg, site: &SiteDef) -> bool {
    if msg.reply_to != pm.proposer.ballot {
        debug!(
            synode = %pm.synode,
            reply_to = %msg.reply_to,
            ballot = %pm.proposer.ballot,
            "ignoring promise for a different ballot"
        );
        return false;
    }
    pm.proposer.prep_nodeset.set(msg.from);

    let promised = pm.proposer.prep_nodeset.count_set();
    if majority(promised, site.max_nodes()) {
        pm.state = PaxState::PromiseReceived;
        return true;
    }
    false
}

/// Begin phase 2: build the accept carrying `payload` under our current
/// ballot.
///
/// If phase 1 bound us to a previously accepted value, the *caller*
/// passes that value here — binding is visible in the
/// [`PaxOp::AckPrepare`] replies it collected.
pub fn start_accept(pm: &mut PaxMachine, payload: AppDataList, site: &SiteDef) -> MsgRef {
    let mut accept = PaxMsg::new(pm.synode, Some(site));
    accept.op = PaxOp::Accept;
    accept.proposal = pm.proposer.ballot;
    accept.payload = payload;

    pm.proposer.sent_propose = pm.proposer.ballot;
    pm.proposer.prop_nodeset.zero_all();
    pm.state = PaxState::AcceptSent;
    pm.op = PaxOp::Accept;

    debug!(synode = %pm.synode, ballot = %pm.proposer.ballot, "sending accept");

    let handle = MsgRef::new(accept);
    pm.proposer.msg = Some(handle.clone());
    handle
}

/// Acceptor side of phase 2: accept iff the ballot is at or above our
/// promise.
///
/// The accepted message handle is retained in the acceptor sub-state —
/// shared with the network buffer, not copied — and the acknowledgement
/// to send back is returned. A stale accept returns `None`.
pub fn handle_accept(pm: &mut PaxMachine, msg: &MsgRef, site: &SiteDef) -> Option<PaxMsg> {
    if msg.proposal < pm.acceptor.promise {
        warn!(
            synode = %pm.synode,
            proposal = %msg.proposal,
            promise = %pm.acceptor.promise,
            "rejecting accept with stale ballot"
        );
        return None;
    }

    pm.acceptor.promise = msg.proposal;
    pm.acceptor.msg = Some(msg.clone());
    pm.op = PaxOp::Accept;
    pm.force_delivery |= msg.force_delivery;

    let mut reply = PaxMsg::new(pm.synode, Some(site));
    reply.op = PaxOp::AckAccept;
    reply.to = msg.from;
    reply.reply_to = msg.proposal;
    reply.proposal = msg.proposal;

    debug!(synode = %pm.synode, ballot = %msg.proposal, "accepted");

    Some(reply)
}

/// Record an accept acknowledgement. Returns `true` once a strict
/// majority has accepted — the value is decided and the machine moves to
/// [`PaxState::Accepted`]; the caller should now broadcast the learn.
pub fn note_ack_accept(pm: &mut PaxMachine, msg: &PaxMsg, site: &SiteDef) -> bool {
    if msg.reply_to != pm.proposer.ballot {
        debug!(
            synode = %pm.synode,
            reply_to = %msg.reply_to,
            ballot = %pm.proposer.ballot,
            "ignoring accept ack for a different ballot"
        );
        return false;
    }
    pm.proposer.prop_nodeset.set(msg.from);

    let accepted = pm.proposer.prop_nodeset.count_set();
    if majority(accepted, site.max_nodes()) {
        pm.state = PaxState::Accepted;
        return true;
    }
    false
}

/// Build the learn announcing the decided value to `receivers`.
pub fn make_learn(pm: &mut PaxMachine, site: &SiteDef) -> Option<MsgRef> {
    let decided = pm.proposer.msg.as_ref()?;

    let mut learn = decided.clone_without_payload();
    learn.op = PaxOp::Learn;
    learn.payload = decided.payload.clone();
    learn.from = site.this_node;

    pm.proposer.sent_learn = pm.proposer.ballot;
    Some(MsgRef::new(learn))
}

/// Learner side: retain the decided message and mark the round learned.
pub fn handle_learn(pm: &mut PaxMachine, msg: &MsgRef) {
    pm.learner.msg = Some(msg.clone());
    pm.op = PaxOp::Learn;
    pm.state = PaxState::Learned;
    debug!(synode = %pm.synode, "learned");
}

/// Which node a decided-value retransmission should name as the asker.
///
/// Convenience for the catch-up path above this layer: a `Read` for a
/// learned synode is answered from the learner's message.
pub fn answer_read(pm: &PaxMachine, asker: NodeNo) -> Option<PaxMsg> {
    let learned = pm.learner.msg.as_ref()?;
    let mut reply = learned.clone_without_payload();
    reply.payload = learned.payload.clone();
    reply.op = PaxOp::Learn;
    reply.to = asker;
    Some(reply)
}
