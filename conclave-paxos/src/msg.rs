//! The wire message exchanged between group members, and the shared
//! handle that manages its lifetime.
//!
//! One [`PaxMsg`] is the unit a node sends or receives for a synode: it
//! names the round, the phase (via [`PaxOp`]), the ballots involved, the
//! intended receivers, and optionally the payload list being proposed.
//!
//! A message is frequently referenced from several places at once — a
//! machine's proposer *and* acceptor role, the cache, and a network
//! buffer still being written out. [`MsgRef`] makes that sharing safe:
//! handles are cheap to clone, the message is freed exactly once when the
//! last owned handle drops, and statically allocated protocol messages
//! are expressible as never-freed [`MsgRef::from_static`] handles.

use std::ops::Deref;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use conclave_core::{Ballot, NodeNo, NodeSet, SiteDef, Synode, VOID_NODE};

use crate::app_data::{self, AppDataList};

/// Operation tag: which phase of the protocol a message drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaxOp {
    /// No operation yet; the state a fresh machine and message start in.
    Initial,
    /// Phase 1a: a proposer asks acceptors to promise a ballot.
    Prepare,
    /// Phase 1b: an acceptor promises, reporting its prior vote.
    AckPrepare,
    /// Phase 1b: an acceptor promises and has no prior vote.
    AckPrepareEmpty,
    /// Phase 2a: a proposer asks acceptors to accept a value.
    Accept,
    /// Phase 2b: an acceptor has accepted the value.
    AckAccept,
    /// Phase 3: the decided value, broadcast to learners.
    Learn,
    /// A compact learn carrying only the deciding ballot, for receivers
    /// that already hold the value.
    TinyLearn,
    /// A retransmission request for a decided value.
    Read,
    /// A client submission entering the system.
    Client,
    /// Terminal marker telling the receiver to shut down the instance.
    Die,
}

/// Message delivery class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    /// An ordinary protocol message.
    Normal,
    /// A no-op filler decided to close a gap in the message number
    /// sequence.
    NoOp,
}

/// The wire unit exchanged between nodes for one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaxMsg {
    /// The round this message belongs to.
    pub synode: Synode,

    /// Sending node, or [`VOID_NODE`] when created without a site.
    pub from: NodeNo,

    /// Addressed node, or [`VOID_NODE`] for broadcast.
    pub to: NodeNo,

    /// Which phase this message drives.
    pub op: PaxOp,

    /// The ballot this message answers (acknowledgements only).
    pub reply_to: Ballot,

    /// The ballot this message proposes or was accepted under.
    pub proposal: Ballot,

    /// Delivery class.
    pub msg_type: MsgType,

    /// The nodes this message is intended for.
    pub receivers: NodeSet,

    /// The payload list being proposed or decided, if any.
    pub payload: AppDataList,

    /// Deliver even to nodes that would normally defer (recovery paths).
    pub force_delivery: bool,

    /// The sender's pipelining event horizon, piggybacked for flow
    /// control.
    pub event_horizon: u32,
}

impl PaxMsg {
    /// Create a zeroed message for `synode`.
    ///
    /// `from` is the site's own node number, or [`VOID_NODE`] without a
    /// site. The reply ballot starts at `(0, from)` and the proposal at
    /// `(-1, from)` so that anything a real proposer sends outranks it.
    pub fn new(synode: Synode, site: Option<&SiteDef>) -> Self {
        let from = site.map(|s| s.this_node).unwrap_or(VOID_NODE);
        Self {
            synode,
            from,
            to: VOID_NODE,
            op: PaxOp::Initial,
            reply_to: Ballot::new(0, from),
            proposal: Ballot::initial(from),
            msg_type: MsgType::Normal,
            receivers: NodeSet::new(site.map(SiteDef::max_nodes).unwrap_or(0)),
            payload: None,
            force_delivery: false,
            event_horizon: 0,
        }
    }

    /// Copy of this message without the payload list.
    ///
    /// The receiver set is deep-copied; the payload is left for the
    /// caller to attach (or not). Used when relaying a message shell
    /// whose payload the relay does not own.
    pub fn clone_without_payload(&self) -> Self {
        Self {
            synode: self.synode,
            from: self.from,
            to: self.to,
            op: self.op,
            reply_to: self.reply_to,
            proposal: self.proposal,
            msg_type: self.msg_type,
            receivers: self.receivers.clone(),
            payload: None,
            force_delivery: self.force_delivery,
            event_horizon: self.event_horizon,
        }
    }

    /// Byte footprint of the payload list this message references.
    pub fn payload_size(&self) -> u64 {
        app_data::list_size(&self.payload)
    }
}

#[derive(Debug, Clone)]
enum Ownership {
    /// Freed when the last handle drops.
    Owned(Arc<PaxMsg>),
    /// Statically allocated; handles never free it and count nothing.
    Static(&'static PaxMsg),
}

/// Shared handle to a [`PaxMsg`].
///
/// `Clone` takes a reference, `Drop` releases one; the message is freed
/// exactly once, when the last handle to an [owned](MsgRef::new) message
/// drops. Handles to [static](MsgRef::from_static) messages are no-ops
/// at any count — the unmanaged half of the ownership model, for
/// protocol constants with static storage.
#[derive(Debug, Clone)]
pub struct MsgRef {
    ownership: Ownership,
}

impl MsgRef {
    /// Take ownership of a message.
    pub fn new(msg: PaxMsg) -> Self {
        Self {
            ownership: Ownership::Owned(Arc::new(msg)),
        }
    }

    /// Wrap a statically allocated message. The handle never frees it.
    pub fn from_static(msg: &'static PaxMsg) -> Self {
        Self {
            ownership: Ownership::Static(msg),
        }
    }

    /// Whether two handles refer to the same message allocation.
    ///
    /// This is identity, not structural equality — the test the cache's
    /// size accounting uses to avoid counting an aliased message twice.
    pub fn same(a: &MsgRef, b: &MsgRef) -> bool {
        match (&a.ownership, &b.ownership) {
            (Ownership::Owned(x), Ownership::Owned(y)) => Arc::ptr_eq(x, y),
            (Ownership::Static(x), Ownership::Static(y)) => std::ptr::eq(*x, *y),
            _ => false,
        }
    }

    /// Whether this handle wraps a statically allocated message.
    pub fn is_static(&self) -> bool {
        matches!(self.ownership, Ownership::Static(_))
    }

    /// Number of live handles to an owned message; `None` for static
    /// messages, which are not counted.
    pub fn ref_count(&self) -> Option<usize> {
        match &self.ownership {
            Ownership::Owned(arc) => Some(Arc::strong_count(arc)),
            Ownership::Static(_) => None,
        }
    }

    /// A weak observer of an owned message's allocation; `None` for
    /// static messages.
    ///
    /// Lets tests and diagnostics observe that the message was freed
    /// exactly once without keeping it alive.
    pub fn observe(&self) -> Option<Weak<PaxMsg>> {
        match &self.ownership {
            Ownership::Owned(arc) => Some(Arc::downgrade(arc)),
            Ownership::Static(_) => None,
        }
    }
}

impl Deref for MsgRef {
    type Target = PaxMsg;

    fn deref(&self) -> &PaxMsg {
        match &self.ownership {
            Ownership::Owned(arc) => arc,
            Ownership::Static(msg) => msg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_data::{push, AppData, Payload};
    use conclave_core::NodeAddress;

    fn test_site() -> SiteDef {
        SiteDef {
            start: Synode::new(1, 1, 0),
            nodes: vec![
                NodeAddress::new("a:1"),
                NodeAddress::new("b:2"),
                NodeAddress::new("c:3"),
            ],
            this_node: 1,
            install_time: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn test_new_with_site() {
        let msg = PaxMsg::new(Synode::new(1, 5, 0), Some(&test_site()));

        assert_eq!(msg.from, 1);
        assert_eq!(msg.to, VOID_NODE);
        assert_eq!(msg.op, PaxOp::Initial);
        assert_eq!(msg.reply_to, Ballot::new(0, 1));
        assert_eq!(msg.proposal, Ballot::initial(1));
        assert_eq!(msg.msg_type, MsgType::Normal);
        assert_eq!(msg.receivers.capacity(), 3);
        assert!(msg.payload.is_none());
    }

    #[test]
    fn test_new_without_site() {
        let msg = PaxMsg::new(Synode::new(1, 5, 0), None);
        assert_eq!(msg.from, VOID_NODE);
        assert_eq!(msg.receivers.capacity(), 0);
    }

    #[test]
    fn test_clone_without_payload() {
        let mut msg = PaxMsg::new(Synode::new(1, 5, 0), Some(&test_site()));
        msg.receivers.set(2);
        push(
            &mut msg.payload,
            Box::new(AppData::new(Payload::Data(vec![1, 2, 3]))),
        );

        let shell = msg.clone_without_payload();
        assert!(shell.payload.is_none());
        assert!(shell.receivers.is_set(2));
        assert_eq!(shell.synode, msg.synode);
        assert_eq!(shell.payload_size(), 0);
        assert!(msg.payload_size() > 0);
    }

    #[test]
    fn test_full_clone_is_structurally_equal_and_independent() {
        let mut msg = PaxMsg::new(Synode::new(1, 5, 0), Some(&test_site()));
        msg.receivers.set(0);
        msg.receivers.set(2);
        push(
            &mut msg.payload,
            Box::new(AppData::new(Payload::Data(vec![9u8; 10]))),
        );

        let mut copy = msg.clone();
        assert_eq!(copy, msg);
        assert_eq!(copy.payload_size(), msg.payload_size());

        match &mut copy.payload.as_deref_mut().expect("entry").payload {
            Payload::Data(bytes) => bytes[0] = 0,
            other => panic!("expected Data, got {other:?}"),
        }
        assert_ne!(copy, msg, "the copy owns its payload");
    }

    #[test]
    fn test_ref_counting_frees_exactly_once() {
        let handle = MsgRef::new(PaxMsg::new(Synode::new(1, 5, 0), None));
        let watch = handle.observe().expect("owned");

        // Three refs on top of the original.
        let r1 = handle.clone();
        let r2 = handle.clone();
        let r3 = handle.clone();
        assert_eq!(handle.ref_count(), Some(4));

        drop(r1);
        drop(r2);
        drop(r3);
        assert_eq!(handle.ref_count(), Some(1));
        assert!(watch.upgrade().is_some(), "still allocated");

        drop(handle);
        assert!(watch.upgrade().is_none(), "freed on the last release");
    }

    #[test]
    fn test_same_is_identity_not_equality() {
        let a = MsgRef::new(PaxMsg::new(Synode::new(1, 5, 0), None));
        let b = MsgRef::new(PaxMsg::new(Synode::new(1, 5, 0), None));
        let alias = a.clone();

        assert!(MsgRef::same(&a, &alias));
        assert!(!MsgRef::same(&a, &b), "equal contents, different allocations");
    }

    #[test]
    fn test_static_messages_are_unmanaged() {
        let msg: &'static PaxMsg =
            Box::leak(Box::new(PaxMsg::new(Synode::new(1, 1, 0), None)));
        let handle = MsgRef::from_static(msg);

        assert!(handle.is_static());
        assert_eq!(handle.ref_count(), None);
        assert!(handle.observe().is_none());

        let copy = handle.clone();
        assert!(MsgRef::same(&handle, &copy));
        drop(copy);
        // Still reachable through the original static reference.
        assert_eq!(msg.synode, Synode::new(1, 1, 0));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut msg = PaxMsg::new(Synode::new(1, 5, 0), Some(&test_site()));
        msg.op = PaxOp::Accept;
        msg.proposal = Ballot::new(2, 1);
        push(
            &mut msg.payload,
            Box::new(AppData::new(Payload::Data(vec![1, 2]))),
        );

        let json = serde_json::to_string(&msg).expect("serialize");
        let decoded: PaxMsg = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, msg);
    }
}
