//! Application payloads: the opaque client data a consensus round decides.
//!
//! A round can decide a *list* of payload entries — reconfiguration
//! commands batched with application blobs — so entries form a singly
//! linked chain hanging off the message that proposed them. The chain is
//! also what the cache's byte accounting measures: a cached machine's
//! footprint is the payload bytes its messages still reference.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use conclave_core::{node_list_size, NodeAddress, NodeSet, Synode};

/// Default time-to-live for a payload entry awaiting consensus.
///
/// An entry older than this that has still not been decided is considered
/// expired by the retry machinery above this layer.
pub const DEFAULT_EXPIRY: Duration = Duration::from_millis(13_000);

/// The payload variants a round can decide.
///
/// Reconfiguration variants carry node lists; `Data` carries an opaque
/// application blob; `View` announces a membership view; the remaining
/// variants are settings and control markers consumed by the group layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Add the listed nodes to the group.
    AddNodes(Vec<NodeAddress>),
    /// Remove the listed nodes from the group.
    RemoveNodes(Vec<NodeAddress>),
    /// Forcibly install the listed nodes as the full membership.
    ForceConfig(Vec<NodeAddress>),
    /// Opaque application bytes, delivered in decision order.
    Data(Vec<u8>),
    /// A membership view message over the current site's nodes.
    View(NodeSet),
    /// Change the pipelining event horizon.
    SetEventHorizon(u32),
    /// Install a new leader preference list.
    SetLeaders(Vec<NodeAddress>),
    /// Orderly shutdown marker.
    Exit,
    /// Protocol reset marker.
    Reset,
}

impl Payload {
    /// Byte footprint of the variant-specific data.
    pub fn size_bytes(&self) -> usize {
        match self {
            Payload::AddNodes(nodes)
            | Payload::RemoveNodes(nodes)
            | Payload::ForceConfig(nodes)
            | Payload::SetLeaders(nodes) => node_list_size(nodes),
            Payload::Data(bytes) => bytes.len(),
            Payload::View(nodes) => nodes.size_bytes(),
            Payload::SetEventHorizon(_) | Payload::Exit | Payload::Reset => 0,
        }
    }
}

/// A payload-list link: either empty or an owned chain of entries.
pub type AppDataList = Option<Box<AppData>>;

/// One entry in a round's payload list.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    /// Unique id assigned by the originating node (null until assigned).
    pub id: Synode,

    /// The group this entry belongs to.
    pub group_id: u32,

    /// Whether the entry requires consensus (as opposed to local-only
    /// bookkeeping entries that piggyback on the list).
    pub consensus: bool,

    /// Whether the entry should be written to the recovery log when
    /// decided.
    pub log_it: bool,

    /// Whether the entry has been decided (set by the delivery path).
    pub chosen: bool,

    /// Time-to-live while awaiting consensus.
    pub expiry: Duration,

    /// The payload itself.
    pub payload: Payload,

    /// The rest of the chain.
    pub next: AppDataList,
}

impl AppData {
    /// Create an unlinked entry with default expiry and null ids.
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Synode::NULL,
            group_id: 0,
            consensus: true,
            log_it: false,
            chosen: false,
            expiry: DEFAULT_EXPIRY,
            payload,
            next: None,
        }
    }

    /// Deep copy of this entry alone, unlinked from any chain.
    pub fn clone_entry(&self) -> Self {
        Self {
            id: self.id,
            group_id: self.group_id,
            consensus: self.consensus,
            log_it: self.log_it,
            chosen: self.chosen,
            expiry: self.expiry,
            payload: self.payload.clone(),
            next: None,
        }
    }

    /// Byte footprint of this entry: fixed struct size plus the
    /// variant-specific payload length.
    pub fn size_bytes(&self) -> usize {
        std::mem::size_of::<AppData>() + self.payload.size_bytes()
    }
}

impl Clone for AppData {
    /// Deep copy of the whole chain starting at this entry.
    ///
    /// Iterative so that cloning a long chain cannot overflow the stack.
    fn clone(&self) -> Self {
        let mut head = self.clone_entry();
        let mut tail = &mut head.next;
        let mut src = self.next.as_deref();
        while let Some(entry) = src {
            let link = tail.insert(Box::new(entry.clone_entry()));
            tail = &mut link.next;
            src = entry.next.as_deref();
        }
        head
    }
}

impl Drop for AppData {
    /// Unlink the chain iteratively; a naive recursive drop would
    /// overflow the stack on long payload lists.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut entry) = next {
            next = entry.next.take();
        }
    }
}

/// Push `entry` onto `list` as the new head.
///
/// The entry must not already be linked into a chain.
pub fn push(list: &mut AppDataList, mut entry: Box<AppData>) {
    debug_assert!(entry.next.is_none(), "entry is already linked into a list");
    entry.next = list.take();
    *list = Some(entry);
}

/// Iterate over the entries of a payload list.
pub fn iter(list: &AppDataList) -> impl Iterator<Item = &AppData> {
    std::iter::successors(list.as_deref(), |entry| entry.next.as_deref())
}

/// Total byte footprint of a payload list.
pub fn list_size(list: &AppDataList) -> u64 {
    iter(list).map(|entry| entry.size_bytes() as u64).sum()
}

/// Number of entries in a payload list. Diagnostics only.
pub fn list_len(list: &AppDataList) -> usize {
    iter(list).count()
}
