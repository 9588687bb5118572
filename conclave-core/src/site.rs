//! Site definitions: the membership epochs the consensus core runs under.
//!
//! A *site* describes the group as configured from a given synode onward:
//! which nodes are members, which member this process is, and when the
//! configuration was installed locally. Sites are produced by the
//! reconfiguration machinery above this core; the core only consults them
//! through the [`SiteDirectory`] collaborator.
//!
//! Sites are handed out as `Arc<SiteDef>` — a membership epoch is
//! immutable once installed and is shared between the dispatch layer, the
//! cache's eviction checks, and in-flight messages.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::node::NodeAddress;
use crate::synode::{NodeNo, Synode};

/// One membership epoch of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDef {
    /// The first synode this configuration governs.
    ///
    /// A synode belongs to the site with the greatest `start` not above
    /// it (within the same group).
    pub start: Synode,

    /// The configured member list. Node numbers index into this list.
    pub nodes: Vec<NodeAddress>,

    /// This process's own node number within `nodes`.
    pub this_node: NodeNo,

    /// Monotonic time at which this configuration was installed locally.
    ///
    /// Eviction applies a grace period from this instant: a freshly
    /// installed site has not yet heard delivery acknowledgements from
    /// every member, so nothing governed by it is provably stale.
    pub install_time: Duration,
}

impl SiteDef {
    /// The maximum number of nodes configured for this epoch.
    ///
    /// Node sets for synodes governed by this site are sized to this.
    pub fn max_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The group this site belongs to.
    pub fn group_id(&self) -> u32 {
        self.start.group_id
    }
}

/// Resolves synodes to the membership epoch governing them.
///
/// Implemented by the reconfiguration layer above this core; tests use
/// [`crate::InMemoryGroupEnv`].
pub trait SiteDirectory {
    /// The site whose range contains `synode`, if any.
    fn find_site(&self, synode: &Synode) -> Option<Arc<SiteDef>>;

    /// The most recently installed site, if any.
    fn current_site(&self) -> Option<Arc<SiteDef>>;
}

/// Monotonic delivered-message watermarks.
///
/// "Delivered" means decided *and* applied by the upper layer. The cache
/// never reclaims an instance that is not provably behind these
/// watermarks, because a lagging member could still request it for
/// catch-up.
pub trait DeliveryTracker {
    /// The synode up to which this node has delivered everything.
    fn delivered_msg(&self) -> Synode;

    /// The minimum delivered synode across all members of `site`.
    ///
    /// Returns the null synode while unknown (e.g. before the first
    /// round of acknowledgements), which callers must treat as "nothing
    /// is provably delivered".
    fn min_delivered_msg(&self, site: &SiteDef) -> Synode;
}
