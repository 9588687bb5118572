//! Cluster member addresses.

use serde::{Deserialize, Serialize};

/// The address of one cluster member, as configured in a site definition.
///
/// Kept as an opaque "host:port" string at this layer; the transport
/// above resolves and connects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// The member's endpoint in "host:port" form.
    pub address: String,
}

impl NodeAddress {
    /// Create a new node address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    /// Byte footprint of this address, for payload size accounting.
    pub fn size_bytes(&self) -> usize {
        self.address.len()
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Byte footprint of a node list, for payload size accounting.
pub fn node_list_size(nodes: &[NodeAddress]) -> usize {
    nodes.iter().map(NodeAddress::size_bytes).sum()
}
