use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node participating in the cluster.
///
/// Ballots, quorum membership, and transport addressing are all keyed on this.
/// Kept as a plain `u64` rather than a UUID: ballots embed it directly in their
/// tiebreak field and need a total order that's cheap to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(v: u64) -> Self {
        NodeId(v)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}
