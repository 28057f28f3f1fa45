use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::node::NodeId;

/// Node-local identity and storage settings shared by every quorumkv crate.
///
/// The per-module config structs (`ConsensusConfig`, `ScanConfig`, ...) live
/// in their owning crates; this is just the part every crate needs to agree
/// on to address and persist for the same node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identity within the cluster.
    pub node_id: NodeId,

    /// Local directory for durable log/archive data.
    pub data_dir: PathBuf,

    /// Address this node's transport binds to.
    pub bind_address: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            data_dir: PathBuf::from("./data"),
            bind_address: "127.0.0.1:9000".to_string(),
        }
    }
}
