//! Server side of the scan RPC: answers a remote director's page requests
//! against this node's local `Archive`.
//!
//! A deputy holds no per-scan state of its own — every request is a
//! stateless `Archive::scan_from` lookup keyed by the caller's own resume
//! position, so a deputy can be restarted or load-balanced without any
//! handoff.

use std::sync::Arc;

use tracing::{debug, warn};

use quorumkv_network::{Cluster, Envelope};
use quorumkv_storage::Archive;

use crate::messages::{ScanReplyMsg, ScanRequestMsg};

pub struct ScanDeputy {
    archive: Arc<dyn Archive>,
    cluster: Arc<dyn Cluster>,
}

impl ScanDeputy {
    pub fn new(archive: Arc<dyn Archive>, cluster: Arc<dyn Cluster>) -> Self {
        Self { archive, cluster }
    }

    /// Handles one `MSG_SCAN_REQUEST` envelope. Callers dispatch to this by
    /// tag alongside whatever else reads from the node's `Cluster` mailbox.
    pub async fn handle(&self, envelope: Envelope) {
        let msg: ScanRequestMsg = match envelope.decode() {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "scan deputy dropped malformed request");
                return;
            }
        };

        let cells = match self.archive.scan_from(msg.after.as_ref(), msg.window).await {
            Ok(cells) => cells,
            Err(err) => {
                warn!(error = %err, "scan deputy archive read failed; replying with an empty page");
                Vec::new()
            }
        };

        // A full page (exactly `window` cells) implies more may remain past
        // it; a short page means this deputy's local range is exhausted.
        let next = if cells.len() == msg.window {
            cells.last().map(|c| c.pos())
        } else {
            None
        };

        debug!(count = cells.len(), has_next = next.is_some(), "scan deputy answering page request");
        let reply = ScanReplyMsg { cells, next };
        match Envelope::encode(self.cluster.node_id(), quorumkv_core::wire::MSG_SCAN_REPLY, None, &reply) {
            Ok(envelope) => self.cluster.reply(msg.reply_port, envelope),
            Err(err) => warn!(error = %err, "failed to encode scan reply"),
        }
    }
}
