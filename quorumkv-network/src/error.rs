use thiserror::Error;

use quorumkv_core::NodeId;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to peer {0}")]
    UnknownPeer(NodeId),

    #[error("peer {0} mailbox closed")]
    MailboxClosed(NodeId),

    #[error("failed to encode envelope payload: {0}")]
    Encode(#[from] bincode::Error),
}
