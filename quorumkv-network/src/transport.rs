use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use quorumkv_core::NodeId;

use crate::envelope::Envelope;
use crate::error::TransportError;

/// Peer send/receive with ephemeral reply-port multiplexing.
///
/// Acceptors, Proposers, and the ScanDirector all address peers purely
/// through this trait; swapping the in-process reference impl for a
/// QUIC/TCP transport never touches their code.
#[async_trait]
pub trait Cluster: Send + Sync {
    fn node_id(&self) -> NodeId;

    /// Sends `envelope` to `to`'s mailbox.
    async fn send(&self, to: NodeId, envelope: Envelope) -> Result<(), TransportError>;

    /// Receives the next envelope addressed to this node's mailbox (not a
    /// reply to one of its own open ports — those resolve through the
    /// receiver returned by `open_port`).
    async fn recv(&self) -> Option<Envelope>;

    /// Opens a reply slot, returning its id (to embed in an outgoing
    /// request's `port` field) and a receiver resolved by the first
    /// matching `reply`.
    fn open_port(&self) -> (u64, oneshot::Receiver<Envelope>);

    /// Resolves an open port with a reply envelope. A no-op if the port was
    /// never opened, already resolved, or timed out and was dropped.
    fn reply(&self, port: u64, envelope: Envelope);
}

type Mailbox = mpsc::UnboundedSender<Envelope>;

/// Shared switchboard for an in-process cluster: every node's mailbox and
/// every open reply port lives here, so `InProcessCluster` handles can route
/// to each other without a real network.
#[derive(Clone, Default)]
pub struct ClusterHub {
    mailboxes: Arc<DashMap<NodeId, Mailbox>>,
    ports: Arc<DashMap<u64, oneshot::Sender<Envelope>>>,
    next_port: Arc<AtomicU64>,
}

impl ClusterHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `node_id` with a fresh mailbox and returns its handle.
    pub fn join(&self, node_id: NodeId) -> InProcessCluster {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes.insert(node_id, tx);
        InProcessCluster {
            node_id,
            hub: self.clone(),
            inbox: Arc::new(Mutex::new(rx)),
        }
    }
}

/// In-process, tokio-mpsc-backed `Cluster` reference implementation, for
/// tests and the demo binary.
#[derive(Clone)]
pub struct InProcessCluster {
    node_id: NodeId,
    hub: ClusterHub,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

#[async_trait]
impl Cluster for InProcessCluster {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn send(&self, to: NodeId, envelope: Envelope) -> Result<(), TransportError> {
        if let Some(port) = envelope.port {
            if let Some((_, sender)) = self.hub.ports.remove(&port) {
                debug!(%port, "resolving reply port");
                let _ = sender.send(envelope);
                return Ok(());
            }
        }

        match self.hub.mailboxes.get(&to) {
            Some(mailbox) => mailbox
                .send(envelope)
                .map_err(|_| TransportError::MailboxClosed(to)),
            None => {
                warn!(peer = %to, "send to unknown peer");
                Err(TransportError::UnknownPeer(to))
            }
        }
    }

    async fn recv(&self) -> Option<Envelope> {
        self.inbox.lock().await.recv().await
    }

    fn open_port(&self) -> (u64, oneshot::Receiver<Envelope>) {
        let port = self.hub.next_port.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.hub.ports.insert(port, tx);
        (port, rx)
    }

    fn reply(&self, port: u64, mut envelope: Envelope) {
        envelope.port = Some(port);
        if let Some((_, sender)) = self.hub.ports.remove(&port) {
            let _ = sender.send(envelope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorumkv_core::wire;

    #[tokio::test]
    async fn send_delivers_to_recipient_mailbox() {
        let hub = ClusterHub::new();
        let a = hub.join(NodeId(1));
        let b = hub.join(NodeId(2));

        let envelope = Envelope::encode(NodeId(1), wire::MSG_QUERY, None, &"hello".to_string()).unwrap();
        a.send(NodeId(2), envelope).await.unwrap();

        let received = b.recv().await.unwrap();
        let body: String = received.decode().unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn send_to_unknown_peer_errors() {
        let hub = ClusterHub::new();
        let a = hub.join(NodeId(1));
        let envelope = Envelope::encode(NodeId(1), wire::MSG_QUERY, None, &1u64).unwrap();
        let err = a.send(NodeId(99), envelope).await.unwrap_err();
        assert!(matches!(err, TransportError::UnknownPeer(NodeId(99))));
    }

    #[tokio::test]
    async fn reply_resolves_matching_port() {
        let hub = ClusterHub::new();
        let requester = hub.join(NodeId(1));
        let responder = hub.join(NodeId(2));

        let (port, rx) = requester.open_port();
        responder.reply(port, Envelope::encode(NodeId(2), wire::MSG_SCAN_REPLY, None, &42u64).unwrap());

        let reply = rx.await.unwrap();
        let body: u64 = reply.decode().unwrap();
        assert_eq!(body, 42);
    }

    #[tokio::test]
    async fn reply_to_a_stale_port_is_a_no_op() {
        let hub = ClusterHub::new();
        let requester = hub.join(NodeId(1));
        let responder = hub.join(NodeId(2));

        let (port, rx) = requester.open_port();
        drop(rx);

        responder.reply(port, Envelope::encode(NodeId(2), wire::MSG_SCAN_REPLY, None, &1u64).unwrap());
        responder.reply(port, Envelope::encode(NodeId(2), wire::MSG_SCAN_REPLY, None, &2u64).unwrap());
    }
}
