//! Wires the Acceptor and Proposer registries to a `Cluster` transport, and
//! gives an Acceptor a way to run its own ballot when `deliberatingTimeout`
//! elapses with no proposer in sight.
//!
//! The circularity an actor-per-decree design would otherwise hit — an
//! Acceptor needing a Proposer, a Proposer needing nothing from an Acceptor
//! but both needing to be reachable from the transport dispatch loop — is
//! broken by the `DecreeProposer` trait: the Acceptor only ever sees a narrow
//! capability, never the registries themselves.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use quorumkv_core::{Atlas, NodeId};
use quorumkv_network::{Cluster, Envelope};
use quorumkv_storage::{Archive, DecreeId, Log};

use crate::acceptor::AcceptorReply;
use crate::config::{AcceptorConfig, ProposerConfig};
use crate::error::ProposerError;
use crate::messages::{AcceptMsg, ChooseMsg, ChosenMsg, PromiseMsg, ProposeMsg, QueryMsg, RefuseMsg};
use crate::registry::{AcceptorRegistry, ProposerRegistry};

/// Capability an Acceptor uses to drive its own ballot: run a single decree
/// to a chosen value, independent of who asked.
#[async_trait]
pub trait DecreeProposer: Send + Sync {
    async fn propose(&self, decree: DecreeId, default: Bytes) -> Result<Bytes, ProposerError>;
}

/// A `DecreeProposer` that never succeeds — for tests that don't exercise
/// the `deliberatingTimeout` self-proposal path and would rather fail fast
/// than hang if they accidentally do.
pub struct NeverProposer;

#[async_trait]
impl DecreeProposer for NeverProposer {
    async fn propose(&self, _decree: DecreeId, _default: Bytes) -> Result<Bytes, ProposerError> {
        Err(ProposerError::Timeout)
    }
}

/// The real `DecreeProposer`: opens a ballot-zero proposer against the
/// decree's own registry and cluster, and awaits its outcome.
pub struct LocalDecreeProposer {
    proposers: ProposerRegistry,
}

impl LocalDecreeProposer {
    pub fn new(proposers: ProposerRegistry) -> Self {
        Self { proposers }
    }
}

#[async_trait]
impl DecreeProposer for LocalDecreeProposer {
    async fn propose(&self, decree: DecreeId, default: Bytes) -> Result<Bytes, ProposerError> {
        let handle = self.proposers.get_or_create(decree);
        let learned = handle.learn();
        handle.open(0, default);
        learned.await
    }
}

/// Owns both per-decree registries and the dispatch loop that routes inbound
/// `Envelope`s from the transport to the right Acceptor or Proposer.
///
/// This is the crate's single public entry point: constructing one wires an
/// Acceptor's self-proposal capability back to the same node's Proposer
/// registry, and `run` drives the whole node's consensus traffic.
pub struct Coordinator {
    acceptors: AcceptorRegistry,
    proposers: ProposerRegistry,
    cluster: Arc<dyn Cluster>,
}

impl Coordinator {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        log: Arc<dyn Log>,
        archive: Arc<dyn Archive>,
        acceptor_config: AcceptorConfig,
        proposer_config: ProposerConfig,
        atlas_for: Arc<dyn Fn(&DecreeId) -> Arc<dyn Atlas> + Send + Sync>,
    ) -> Arc<Self> {
        let proposers = ProposerRegistry::new(cluster.clone(), atlas_for, proposer_config);
        let acceptors = AcceptorRegistry::new(log, archive, acceptor_config, cluster.clone());
        Arc::new(Self { acceptors, proposers, cluster })
    }

    pub fn acceptors(&self) -> &AcceptorRegistry {
        &self.acceptors
    }

    pub fn proposers(&self) -> &ProposerRegistry {
        &self.proposers
    }

    fn self_proposer(&self) -> Arc<dyn DecreeProposer> {
        Arc::new(LocalDecreeProposer::new(self.proposers.clone()))
    }

    /// Opens a fresh decree `(key, time)` with `value` as the proposer's
    /// preferred value at ballot zero, and awaits the agreed outcome.
    pub async fn open(&self, key: Bytes, time: u64, value: Bytes) -> Result<Bytes, ProposerError> {
        let decree = DecreeId::new(key, time);
        let handle = self.proposers.get_or_create(decree);
        let learned = handle.learn();
        handle.open(0, value);
        learned.await
    }

    fn acceptor_for(&self, decree: DecreeId) -> crate::acceptor::AcceptorHandle {
        let self_proposer = self.self_proposer();
        self.acceptors.get_or_create(decree, self_proposer)
    }

    /// Runs the dispatch loop forever, reading envelopes from the cluster
    /// and routing each to its decree's Acceptor or Proposer. Spawn this
    /// once per node.
    pub async fn run(self: Arc<Self>) {
        while let Some(envelope) = self.cluster.recv().await {
            self.dispatch(envelope).await;
        }
    }

    /// Routes one inbound envelope to the acceptor or proposer owning its
    /// decree. Public so a node that also answers scan deputy RPCs (tags
    /// outside this crate's concern) can run its own dispatch loop over
    /// `Cluster::recv` and hand consensus-tagged envelopes here, instead of
    /// being forced through `run`'s all-or-nothing receive loop.
    pub async fn dispatch(&self, envelope: Envelope) {
        match envelope.tag {
            quorumkv_core::wire::MSG_QUERY => self.dispatch_query(envelope).await,
            quorumkv_core::wire::MSG_PROPOSE => self.dispatch_propose(envelope).await,
            quorumkv_core::wire::MSG_CHOOSE => self.dispatch_choose(envelope).await,
            quorumkv_core::wire::MSG_REFUSE => self.dispatch_refuse(envelope),
            quorumkv_core::wire::MSG_PROMISE => self.dispatch_promise(envelope),
            quorumkv_core::wire::MSG_ACCEPT => self.dispatch_accept(envelope),
            quorumkv_core::wire::MSG_CHOSEN => self.dispatch_chosen(envelope),
            other => debug!(tag = other, "coordinator ignored envelope with unrecognized tag"),
        }
    }

    async fn dispatch_query(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<QueryMsg>() else { return };
        let decree = DecreeId::new(msg.key.clone(), msg.time);
        let acceptor = self.acceptor_for(decree.clone());
        let reply = acceptor.query(envelope.from, msg.ballot_ordinal, msg.default).await;
        self.reply_to_proposer(envelope.from, decree, reply).await;
    }

    async fn dispatch_propose(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<ProposeMsg>() else { return };
        let decree = DecreeId::new(msg.key.clone(), msg.time);
        let acceptor = self.acceptor_for(decree.clone());
        let reply = acceptor.propose(envelope.from, msg.ballot_ordinal, msg.value).await;
        self.reply_to_proposer(envelope.from, decree, reply).await;
    }

    async fn dispatch_choose(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<ChooseMsg>() else { return };
        let decree = DecreeId::new(msg.key.clone(), msg.time);
        let acceptor = self.acceptor_for(decree);
        if let Err(err) = acceptor.choose(msg.value).await {
            warn!(error = %err, "choose rejected by acceptor");
        }
    }

    async fn reply_to_proposer(&self, to: NodeId, decree: DecreeId, reply: AcceptorReply) {
        let (tag, encoded) = match reply {
            AcceptorReply::Refuse { ballot } => {
                let msg = RefuseMsg { key: decree.key, time: decree.time, ballot_ordinal: ballot.ordinal };
                (quorumkv_core::wire::MSG_REFUSE, Envelope::encode(self.cluster.node_id(), quorumkv_core::wire::MSG_REFUSE, None, &msg))
            }
            AcceptorReply::Promise { ballot, proposal } => {
                let proposal = proposal.map(|(b, v)| (b.ordinal, b.proposer_id, v));
                let msg = PromiseMsg { key: decree.key, time: decree.time, ballot_ordinal: ballot.ordinal, proposal };
                (quorumkv_core::wire::MSG_PROMISE, Envelope::encode(self.cluster.node_id(), quorumkv_core::wire::MSG_PROMISE, None, &msg))
            }
            AcceptorReply::Accept { ballot } => {
                let msg = AcceptMsg { key: decree.key, time: decree.time, ballot_ordinal: ballot.ordinal };
                (quorumkv_core::wire::MSG_ACCEPT, Envelope::encode(self.cluster.node_id(), quorumkv_core::wire::MSG_ACCEPT, None, &msg))
            }
            AcceptorReply::Chosen { value } => {
                let msg = ChosenMsg { key: decree.key, time: decree.time, value };
                (quorumkv_core::wire::MSG_CHOSEN, Envelope::encode(self.cluster.node_id(), quorumkv_core::wire::MSG_CHOSEN, None, &msg))
            }
        };
        match encoded {
            Ok(envelope) => {
                let _ = self.cluster.send(to, envelope).await;
            }
            Err(err) => warn!(tag, error = %err, "failed to encode acceptor reply"),
        }
    }

    fn dispatch_refuse(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<RefuseMsg>() else { return };
        if let Some(p) = self.proposers.get(&DecreeId::new(msg.key, msg.time)) {
            p.refuse(envelope.from, msg.ballot_ordinal);
        }
    }

    fn dispatch_promise(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<PromiseMsg>() else { return };
        if let Some(p) = self.proposers.get(&DecreeId::new(msg.key, msg.time)) {
            let proposal = msg.proposal.map(|(ordinal, proposer_id, v)| (quorumkv_core::BallotNumber::new(ordinal, proposer_id), v));
            p.promise(envelope.from, msg.ballot_ordinal, proposal);
        }
    }

    fn dispatch_accept(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<AcceptMsg>() else { return };
        if let Some(p) = self.proposers.get(&DecreeId::new(msg.key, msg.time)) {
            p.accept(envelope.from, msg.ballot_ordinal);
        }
    }

    fn dispatch_chosen(&self, envelope: Envelope) {
        let Ok(msg) = envelope.decode::<ChosenMsg>() else { return };
        if let Some(p) = self.proposers.get(&DecreeId::new(msg.key, msg.time)) {
            p.chosen(msg.value);
        }
    }
}
