//! The Proposer: drives one decree for `(key, time)` through phase-1/phase-2
//! Paxos to completion.
//!
//! Like the Acceptor, each `ProposerActor` runs as its own fiber reached only
//! through its mailbox. The retry/backoff timer is the only background work
//! it spawns, rejoining the actor loop as a self-addressed `BackoffFired`.

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};

use quorumkv_core::{Atlas, BallotNumber, Backoff, NodeId, QuorumTracker};
use quorumkv_network::{Cluster, Envelope};
use quorumkv_storage::DecreeId;

use crate::config::ProposerConfig;
use crate::error::ProposerError;
use crate::messages::{ChooseMsg, ProposeMsg, QueryMsg};

type Learner = oneshot::Sender<Result<Bytes, ProposerError>>;

enum ProposerInput {
    Open { ballot_ordinal: u64, value: Bytes },
    Learn { reply: Learner },
    Refuse { from: NodeId, ballot_ordinal: u64 },
    Promise { from: NodeId, ballot_ordinal: u64, proposal: Option<(BallotNumber, Bytes)> },
    Accept { from: NodeId, ballot_ordinal: u64 },
    Chosen { value: Bytes },
    Shutdown,

    BackoffFired,
}

/// A handle to a live proposer's mailbox. Cheap to clone.
#[derive(Clone)]
pub struct ProposerHandle {
    tx: mpsc::UnboundedSender<ProposerInput>,
    closed: Arc<Notify>,
}

impl ProposerHandle {
    /// Begins the decree with `value` as the candidate at `ballot_ordinal`.
    /// A no-op once the proposer has left `Opening`.
    pub fn open(&self, ballot_ordinal: u64, value: Bytes) {
        let _ = self.tx.send(ProposerInput::Open { ballot_ordinal, value });
    }

    /// Registers to be notified of the agreed value. Resolves immediately
    /// with the value if the decree already closed, or with `Timeout` if the
    /// retry budget is exhausted before agreement.
    pub async fn learn(&self) -> Result<Bytes, ProposerError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ProposerInput::Learn { reply });
        rx.await.unwrap_or(Err(ProposerError::Timeout))
    }

    pub fn refuse(&self, from: NodeId, ballot_ordinal: u64) {
        let _ = self.tx.send(ProposerInput::Refuse { from, ballot_ordinal });
    }

    pub fn promise(&self, from: NodeId, ballot_ordinal: u64, proposal: Option<(BallotNumber, Bytes)>) {
        let _ = self.tx.send(ProposerInput::Promise { from, ballot_ordinal, proposal });
    }

    pub fn accept(&self, from: NodeId, ballot_ordinal: u64) {
        let _ = self.tx.send(ProposerInput::Accept { from, ballot_ordinal });
    }

    pub fn chosen(&self, value: Bytes) {
        let _ = self.tx.send(ProposerInput::Chosen { value });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ProposerInput::Shutdown);
    }

    /// Resolves once this proposer has transitioned to `Closed`. Used by the
    /// registry to schedule `closedLifetime` eviction without polling.
    pub(crate) fn closed_notify(&self) -> Arc<Notify> {
        self.closed.clone()
    }
}

struct Open {
    ballot: BallotNumber,
    value: Bytes,
    refused: u64,
    proposed: Option<(BallotNumber, Bytes)>,
    promised: QuorumTracker,
    accepted: QuorumTracker,
    /// Set once phase-2 has been broadcast for the current ballot, so a
    /// promise arriving after quorum was already reached (carrying a
    /// different accepted proposal) cannot trigger a second `propose` at the
    /// same ballot. Cleared alongside the quorum trackers on refusal/backoff,
    /// when a new ballot starts phase-1 over.
    proposed_sent: bool,
    backoff: Backoff,
    retries_used: u32,
    learners: Vec<Learner>,
}

enum State {
    Opening { learners: Vec<Learner> },
    Open(Open),
    Closed { ballot: BallotNumber, value: Bytes },
    Shutdown,
}

/// The proposal a proposer's phase-2 message should carry: the acceptors'
/// highest-ballot accepted value if any were reported, else the proposer's
/// own preferred value.
fn agreement(proposed: &Option<(BallotNumber, Bytes)>, value: &Bytes) -> Bytes {
    proposed.as_ref().map(|(_, v)| v.clone()).unwrap_or_else(|| value.clone())
}

/// `max(proposed, prop)` by ballot, per the ordering rule in the design
/// notes: `None` is dominated by any `Some`.
fn max_proposal(
    proposed: Option<(BallotNumber, Bytes)>,
    prop: Option<(BallotNumber, Bytes)>,
) -> Option<(BallotNumber, Bytes)> {
    match (proposed, prop) {
        (Some(a), Some(b)) => Some(if a.0 >= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

struct ProposerActor {
    decree: DecreeId,
    cluster: Arc<dyn Cluster>,
    atlas: Arc<dyn Atlas>,
    config: ProposerConfig,
    self_tx: mpsc::UnboundedSender<ProposerInput>,
    closed_notify: Arc<Notify>,
    state: State,
}

pub fn spawn_proposer(
    decree: DecreeId,
    cluster: Arc<dyn Cluster>,
    atlas: Arc<dyn Atlas>,
    config: ProposerConfig,
) -> ProposerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed_notify = Arc::new(Notify::new());
    let actor = ProposerActor {
        decree,
        cluster,
        atlas,
        config,
        self_tx: tx.clone(),
        closed_notify: closed_notify.clone(),
        state: State::Opening { learners: Vec::new() },
    };
    tokio::spawn(actor.run(rx));
    ProposerHandle { tx, closed: closed_notify }
}

impl ProposerActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ProposerInput>) {
        while let Some(input) = rx.recv().await {
            self.handle(input).await;
        }
    }

    async fn handle(&mut self, input: ProposerInput) {
        match input {
            ProposerInput::Open { ballot_ordinal, value } => self.on_open(ballot_ordinal, value).await,
            ProposerInput::Learn { reply } => self.on_learn(reply),
            ProposerInput::Refuse { from, ballot_ordinal } => self.on_refuse(from, ballot_ordinal).await,
            ProposerInput::Promise { from, ballot_ordinal, proposal } => {
                self.on_promise(from, ballot_ordinal, proposal).await
            }
            ProposerInput::Accept { from, ballot_ordinal } => self.on_accept(from, ballot_ordinal).await,
            ProposerInput::Chosen { value } => self.on_chosen(value).await,
            ProposerInput::Shutdown => {
                info!(decree = ?self.decree, "proposer shutdown");
                self.state = State::Shutdown;
            }
            ProposerInput::BackoffFired => self.on_backoff_fired().await,
        }
    }

    fn node_id(&self) -> NodeId {
        self.cluster.node_id()
    }

    async fn on_open(&mut self, ballot_ordinal: u64, value: Bytes) {
        let learners = match &mut self.state {
            State::Opening { learners } => std::mem::take(learners),
            _ => return,
        };
        let ballot = BallotNumber::new(ballot_ordinal, self.node_id());
        debug!(decree = ?self.decree, %ballot, "proposer opening");
        // Ballot zero skips phase-1 and proposes directly, so phase-2 is
        // already "sent" for this ballot the moment it's opened.
        let proposed_sent = ballot_ordinal == 0;
        self.state = State::Open(Open {
            ballot,
            value: value.clone(),
            refused: ballot_ordinal,
            proposed: None,
            promised: QuorumTracker::new(self.atlas.clone()),
            accepted: QuorumTracker::new(self.atlas.clone()),
            proposed_sent,
            backoff: Backoff::new(self.config.backoff_floor, self.config.backoff_ceiling),
            retries_used: 0,
            learners,
        });
        if proposed_sent {
            self.broadcast_propose(ballot, value).await;
        } else {
            self.broadcast_query(ballot, value).await;
        }
        self.schedule_backoff();
    }

    fn on_learn(&mut self, reply: Learner) {
        match &mut self.state {
            State::Opening { learners } => learners.push(reply),
            State::Open(open) => open.learners.push(reply),
            State::Closed { value, .. } => {
                let _ = reply.send(Ok(value.clone()));
            }
            State::Shutdown => {
                let _ = reply.send(Err(ProposerError::Timeout));
            }
        }
    }

    async fn on_refuse(&mut self, from: NodeId, ballot_ordinal: u64) {
        debug!(decree = ?self.decree, %from, ballot_ordinal, "proposer refused");
        match &mut self.state {
            State::Open(open) => {
                open.refused = open.refused.max(ballot_ordinal);
                open.promised.clear();
                open.accepted.clear();
                open.proposed_sent = false;
            }
            State::Closed { .. } => self.converge_late_reply(from, ballot_ordinal).await,
            _ => {}
        }
    }

    async fn on_promise(&mut self, from: NodeId, ballot_ordinal: u64, proposal: Option<(BallotNumber, Bytes)>) {
        match &self.state {
            State::Closed { .. } => {
                self.converge_late_reply(from, ballot_ordinal).await;
                return;
            }
            _ => {}
        }
        // Only a promise arriving before phase-2 has fired for this ballot
        // may still fold into `proposed` via `max_proposal`: once
        // `proposed_sent` is set, the value this ballot proposes is already
        // committed on the wire, so a later straggler's accepted value must
        // not retroactively change it — that value is only picked up again
        // if a future ballot reopens phase-1 (`proposed` itself is never
        // cleared, only `promised`/`accepted`/`proposed_sent`, on
        // `on_refuse`/`on_backoff_fired`). And whether or not it folds in,
        // only the promise that first carries the tracker into quorum may
        // trigger phase-2 at all — a second `propose` at a ballot this
        // proposer already proposed at would let an acceptor accept two
        // different values under one ballot.
        let fire = match &mut self.state {
            State::Open(open) if ballot_ordinal == open.ballot.ordinal => {
                if !open.proposed_sent {
                    open.proposed = max_proposal(open.proposed.take(), proposal);
                }
                let quorum_reached = open.promised.add(from);
                if quorum_reached && !open.proposed_sent {
                    open.proposed_sent = true;
                    Some((open.ballot, agreement(&open.proposed, &open.value)))
                } else {
                    None
                }
            }
            _ => return,
        };
        if let Some((ballot, value)) = fire {
            info!(decree = ?self.decree, %ballot, "promise quorum reached; proposing");
            self.broadcast_propose(ballot, value).await;
        }
    }

    async fn on_accept(&mut self, from: NodeId, ballot_ordinal: u64) {
        if let State::Closed { .. } = &self.state {
            self.converge_late_reply(from, ballot_ordinal).await;
            return;
        }
        let quorum_reached = match &mut self.state {
            State::Open(open) if ballot_ordinal == open.ballot.ordinal => open.accepted.add(from),
            _ => return,
        };
        if !quorum_reached {
            return;
        }
        let (ballot, agreed, learners) = match std::mem::replace(&mut self.state, State::Shutdown) {
            State::Open(open) => {
                let agreed = agreement(&open.proposed, &open.value);
                (open.ballot, agreed, open.learners)
            }
            other => {
                self.state = other;
                return;
            }
        };
        info!(decree = ?self.decree, %ballot, "accept quorum reached; choosing");
        self.broadcast_choose(agreed.clone()).await;
        for learner in learners {
            let _ = learner.send(Ok(agreed.clone()));
        }
        self.state = State::Closed { ballot, value: agreed };
        self.closed_notify.notify_waiters();
    }

    async fn on_chosen(&mut self, value: Bytes) {
        match std::mem::replace(&mut self.state, State::Shutdown) {
            State::Opening { learners } => {
                for learner in learners {
                    let _ = learner.send(Ok(value.clone()));
                }
                self.state = State::Closed { ballot: BallotNumber::bottom(), value };
                self.closed_notify.notify_waiters();
            }
            State::Open(open) => {
                for learner in open.learners {
                    let _ = learner.send(Ok(value.clone()));
                }
                self.state = State::Closed { ballot: open.ballot, value };
                self.closed_notify.notify_waiters();
            }
            State::Closed { ballot, value: existing } => {
                debug_assert_eq!(existing, value, "learned conflicting chosen values for one decree");
                self.state = State::Closed { ballot, value: existing };
            }
            State::Shutdown => {}
        }
    }

    async fn on_backoff_fired(&mut self) {
        let node_id = self.node_id();
        let max_retries = self.config.max_retries;
        let (ballot, value, retries_used) = match &mut self.state {
            State::Open(open) => {
                open.retries_used += 1;
                if open.retries_used > max_retries {
                    (None, None, open.retries_used)
                } else {
                    let mut rng = rand::thread_rng();
                    let next_ordinal = open.refused + rng.gen_range(1..17);
                    open.refused = next_ordinal;
                    open.ballot = BallotNumber::new(next_ordinal, node_id);
                    open.promised.clear();
                    open.accepted.clear();
                    open.proposed_sent = false;
                    (Some(open.ballot), Some(open.value.clone()), open.retries_used)
                }
            }
            _ => return,
        };

        match (ballot, value) {
            (Some(ballot), Some(value)) => {
                warn!(decree = ?self.decree, %ballot, retries_used, "proposer backoff fired; retrying");
                self.broadcast_query(ballot, value).await;
                self.schedule_backoff();
            }
            _ => {
                warn!(decree = ?self.decree, retries_used, max_retries, "proposer exhausted retry budget");
                if let State::Open(open) = std::mem::replace(&mut self.state, State::Shutdown) {
                    for learner in open.learners {
                        let _ = learner.send(Err(ProposerError::Timeout));
                    }
                }
            }
        }
    }

    fn schedule_backoff(&mut self) {
        let delay = match &mut self.state {
            State::Open(open) => open.backoff.next_delay(),
            _ => return,
        };
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ProposerInput::BackoffFired);
        });
    }

    async fn broadcast_query(&self, ballot: BallotNumber, default: Bytes) {
        let msg = QueryMsg { key: self.decree.key.clone(), time: self.decree.time, ballot_ordinal: ballot.ordinal, default };
        self.broadcast(quorumkv_core::wire::MSG_QUERY, &msg).await;
    }

    async fn broadcast_propose(&self, ballot: BallotNumber, value: Bytes) {
        let msg = ProposeMsg { key: self.decree.key.clone(), time: self.decree.time, ballot_ordinal: ballot.ordinal, value };
        self.broadcast(quorumkv_core::wire::MSG_PROPOSE, &msg).await;
    }

    async fn broadcast_choose(&self, value: Bytes) {
        let msg = ChooseMsg { key: self.decree.key.clone(), time: self.decree.time, value };
        self.broadcast(quorumkv_core::wire::MSG_CHOOSE, &msg).await;
    }

    /// Gossip convergence: a proposer that has already closed answers a late
    /// `refuse`/`promise`/`accept` at the same ballot with a one-shot
    /// `choose(value)` back to the sender, so stragglers learn the outcome
    /// without waiting on their own acceptor quorum.
    async fn converge_late_reply(&self, from: NodeId, ballot_ordinal: u64) {
        let State::Closed { ballot, value } = &self.state else { return };
        if ballot_ordinal != ballot.ordinal {
            return;
        }
        let msg = ChooseMsg { key: self.decree.key.clone(), time: self.decree.time, value: value.clone() };
        if let Ok(envelope) = Envelope::encode(self.node_id(), quorumkv_core::wire::MSG_CHOOSE, None, &msg) {
            let _ = self.cluster.send(from, envelope).await;
        }
    }

    async fn broadcast<T: serde::Serialize>(&self, tag: u32, body: &T) {
        for peer in self.atlas.members() {
            if let Ok(envelope) = Envelope::encode(self.node_id(), tag, None, body) {
                let _ = self.cluster.send(peer, envelope).await;
            }
        }
    }
}
