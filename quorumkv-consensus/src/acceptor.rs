//! The Acceptor: a durable, single-threaded Paxos participant for one decree.
//!
//! Every `AcceptorActor` runs as its own Tokio task — the "fiber" of the
//! design notes — reached only through the `mpsc` mailbox wrapped by
//! `AcceptorHandle`. Inputs are processed one at a time in mailbox order,
//! so no two mutations of an acceptor's state ever race; the only
//! concurrency is between the task and the background log/archive/self-
//! proposal work it spawns and rejoins via self-addressed mailbox messages.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

use quorumkv_core::{BallotNumber, CellValue, NodeId};
use quorumkv_network::{Cluster, Envelope};
use quorumkv_storage::{Archive, DecreeId, Log, LogRecord, StorageError};

use crate::config::AcceptorConfig;
use crate::coordinator::DecreeProposer;
use crate::error::AcceptorError;
use crate::messages::ChosenMsg;

/// What an Acceptor sends back for `query`/`propose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptorReply {
    Promise { ballot: BallotNumber, proposal: Option<(BallotNumber, Bytes)> },
    Accept { ballot: BallotNumber },
    Refuse { ballot: BallotNumber },
    Chosen { value: Bytes },
}

/// Checkpoint snapshot of an acceptor's active state, for migration/recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveStatus {
    Restoring { decree: DecreeId, default: Bytes },
    Deliberating { decree: DecreeId, default: Bytes, ballot: BallotNumber, proposal: Option<(BallotNumber, Bytes)> },
    Closed { decree: DecreeId, chosen: Bytes },
}

impl ActiveStatus {
    /// The acceptor's default value, or its chosen value once `Closed`.
    pub fn default_value(&self) -> &Bytes {
        match self {
            ActiveStatus::Restoring { default, .. } => default,
            ActiveStatus::Deliberating { default, .. } => default,
            ActiveStatus::Closed { chosen, .. } => chosen,
        }
    }
}

/// Mailbox messages an `AcceptorHandle` can send, plus the internal
/// self-addressed events the actor uses to rejoin spawned background work.
enum AcceptorInput {
    Query { proposer: NodeId, ballot_ordinal: u64, default: Bytes, reply: oneshot::Sender<AcceptorReply> },
    Propose { proposer: NodeId, ballot_ordinal: u64, value: Bytes, reply: oneshot::Sender<AcceptorReply> },
    Choose { value: Bytes, reply: Option<oneshot::Sender<Result<(), AcceptorError>>> },
    Checkpoint { reply: oneshot::Sender<Option<ActiveStatus>> },
    Shutdown,

    RestoreResult(Result<RestoredState, StorageError>),
    PostDone(PostOutcome),
    DeliberatingTimeout,
    SelfProposalResult(Result<Bytes, crate::error::ProposerError>),
}

/// A handle to a live acceptor's mailbox. Cheap to clone; every clone
/// addresses the same actor task.
#[derive(Clone)]
pub struct AcceptorHandle {
    tx: mpsc::UnboundedSender<AcceptorInput>,
    closed: Arc<Notify>,
}

impl AcceptorHandle {
    pub async fn query(&self, proposer: NodeId, ballot_ordinal: u64, default: Bytes) -> AcceptorReply {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AcceptorInput::Query { proposer, ballot_ordinal, default, reply });
        rx.await.unwrap_or(AcceptorReply::Refuse { ballot: BallotNumber::bottom() })
    }

    pub async fn propose(&self, proposer: NodeId, ballot_ordinal: u64, value: Bytes) -> AcceptorReply {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AcceptorInput::Propose { proposer, ballot_ordinal, value, reply });
        rx.await.unwrap_or(AcceptorReply::Refuse { ballot: BallotNumber::bottom() })
    }

    pub async fn choose(&self, value: Bytes) -> Result<(), AcceptorError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AcceptorInput::Choose { value, reply: Some(reply) });
        rx.await.unwrap_or(Err(AcceptorError::Panicked))
    }

    pub async fn checkpoint(&self) -> Option<ActiveStatus> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(AcceptorInput::Checkpoint { reply });
        rx.await.ok().flatten()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(AcceptorInput::Shutdown);
    }

    /// Resolves once this acceptor has transitioned to `Closed`. Used by the
    /// registry to schedule `closedLifetime` eviction without polling.
    pub(crate) fn closed_notify(&self) -> Arc<Notify> {
        self.closed.clone()
    }
}

/// The post an acceptor has committed to issuing: either a `Promise`/`Accept`
/// log record plus the reply it unblocks, or a `Close` that additionally
/// writes the archive before logging.
enum PostPayload {
    Promise { reply: oneshot::Sender<AcceptorReply>, ballot: BallotNumber, echoed: Option<(BallotNumber, Bytes)> },
    Accept { reply: oneshot::Sender<AcceptorReply>, ballot: BallotNumber, value: Bytes, reaccepted: bool },
    Close { value: Bytes, reply: Option<oneshot::Sender<Result<(), AcceptorError>>> },
}

/// Result of executing a `PostPayload` against the log/archive, handed back
/// to the actor loop as a self-addressed `AcceptorInput::PostDone`.
pub(crate) enum PostOutcome {
    Done { closed_value: Option<Bytes> },
    StorageFailed,
}

/// What `Restoring` learns once both the archive lookup and the log replay
/// it spawned on entry complete.
struct RestoredState {
    archived: Option<CellValue>,
    ballot: BallotNumber,
    proposal: Option<(BallotNumber, Bytes)>,
    is_fresh: bool,
}

/// Folds a replayed log into the `(ballot, proposal)` an Acceptor held just
/// before it stopped appending: a crash mid-accept leaves exactly the record
/// of the last successful post durable, and this reconstructs the in-memory
/// state that post would have produced.
fn fold_log(records: Vec<LogRecord>) -> (BallotNumber, Option<(BallotNumber, Bytes)>) {
    let mut ballot = BallotNumber::bottom();
    let mut proposal = None;
    for record in records {
        match record {
            LogRecord::Promise { ballot: b } => {
                ballot = ballot.max(b);
            }
            LogRecord::Accept { ballot: b, value } => {
                ballot = ballot.max(b);
                proposal = Some((b, value));
            }
            LogRecord::Reaccept { ballot: b } => {
                ballot = ballot.max(b);
                proposal = proposal.map(|(_, v)| (b, v));
            }
            LogRecord::Open { .. } | LogRecord::Close { .. } => {}
        }
    }
    (ballot, proposal)
}

struct Restoring {
    default: Bytes,
    ballot: BallotNumber,
    proposal: Option<(BallotNumber, Bytes)>,
    proposers: Vec<NodeId>,
    pending: Option<PostPayload>,
}

struct Deliberating {
    default: Bytes,
    ballot: BallotNumber,
    proposal: Option<(BallotNumber, Bytes)>,
    proposers: Vec<NodeId>,
    outstanding: bool,
    queued: Option<PostPayload>,
    timeout_fired: bool,
}

enum State {
    Opening,
    Restoring(Restoring),
    Deliberating(Deliberating),
    Closed { value: Bytes },
    Shutdown,
    Panicked,
}

/// Candidate ballot and promise/accept decision shared by the query and
/// propose handlers; kept as a free function so `Restoring` and
/// `Deliberating` apply the exact same promise rule.
fn decide_query(ballot: BallotNumber, proposer: NodeId, ballot_ordinal: u64) -> Result<BallotNumber, BallotNumber> {
    let candidate = BallotNumber::new(ballot_ordinal, proposer);
    if candidate < ballot {
        Err(ballot)
    } else {
        Ok(candidate)
    }
}

fn decide_propose(
    ballot: BallotNumber,
    proposer: NodeId,
    ballot_ordinal: u64,
) -> Result<BallotNumber, BallotNumber> {
    decide_query(ballot, proposer, ballot_ordinal)
}

fn remember_proposer(proposers: &mut Vec<NodeId>, id: NodeId) {
    if !proposers.contains(&id) {
        proposers.push(id);
    }
}

struct AcceptorActor {
    decree: DecreeId,
    log: Arc<dyn Log>,
    archive: Arc<dyn Archive>,
    config: AcceptorConfig,
    self_proposer: Arc<dyn DecreeProposer>,
    cluster: Option<Arc<dyn Cluster>>,
    self_tx: mpsc::UnboundedSender<AcceptorInput>,
    closed_notify: Arc<Notify>,
    state: State,
}

pub fn spawn_acceptor(
    decree: DecreeId,
    log: Arc<dyn Log>,
    archive: Arc<dyn Archive>,
    config: AcceptorConfig,
    self_proposer: Arc<dyn DecreeProposer>,
) -> AcceptorHandle {
    spawn_acceptor_with_cluster(decree, log, archive, config, self_proposer, None)
}

/// Like `spawn_acceptor`, but also wires a `Cluster` so that `Closed` can
/// proactively notify accumulated proposers with a `chosen` message. Used by
/// the coordinator; tests that don't care about gossip convergence can use
/// the cluster-less `spawn_acceptor`.
pub fn spawn_acceptor_with_cluster(
    decree: DecreeId,
    log: Arc<dyn Log>,
    archive: Arc<dyn Archive>,
    config: AcceptorConfig,
    self_proposer: Arc<dyn DecreeProposer>,
    cluster: Option<Arc<dyn Cluster>>,
) -> AcceptorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed_notify = Arc::new(Notify::new());
    let actor = AcceptorActor {
        decree,
        log,
        archive,
        config,
        self_proposer,
        cluster,
        self_tx: tx.clone(),
        closed_notify: closed_notify.clone(),
        state: State::Opening,
    };
    tokio::spawn(actor.run(rx));
    AcceptorHandle { tx, closed: closed_notify }
}

impl AcceptorActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AcceptorInput>) {
        while let Some(input) = rx.recv().await {
            self.handle(input).await;
        }
    }

    async fn handle(&mut self, input: AcceptorInput) {
        match input {
            AcceptorInput::Query { proposer, ballot_ordinal, default, reply } => {
                self.on_query(proposer, ballot_ordinal, default, reply).await
            }
            AcceptorInput::Propose { proposer, ballot_ordinal, value, reply } => {
                self.on_propose(proposer, ballot_ordinal, value, reply).await
            }
            AcceptorInput::Choose { value, reply } => self.on_choose(value, reply).await,
            AcceptorInput::Checkpoint { reply } => {
                let _ = reply.send(self.checkpoint());
            }
            AcceptorInput::Shutdown => {
                info!(decree = ?self.decree, "acceptor shutdown");
                self.state = State::Shutdown;
            }
            AcceptorInput::RestoreResult(result) => self.on_restore_result(result).await,
            AcceptorInput::PostDone(outcome) => self.on_post_done(outcome).await,
            AcceptorInput::DeliberatingTimeout => self.on_deliberating_timeout().await,
            AcceptorInput::SelfProposalResult(result) => self.on_self_proposal_result(result).await,
        }
    }

    fn checkpoint(&self) -> Option<ActiveStatus> {
        match &self.state {
            State::Opening | State::Shutdown | State::Panicked => None,
            State::Restoring(r) => {
                Some(ActiveStatus::Restoring { decree: self.decree.clone(), default: r.default.clone() })
            }
            State::Deliberating(d) => Some(ActiveStatus::Deliberating {
                decree: self.decree.clone(),
                default: d.default.clone(),
                ballot: d.ballot,
                proposal: d.proposal.clone(),
            }),
            State::Closed { value } => {
                Some(ActiveStatus::Closed { decree: self.decree.clone(), chosen: value.clone() })
            }
        }
    }

    async fn on_query(&mut self, proposer: NodeId, ballot_ordinal: u64, default: Bytes, reply: oneshot::Sender<AcceptorReply>) {
        match &mut self.state {
            State::Opening => {
                self.enter_restoring(default.clone());
                // Replay this same query into the freshly entered Restoring state.
                Box::pin(self.on_query(proposer, ballot_ordinal, default, reply)).await;
            }
            State::Restoring(r) => {
                remember_proposer(&mut r.proposers, proposer);
                match decide_query(r.ballot, proposer, ballot_ordinal) {
                    Err(current) => {
                        let _ = reply.send(AcceptorReply::Refuse { ballot: current });
                    }
                    Ok(candidate) => {
                        let echoed = r.proposal.clone();
                        r.ballot = candidate;
                        // Only the most recent buffered post survives; the one it
                        // supersedes is dropped along with its reply sender.
                        r.pending = Some(PostPayload::Promise { reply, ballot: candidate, echoed });
                    }
                }
            }
            State::Deliberating(d) => {
                remember_proposer(&mut d.proposers, proposer);
                match decide_query(d.ballot, proposer, ballot_ordinal) {
                    Err(current) => {
                        let _ = reply.send(AcceptorReply::Refuse { ballot: current });
                    }
                    Ok(candidate) => {
                        let echoed = d.proposal.clone();
                        d.ballot = candidate;
                        let post = PostPayload::Promise { reply, ballot: candidate, echoed };
                        self.enqueue_post(post);
                    }
                }
            }
            State::Closed { value } => {
                let _ = reply.send(AcceptorReply::Chosen { value: value.clone() });
            }
            State::Shutdown | State::Panicked => {
                drop(reply);
            }
        }
    }

    async fn on_propose(&mut self, proposer: NodeId, ballot_ordinal: u64, value: Bytes, reply: oneshot::Sender<AcceptorReply>) {
        match &mut self.state {
            State::Opening => {
                self.enter_restoring(value.clone());
                Box::pin(self.on_propose(proposer, ballot_ordinal, value, reply)).await;
            }
            State::Restoring(r) => {
                remember_proposer(&mut r.proposers, proposer);
                match decide_propose(r.ballot, proposer, ballot_ordinal) {
                    Err(current) => {
                        let _ = reply.send(AcceptorReply::Refuse { ballot: current });
                    }
                    Ok(candidate) => {
                        let reaccepted = matches!(&r.proposal, Some((_, v)) if *v == value);
                        r.ballot = candidate;
                        r.proposal = Some((candidate, value.clone()));
                        r.pending = Some(PostPayload::Accept { reply, ballot: candidate, value, reaccepted });
                    }
                }
            }
            State::Deliberating(d) => {
                remember_proposer(&mut d.proposers, proposer);
                match decide_propose(d.ballot, proposer, ballot_ordinal) {
                    Err(current) => {
                        let _ = reply.send(AcceptorReply::Refuse { ballot: current });
                    }
                    Ok(candidate) => {
                        let reaccepted = matches!(&d.proposal, Some((_, v)) if *v == value);
                        d.ballot = candidate;
                        d.proposal = Some((candidate, value.clone()));
                        let post = PostPayload::Accept { reply, ballot: candidate, value, reaccepted };
                        self.enqueue_post(post);
                    }
                }
            }
            State::Closed { value } => {
                let _ = reply.send(AcceptorReply::Chosen { value: value.clone() });
            }
            State::Shutdown | State::Panicked => {
                drop(reply);
            }
        }
    }

    async fn on_choose(&mut self, value: Bytes, reply: Option<oneshot::Sender<Result<(), AcceptorError>>>) {
        match &mut self.state {
            State::Opening => {
                self.enter_restoring(value.clone());
                Box::pin(self.on_choose(value, reply)).await;
            }
            State::Restoring(r) => {
                r.pending = Some(PostPayload::Close { value, reply });
            }
            State::Deliberating(_) => {
                let post = PostPayload::Close { value, reply };
                self.enqueue_post(post);
            }
            State::Closed { value: existing } => {
                if *existing == value {
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(()));
                    }
                } else {
                    error!(decree = ?self.decree, expected = ?existing, got = ?value, "paxos safety violation: disagreeing choose");
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(AcceptorError::Disagreement { expected: existing.clone(), got: value }));
                    }
                }
            }
            State::Shutdown | State::Panicked => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(AcceptorError::Panicked));
                }
            }
        }
    }

    fn enter_restoring(&mut self, default: Bytes) {
        debug!(decree = ?self.decree, "acceptor entering restoring");
        self.state = State::Restoring(Restoring {
            default,
            ballot: BallotNumber::bottom(),
            proposal: None,
            proposers: Vec::new(),
            pending: None,
        });
        let archive = self.archive.clone();
        let log = self.log.clone();
        let decree = self.decree.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = async {
                let archived = archive.get(&decree.key, decree.time).await?;
                let records = log.replay(&decree).await?;
                let is_fresh = records.is_empty();
                let (ballot, proposal) = fold_log(records);
                Ok(RestoredState { archived, ballot, proposal, is_fresh })
            }
            .await;
            let _ = tx.send(AcceptorInput::RestoreResult(result));
        });
    }

    async fn on_restore_result(&mut self, result: Result<RestoredState, StorageError>) {
        let restoring = match std::mem::replace(&mut self.state, State::Panicked) {
            State::Restoring(r) => r,
            other => {
                // A later message (e.g. `choose`) may have already moved us
                // on; put the state back and ignore this stale result.
                self.state = other;
                return;
            }
        };

        match result {
            Ok(RestoredState { archived: Some(value), .. }) => {
                let value = cell_value_to_bytes(value);
                info!(decree = ?self.decree, "acceptor restored chosen value from archive");
                self.state = State::Closed { value: value.clone() };
                self.closed_notify.notify_waiters();
                self.notify_proposers(restoring.proposers, value).await;
            }
            Ok(RestoredState { archived: None, ballot: log_ballot, proposal: log_proposal, is_fresh }) => {
                debug!(decree = ?self.decree, "acceptor restore found no archived value; deliberating");
                if is_fresh {
                    if let Err(err) = self.log.append(&self.decree, LogRecord::Open { default: restoring.default.clone() }).await {
                        error!(decree = ?self.decree, error = %err, "failed to log open; acceptor panicked");
                        self.state = State::Panicked;
                        return;
                    }
                }
                // The log may hold a higher ballot/proposal than anything
                // observed while Restoring was still buffering input.
                let ballot = restoring.ballot.max(log_ballot);
                let proposal = match (restoring.proposal, log_proposal) {
                    (Some(a), Some(b)) => Some(if a.0 >= b.0 { a } else { b }),
                    (Some(a), None) => Some(a),
                    (None, b) => b,
                };
                let mut deliberating = Deliberating {
                    default: restoring.default,
                    ballot,
                    proposal,
                    proposers: restoring.proposers,
                    outstanding: false,
                    queued: None,
                    timeout_fired: false,
                };
                if let Some(post) = restoring.pending {
                    deliberating.outstanding = true;
                    self.spawn_post(post);
                }
                self.state = State::Deliberating(deliberating);
                self.schedule_deliberating_timeout();
            }
            Err(err) => {
                error!(decree = ?self.decree, error = %err, "archive/log read failed; acceptor panicked");
                self.state = State::Panicked;
            }
        }
    }

    fn enqueue_post(&mut self, post: PostPayload) {
        if let State::Deliberating(d) = &mut self.state {
            if d.outstanding {
                // Supersedes whatever was queued; its reply sender (if any)
                // is dropped here without ever being replied to.
                d.queued = Some(post);
            } else {
                d.outstanding = true;
                self.spawn_post(post);
            }
        }
    }

    fn spawn_post(&self, post: PostPayload) {
        let decree = self.decree.clone();
        let log = self.log.clone();
        let archive = self.archive.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let outcome = execute_post(decree, post, log, archive).await;
            let _ = tx.send(AcceptorInput::PostDone(outcome));
        });
    }

    async fn on_post_done(&mut self, outcome: PostOutcome) {
        let closed_value = match outcome {
            PostOutcome::StorageFailed => {
                error!(decree = ?self.decree, "storage failure while posting; acceptor panicked");
                self.state = State::Panicked;
                return;
            }
            PostOutcome::Done { closed_value } => closed_value,
        };

        if let Some(value) = closed_value {
            if let State::Deliberating(d) = std::mem::replace(&mut self.state, State::Panicked) {
                self.state = State::Closed { value: value.clone() };
                self.closed_notify.notify_waiters();
                self.notify_proposers(d.proposers, value).await;
            }
            return;
        }

        if let State::Deliberating(d) = &mut self.state {
            d.outstanding = false;
            if let Some(next) = d.queued.take() {
                d.outstanding = true;
                self.spawn_post(next);
            }
        }
    }

    fn schedule_deliberating_timeout(&self) {
        let timeout = self.config.deliberating_timeout;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(AcceptorInput::DeliberatingTimeout);
        });
    }

    async fn on_deliberating_timeout(&mut self) {
        let (default, already_fired) = match &mut self.state {
            State::Deliberating(d) => (d.default.clone(), d.timeout_fired),
            _ => return,
        };
        if already_fired {
            return;
        }
        if let State::Deliberating(d) = &mut self.state {
            d.timeout_fired = true;
        }
        warn!(decree = ?self.decree, "deliberating timeout elapsed; acceptor self-proposing default");
        let decree = self.decree.clone();
        let proposer = self.self_proposer.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = proposer.propose(decree, default).await;
            let _ = tx.send(AcceptorInput::SelfProposalResult(result));
        });
    }

    async fn on_self_proposal_result(&mut self, result: Result<Bytes, crate::error::ProposerError>) {
        match result {
            Ok(value) => self.on_choose(value, None).await,
            Err(err) => {
                warn!(decree = ?self.decree, error = %err, "self-initiated proposal failed; will retry after next timeout");
                if let State::Deliberating(d) = &mut self.state {
                    d.timeout_fired = false;
                    self.schedule_deliberating_timeout();
                }
            }
        }
    }

    async fn notify_proposers(&self, proposers: Vec<NodeId>, value: Bytes) {
        let Some(cluster) = &self.cluster else { return };
        for proposer in proposers {
            let msg = ChosenMsg { key: self.decree.key.clone(), time: self.decree.time, value: value.clone() };
            if let Ok(envelope) = Envelope::encode(cluster.node_id(), quorumkv_core::wire::MSG_CHOSEN, None, &msg) {
                let _ = cluster.send(proposer, envelope).await;
            }
        }
    }
}

fn cell_value_to_bytes(value: CellValue) -> Bytes {
    match value {
        CellValue::Data(bytes) => bytes,
        CellValue::Tombstone => Bytes::new(),
    }
}

async fn execute_post(decree: DecreeId, post: PostPayload, log: Arc<dyn Log>, archive: Arc<dyn Archive>) -> PostOutcome {
    match post {
        PostPayload::Promise { reply, ballot, echoed } => {
            match log.append(&decree, LogRecord::Promise { ballot }).await {
                Ok(()) => {
                    let _ = reply.send(AcceptorReply::Promise { ballot, proposal: echoed });
                    PostOutcome::Done { closed_value: None }
                }
                Err(_) => PostOutcome::StorageFailed,
            }
        }
        PostPayload::Accept { reply, ballot, value, reaccepted } => {
            let record = if reaccepted {
                LogRecord::Reaccept { ballot }
            } else {
                LogRecord::Accept { ballot, value: value.clone() }
            };
            match log.append(&decree, record).await {
                Ok(()) => {
                    let _ = reply.send(AcceptorReply::Accept { ballot });
                    PostOutcome::Done { closed_value: None }
                }
                Err(_) => PostOutcome::StorageFailed,
            }
        }
        PostPayload::Close { value, reply } => {
            let put_result = archive.put(&decree.key, decree.time, CellValue::Data(value.clone())).await;
            match put_result {
                Ok(generation) => {
                    match log
                        .append(&decree, LogRecord::Close { chosen: value.clone(), archive_generation: generation })
                        .await
                    {
                        Ok(()) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(Ok(()));
                            }
                            PostOutcome::Done { closed_value: Some(value) }
                        }
                        Err(_) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(Err(AcceptorError::Panicked));
                            }
                            PostOutcome::StorageFailed
                        }
                    }
                }
                Err(_) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(AcceptorError::Panicked));
                    }
                    PostOutcome::StorageFailed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::NeverProposer;
    use bytes::Bytes;
    use quorumkv_storage::{InMemoryArchive, InMemoryLog};

    fn decree() -> DecreeId {
        DecreeId::new(Bytes::from_static(b"k"), 1)
    }

    fn acceptor() -> AcceptorHandle {
        spawn_acceptor(
            decree(),
            Arc::new(InMemoryLog::new()),
            Arc::new(InMemoryArchive::new()),
            AcceptorConfig::default(),
            Arc::new(NeverProposer),
        )
    }

    #[tokio::test]
    async fn first_query_promises_and_logs() {
        let a = acceptor();
        let reply = a.query(NodeId(1), 5, Bytes::from_static(b"D")).await;
        assert_eq!(reply, AcceptorReply::Promise { ballot: BallotNumber::new(5, NodeId(1)), proposal: None });
    }

    #[tokio::test]
    async fn lower_ballot_is_refused() {
        let a = acceptor();
        let _ = a.query(NodeId(1), 10, Bytes::from_static(b"D")).await;
        let reply = a.query(NodeId(2), 5, Bytes::from_static(b"D")).await;
        assert_eq!(reply, AcceptorReply::Refuse { ballot: BallotNumber::new(10, NodeId(1)) });
    }

    #[tokio::test]
    async fn propose_then_choose_closes_and_answers_chosen() {
        let a = acceptor();
        let _ = a.query(NodeId(1), 0, Bytes::from_static(b"A")).await;
        let reply = a.propose(NodeId(1), 0, Bytes::from_static(b"A")).await;
        assert_eq!(reply, AcceptorReply::Accept { ballot: BallotNumber::new(0, NodeId(1)) });

        a.choose(Bytes::from_static(b"A")).await.unwrap();
        let reply = a.query(NodeId(2), 0, Bytes::from_static(b"B")).await;
        assert_eq!(reply, AcceptorReply::Chosen { value: Bytes::from_static(b"A") });
    }

    #[tokio::test]
    async fn duplicate_choose_is_idempotent() {
        let a = acceptor();
        a.choose(Bytes::from_static(b"A")).await.unwrap();
        a.choose(Bytes::from_static(b"A")).await.unwrap();
    }

    #[tokio::test]
    async fn disagreeing_choose_is_a_safety_violation() {
        let a = acceptor();
        a.choose(Bytes::from_static(b"A")).await.unwrap();
        let err = a.choose(Bytes::from_static(b"B")).await.unwrap_err();
        assert!(matches!(err, AcceptorError::Disagreement { .. }));
    }

    #[tokio::test]
    async fn reaccept_of_the_same_value_logs_reaccept() {
        let log = Arc::new(InMemoryLog::new());
        let a = spawn_acceptor(decree(), log.clone(), Arc::new(InMemoryArchive::new()), AcceptorConfig::default(), Arc::new(NeverProposer));
        let _ = a.propose(NodeId(1), 0, Bytes::from_static(b"A")).await;
        let _ = a.propose(NodeId(1), 1, Bytes::from_static(b"A")).await;

        let records = log.replay(&decree()).await.unwrap();
        assert!(matches!(records[0], LogRecord::Accept { .. }));
        assert!(matches!(records[1], LogRecord::Reaccept { .. }));
    }

    #[tokio::test]
    async fn recovers_in_flight_proposal_from_the_log() {
        let log = Arc::new(InMemoryLog::new());
        let archive = Arc::new(InMemoryArchive::new());
        log.append(&decree(), LogRecord::Accept { ballot: BallotNumber::new(7, NodeId(1)), value: Bytes::from_static(b"A") })
            .await
            .unwrap();

        let a = spawn_acceptor(decree(), log, archive, AcceptorConfig::default(), Arc::new(NeverProposer));
        // First input flips Opening -> Restoring and kicks off the archive/log replay.
        let _ = a.query(NodeId(99), 0, Bytes::from_static(b"D")).await;
        // Give the spawned replay a chance to land before the next query.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let reply = a.query(NodeId(2), 8, Bytes::from_static(b"D")).await;
        assert_eq!(
            reply,
            AcceptorReply::Promise {
                ballot: BallotNumber::new(8, NodeId(2)),
                proposal: Some((BallotNumber::new(7, NodeId(1)), Bytes::from_static(b"A"))),
            }
        );
    }
}
