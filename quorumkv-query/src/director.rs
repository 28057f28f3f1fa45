//! The ScanDirector: fans a range query out to a quorum of scan deputies and
//! merges their ordered pages into one de-duplicated, quorum-gated stream.
//!
//! Like the Acceptor and Proposer, one invocation owns a fiber — a Tokio
//! task reached only through its mailbox — so the merge state (the priority
//! queue, `have`/`done`, `last`) is never touched from two places at once.
//! The only background work it spawns is deputy RPCs and the rouse timer,
//! both of which rejoin the actor loop as self-addressed messages.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use quorumkv_core::{Atlas, Backoff, Cell, NodeId, ScanPos};
use quorumkv_network::{Cluster, Envelope};

use crate::config::ScanConfig;
use crate::element::{advance, Advance, Continuation, Element};
use crate::error::ScanError;
use crate::messages::{ScanReplyMsg, ScanRequestMsg};

/// What to scan, and where to start. `key`/`time` select the snapshot: cells
/// at or before `time` for `key` are visible, and greater keys are scanned
/// in full regardless of their time.
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub key: Bytes,
    pub time: u64,
}

/// One batch handed to the consumer, paired with the acknowledgement it owes
/// back once done processing: `Ok(())` to receive the next batch, `Err` to
/// abort the whole scan. This is the idiomatic substitution for the
/// distilled contract's `body(cells) -> async unit` callback — a bounded,
/// ack-carrying channel gives the same one-batch-in-flight backpressure
/// without an ambient async-callback convention.
pub struct ScanBatch {
    pub cells: Vec<Cell>,
    ack: oneshot::Sender<Result<(), String>>,
}

impl ScanBatch {
    /// Accepts this batch; the director will produce and send the next one.
    pub fn ack(self) {
        let _ = self.ack.send(Ok(()));
    }

    /// Aborts the scan; the consumer's terminal future resolves to
    /// `ScanError::ConsumerAborted(reason)`.
    pub fn abort(self, reason: impl Into<String>) {
        let _ = self.ack.send(Err(reason.into()));
    }
}

/// What a caller holds after opening a scan: a stream of batches to drive,
/// and a terminal future resolving once the scan finishes or fails.
pub struct ScanStream {
    pub batches: mpsc::Receiver<ScanBatch>,
    pub outcome: oneshot::Receiver<Result<(), ScanError>>,
}

enum ScanInput {
    DeputyReply { from: NodeId, cells: Vec<Cell>, next: Option<ScanPos> },
    Rouse,
    ConsumerAck,
    ConsumerAborted(String),
}

struct ScanDirectorActor {
    params: ScanParams,
    atlas: Arc<dyn Atlas>,
    cluster: Arc<dyn Cluster>,
    config: ScanConfig,

    heap: BinaryHeap<Reverse<Element>>,
    have: HashSet<NodeId>,
    done: HashSet<NodeId>,
    last: ScanPos,
    ready: bool,
    closed: bool,

    last_at_rouse: Option<ScanPos>,
    rouse_backoff: Backoff,
    rouses_fired: u32,

    self_tx: mpsc::UnboundedSender<ScanInput>,
    batches_tx: mpsc::Sender<ScanBatch>,
    outcome_tx: Option<oneshot::Sender<Result<(), ScanError>>>,
}

/// Opens a scan against every peer in `atlas`'s membership and returns the
/// stream the caller drives. Spawns the director's fiber; dropping
/// `ScanStream` without reading it leaves the fiber to fail on the next
/// batch send and exit quietly.
pub fn open_scan(params: ScanParams, atlas: Arc<dyn Atlas>, cluster: Arc<dyn Cluster>, config: ScanConfig) -> ScanStream {
    let (self_tx, self_rx) = mpsc::unbounded_channel();
    let (batches_tx, batches_rx) = mpsc::channel(1);
    let (outcome_tx, outcome_rx) = oneshot::channel();

    let last = ScanPos::new(params.key.clone(), params.time.saturating_add(1));
    let rouse_backoff = Backoff::new(config.rouse_backoff_floor, config.rouse_backoff_ceiling);
    let actor = ScanDirectorActor {
        params,
        atlas,
        cluster,
        config,
        heap: BinaryHeap::new(),
        have: HashSet::new(),
        done: HashSet::new(),
        last,
        ready: true,
        closed: false,
        last_at_rouse: None,
        rouse_backoff,
        rouses_fired: 0,
        self_tx: self_tx.clone(),
        batches_tx,
        outcome_tx: Some(outcome_tx),
    };

    tokio::spawn(actor.run(self_rx));
    ScanStream { batches: batches_rx, outcome: outcome_rx }
}

impl ScanDirectorActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ScanInput>) {
        self.kickoff();
        while let Some(input) = rx.recv().await {
            if self.closed {
                break;
            }
            self.handle(input).await;
        }
        // Dropping `self` here drops `batches_tx`, closing the consumer's
        // channel so a `while let Some(batch) = stream.batches.recv()` loop
        // ends on its own instead of hanging once the scan is done.
    }

    fn kickoff(&mut self) {
        let members: Vec<NodeId> = self.atlas.members().into_iter().collect();
        info!(members = members.len(), key = ?self.params.key, time = self.params.time, "scan director opened");
        for peer in members {
            self.reissue(peer, Some(self.last.clone()));
        }
        self.schedule_rouse();
    }

    async fn handle(&mut self, input: ScanInput) {
        match input {
            ScanInput::DeputyReply { from, cells, next } => self.on_deputy_reply(from, cells, next).await,
            ScanInput::Rouse => self.on_rouse().await,
            ScanInput::ConsumerAck => {
                self.ready = true;
                self.try_give().await;
            }
            ScanInput::ConsumerAborted(reason) => {
                self.finish(Err(ScanError::ConsumerAborted(reason)));
            }
        }
    }

    async fn on_deputy_reply(&mut self, from: NodeId, cells: Vec<Cell>, next: Option<ScanPos>) {
        if cells.is_empty() {
            match next {
                None => {
                    self.have.insert(from);
                    self.done.insert(from);
                }
                Some(after) => self.reissue(from, Some(after)),
            }
        } else {
            self.have.insert(from);
            self.heap.push(Reverse(Element { cells: cells.into(), next, from }));
        }
        self.try_give().await;
    }

    async fn on_rouse(&mut self) {
        let advanced = self.last_at_rouse.as_ref() != Some(&self.last);
        if advanced {
            self.rouse_backoff.reset();
            self.rouses_fired = 0;
        } else {
            self.rouses_fired += 1;
            if self.rouses_fired > self.config.max_rouses {
                warn!(key = ?self.params.key, "scan rouse budget exhausted");
                self.finish(Err(ScanError::Timeout));
                return;
            }
            let awaiting = self.atlas.awaiting(&self.have);
            debug!(awaiting = awaiting.len(), "scan rouse reissuing to silent peers");
            for peer in awaiting {
                self.reissue(peer, Some(self.last.clone()));
            }
        }
        self.schedule_rouse();
    }

    /// Runs the merge loop and, if it produced anything, hands the batch to
    /// the consumer. If the consumer already has a batch in flight, does
    /// nothing — this is re-invoked once its ack arrives.
    async fn try_give(&mut self) {
        if !self.ready || self.closed {
            return;
        }
        let batch = self.merge();
        if batch.is_empty() {
            if self.atlas.quorum(&self.done) {
                self.finish(Ok(()));
            }
            return;
        }

        self.ready = false;
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.batches_tx.send(ScanBatch { cells: batch, ack: ack_tx }).await.is_err() {
            // Consumer dropped the receiver: treat as a silent cancellation.
            self.closed = true;
            return;
        }
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            match ack_rx.await {
                Ok(Ok(())) => {
                    let _ = self_tx.send(ScanInput::ConsumerAck);
                }
                Ok(Err(reason)) => {
                    let _ = self_tx.send(ScanInput::ConsumerAborted(reason));
                }
                Err(_) => {
                    // Batch dropped without ack/abort: same as a dropped receiver.
                }
            }
        });
    }

    /// While quorum holds over `have` and the queue is non-empty, pops the
    /// minimum element and advances it past `last`, emitting at most one
    /// cell per element per pop and re-queuing/reissuing/retiring it per
    /// `advance`'s verdict. Stops on an empty queue or a quorum loss (a
    /// contributor reissued and dropped out of `have`).
    fn merge(&mut self) -> Vec<Cell> {
        let mut batch = Vec::new();
        while self.atlas.quorum(&self.have) {
            let Some(Reverse(element)) = self.heap.pop() else { break };
            match advance(element, &self.last) {
                Advance::Emit { cell, continuation } => {
                    self.last = cell.pos();
                    batch.push(cell);
                    self.apply(continuation);
                }
                Advance::NoEmit { continuation } => {
                    self.apply(continuation);
                }
            }
        }
        batch
    }

    fn apply(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::Requeue(element) => self.heap.push(Reverse(element)),
            Continuation::Reissue { from, after } => {
                self.have.remove(&from);
                self.reissue(from, Some(after));
            }
            Continuation::Done(from) => {
                self.done.insert(from);
            }
        }
    }

    fn reissue(&self, to: NodeId, after: Option<ScanPos>) {
        let cluster = self.cluster.clone();
        let self_tx = self.self_tx.clone();
        let request = ScanRequestMsg {
            key: self.params.key.clone(),
            time: self.params.time,
            window: self.config.window,
            after,
            reply_port: 0,
        };
        tokio::spawn(async move {
            let (port, rx) = cluster.open_port();
            let request = ScanRequestMsg { reply_port: port, ..request };
            let Ok(envelope) = Envelope::encode(cluster.node_id(), quorumkv_core::wire::MSG_SCAN_REQUEST, None, &request) else {
                return;
            };
            if cluster.send(to, envelope).await.is_err() {
                return;
            }
            if let Ok(reply_envelope) = rx.await {
                if let Ok(reply) = reply_envelope.decode::<ScanReplyMsg>() {
                    let _ = self_tx.send(ScanInput::DeputyReply { from: to, cells: reply.cells, next: reply.next });
                }
            }
        });
    }

    fn schedule_rouse(&mut self) {
        self.last_at_rouse = Some(self.last.clone());
        let delay = self.rouse_backoff.next_delay();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_tx.send(ScanInput::Rouse);
        });
    }

    fn finish(&mut self, outcome: Result<(), ScanError>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.heap.clear();
        info!(key = ?self.params.key, ok = outcome.is_ok(), "scan director finished");
        if let Some(tx) = self.outcome_tx.take() {
            let _ = tx.send(outcome);
        }
    }
}
