//! Black-box acceptor tests against the crate's public API: invariants 1-4
//! (safety, log discipline, ballot monotonicity, no lost values) plus the
//! end-to-end scenarios that exercise an acceptor without a proposer or
//! transport in the loop.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use quorumkv_consensus::acceptor::{spawn_acceptor, ActiveStatus, AcceptorReply};
use quorumkv_consensus::config::AcceptorConfig;
use quorumkv_consensus::coordinator::NeverProposer;
use quorumkv_consensus::error::AcceptorError;
use quorumkv_core::{BallotNumber, NodeId};
use quorumkv_storage::{DecreeId, InMemoryArchive, InMemoryLog, Log, LogRecord};

fn decree() -> DecreeId {
    DecreeId::new(Bytes::from_static(b"account/alice"), 1)
}

/// Scenario 1: a single proposer's decree with no contention. No real
/// proposer is involved here — this drives the acceptor's query/propose/
/// choose sequence directly, as a proposer at ballot zero would.
#[tokio::test]
async fn simple_decree_reaches_accept_then_close() {
    let a = spawn_acceptor(
        decree(),
        Arc::new(InMemoryLog::new()),
        Arc::new(InMemoryArchive::new()),
        AcceptorConfig::default(),
        Arc::new(NeverProposer),
    );

    let promise = a.query(NodeId(1), 0, Bytes::from_static(b"A")).await;
    assert_eq!(promise, AcceptorReply::Promise { ballot: BallotNumber::new(0, NodeId(1)), proposal: None });

    let accept = a.propose(NodeId(1), 0, Bytes::from_static(b"A")).await;
    assert_eq!(accept, AcceptorReply::Accept { ballot: BallotNumber::new(0, NodeId(1)) });

    a.choose(Bytes::from_static(b"A")).await.unwrap();

    // invariant 1: a second, later query against the same decree must see
    // the same chosen value, never a different one.
    let late = a.query(NodeId(2), 99, Bytes::from_static(b"Z")).await;
    assert_eq!(late, AcceptorReply::Chosen { value: Bytes::from_static(b"A") });
}

/// Invariant 2 (log discipline): a promise/accept reply is only ever sent
/// once the corresponding record is durable — verified by inspecting the log
/// right after each reply lands.
#[tokio::test]
async fn promise_and_accept_replies_are_backed_by_durable_log_records() {
    let log = Arc::new(InMemoryLog::new());
    let a = spawn_acceptor(decree(), log.clone(), Arc::new(InMemoryArchive::new()), AcceptorConfig::default(), Arc::new(NeverProposer));

    let _ = a.query(NodeId(1), 0, Bytes::from_static(b"A")).await;
    let records = log.replay(&decree()).await.unwrap();
    assert!(records.iter().any(|r| matches!(r, LogRecord::Promise { .. })));

    let _ = a.propose(NodeId(1), 0, Bytes::from_static(b"A")).await;
    let records = log.replay(&decree()).await.unwrap();
    assert!(records.iter().any(|r| matches!(r, LogRecord::Accept { .. })));
}

/// Invariant 3 (ballot monotonicity): once an acceptor has promised a
/// ballot, no lower ballot is ever accepted, even across several queries
/// from different proposers.
#[tokio::test]
async fn stored_ballot_never_decreases() {
    let a = spawn_acceptor(
        decree(),
        Arc::new(InMemoryLog::new()),
        Arc::new(InMemoryArchive::new()),
        AcceptorConfig::default(),
        Arc::new(NeverProposer),
    );

    let _ = a.query(NodeId(1), 10, Bytes::from_static(b"A")).await;
    let refused = a.query(NodeId(2), 3, Bytes::from_static(b"B")).await;
    assert_eq!(refused, AcceptorReply::Refuse { ballot: BallotNumber::new(10, NodeId(1)) });

    // A later, higher ballot from a different proposer is still honored.
    let promise = a.query(NodeId(3), 20, Bytes::from_static(b"C")).await;
    assert_eq!(promise, AcceptorReply::Promise { ballot: BallotNumber::new(20, NodeId(3)), proposal: None });
}

/// Invariant 4 (no lost values): once a value is accepted at a ballot, it
/// remains the stored proposal until a strictly larger ballot reaccepts it.
#[tokio::test]
async fn accepted_value_survives_a_query_at_the_same_ballot() {
    let a = spawn_acceptor(
        decree(),
        Arc::new(InMemoryLog::new()),
        Arc::new(InMemoryArchive::new()),
        AcceptorConfig::default(),
        Arc::new(NeverProposer),
    );

    let accept = a.propose(NodeId(1), 5, Bytes::from_static(b"A")).await;
    assert_eq!(accept, AcceptorReply::Accept { ballot: BallotNumber::new(5, NodeId(1)) });

    let promise = a.query(NodeId(2), 6, Bytes::from_static(b"ignored-default")).await;
    assert_eq!(
        promise,
        AcceptorReply::Promise {
            ballot: BallotNumber::new(6, NodeId(2)),
            proposal: Some((BallotNumber::new(5, NodeId(1)), Bytes::from_static(b"A"))),
        }
    );
}

/// Round-trip/idempotence: a duplicate `choose` for the same value never
/// errors, and a disagreeing one surfaces as a safety violation rather than
/// silently overwriting the chosen value.
#[tokio::test]
async fn duplicate_choose_is_idempotent_and_disagreement_is_rejected() {
    let a = spawn_acceptor(
        decree(),
        Arc::new(InMemoryLog::new()),
        Arc::new(InMemoryArchive::new()),
        AcceptorConfig::default(),
        Arc::new(NeverProposer),
    );

    a.choose(Bytes::from_static(b"A")).await.unwrap();
    a.choose(Bytes::from_static(b"A")).await.unwrap();

    let err = a.choose(Bytes::from_static(b"B")).await.unwrap_err();
    assert!(matches!(err, AcceptorError::Disagreement { .. }));
}

/// Scenario 4: an acceptor with no proposer in sight adopts its own default
/// after `deliberatingTimeout`, here configured short so the test doesn't
/// have to wait out the production default.
#[tokio::test]
async fn deliberating_timeout_self_proposes_the_default() {
    struct EchoProposer;

    #[async_trait::async_trait]
    impl quorumkv_consensus::coordinator::DecreeProposer for EchoProposer {
        async fn propose(
            &self,
            _decree: DecreeId,
            default: Bytes,
        ) -> Result<Bytes, quorumkv_consensus::error::ProposerError> {
            Ok(default)
        }
    }

    let config = AcceptorConfig { deliberating_timeout: Duration::from_millis(20), ..AcceptorConfig::default() };
    let a = spawn_acceptor(decree(), Arc::new(InMemoryLog::new()), Arc::new(InMemoryArchive::new()), config, Arc::new(EchoProposer));

    // Enter Deliberating with no proposal of our own, then wait out the timeout.
    let _ = a.query(NodeId(1), 1, Bytes::from_static(b"D")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = a.query(NodeId(2), 2, Bytes::from_static(b"ignored")).await;
    assert_eq!(reply, AcceptorReply::Chosen { value: Bytes::from_static(b"D") });
}

/// `checkpoint()` is the acceptor's migration/recovery surface and was never
/// exercised by a test: walk it through all three of its observable states
/// and confirm `default_value()` tracks the default while open and the
/// chosen value once closed.
#[tokio::test]
async fn checkpoint_reports_restoring_then_deliberating_then_closed() {
    let a = spawn_acceptor(
        decree(),
        Arc::new(InMemoryLog::new()),
        Arc::new(InMemoryArchive::new()),
        AcceptorConfig::default(),
        Arc::new(NeverProposer),
    );

    // `tokio::join!` polls its futures for the first time in argument order,
    // so `query`'s mailbox send lands before `checkpoint`'s — the checkpoint
    // is guaranteed to observe the acceptor still Restoring, buffering the
    // query behind its archive/log replay.
    let (promise, restoring) =
        tokio::join!(a.query(NodeId(1), 0, Bytes::from_static(b"A")), a.checkpoint());
    assert_eq!(promise, AcceptorReply::Promise { ballot: BallotNumber::new(0, NodeId(1)), proposal: None });
    let restoring = restoring.unwrap();
    assert!(matches!(restoring, ActiveStatus::Restoring { .. }));
    assert_eq!(restoring.default_value(), &Bytes::from_static(b"A"));

    let deliberating = a.checkpoint().await.unwrap();
    assert!(matches!(&deliberating, ActiveStatus::Deliberating { ballot, .. } if *ballot == BallotNumber::new(0, NodeId(1))));
    assert_eq!(deliberating.default_value(), &Bytes::from_static(b"A"));

    a.choose(Bytes::from_static(b"A")).await.unwrap();
    let closed = a.checkpoint().await.unwrap();
    assert!(matches!(closed, ActiveStatus::Closed { .. }));
    assert_eq!(closed.default_value(), &Bytes::from_static(b"A"));
}
