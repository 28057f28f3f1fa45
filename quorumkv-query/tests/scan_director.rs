//! Black-box ScanDirector tests against the crate's public API: invariants
//! 6-8 (quorum gating, monotonic emission, termination) plus the scan
//! end-to-end scenarios — merging two replicas and recovering from a
//! silent one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use quorumkv_core::{Atlas, Cell, CellValue, MajorityAtlas, NodeId};
use quorumkv_network::{Cluster, ClusterHub};
use quorumkv_query::{open_scan, ScanConfig, ScanDeputy, ScanError, ScanParams};
use quorumkv_storage::{Archive, InMemoryArchive};

fn cell(key: &str, time: u64, value: &str) -> Cell {
    Cell::new(Bytes::from(key.to_string()), time, CellValue::Data(Bytes::from(value.to_string())))
}

/// Joins `id` to `hub` with a deputy over a fresh archive seeded with
/// `cells`, and spawns the dispatch loop that answers its scan RPCs.
/// Returns the cluster handle so the caller can also use it as the
/// director's own transport.
async fn spawn_deputy(hub: &ClusterHub, id: NodeId, cells: Vec<Cell>) -> Arc<dyn Cluster> {
    let cluster: Arc<dyn Cluster> = Arc::new(hub.join(id));
    let archive = Arc::new(InMemoryArchive::new());
    for c in cells {
        archive.put(&c.key, c.time, c.value.clone()).await.unwrap();
    }
    let deputy = Arc::new(ScanDeputy::new(archive, cluster.clone()));
    let dispatch_cluster = cluster.clone();
    tokio::spawn(async move {
        while let Some(envelope) = dispatch_cluster.recv().await {
            deputy.handle(envelope).await;
        }
    });
    cluster
}

fn fast_scan_config() -> ScanConfig {
    ScanConfig {
        rouse_backoff_floor: Duration::from_millis(15),
        rouse_backoff_ceiling: Duration::from_millis(40),
        max_rouses: 20,
        window: 256,
    }
}

/// Scenario 5 (scan merge with two replicas): R1 holds both versions of
/// `k1` plus the newest version of `k2`; R2 holds only an older version of
/// `k2`. Neither replica holds everything, so the merged stream is only
/// correct if the director actually interleaves both sources — a pure
/// per-replica concatenation would put `k2@5` before `k1@1`.
#[tokio::test]
async fn scan_merges_ordered_pages_from_two_replicas_and_terminates() {
    let hub = ClusterHub::new();
    let r1 = spawn_deputy(
        &hub,
        NodeId(1),
        vec![cell("k1", 2, "a"), cell("k1", 1, "b"), cell("k2", 5, "c")],
    );
    let _r2 = spawn_deputy(&hub, NodeId(2), vec![cell("k2", 3, "d")]);

    let atlas: Arc<dyn Atlas> = Arc::new(MajorityAtlas::new([NodeId(1), NodeId(2)]));
    let params = ScanParams { key: Bytes::from_static(b"k1"), time: 10 };
    let mut stream = open_scan(params, atlas, r1, fast_scan_config());

    let batch = stream.batches.recv().await.expect("a batch should be emitted");
    let got: Vec<(Bytes, u64)> = batch.cells.iter().map(|c| (c.key.clone(), c.time)).collect();
    assert_eq!(
        got,
        vec![
            (Bytes::from_static(b"k1"), 2),
            (Bytes::from_static(b"k1"), 1),
            (Bytes::from_static(b"k2"), 5),
            (Bytes::from_static(b"k2"), 3),
        ]
    );
    batch.ack();

    assert!(stream.batches.recv().await.is_none(), "channel should close once the scan finishes");
    stream.outcome.await.unwrap().unwrap();
}

/// Invariant 6 (quorum gating): with a 3-member atlas and only one deputy
/// ever reachable, the director must never emit a single cell, and the scan
/// eventually fails with a timeout rather than hanging or emitting a
/// minority view.
#[tokio::test]
async fn scan_never_emits_without_a_quorum_of_deputy_replies() {
    let hub = ClusterHub::new();
    let r1 = spawn_deputy(&hub, NodeId(1), vec![cell("k1", 1, "a")]);
    // NodeId(2) and NodeId(3) are never joined to the hub: every reissue to
    // them fails at send time and no reply ever arrives.

    let atlas: Arc<dyn Atlas> = Arc::new(MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]));
    let params = ScanParams { key: Bytes::from_static(b"k1"), time: 10 };
    let config = ScanConfig {
        rouse_backoff_floor: Duration::from_millis(5),
        rouse_backoff_ceiling: Duration::from_millis(10),
        max_rouses: 3,
        window: 256,
    };
    let mut stream = open_scan(params, atlas, r1, config);

    assert!(stream.batches.recv().await.is_none(), "quorum of 2 was never reached; nothing should ever be emitted");
    let err = stream.outcome.await.unwrap().unwrap_err();
    assert!(matches!(err, ScanError::Timeout));
}

/// Scenario 6 (scan timeout then recovery): R2 is unreachable when the scan
/// opens, so the director rouses it repeatedly; once R2 joins the cluster
/// mid-scan, a later rouse's reissue reaches it and the merge completes
/// using R2's cells with no duplication of R1's already-emitted cell.
#[tokio::test]
async fn silent_deputy_recovers_via_rouse_and_scan_completes() {
    let hub = ClusterHub::new();
    let r1 = spawn_deputy(&hub, NodeId(1), vec![cell("k1", 5, "a")]);

    let atlas: Arc<dyn Atlas> = Arc::new(MajorityAtlas::new([NodeId(1), NodeId(2)]));
    let params = ScanParams { key: Bytes::from_static(b"k1"), time: 10 };
    let mut stream = open_scan(params, atlas, r1, fast_scan_config());

    let hub_for_join = hub.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        spawn_deputy(&hub_for_join, NodeId(2), vec![cell("k2", 7, "b")]);
    });

    let batch = stream.batches.recv().await.expect("a batch should be emitted once R2 answers");
    let got: Vec<(Bytes, u64)> = batch.cells.iter().map(|c| (c.key.clone(), c.time)).collect();
    assert_eq!(got, vec![(Bytes::from_static(b"k1"), 5), (Bytes::from_static(b"k2"), 7)]);
    batch.ack();

    assert!(stream.batches.recv().await.is_none());
    stream.outcome.await.unwrap().unwrap();
}
