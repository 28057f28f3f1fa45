use std::collections::HashSet;
use std::sync::Arc;

use crate::node::NodeId;

/// Quorum and placement policy for a key: which peers participate, and which
/// subsets of replies count as a quorum.
///
/// Both the Proposer's promise/accept trackers and the ScanDirector's
/// `have`/`done` sets consult the same trait, so a single placement decision
/// (who replicates this key, how many of them must agree) governs both write
/// and read paths.
pub trait Atlas: Send + Sync {
    /// The full set of peers that hold a replica for this key/time.
    fn members(&self) -> HashSet<NodeId>;

    /// Whether `have` (a subset of replies received so far) forms a quorum.
    fn quorum(&self, have: &HashSet<NodeId>) -> bool;

    /// Members not yet represented in `have`, i.e. still worth contacting.
    fn awaiting(&self, have: &HashSet<NodeId>) -> HashSet<NodeId> {
        self.members().difference(have).copied().collect()
    }
}

/// Fixed-membership majority quorum: a quorum is any strict majority of the
/// configured member set. Sufficient for a single, statically placed cluster;
/// a real placement service would implement `Atlas` against a versioned
/// membership table instead.
#[derive(Debug, Clone)]
pub struct MajorityAtlas {
    members: HashSet<NodeId>,
}

impl MajorityAtlas {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self { members: members.into_iter().collect() }
    }
}

impl Atlas for MajorityAtlas {
    fn members(&self) -> HashSet<NodeId> {
        self.members.clone()
    }

    fn quorum(&self, have: &HashSet<NodeId>) -> bool {
        let present = have.intersection(&self.members).count();
        present * 2 > self.members.len()
    }
}

/// A per-phase quorum accumulator: "which peers have replied so far, and does
/// that form a quorum under the atlas".
///
/// The Proposer's `promised`/`accepted` trackers and the ScanDirector's
/// `have`/`done` sets are all instances of this shape; one tracker per phase,
/// `clear()`ed (not decremented) on refusal or backoff so a stale reply from
/// an earlier phase can never count toward the new one.
#[derive(Clone)]
pub struct QuorumTracker {
    atlas: Arc<dyn Atlas>,
    peers: HashSet<NodeId>,
}

impl QuorumTracker {
    pub fn new(atlas: Arc<dyn Atlas>) -> Self {
        Self { atlas, peers: HashSet::new() }
    }

    /// Records a reply from `peer`. Returns whether the tracker now holds a quorum.
    pub fn add(&mut self, peer: NodeId) -> bool {
        self.peers.insert(peer);
        self.has_quorum()
    }

    pub fn has_quorum(&self) -> bool {
        self.atlas.quorum(&self.peers)
    }

    pub fn peers(&self) -> &HashSet<NodeId> {
        &self.peers
    }

    /// Discards all accumulated replies, starting the next phase from empty.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[u64]) -> HashSet<NodeId> {
        ids.iter().map(|&i| NodeId(i)).collect()
    }

    #[test]
    fn majority_of_three_needs_two() {
        let atlas = MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]);
        assert!(!atlas.quorum(&set(&[1])));
        assert!(atlas.quorum(&set(&[1, 2])));
        assert!(atlas.quorum(&set(&[1, 2, 3])));
    }

    #[test]
    fn replies_outside_membership_do_not_count() {
        let atlas = MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]);
        assert!(!atlas.quorum(&set(&[9, 10])));
    }

    #[test]
    fn awaiting_excludes_members_already_present() {
        let atlas = MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]);
        let awaiting = atlas.awaiting(&set(&[1]));
        assert_eq!(awaiting, set(&[2, 3]));
    }

    #[test]
    fn quorum_tracker_reaches_quorum_as_peers_accumulate() {
        let atlas: Arc<dyn Atlas> = Arc::new(MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]));
        let mut tracker = QuorumTracker::new(atlas);
        assert!(!tracker.add(NodeId(1)));
        assert!(tracker.add(NodeId(2)));
    }

    #[test]
    fn quorum_tracker_clear_forgets_prior_phase() {
        let atlas: Arc<dyn Atlas> = Arc::new(MajorityAtlas::new([NodeId(1), NodeId(2), NodeId(3)]));
        let mut tracker = QuorumTracker::new(atlas);
        tracker.add(NodeId(1));
        tracker.add(NodeId(2));
        assert!(tracker.has_quorum());
        tracker.clear();
        assert!(!tracker.has_quorum());
        assert!(tracker.peers().is_empty());
    }
}
