use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::node::NodeId;

/// A Paxos ballot number: an ordinal plus the id of the proposer that owns it.
///
/// Ordinals alone don't give a total order across competing proposers, since
/// two proposers can pick the same ordinal independently. The proposer id
/// breaks the tie, so `BallotNumber` as a whole is totally ordered and no two
/// distinct proposers ever produce the same ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotNumber {
    pub ordinal: u64,
    pub proposer_id: NodeId,
}

impl BallotNumber {
    pub const fn new(ordinal: u64, proposer_id: NodeId) -> Self {
        Self { ordinal, proposer_id }
    }

    /// The smallest possible ballot, lower than any ballot a live proposer can hold.
    pub const fn bottom() -> Self {
        Self { ordinal: 0, proposer_id: NodeId(0) }
    }

    /// The next ballot this proposer can move to that outranks `floor`.
    pub fn successor_of(floor: &BallotNumber, proposer_id: NodeId) -> Self {
        Self { ordinal: floor.ordinal + 1, proposer_id }
    }
}

impl PartialOrd for BallotNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BallotNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ordinal
            .cmp(&other.ordinal)
            .then_with(|| self.proposer_id.cmp(&other.proposer_id))
    }
}

impl fmt::Display for BallotNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ordinal, self.proposer_id)
    }
}
