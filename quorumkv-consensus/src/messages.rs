//! Wire payloads exchanged between Proposers and Acceptors.
//!
//! Each struct mirrors one of the message kinds in `quorumkv_core::wire`.
//! The sender's `NodeId` travels as `Envelope::from`, not as a payload
//! field, so these carry only what the tag doesn't already imply.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use quorumkv_core::NodeId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMsg {
    pub key: Bytes,
    pub time: u64,
    pub ballot_ordinal: u64,
    pub default: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeMsg {
    pub key: Bytes,
    pub time: u64,
    pub ballot_ordinal: u64,
    pub value: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooseMsg {
    pub key: Bytes,
    pub time: u64,
    pub value: Bytes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefuseMsg {
    pub key: Bytes,
    pub time: u64,
    pub ballot_ordinal: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromiseMsg {
    pub key: Bytes,
    pub time: u64,
    pub ballot_ordinal: u64,
    /// The acceptor's previously-accepted proposal, if any: `(ballot-ordinal,
    /// proposer-id, value)`, reassembled into a `BallotNumber` on receipt.
    pub proposal: Option<(u64, NodeId, Bytes)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptMsg {
    pub key: Bytes,
    pub time: u64,
    pub ballot_ordinal: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenMsg {
    pub key: Bytes,
    pub time: u64,
    pub value: Bytes,
}
