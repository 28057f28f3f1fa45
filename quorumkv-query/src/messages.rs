//! Wire payloads for the scan deputy RPC (`quorumkv_core::wire::MSG_SCAN_REQUEST`
//! / `MSG_SCAN_REPLY`).
//!
//! A request carries its own reply port rather than relying on
//! `Envelope::port` at send time: the director opens the port, embeds its id
//! in the request body, and the deputy closes the loop with
//! `Cluster::reply(reply_port, ...)` once it has an answer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use quorumkv_core::{Cell, ScanPos};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequestMsg {
    pub key: Bytes,
    pub time: u64,
    pub window: usize,
    /// Resume point: cells at or before this position have already been
    /// seen by the director and should not be repeated.
    pub after: Option<ScanPos>,
    pub reply_port: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReplyMsg {
    pub cells: Vec<Cell>,
    /// Present iff the deputy's local range may hold more cells past
    /// `cells`'s last entry.
    pub next: Option<ScanPos>,
}
