//! Stable tag constants shared across the workspace: envelope tags for
//! messages carried over `Cluster`, and record tags for the durable log
//! entries the storage crate frames to disk. Keeping both numbering schemes
//! here, rather than letting each crate pick its own, is what lets the
//! consensus, query, and storage crates agree without depending on each
//! other.

/// Messages addressed to an Acceptor.
pub const MSG_QUERY: u32 = 1;
pub const MSG_PROPOSE: u32 = 2;
pub const MSG_CHOOSE: u32 = 3;

/// Messages addressed to a Proposer.
pub const MSG_REFUSE: u32 = 10;
pub const MSG_PROMISE: u32 = 11;
pub const MSG_ACCEPT: u32 = 12;
pub const MSG_CHOSEN: u32 = 13;

/// Scan deputy RPC.
pub const MSG_SCAN_REQUEST: u32 = 20;
pub const MSG_SCAN_REPLY: u32 = 21;

/// Durable `Log` record kinds. These are the stable 32-bit ids a `Log`
/// implementation frames each record by, independent of how the in-memory
/// `LogRecord` enum happens to be declared — an implementation detail of
/// `quorumkv-storage` must never change what is already on disk.
pub const LOG_OPEN: u32 = 99;
pub const LOG_PROMISE: u32 = 100;
pub const LOG_ACCEPT: u32 = 101;
pub const LOG_REACCEPT: u32 = 102;
pub const LOG_CLOSE: u32 = 103;
