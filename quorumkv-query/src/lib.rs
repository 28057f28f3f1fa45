//! The ScanDirector for `quorumkv`: a quorum-aware k-way merge of ordered
//! cells drawn from remote scan deputies.
//!
//! [`director`] owns the merge fiber a caller drives via [`ScanStream`];
//! [`deputy`] is the server side answering another node's scan RPCs against
//! a local `Archive`; [`element`] is the per-peer cursor the merge's
//! priority queue orders on.

pub mod config;
pub mod deputy;
pub mod director;
pub mod element;
pub mod error;
pub mod messages;

pub use config::ScanConfig;
pub use deputy::ScanDeputy;
pub use director::{open_scan, ScanBatch, ScanParams, ScanStream};
pub use error::ScanError;
