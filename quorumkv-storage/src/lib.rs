//! Durable log and archive contracts for `quorumkv`.
//!
//! An Acceptor's state lives behind two small traits, `Log` and `Archive`;
//! this crate owns both the contracts and a reference implementation of
//! each (in-memory, for tests and the demo; `sled`-backed, for anything
//! that needs to survive a restart).

mod archive;
mod error;
mod log;

pub use archive::{Archive, InMemoryArchive, SledArchive};
pub use error::StorageError;
pub use log::{DecreeId, InMemoryLog, Log, LogRecord, SledLog};

use std::path::Path;

/// Opens a `sled` database at `data_dir` and returns durable `Log` and
/// `Archive` implementations sharing it, as distinct trees.
pub fn open_durable(data_dir: &Path) -> Result<(sled::Db, SledLog, SledArchive), StorageError> {
    let db = sled::open(data_dir)?;
    let log = SledLog::open(&db)?;
    let archive = SledArchive::open(&db)?;
    Ok((db, log, archive))
}
