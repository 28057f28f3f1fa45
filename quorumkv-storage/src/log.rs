use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use quorumkv_core::{wire, BallotNumber};

use crate::error::StorageError;

/// Identifies a single-decree Paxos instance: a key plus the transaction
/// clock that distinguishes successive decrees over the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecreeId {
    pub key: Bytes,
    pub time: u64,
}

impl DecreeId {
    pub fn new(key: Bytes, time: u64) -> Self {
        Self { key, time }
    }

    fn sled_key(&self) -> Vec<u8> {
        bincode::serialize(self).expect("DecreeId always encodes")
    }
}

/// A single durable write-ahead log entry for an Acceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    Open { default: Bytes },
    Promise { ballot: BallotNumber },
    Accept { ballot: BallotNumber, value: Bytes },
    Reaccept { ballot: BallotNumber },
    Close { chosen: Bytes, archive_generation: u64 },
}

impl LogRecord {
    /// The record's stable 32-bit id, from `quorumkv_core::wire`. This is
    /// what a `Log` frames the record by on disk — never `LogRecord`'s own
    /// declaration order, which is free to change without rewriting history.
    fn tag(&self) -> u32 {
        match self {
            LogRecord::Open { .. } => wire::LOG_OPEN,
            LogRecord::Promise { .. } => wire::LOG_PROMISE,
            LogRecord::Accept { .. } => wire::LOG_ACCEPT,
            LogRecord::Reaccept { .. } => wire::LOG_REACCEPT,
            LogRecord::Close { .. } => wire::LOG_CLOSE,
        }
    }
}

/// One framed record as it sits on disk: a stable tag plus its bincode body,
/// the same `tag` + `payload` shape `Envelope` uses on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordFrame {
    tag: u32,
    payload: Vec<u8>,
}

impl RecordFrame {
    fn encode(record: &LogRecord) -> Result<Self, StorageError> {
        Ok(Self { tag: record.tag(), payload: bincode::serialize(record)? })
    }

    fn decode(self) -> Result<LogRecord, StorageError> {
        let record: LogRecord = bincode::deserialize(&self.payload)?;
        if record.tag() != self.tag {
            return Err(StorageError::UnknownRecordTag(self.tag));
        }
        Ok(record)
    }
}

fn encode_records(records: &[LogRecord]) -> Result<Vec<u8>, StorageError> {
    let frames: Vec<RecordFrame> = records.iter().map(RecordFrame::encode).collect::<Result<_, _>>()?;
    Ok(bincode::serialize(&frames)?)
}

fn decode_records(bytes: &[u8]) -> Result<Vec<LogRecord>, StorageError> {
    let frames: Vec<RecordFrame> = bincode::deserialize(bytes)?;
    frames.into_iter().map(RecordFrame::decode).collect()
}

/// Append-only, per-decree write-ahead log.
///
/// An Acceptor only ever appends to its own decree's log and replays it once,
/// during `Restoring`. Implementations must make `append` durable before
/// returning: the Acceptor relies on this for the log-discipline invariant
/// (it never replies `promise`/`accept` ahead of the matching record).
#[async_trait]
pub trait Log: Send + Sync {
    async fn append(&self, decree: &DecreeId, record: LogRecord) -> Result<(), StorageError>;

    async fn replay(&self, decree: &DecreeId) -> Result<Vec<LogRecord>, StorageError>;
}

/// In-memory `Log`, for tests and the in-process demo. Not durable across
/// process restarts — use `SledLog` when that matters.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    records: DashMap<DecreeId, Arc<Mutex<Vec<LogRecord>>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Log for InMemoryLog {
    async fn append(&self, decree: &DecreeId, record: LogRecord) -> Result<(), StorageError> {
        let entry = self
            .records
            .entry(decree.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();
        entry.lock().await.push(record);
        Ok(())
    }

    async fn replay(&self, decree: &DecreeId) -> Result<Vec<LogRecord>, StorageError> {
        match self.records.get(decree) {
            Some(entry) => Ok(entry.lock().await.clone()),
            None => Ok(Vec::new()),
        }
    }
}

/// `sled`-backed durable log. Each decree's records live under a single key
/// in the `log` tree, re-encoded wholesale on every append; single-decree
/// logs stay small (at most five records), so this trades a little write
/// amplification for a trivially correct replay.
pub struct SledLog {
    tree: sled::Tree,
}

impl SledLog {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("log")?;
        Ok(Self { tree })
    }

    pub fn open_at(data_dir: &Path) -> Result<(sled::Db, Self), StorageError> {
        let db = sled::open(data_dir)?;
        let log = Self::open(&db)?;
        Ok((db, log))
    }
}

#[async_trait]
impl Log for SledLog {
    async fn append(&self, decree: &DecreeId, record: LogRecord) -> Result<(), StorageError> {
        let key = decree.sled_key();
        let mut records = match self.tree.get(&key)? {
            Some(bytes) => decode_records(&bytes)?,
            None => Vec::new(),
        };
        records.push(record);
        let encoded = encode_records(&records)?;
        self.tree.insert(key, encoded)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    async fn replay(&self, decree: &DecreeId) -> Result<Vec<LogRecord>, StorageError> {
        let key = decree.sled_key();
        match self.tree.get(&key)? {
            Some(bytes) => decode_records(&bytes),
            None => Ok(Vec::new()),
        }
    }
}
