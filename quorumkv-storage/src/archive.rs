use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quorumkv_core::{Cell, CellValue, ScanPos};

use crate::error::StorageError;

/// Terminal key → chosen-value store.
///
/// Holds one chosen cell per `(key, time)` pair — the versioned history a
/// scan walks — plus a monotonic generation counter, bumped on every `put`
/// and recorded in the Acceptor's `close` log entry.
#[async_trait]
pub trait Archive: Send + Sync {
    async fn get(&self, key: &Bytes, time: u64) -> Result<Option<CellValue>, StorageError>;

    /// Commits a chosen value, returning the archive generation it landed at.
    async fn put(&self, key: &Bytes, time: u64, value: CellValue) -> Result<u64, StorageError>;

    /// Cells strictly past `after` (in `Cell` order), up to `limit` entries,
    /// used to answer a deputy scan RPC.
    async fn scan_from(&self, after: Option<&ScanPos>, limit: usize) -> Result<Vec<Cell>, StorageError>;
}

#[derive(Clone, Serialize, Deserialize)]
struct Entry {
    value: CellValue,
}

/// In-memory `Archive`, for tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryArchive {
    cells: DashMap<(Bytes, u64), CellValue>,
    generation: AtomicU64,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Archive for InMemoryArchive {
    async fn get(&self, key: &Bytes, time: u64) -> Result<Option<CellValue>, StorageError> {
        Ok(self.cells.get(&(key.clone(), time)).map(|e| e.clone()))
    }

    async fn put(&self, key: &Bytes, time: u64, value: CellValue) -> Result<u64, StorageError> {
        self.cells.insert((key.clone(), time), value);
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn scan_from(&self, after: Option<&ScanPos>, limit: usize) -> Result<Vec<Cell>, StorageError> {
        let mut cells: Vec<Cell> = self
            .cells
            .iter()
            .map(|entry| {
                let (key, time) = entry.key().clone();
                Cell::new(key, time, entry.value().clone())
            })
            .filter(|cell| after.map(|pos| pos.dominated_by(cell)).unwrap_or(true))
            .collect();
        cells.sort();
        cells.truncate(limit);
        Ok(cells)
    }
}

/// `sled`-backed `Archive`, sharing the embedded database a `SledLog`
/// opened on the same node (distinct tree, so the two never collide).
pub struct SledArchive {
    tree: sled::Tree,
    generation: Arc<AtomicU64>,
}

impl SledArchive {
    pub fn open(db: &sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree("archive")?;
        let generation = tree
            .iter()
            .values()
            .filter_map(|v| v.ok())
            .count() as u64;
        Ok(Self { tree, generation: Arc::new(AtomicU64::new(generation)) })
    }

    fn sled_key(key: &Bytes, time: u64) -> Vec<u8> {
        bincode::serialize(&(key.as_ref(), time)).expect("archive key always encodes")
    }
}

#[async_trait]
impl Archive for SledArchive {
    async fn get(&self, key: &Bytes, time: u64) -> Result<Option<CellValue>, StorageError> {
        match self.tree.get(Self::sled_key(key, time))? {
            Some(bytes) => {
                let entry: Entry = bincode::deserialize(&bytes)?;
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &Bytes, time: u64, value: CellValue) -> Result<u64, StorageError> {
        let encoded = bincode::serialize(&Entry { value })?;
        self.tree.insert(Self::sled_key(key, time), encoded)?;
        self.tree.flush_async().await?;
        Ok(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn scan_from(&self, after: Option<&ScanPos>, limit: usize) -> Result<Vec<Cell>, StorageError> {
        let mut cells = Vec::new();
        for entry in self.tree.iter() {
            let (raw_key, raw_value) = entry?;
            let (key_bytes, time): (Vec<u8>, u64) = bincode::deserialize(&raw_key)?;
            let decoded: Entry = bincode::deserialize(&raw_value)?;
            let cell = Cell::new(Bytes::from(key_bytes), time, decoded.value);
            if after.map(|pos| pos.dominated_by(&cell)).unwrap_or(true) {
                cells.push(cell);
            }
        }
        cells.sort();
        cells.truncate(limit);
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let archive = InMemoryArchive::new();
        let key = Bytes::from_static(b"k1");
        archive.put(&key, 1, CellValue::Data(Bytes::from_static(b"v"))).await.unwrap();
        let got = archive.get(&key, 1).await.unwrap();
        assert_eq!(got, Some(CellValue::Data(Bytes::from_static(b"v"))));
    }

    #[tokio::test]
    async fn generation_is_monotonic() {
        let archive = InMemoryArchive::new();
        let key = Bytes::from_static(b"k1");
        let g1 = archive.put(&key, 1, CellValue::Tombstone).await.unwrap();
        let g2 = archive.put(&key, 2, CellValue::Tombstone).await.unwrap();
        assert!(g2 > g1);
    }

    #[tokio::test]
    async fn scan_from_respects_dominance_and_order() {
        let archive = InMemoryArchive::new();
        let k1 = Bytes::from_static(b"k1");
        let k2 = Bytes::from_static(b"k2");
        archive.put(&k1, 1, CellValue::Data(Bytes::from_static(b"a"))).await.unwrap();
        archive.put(&k1, 2, CellValue::Data(Bytes::from_static(b"b"))).await.unwrap();
        archive.put(&k2, 1, CellValue::Data(Bytes::from_static(b"c"))).await.unwrap();

        let last = ScanPos::new(k1.clone(), 1);
        let cells = archive.scan_from(Some(&last), 10).await.unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].key, k1);
        assert_eq!(cells[0].time, 2);
        assert_eq!(cells[1].key, k2);
    }

    #[tokio::test]
    async fn sled_archive_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = Bytes::from_static(b"k1");
        {
            let db = sled::open(dir.path()).unwrap();
            let archive = SledArchive::open(&db).unwrap();
            archive.put(&key, 1, CellValue::Data(Bytes::from_static(b"v"))).await.unwrap();
        }
        let db = sled::open(dir.path()).unwrap();
        let archive = SledArchive::open(&db).unwrap();
        let got = archive.get(&key, 1).await.unwrap();
        assert_eq!(got, Some(CellValue::Data(Bytes::from_static(b"v"))));
    }
}
