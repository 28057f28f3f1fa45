use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// A chosen value for a key at a given time, as stored in the replicated log.
///
/// `time` is the decree's logical timestamp, not a wall-clock reading; it only
/// needs to be unique and monotonic per key on the node that assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub key: Bytes,
    pub time: u64,
    pub value: CellValue,
}

impl Cell {
    pub fn new(key: Bytes, time: u64, value: CellValue) -> Self {
        Self { key, time, value }
    }

    pub fn pos(&self) -> ScanPos {
        ScanPos { key: self.key.clone(), time: self.time }
    }

    /// Sort key for ascending-key, descending-time ordering: `Reverse(time)`
    /// makes larger timestamps compare smaller, so the most recent cell for a
    /// key sorts first among cells sharing that key.
    fn sort_key(&self) -> (Bytes, Reverse<u64>) {
        (self.key.clone(), Reverse(self.time))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cell {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// The chosen content for a cell: either live data or a tombstone marking deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellValue {
    Data(Bytes),
    Tombstone,
}

/// A cursor position in the key/time ordering, used to mark scan progress.
///
/// `None` in the director's `last` field means nothing has been consumed yet
/// and every cell is admissible; when present, `ScanPos` compares the same way
/// `Cell` does, so a cell dominates `last` exactly when it sorts after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPos {
    pub key: Bytes,
    pub time: u64,
}

impl ScanPos {
    pub fn new(key: Bytes, time: u64) -> Self {
        Self { key, time }
    }

    fn sort_key(&self) -> (Bytes, Reverse<u64>) {
        (self.key.clone(), Reverse(self.time))
    }

    /// True if `cell` is strictly past this position in scan order and should
    /// therefore be emitted.
    pub fn dominated_by(&self, cell: &Cell) -> bool {
        cell.sort_key() > self.sort_key()
    }
}

impl PartialOrd for ScanPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScanPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(key: &str, time: u64) -> Cell {
        Cell::new(Bytes::from(key.to_string()), time, CellValue::Data(Bytes::from_static(b"v")))
    }

    #[test]
    fn cells_order_ascending_by_key() {
        let mut cells = vec![cell("b", 1), cell("a", 1)];
        cells.sort();
        assert_eq!(cells[0].key, Bytes::from_static(b"a"));
        assert_eq!(cells[1].key, Bytes::from_static(b"b"));
    }

    #[test]
    fn cells_with_same_key_order_descending_by_time() {
        let mut cells = vec![cell("a", 1), cell("a", 5), cell("a", 3)];
        cells.sort();
        let times: Vec<u64> = cells.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![5, 3, 1]);
    }

    #[test]
    fn scan_pos_dominated_by_earlier_time_same_key() {
        // Scanning a key walks its versions newest-first; once `last` sits at
        // time 3, the next admissible version is an older one (time 2), not
        // a newer one (time 4) — that would already have been emitted first.
        let last = ScanPos::new(Bytes::from_static(b"a"), 3);
        assert!(!last.dominated_by(&cell("a", 4)));
        assert!(!last.dominated_by(&cell("a", 3)));
        assert!(last.dominated_by(&cell("a", 2)));
    }

    #[test]
    fn scan_pos_dominated_by_any_cell_of_a_later_key() {
        let last = ScanPos::new(Bytes::from_static(b"a"), 0);
        assert!(last.dominated_by(&cell("b", 0)));
    }
}
