//! The per-peer cursor the director's priority queue orders on, and the
//! single step of advancing one past the high-water mark.

use std::cmp::Ordering;
use std::collections::VecDeque;

use quorumkv_core::{Cell, NodeId, ScanPos};

/// One contributing peer's unread page: `cells.front()` is the smallest
/// unread cell from `from`, `next` is the deputy's continuation position if
/// more remains beyond this page.
///
/// Never constructed with an empty `cells` — `advance` and the director's
/// receipt handler both guard that invariant before pushing one onto the
/// heap.
#[derive(Debug)]
pub struct Element {
    pub cells: VecDeque<Cell>,
    pub next: Option<ScanPos>,
    pub from: NodeId,
}

impl Element {
    fn head(&self) -> &Cell {
        self.cells.front().expect("Element is never enqueued with an empty page")
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.head() == other.head()
    }
}
impl Eq for Element {}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Element {
    fn cmp(&self, other: &Self) -> Ordering {
        self.head().cmp(other.head())
    }
}

/// What to do with a peer after its current page has been consumed past the
/// high-water mark: pull more from the same page, ask the peer to continue
/// past its reported `next`, or mark it fully drained.
pub enum Continuation {
    Requeue(Element),
    Reissue { from: NodeId, after: ScanPos },
    Done(NodeId),
}

/// One step of the merge algorithm's inner loop: drop cells at or before
/// `last`, and report what happened once that search lands on an emittable
/// cell or runs out.
pub enum Advance {
    Emit { cell: Cell, continuation: Continuation },
    NoEmit { continuation: Continuation },
}

/// Consumes `element.cells` from the front until a cell strictly past `last`
/// surfaces (emitted) or the page is exhausted (no emission this step), then
/// decides what the peer owes next.
pub fn advance(mut element: Element, last: &ScanPos) -> Advance {
    while let Some(cell) = element.cells.pop_front() {
        if last.dominated_by(&cell) {
            let continuation = conclude(element);
            return Advance::Emit { cell, continuation };
        }
    }
    Advance::NoEmit { continuation: conclude(element) }
}

/// After consuming (and possibly emitting) from `element.cells`, decides
/// whether the peer has more to offer from this page, should be asked to
/// continue past its reported `next`, or is fully drained.
fn conclude(element: Element) -> Continuation {
    if !element.cells.is_empty() {
        return Continuation::Requeue(element);
    }
    match element.next {
        Some(after) => Continuation::Reissue { from: element.from, after },
        None => Continuation::Done(element.from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quorumkv_core::CellValue;

    fn cell(key: &str, time: u64) -> Cell {
        Cell::new(Bytes::from(key.to_string()), time, CellValue::Data(Bytes::from_static(b"v")))
    }

    fn element(cells: Vec<Cell>, next: Option<ScanPos>) -> Element {
        Element { cells: cells.into(), next, from: NodeId(1) }
    }

    #[test]
    fn advance_emits_the_first_cell_past_last() {
        let last = ScanPos::new(Bytes::from_static(b"a"), 0);
        let e = element(vec![cell("a", 5), cell("b", 1)], None);
        match advance(e, &last) {
            Advance::Emit { cell, continuation: Continuation::Requeue(rest) } => {
                assert_eq!(cell.time, 5);
                assert_eq!(rest.cells.len(), 1);
            }
            _ => panic!("expected an emission with a requeue"),
        }
    }

    #[test]
    fn advance_skips_cells_at_or_before_last() {
        // last already at (a, 5): the only cell in this page is stale.
        let last = ScanPos::new(Bytes::from_static(b"a"), 5);
        let e = element(vec![cell("a", 5)], Some(ScanPos::new(Bytes::from_static(b"a"), 4)));
        match advance(e, &last) {
            Advance::NoEmit { continuation: Continuation::Reissue { after, .. } } => {
                assert_eq!(after.time, 4);
            }
            _ => panic!("expected no emission with a reissue"),
        }
    }

    #[test]
    fn exhausted_page_with_no_continuation_is_done() {
        let last = ScanPos::new(Bytes::from_static(b"a"), 5);
        let e = element(vec![cell("a", 5)], None);
        match advance(e, &last) {
            Advance::NoEmit { continuation: Continuation::Done(from) } => assert_eq!(from, NodeId(1)),
            _ => panic!("expected Done"),
        }
    }
}
