//! Bookkeeping for the interval in which the tag invariant is broken.
//!
//! Writing a cell to a random slot both duplicates the written tag (its old
//! copy may survive) and evicts whatever tag occupied the slot. While that is
//! unresolved the window records:
//!
//! - `duplicate`: the new cell; its bit-flipped twin is the stale copy
//! - `missing`: the cell the engine believes is absent and must re-seed
//!
//! The tag evicted by a write is unknown at the time of writing, so the
//! window opens with both fields set to the new cell and lets the repair
//! engine discover the real missing tag.
//!
//! A scan cut short by its read budget leaves its coverage progress here.
//! Any write to the substrate invalidates it.

use crate::cell::{Cell, Tag};
use crate::repair::CoverageScan;

/// Duplicate/missing state lent by the writer to the repair engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InconsistencyWindow {
    duplicate: Cell,
    missing: Cell,
    seeded: bool,
    progress: Option<CoverageScan>,
}

impl InconsistencyWindow {
    /// Open a window for writing `cell`.
    pub const fn open(cell: Cell) -> Self {
        Self {
            duplicate: cell,
            missing: cell,
            seeded: false,
            progress: None,
        }
    }

    /// The cell that should now exist, possibly alongside its stale copy.
    pub const fn duplicate(&self) -> Cell {
        self.duplicate
    }

    /// The copy of the duplicate tag that predates the update.
    pub const fn stale(&self) -> Cell {
        self.duplicate.flipped()
    }

    /// The cell the engine will (or did) re-seed.
    pub const fn missing(&self) -> Cell {
        self.missing
    }

    /// Whether the window is as opened: nothing deduced, nothing written.
    pub fn is_fresh(&self) -> bool {
        !self.seeded && self.missing == self.duplicate
    }

    /// Whether `missing` has already been written to the substrate.
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Coverage gathered by an interrupted scan since the last write.
    pub fn progress(&self) -> Option<&CoverageScan> {
        self.progress.as_ref()
    }

    /// Record that `missing` was written.
    pub(crate) fn mark_seeded(&mut self) {
        self.seeded = true;
        self.progress = None;
    }

    /// Replace the missing cell with a deduced one that still needs writing.
    pub(crate) fn set_missing(&mut self, cell: Cell) {
        self.missing = cell;
        self.seeded = false;
        self.progress = None;
    }

    /// Stash an interrupted scan.
    pub(crate) fn keep_progress(&mut self, scan: CoverageScan) {
        self.progress = Some(scan);
    }

    /// Take the interrupted scan back, if any.
    pub(crate) fn take_progress(&mut self) -> Option<CoverageScan> {
        self.progress.take()
    }

    /// Value the window already knows for `tag`, if any.
    ///
    /// The missing cell is consulted before the duplicate.
    pub fn known(&self, tag: Tag) -> Option<Cell> {
        if tag == self.missing.tag() {
            Some(self.missing)
        } else if tag == self.duplicate.tag() {
            Some(self.duplicate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(raw: u8) -> Cell {
        Cell::from_raw(raw)
    }

    #[test]
    fn opens_with_coinciding_roles() {
        let window = InconsistencyWindow::open(cell(67));
        assert_eq!(window.duplicate(), cell(67));
        assert_eq!(window.missing(), cell(67));
        assert_eq!(window.stale(), cell(66));
        assert!(!window.is_seeded());
        assert!(window.is_fresh());
    }

    #[test]
    fn deduction_resets_seeding() {
        let mut window = InconsistencyWindow::open(cell(67));
        window.mark_seeded();
        assert!(window.is_seeded());
        window.set_missing(cell(8));
        assert_eq!(window.missing(), cell(8));
        assert_eq!(window.duplicate(), cell(67));
        assert!(!window.is_seeded());
        assert!(!window.is_fresh());
    }

    #[test]
    fn writes_drop_scan_progress() {
        let mut window = InconsistencyWindow::open(cell(67));
        window.mark_seeded();
        window.keep_progress(CoverageScan::new(&window, true, 128));
        assert!(window.progress().is_some());

        window.set_missing(cell(8));
        assert!(window.progress().is_none());

        window.keep_progress(CoverageScan::new(&window, true, 128));
        window.mark_seeded();
        assert!(window.progress().is_none());
    }

    #[test]
    fn known_prefers_missing() {
        let mut window = InconsistencyWindow::open(cell(67));
        window.set_missing(cell(9));
        assert_eq!(window.known(cell(9).tag()), Some(cell(9)));
        assert_eq!(window.known(cell(67).tag()), Some(cell(67)));
        assert_eq!(window.known(cell(0).tag()), None);
    }
}
