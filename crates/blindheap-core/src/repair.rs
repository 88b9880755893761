//! Checksum-assisted repair of the tag invariant.
//!
//! # Coverage Scan
//!
//! After a write the substrate holds one tag twice (new cell and stale copy)
//! and lacks one unknown tag. The engine re-establishes coverage by sampling
//! and confirming tags in order from both ends of the tag range:
//!
//! ```text
//! low ──▶                               ◀── high
//!  0  1  2  3  ...  [unconfirmed]  ...  125 126 127
//! ```
//!
//! A sample advances `low` only if it carries exactly the tag `low`, and
//! likewise for `high`. Once `high < low` every tag has been seen, so the
//! substrate (which no write touches during a scan) holds each tag once.
//!
//! # Deduction
//!
//! Every confirmed tag XORs its *intended* bit into `seen`: a sampled stale
//! copy contributes the new bit instead of its own. The store's checksum is
//! the XOR of every intended bit, so when a single tag remains unconfirmed
//! and both copies of the duplicate have been sampled, that tag cannot be in
//! the substrate and its bit is
//!
//! ```text
//! missing_bit = checksum ^ seen
//! ```
//!
//! The engine writes the deduced cell and scans again. Each pass moves the
//! hole to a random tag until a write lands on one of the duplicate's two
//! copies.
//!
//! # Outcome
//!
//! A closed scan that sampled the new cell and never the stale copy means the
//! update took. A closed scan that sampled the stale copy means the last
//! write landed on the new cell instead; the writer must try again.

use tracing::{debug, error, trace};

use crate::cell::{Cell, Tag};
use crate::error::{Error, Result};
use crate::substrate::Substrate;
use crate::window::InconsistencyWindow;

/// How a closed repair ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Coverage holds and the new cell is the surviving copy.
    Stored,
    /// Coverage holds but the stale copy survived.
    StaleSurvived,
}

/// Counters accumulated across repair passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Seed writes performed (one per pass)
    pub passes: u32,
    /// Substrate reads spent scanning
    pub samples: u64,
    /// Missing cells recovered from the checksum
    pub deductions: u32,
}

/// How a single scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Every tag confirmed.
    Covered {
        /// XOR of intended bits over all tags
        seen_checksum: bool,
        /// New cell sampled and stale copy never sampled
        stored: bool,
    },
    /// One tag left, proven absent; this is its intended cell.
    Deduced(Cell),
}

/// Two-pointer coverage tracker for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageScan {
    duplicate: Cell,
    stale: Cell,
    checksum: bool,
    low: usize,
    high: usize,
    seen_checksum: bool,
    saw_new: bool,
    saw_stale: bool,
}

impl CoverageScan {
    /// Start a scan over `tag_count` tags.
    pub fn new(window: &InconsistencyWindow, checksum: bool, tag_count: usize) -> Self {
        debug_assert!(tag_count > 0);
        Self {
            duplicate: window.duplicate(),
            stale: window.stale(),
            checksum,
            low: 0,
            high: tag_count - 1,
            seen_checksum: false,
            saw_new: false,
            saw_stale: false,
        }
    }

    /// Feed one sampled cell.
    pub fn observe(&mut self, cell: Cell) -> Option<ScanEnd> {
        let is_stale = cell == self.stale;
        self.saw_new |= cell == self.duplicate;
        self.saw_stale |= is_stale;

        let tag = cell.tag().index();
        if tag == self.low {
            self.low += 1;
            self.seen_checksum ^= cell.bit() ^ is_stale;
        } else if tag == self.high && self.high > self.low {
            self.high -= 1;
            self.seen_checksum ^= cell.bit() ^ is_stale;
        }

        if self.low > self.high {
            return Some(ScanEnd::Covered {
                seen_checksum: self.seen_checksum,
                stored: self.saw_new && !self.saw_stale,
            });
        }

        if self.low == self.high && self.saw_new && self.saw_stale {
            let missing_bit = self.checksum ^ self.seen_checksum;
            return Some(ScanEnd::Deduced(Cell::new(Tag::from_index(self.low), missing_bit)));
        }

        None
    }

    /// Tags not yet confirmed.
    pub fn unconfirmed(&self) -> usize {
        (self.high + 1).saturating_sub(self.low)
    }
}

/// Drives coverage scans until the window closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairEngine {
    max_scan_samples: Option<u64>,
}

impl RepairEngine {
    /// Engine with an optional per-scan read budget.
    pub const fn new(max_scan_samples: Option<u64>) -> Self {
        Self { max_scan_samples }
    }

    /// Repair the substrate described by `window`.
    ///
    /// Writes `window.missing()` unless it was already written, then scans.
    /// Deductions update the window and loop back to the write. On budget
    /// exhaustion the window keeps the seed flag and the scan's progress, so
    /// calling `run` again picks the scan up where it stopped. Nothing may
    /// write to the substrate in between.
    ///
    /// # Panics
    ///
    /// If a closed scan's checksum disagrees with `checksum`. That only
    /// happens when the substrate violates its sampling contract or the
    /// caller's checksum is wrong; neither is recoverable.
    pub fn run<S: Substrate + ?Sized>(
        &self,
        substrate: &mut S,
        window: &mut InconsistencyWindow,
        checksum: bool,
        report: &mut RepairReport,
    ) -> Result<RepairOutcome> {
        loop {
            if !window.is_seeded() {
                substrate.sample_write(window.missing());
                window.mark_seeded();
                report.passes += 1;
                trace!(missing = %window.missing(), duplicate = %window.duplicate(), "seeded repair pass");
            }

            match self.scan(substrate, window, checksum, report)? {
                ScanEnd::Covered {
                    seen_checksum,
                    stored,
                } => {
                    if seen_checksum != checksum {
                        error!(
                            seen_checksum,
                            checksum,
                            duplicate = %window.duplicate(),
                            "checksum mismatch at coverage closure"
                        );
                        panic!(
                            "checksum mismatch at coverage closure: seen {seen_checksum}, expected {checksum}"
                        );
                    }
                    return Ok(if stored {
                        RepairOutcome::Stored
                    } else {
                        RepairOutcome::StaleSurvived
                    });
                }
                ScanEnd::Deduced(cell) => {
                    report.deductions += 1;
                    debug!(missing = %cell, "deduced missing cell from checksum");
                    window.set_missing(cell);
                }
            }
        }
    }

    fn scan<S: Substrate + ?Sized>(
        &self,
        substrate: &mut S,
        window: &mut InconsistencyWindow,
        checksum: bool,
        report: &mut RepairReport,
    ) -> Result<ScanEnd> {
        let mut scan = match window.take_progress() {
            Some(scan) => scan,
            None => CoverageScan::new(window, checksum, substrate.len()),
        };
        let mut samples = 0u64;
        loop {
            if self.max_scan_samples.is_some_and(|max| samples >= max) {
                trace!(unconfirmed = scan.unconfirmed(), samples, "scan budget exhausted");
                window.keep_progress(scan);
                return Err(Error::ScanBudgetExhausted { samples });
            }
            let cell = substrate.sample_read();
            samples += 1;
            report.samples += 1;
            if let Some(end) = scan.observe(cell) {
                return Ok(end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{RandomHeap, ScriptedSubstrate};

    fn cell(raw: u8) -> Cell {
        Cell::from_raw(raw)
    }

    // Four tags, all zero, then tag 1 updated to 1 (cell 3, stale 2).
    fn tag1_window() -> InconsistencyWindow {
        InconsistencyWindow::open(cell(3))
    }

    #[test]
    fn single_tag_covers_immediately() {
        let window = InconsistencyWindow::open(cell(1));
        let mut scan = CoverageScan::new(&window, true, 1);
        assert_eq!(
            scan.observe(cell(1)),
            Some(ScanEnd::Covered {
                seen_checksum: true,
                stored: true
            })
        );
    }

    #[test]
    fn pointers_only_advance_on_exact_tags() {
        let window = tag1_window();
        let mut scan = CoverageScan::new(&window, true, 4);
        assert_eq!(scan.unconfirmed(), 4);
        assert_eq!(scan.observe(cell(4)), None); // tag 2 is neither end
        assert_eq!(scan.unconfirmed(), 4);
        assert_eq!(scan.observe(cell(6)), None); // tag 3 is high
        assert_eq!(scan.unconfirmed(), 3);
        assert_eq!(scan.observe(cell(0)), None); // tag 0 is low
        assert_eq!(scan.unconfirmed(), 2);
    }

    #[test]
    fn stale_copy_contributes_new_bit() {
        let window = tag1_window();
        let mut scan = CoverageScan::new(&window, true, 4);
        for raw in [0, 2, 4] {
            assert_eq!(scan.observe(cell(raw)), None);
        }
        assert_eq!(
            scan.observe(cell(6)),
            Some(ScanEnd::Covered {
                seen_checksum: true,
                stored: false
            })
        );
    }

    #[test]
    fn deduces_absent_tag() {
        let window = tag1_window();
        let mut scan = CoverageScan::new(&window, true, 4);
        for raw in [0, 3, 6] {
            assert_eq!(scan.observe(cell(raw)), None);
        }
        // Both copies of tag 1 seen, only tag 2 left: it must be gone.
        assert_eq!(scan.observe(cell(2)), Some(ScanEnd::Deduced(cell(4))));
    }

    #[test]
    fn deduction_then_store() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 3, 6, 2]).then_read(&[0, 3, 4, 6]);
        let mut window = tag1_window();
        let mut report = RepairReport::default();

        let outcome = RepairEngine::default()
            .run(&mut sub, &mut window, true, &mut report)
            .unwrap();

        assert_eq!(outcome, RepairOutcome::Stored);
        assert_eq!(sub.writes, vec![cell(3), cell(4)]);
        assert_eq!(
            report,
            RepairReport {
                passes: 2,
                samples: 8,
                deductions: 1
            }
        );
        assert_eq!(sub.remaining_reads(), 0);
    }

    #[test]
    fn stale_survivor_reported() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 2, 4, 6]);
        let mut window = tag1_window();
        let mut report = RepairReport::default();

        let outcome = RepairEngine::default()
            .run(&mut sub, &mut window, true, &mut report)
            .unwrap();

        assert_eq!(outcome, RepairOutcome::StaleSurvived);
        assert_eq!(sub.writes, vec![cell(3)]);
    }

    #[test]
    #[should_panic(expected = "checksum mismatch")]
    fn wrong_checksum_is_fatal() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 3, 4, 6]);
        let mut window = tag1_window();
        let mut report = RepairReport::default();
        let _ = RepairEngine::default().run(&mut sub, &mut window, false, &mut report);
    }

    #[test]
    fn budget_exhaustion_keeps_seed() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 3, 6, 0]);
        let mut window = tag1_window();
        let mut report = RepairReport::default();
        let engine = RepairEngine::new(Some(4));

        let err = engine.run(&mut sub, &mut window, true, &mut report).unwrap_err();
        assert!(matches!(err, Error::ScanBudgetExhausted { samples: 4 }));
        assert!(window.is_seeded());
        assert_eq!(sub.writes.len(), 1);
        // Tags 0, 1 and 3 confirmed, only tag 2 left.
        assert_eq!(window.progress().map(CoverageScan::unconfirmed), Some(1));

        // The stale copy of tag 1 completes the interrupted scan's deduction.
        sub.then_read(&[2]).then_read(&[0, 3, 4, 6]);
        let outcome = engine.run(&mut sub, &mut window, true, &mut report).unwrap();
        assert_eq!(outcome, RepairOutcome::Stored);
        assert_eq!(sub.writes, vec![cell(3), cell(4)]);
        assert_eq!(report.deductions, 1);
        assert_eq!(report.samples, 9);
        assert_eq!(sub.remaining_reads(), 0);
    }

    #[test]
    fn scan_spans_many_small_budgets() {
        let mut heap = RandomHeap::seeded(128, 23).unwrap();
        let target = Cell::new(Tag::new(40).unwrap(), true);
        // A full 128-tag scan needs thousands of reads; allow 500 per call.
        let engine = RepairEngine::new(Some(500));
        let mut report = RepairReport::default();
        let mut window = InconsistencyWindow::open(target);
        let mut interruptions = 0u32;

        let outcome = loop {
            match engine.run(&mut heap, &mut window, true, &mut report) {
                Ok(outcome) => break outcome,
                Err(Error::ScanBudgetExhausted { samples: 500 }) => {
                    interruptions += 1;
                    assert!(window.progress().is_some());
                    assert!(interruptions < 1_000_000, "scan never closed");
                }
                Err(err) => panic!("unexpected error: {err}"),
            }
        };

        assert!(interruptions > 0);
        assert!(heap.is_consistent());
        assert_eq!(heap.writes(), u64::from(report.passes));
        assert_eq!(
            heap.peek(target.tag()),
            Some(outcome == RepairOutcome::Stored)
        );
    }

    #[test]
    fn random_heap_repairs_to_consistency() {
        let mut heap = RandomHeap::seeded(32, 11).unwrap();
        let target = Cell::new(Tag::new(5).unwrap(), true);
        let engine = RepairEngine::default();
        let mut report = RepairReport::default();

        // Zeroed heap: flipping tag 5 makes the intended parity odd.
        let checksum = true;
        loop {
            let mut window = InconsistencyWindow::open(target);
            if engine.run(&mut heap, &mut window, checksum, &mut report).unwrap()
                == RepairOutcome::Stored
            {
                break;
            }
            assert!(heap.is_consistent());
            assert_eq!(heap.peek(target.tag()), Some(false));
        }

        assert!(heap.is_consistent());
        assert_eq!(heap.peek(target.tag()), Some(true));
        assert_eq!(heap.parity(), checksum);
        assert_eq!(heap.writes(), u64::from(report.passes));
    }
}
