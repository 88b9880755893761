//! The writer: updating a tag through a substrate that cannot be addressed.
//!
//! An update is one random write of the new cell followed by repair. The
//! store owns the checksum (XOR of every bit the substrate *should* hold) and
//! flips it once per logical update. A repair pass that ends with the stale
//! copy surviving leaves the substrate consistent but holding the old value,
//! so the store opens a fresh window for the same cell and tries again
//! without touching the checksum.
//!
//! Updates normally run to completion. When a configured budget runs out the
//! store parks the update at the stage it reached: before the redundancy
//! lookup finished, or mid-repair with its window (and any partial scan).
//! Reads keep answering from an open window and [`Store::resume`] finishes
//! the job.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::cell::{Cell, Tag};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::reader::{self, Lookup};
use crate::repair::{RepairEngine, RepairOutcome, RepairReport};
use crate::substrate::{check_tag_count, RandomHeap, Substrate};
use crate::window::InconsistencyWindow;

/// What an update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The tag already held the bit; nothing was written.
    Redundant,
    /// The bit was written and the invariant restored.
    Applied(UpdateReport),
}

impl UpdateOutcome {
    /// Report for an applied update.
    pub fn report(&self) -> Option<&UpdateReport> {
        match self {
            Self::Redundant => None,
            Self::Applied(report) => Some(report),
        }
    }
}

/// Cost of one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Windows opened for the target cell
    pub attempts: u32,
    /// Reads spent on the initial redundancy lookup
    pub lookup_samples: u64,
    /// Repair counters across all attempts
    pub repair: RepairReport,
}

impl UpdateReport {
    /// Substrate writes performed.
    pub fn writes(&self) -> u64 {
        u64::from(self.repair.passes)
    }

    /// Substrate reads performed.
    pub fn reads(&self) -> u64 {
        self.lookup_samples + self.repair.samples
    }
}

/// Where a parked update stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStage {
    /// The redundancy lookup ran out of reads. Nothing has been written and
    /// the checksum is untouched.
    Lookup,
    /// Repair ran out of budget with this window open.
    Repair(InconsistencyWindow),
}

/// An update that ran out of budget and is waiting to be resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Cell the update is establishing
    pub target: Cell,
    /// Progress as of the moment the budget ran out
    pub stage: PendingStage,
    /// Work done so far
    pub report: UpdateReport,
}

impl PendingUpdate {
    /// The open window, once the update has written to the substrate.
    pub fn window(&self) -> Option<&InconsistencyWindow> {
        match &self.stage {
            PendingStage::Lookup => None,
            PendingStage::Repair(window) => Some(window),
        }
    }
}

/// Tag/bit store over a uniform-random substrate.
#[derive(Debug)]
pub struct Store<S> {
    substrate: S,
    checksum: bool,
    engine: RepairEngine,
    max_scan_samples: Option<u64>,
    max_attempts: Option<u32>,
    pending: Option<PendingUpdate>,
}

impl Store<RandomHeap<StdRng>> {
    /// Zeroed in-memory store built from `config`.
    pub fn zeroed(config: &StoreConfig) -> Result<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let heap = RandomHeap::zeroed(config.tag_count, rng)?;
        Self::new(heap, false, config)
    }
}

impl<R: Rng> Store<RandomHeap<R>> {
    /// Store over an existing heap, taking its parity as the checksum.
    pub fn from_heap(heap: RandomHeap<R>, config: &StoreConfig) -> Result<Self> {
        let census = heap.tag_census();
        let missing = census.iter().filter(|&&n| n == 0).count();
        if missing > 0 {
            let duplicated = census.iter().filter(|&&n| n > 1).count();
            return Err(Error::InconsistentContents {
                missing,
                duplicated,
            });
        }
        let checksum = heap.parity();
        Self::new(heap, checksum, config)
    }
}

impl<S: Substrate> Store<S> {
    /// Store over `substrate`, whose contents must be consistent and whose
    /// bits XOR to `checksum`.
    ///
    /// Only the budgets are taken from `config`; the tag count is the
    /// substrate length.
    pub fn new(substrate: S, checksum: bool, config: &StoreConfig) -> Result<Self> {
        check_tag_count(substrate.len())?;
        Ok(Self {
            substrate,
            checksum,
            engine: RepairEngine::new(config.max_scan_samples),
            max_scan_samples: config.max_scan_samples,
            max_attempts: config.max_attempts,
            pending: None,
        })
    }

    /// Number of tags.
    pub fn tag_count(&self) -> usize {
        self.substrate.len()
    }

    /// XOR of every bit the substrate should hold.
    pub fn checksum(&self) -> bool {
        self.checksum
    }

    /// The parked update, if any.
    pub fn pending(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }

    /// The backing substrate.
    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Give back the substrate.
    pub fn into_substrate(self) -> S {
        self.substrate
    }

    /// Current bit for `tag`.
    pub fn resolve(&mut self, tag: u8) -> Result<bool> {
        self.lookup(tag).map(|found| found.cell.bit())
    }

    /// Current cell for `tag`, with the cost of finding it.
    pub fn lookup(&mut self, tag: u8) -> Result<Lookup> {
        let tag = Tag::within(tag, self.tag_count())?;
        let window = self.pending.as_ref().and_then(PendingUpdate::window);
        reader::resolve(&mut self.substrate, window, tag, self.max_scan_samples)
    }

    /// Set `tag` to `bit`.
    ///
    /// Returns once the substrate again holds every tag exactly once with
    /// `tag` carrying `bit`. A budget error means the update is parked and
    /// [`Store::resume`] will finish it.
    pub fn update(&mut self, tag: u8, bit: bool) -> Result<UpdateOutcome> {
        let tag = Tag::within(tag, self.tag_count())?;
        if let Some(pending) = &self.pending {
            return Err(Error::UpdateInFlight {
                tag: pending.target.tag().get(),
            });
        }

        self.begin(Cell::new(tag, bit), UpdateReport::default())
    }

    /// Finish a parked update with a fresh set of budgets.
    pub fn resume(&mut self) -> Result<UpdateOutcome> {
        let pending = self.pending.take().ok_or(Error::NothingToResume)?;
        debug!(cell = %pending.target, attempts = pending.report.attempts, "resuming parked update");
        match pending.stage {
            PendingStage::Lookup => self.begin(pending.target, pending.report),
            PendingStage::Repair(window) => self
                .drive(pending.target, window, pending.report)
                .map(UpdateOutcome::Applied),
        }
    }

    fn begin(&mut self, target: Cell, mut report: UpdateReport) -> Result<UpdateOutcome> {
        let current = match reader::resolve(
            &mut self.substrate,
            None,
            target.tag(),
            self.max_scan_samples,
        ) {
            Ok(found) => found,
            Err(Error::ScanBudgetExhausted { samples }) => {
                report.lookup_samples += samples;
                warn!(cell = %target, samples, "lookup budget exhausted, parking update");
                self.park(target, PendingStage::Lookup, report);
                return Err(Error::ScanBudgetExhausted { samples });
            }
            Err(err) => return Err(err),
        };
        report.lookup_samples += current.samples;

        if current.cell == target {
            debug!(cell = %target, "redundant update");
            return Ok(UpdateOutcome::Redundant);
        }

        // Same tag, different cell: exactly one intended bit changes.
        self.checksum = !self.checksum;

        self.drive(target, InconsistencyWindow::open(target), report)
            .map(UpdateOutcome::Applied)
    }

    fn drive(
        &mut self,
        target: Cell,
        mut window: InconsistencyWindow,
        mut report: UpdateReport,
    ) -> Result<UpdateReport> {
        let mut attempts_this_run = 0u32;
        loop {
            if window.is_fresh() {
                if self.max_attempts.is_some_and(|max| attempts_this_run >= max) {
                    warn!(cell = %target, attempts = report.attempts, "repair attempts exhausted, parking update");
                    self.park(target, PendingStage::Repair(window), report);
                    return Err(Error::AttemptsExhausted {
                        attempts: report.attempts,
                    });
                }
                report.attempts += 1;
                attempts_this_run += 1;
            }

            match self
                .engine
                .run(&mut self.substrate, &mut window, self.checksum, &mut report.repair)
            {
                Ok(RepairOutcome::Stored) => {
                    debug!(
                        cell = %target,
                        attempts = report.attempts,
                        passes = report.repair.passes,
                        deductions = report.repair.deductions,
                        samples = report.reads(),
                        "update applied"
                    );
                    return Ok(report);
                }
                Ok(RepairOutcome::StaleSurvived) => {
                    debug!(cell = %target, attempt = report.attempts, "stale copy survived, retrying");
                    window = InconsistencyWindow::open(target);
                }
                Err(err) => {
                    if matches!(err, Error::ScanBudgetExhausted { .. }) {
                        warn!(cell = %target, error = %err, "scan budget exhausted, parking update");
                        self.park(target, PendingStage::Repair(window), report);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn park(&mut self, target: Cell, stage: PendingStage, report: UpdateReport) {
        self.pending = Some(PendingUpdate {
            target,
            stage,
            report,
        });
    }
}
