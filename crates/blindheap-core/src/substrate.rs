//! The substrate: a fixed array of cells reachable only at random.
//!
//! # Access Model
//!
//! The store never addresses a cell. Every read returns a cell chosen
//! uniformly at random, and every write overwrites a cell chosen uniformly at
//! random, independently of all earlier accesses:
//!
//! ```text
//! sample_read()      -> cells[uniform(0..len)]
//! sample_write(cell) :  cells[uniform(0..len)] = cell
//! ```
//!
//! Uniformity and independence are a hard contract. The repair engine's
//! termination and its checksum deduction both rely on them; a biased
//! substrate can stall a scan forever or trip the closure checksum check.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::cell::{Cell, Tag};
use crate::error::{Error, Result};
use crate::TAG_COUNT;

/// Uniform-random cell storage.
pub trait Substrate {
    /// Number of cells. Equals the number of tags the store holds.
    fn len(&self) -> usize;

    /// Whether the substrate has no cells.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one uniformly random cell.
    fn sample_read(&mut self) -> Cell;

    /// Overwrite one uniformly random cell.
    fn sample_write(&mut self, cell: Cell);
}

/// Check that `tag_count` can back a store.
pub(crate) fn check_tag_count(tag_count: usize) -> Result<()> {
    if (1..=TAG_COUNT).contains(&tag_count) {
        Ok(())
    } else {
        Err(Error::InvalidTagCount(tag_count))
    }
}

/// In-memory substrate driven by an injectable RNG.
///
/// Besides the [`Substrate`] capability it exposes inspection helpers for
/// dumps and tests. The store itself never calls them.
#[derive(Debug, Clone)]
pub struct RandomHeap<R = StdRng> {
    cells: Vec<Cell>,
    rng: R,
    reads: u64,
    writes: u64,
}

impl RandomHeap<StdRng> {
    /// Zeroed heap with a deterministic RNG.
    pub fn seeded(tag_count: usize, seed: u64) -> Result<Self> {
        Self::zeroed(tag_count, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> RandomHeap<R> {
    /// Heap where cell `i` holds tag `i` with bit 0.
    pub fn zeroed(tag_count: usize, rng: R) -> Result<Self> {
        check_tag_count(tag_count)?;
        let cells = (0..tag_count)
            .map(|i| Cell::from_raw((i as u8) << 1))
            .collect();
        Ok(Self {
            cells,
            rng,
            reads: 0,
            writes: 0,
        })
    }

    /// Heap with explicit initial contents.
    ///
    /// The contents must hold every tag in `0..cells.len()` exactly once.
    pub fn from_cells(cells: Vec<Cell>, rng: R) -> Result<Self> {
        check_tag_count(cells.len())?;
        let heap = Self {
            cells,
            rng,
            reads: 0,
            writes: 0,
        };
        let census = heap.tag_census();
        let missing = census.iter().filter(|&&n| n == 0).count();
        let duplicated = census.iter().filter(|&&n| n > 1).count();
        if missing > 0 || duplicated > 0 {
            return Err(Error::InconsistentContents {
                missing,
                duplicated,
            });
        }
        Ok(heap)
    }
}

impl<R> RandomHeap<R> {
    /// Cells in slot order.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cells in ascending order, the form dumps print.
    pub fn sorted_cells(&self) -> Vec<Cell> {
        let mut cells = self.cells.clone();
        cells.sort_unstable();
        cells
    }

    /// Occurrences of each in-range tag.
    pub fn tag_census(&self) -> Vec<u32> {
        let mut census = vec![0u32; self.cells.len()];
        for cell in &self.cells {
            if let Some(n) = census.get_mut(cell.tag().index()) {
                *n += 1;
            }
        }
        census
    }

    /// Whether every tag appears exactly once.
    pub fn is_consistent(&self) -> bool {
        self.tag_census().iter().all(|&n| n == 1)
    }

    /// XOR of every stored bit.
    pub fn parity(&self) -> bool {
        self.cells.iter().fold(false, |acc, cell| acc ^ cell.bit())
    }

    /// Bit stored for `tag` by direct inspection, if exactly one copy exists.
    pub fn peek(&self, tag: Tag) -> Option<bool> {
        let mut found = self.cells.iter().filter(|c| c.tag() == tag);
        match (found.next(), found.next()) {
            (Some(cell), None) => Some(cell.bit()),
            _ => None,
        }
    }

    /// Total sampled reads so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Total sampled writes so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Point-in-time view for dumps.
    pub fn snapshot(&self) -> HeapSnapshot {
        HeapSnapshot {
            cells: self.sorted_cells(),
            consistent: self.is_consistent(),
            parity: self.parity(),
            reads: self.reads,
            writes: self.writes,
        }
    }
}

impl<R: Rng> Substrate for RandomHeap<R> {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn sample_read(&mut self) -> Cell {
        self.reads += 1;
        let slot = self.rng.gen_range(0..self.cells.len());
        self.cells[slot]
    }

    fn sample_write(&mut self, cell: Cell) {
        self.writes += 1;
        let slot = self.rng.gen_range(0..self.cells.len());
        self.cells[slot] = cell;
    }
}

/// Sorted heap contents plus summary flags.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapSnapshot {
    /// Cells in ascending order
    pub cells: Vec<Cell>,
    /// Every tag present exactly once
    pub consistent: bool,
    /// XOR of every stored bit
    pub parity: bool,
    /// Sampled reads so far
    pub reads: u64,
    /// Sampled writes so far
    pub writes: u64,
}

/// Substrate that replays a fixed read sequence and records writes.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedSubstrate {
    len: usize,
    reads: std::collections::VecDeque<Cell>,
    pub(crate) writes: Vec<Cell>,
}

#[cfg(test)]
impl ScriptedSubstrate {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            len,
            ..Self::default()
        }
    }

    /// Queue raw cells to be returned by upcoming reads.
    pub(crate) fn then_read(&mut self, raw: &[u8]) -> &mut Self {
        self.reads.extend(raw.iter().copied().map(Cell::from_raw));
        self
    }

    pub(crate) fn remaining_reads(&self) -> usize {
        self.reads.len()
    }
}

#[cfg(test)]
impl Substrate for ScriptedSubstrate {
    fn len(&self) -> usize {
        self.len
    }

    fn sample_read(&mut self) -> Cell {
        self.reads.pop_front().expect("read script exhausted")
    }

    fn sample_write(&mut self, cell: Cell) {
        self.writes.push(cell);
    }
}
