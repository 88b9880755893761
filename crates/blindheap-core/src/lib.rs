//! Blindheap Core
//!
//! A tag/bit associative store over a substrate with no addressable access.
//!
//! # Access Model
//!
//! The substrate is a fixed array of cells, one per tag, and offers exactly
//! two operations: read a uniformly random cell, and overwrite a uniformly
//! random cell. There is no indexing, no iteration and no delete. Each cell
//! packs a tag and its bit (`tag * 2 + bit`).
//!
//! # Invariant
//!
//! Between updates the substrate holds every tag exactly once, so it encodes
//! a total function from tag to bit:
//!
//! ```text
//! multiset(tags) == {0, 1, …, TAG_COUNT - 1}
//! ```
//!
//! # Update and Repair
//!
//! Writing the new cell to a random slot breaks the invariant: the updated
//! tag is (usually) duplicated and some unknown tag is evicted. The repair
//! engine samples until it has confirmed every tag from both ends of the tag
//! range, deducing an evicted tag's bit from a running XOR checksum when a
//! single tag remains unconfirmed. See [`repair`] for the algebra.
//!
//! Correctness and termination rely on the substrate sampling uniformly and
//! independently. That is a hard contract on every [`Substrate`].
//!
//! # Example
//!
//! ```
//! use blindheap_core::{Store, StoreConfig, UpdateOutcome};
//!
//! let config = StoreConfig::default().with_tag_count(16).with_seed(7);
//! let mut store = Store::zeroed(&config)?;
//!
//! assert!(!store.resolve(3)?);
//! store.update(3, true)?;
//! assert!(store.resolve(3)?);
//! assert_eq!(store.update(3, true)?, UpdateOutcome::Redundant);
//! # Ok::<(), blindheap_core::Error>(())
//! ```

mod cell;
mod config;
mod error;
pub mod reader;
pub mod repair;
mod store;
mod substrate;
mod window;

pub use cell::{Cell, Tag};
pub use config::{StoreConfig, ENV_MAX_ATTEMPTS, ENV_MAX_SCAN_SAMPLES, ENV_SEED, ENV_TAG_COUNT};
pub use error::{Error, Result};
pub use reader::Lookup;
pub use repair::{CoverageScan, RepairEngine, RepairOutcome, RepairReport, ScanEnd};
pub use store::{PendingStage, PendingUpdate, Store, UpdateOutcome, UpdateReport};
pub use substrate::{HeapSnapshot, RandomHeap, Substrate};
pub use window::InconsistencyWindow;

/// Number of distinct tags the cell encoding can carry.
pub const TAG_COUNT: usize = 128;

/// Values a cell byte can take: one per `(tag, bit)` pair.
pub const CELL_VALUES: usize = TAG_COUNT * 2;

// Compile-time assertion that a cell fits in a byte
const _: () = assert!(CELL_VALUES == u8::MAX as usize + 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_encoding_fills_a_byte() {
        assert_eq!(CELL_VALUES, 256);
        assert_eq!(Tag::MAX.index() + 1, TAG_COUNT);
    }
}
