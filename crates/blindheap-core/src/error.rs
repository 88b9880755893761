//! Error types for blindheap-core.

use thiserror::Error;

/// Result type for blindheap-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
///
/// A repair pass that finds the stale copy still present is not an error;
/// the writer retries it as ordinary control flow.
#[derive(Debug, Error)]
pub enum Error {
    /// The tag is outside the store's tag range.
    #[error("tag {tag} out of range for a store of {tag_count} tags")]
    TagOutOfRange { tag: u8, tag_count: usize },

    /// The substrate length cannot back a store.
    #[error("invalid tag count {0}: must be between 1 and 128")]
    InvalidTagCount(usize),

    /// Initial substrate contents do not hold every tag exactly once.
    #[error("inconsistent substrate contents: {missing} tags missing, {duplicated} duplicated")]
    InconsistentContents { missing: usize, duplicated: usize },

    /// An update is parked and must be resumed before another can start.
    #[error("update of tag {tag} is still in flight")]
    UpdateInFlight { tag: u8 },

    /// Resume was requested but no update is parked.
    #[error("no update in flight to resume")]
    NothingToResume,

    /// A sampling loop hit its configured budget. From `update` or `resume`
    /// this means the update is parked.
    #[error("scan budget exhausted after {samples} samples")]
    ScanBudgetExhausted { samples: u64 },

    /// The writer hit its configured number of repair attempts; the update
    /// is parked.
    #[error("update abandoned after {attempts} repair attempts")]
    AttemptsExhausted { attempts: u32 },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
