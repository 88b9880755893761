//! Tags and cells: the only values the substrate can hold.
//!
//! A cell packs a tag and its data bit into one byte:
//!
//! ```text
//! cell = tag << 1 | bit
//! ```
//!
//! The tag occupies the upper seven bits, so every byte is a well-formed
//! cell and tags range over `0..128`.

use std::fmt;

use crate::error::{Error, Result};
use crate::TAG_COUNT;

/// A key in the store, `0..TAG_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tag(u8);

impl Tag {
    /// The lowest tag.
    pub const MIN: Self = Self(0);

    /// The highest tag the cell encoding can carry.
    pub const MAX: Self = Self((TAG_COUNT - 1) as u8);

    /// Create a tag, rejecting values the cell encoding cannot carry.
    pub fn new(tag: u8) -> Result<Self> {
        if usize::from(tag) < TAG_COUNT {
            Ok(Self(tag))
        } else {
            Err(Error::TagOutOfRange {
                tag,
                tag_count: TAG_COUNT,
            })
        }
    }

    /// Create a tag checked against a store holding `tag_count` tags.
    pub fn within(tag: u8, tag_count: usize) -> Result<Self> {
        if usize::from(tag) < tag_count.min(TAG_COUNT) {
            Ok(Self(tag))
        } else {
            Err(Error::TagOutOfRange { tag, tag_count })
        }
    }

    /// Tag at a substrate index already known to be below `TAG_COUNT`.
    pub(crate) const fn from_index(index: usize) -> Self {
        debug_assert!(index < TAG_COUNT);
        Self(index as u8)
    }

    /// Raw tag value.
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Tag value as an index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A `(tag, bit)` pair packed as `tag * 2 + bit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Cell(u8);

impl Cell {
    /// Pack a tag and bit.
    pub const fn new(tag: Tag, bit: bool) -> Self {
        Self((tag.0 << 1) | bit as u8)
    }

    /// Reinterpret a raw byte. Every byte is a valid cell.
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// The packed byte.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// The tag this cell stores a bit for.
    pub const fn tag(self) -> Tag {
        Tag(self.0 >> 1)
    }

    /// The data bit.
    pub const fn bit(self) -> bool {
        self.0 & 1 == 1
    }

    /// Same tag, opposite bit.
    ///
    /// During an update this maps the new cell to the stale copy it replaces.
    pub const fn flipped(self) -> Self {
        Self(self.0 ^ 1)
    }
}

impl From<u8> for Cell {
    fn from(raw: u8) -> Self {
        Self::from_raw(raw)
    }
}

impl From<Cell> for u8 {
    fn from(cell: Cell) -> Self {
        cell.0
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.tag(), u8::from(self.bit()))
    }
}
