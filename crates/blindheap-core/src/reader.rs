//! Resolving a tag's bit by sampling.

use crate::cell::{Cell, Tag};
use crate::error::{Error, Result};
use crate::substrate::Substrate;
use crate::window::InconsistencyWindow;

/// Result of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    /// The cell found for the tag
    pub cell: Cell,
    /// Substrate reads spent
    pub samples: u64,
    /// Answered from window bookkeeping without sampling
    pub from_window: bool,
}

/// Find the cell currently holding `tag`.
///
/// While a window is open, tags it already knows are answered from the
/// window. Their cells may be absent from the substrate, so sampling for them
/// could never terminate. Every other tag is found by sampling until a cell
/// with that tag turns up, which takes `len` reads on average.
///
/// `budget` caps the number of reads; `None` samples until found.
pub fn resolve<S: Substrate + ?Sized>(
    substrate: &mut S,
    window: Option<&InconsistencyWindow>,
    tag: Tag,
    budget: Option<u64>,
) -> Result<Lookup> {
    if let Some(cell) = window.and_then(|w| w.known(tag)) {
        return Ok(Lookup {
            cell,
            samples: 0,
            from_window: true,
        });
    }

    let mut samples = 0u64;
    loop {
        if budget.is_some_and(|max| samples >= max) {
            return Err(Error::ScanBudgetExhausted { samples });
        }
        let cell = substrate.sample_read();
        samples += 1;
        if cell.tag() == tag {
            return Ok(Lookup {
                cell,
                samples,
                from_window: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substrate::{RandomHeap, ScriptedSubstrate};

    fn tag(t: u8) -> Tag {
        Tag::new(t).unwrap()
    }

    #[test]
    fn skips_other_tags() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 6, 4, 3, 2]);
        let found = resolve(&mut sub, None, tag(1), None).unwrap();
        assert_eq!(found.cell, Cell::from_raw(3));
        assert_eq!(found.samples, 4);
        assert!(!found.from_window);
        assert_eq!(sub.remaining_reads(), 1);
    }

    #[test]
    fn window_answers_without_sampling() {
        let mut sub = ScriptedSubstrate::new(4);
        let window = InconsistencyWindow::open(Cell::from_raw(3));
        let found = resolve(&mut sub, Some(&window), tag(1), None).unwrap();
        assert_eq!(found.cell, Cell::from_raw(3));
        assert_eq!(found.samples, 0);
        assert!(found.from_window);
    }

    #[test]
    fn window_ignored_for_unrelated_tags() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[4]);
        let window = InconsistencyWindow::open(Cell::from_raw(3));
        let found = resolve(&mut sub, Some(&window), tag(2), None).unwrap();
        assert_eq!(found.cell, Cell::from_raw(4));
        assert!(!found.from_window);
    }

    #[test]
    fn budget_stops_sampling() {
        let mut sub = ScriptedSubstrate::new(4);
        sub.then_read(&[0, 0, 0]);
        assert!(matches!(
            resolve(&mut sub, None, tag(3), Some(3)),
            Err(Error::ScanBudgetExhausted { samples: 3 })
        ));
    }

    #[test]
    fn finds_every_tag_in_zeroed_heap() {
        let mut heap = RandomHeap::seeded(128, 9).unwrap();
        for t in 0..128u8 {
            let found = resolve(&mut heap, None, tag(t), None).unwrap();
            assert_eq!(found.cell.tag(), tag(t));
            assert!(!found.cell.bit());
        }
    }
}
