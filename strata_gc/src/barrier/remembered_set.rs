//! Remembered sets: recorded slots keyed by the page that holds them.
//!
//! Each page keeps one lazily created [`SlotSet`] per [`RememberedSetType`].
//! A slot is recorded on the page of its *host*, so collecting one region
//! only needs the slot sets of the pages that may point into it.
//!
//! | Set          | Recorded when                             | Consumed by        |
//! |--------------|-------------------------------------------|--------------------|
//! | `OldToNew`   | old host stores a young value             | scavenger roots    |
//! | `OldToOld`   | value on an evacuation candidate (marking)| pointer updating   |
//! | `OldToShared`| non-shared host stores a shared value     | shared-space GC    |

use super::slot_set::{SlotCallbackResult, SlotSet};
use crate::memory::{PageMetadata, PageRef};
use crate::objects::HeapObject;
use strata_core::Address;

/// Which remembered set a slot belongs to.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RememberedSetType {
    /// Old-generation slot pointing into the young generation.
    OldToNew = 0,
    /// Slot pointing into an evacuation candidate.
    OldToOld = 1,
    /// Slot pointing into writable shared space.
    OldToShared = 2,
}

impl RememberedSetType {
    /// Number of set types.
    pub const COUNT: usize = 3;

    /// All set types.
    pub const ALL: [RememberedSetType; Self::COUNT] = [
        RememberedSetType::OldToNew,
        RememberedSetType::OldToOld,
        RememberedSetType::OldToShared,
    ];

    /// Position in per-page arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Operations over the remembered sets of many pages.
pub struct RememberedSet;

impl RememberedSet {
    /// Record `slot`, which lies inside `host`.
    #[inline]
    pub fn insert(kind: RememberedSetType, host: HeapObject, slot: Address) {
        host.page().record_slot(kind, slot);
    }

    /// Check whether `slot` of `host` is recorded.
    #[inline]
    pub fn contains(kind: RememberedSetType, host: HeapObject, slot: Address) -> bool {
        host.page().contains_slot(kind, slot)
    }

    /// Visit every recorded slot of `kind` on `pages`, dropping the slots
    /// for which `callback` returns [`SlotCallbackResult::Remove`].
    ///
    /// Returns the number of slots kept.
    pub fn iterate<F>(kind: RememberedSetType, pages: &[PageRef], mut callback: F) -> usize
    where
        F: FnMut(Address) -> SlotCallbackResult,
    {
        pages
            .iter()
            .filter_map(|page| page.slot_set(kind).map(|set| (page, set)))
            .map(|(page, set)| set.iterate(page.base(), &mut callback))
            .sum()
    }

    /// Forget every slot of `kind` on `pages`.
    pub fn clear_all(kind: RememberedSetType, pages: &[PageRef]) {
        for page in pages {
            page.clear_slot_set(kind);
        }
    }

    /// Forget slots of every kind inside `[start, end)` on `page`.
    #[inline]
    pub fn remove_range(page: &PageMetadata, start: Address, end: Address) {
        page.remove_slot_range(start, end);
    }

    /// Recorded slots of `kind` on `pages`.
    pub fn count(kind: RememberedSetType, pages: &[PageRef]) -> usize {
        pages
            .iter()
            .filter_map(|page| page.slot_set(kind))
            .map(SlotSet::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::SpaceKind;
    use crate::memory::{ChunkFlags, MemoryAllocator};

    #[test]
    fn test_set_indices_are_dense() {
        for (position, kind) in RememberedSetType::ALL.iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn test_record_iterate_and_prune() {
        let memory = MemoryAllocator::new(usize::MAX, 0);
        let page = memory
            .allocate_page(SpaceKind::Old, ChunkFlags::empty(), 0)
            .unwrap();
        let host = HeapObject::from_address(page.area_start());
        let first = page.area_start().offset(8);
        let second = page.area_start().offset(64);

        RememberedSet::insert(RememberedSetType::OldToNew, host, first);
        RememberedSet::insert(RememberedSetType::OldToNew, host, second);
        RememberedSet::insert(RememberedSetType::OldToOld, host, first);
        assert!(RememberedSet::contains(
            RememberedSetType::OldToNew,
            host,
            second
        ));

        let pages = [page];
        let mut seen = Vec::new();
        let kept = RememberedSet::iterate(RememberedSetType::OldToNew, &pages, |slot| {
            seen.push(slot);
            if slot == first {
                SlotCallbackResult::Remove
            } else {
                SlotCallbackResult::Keep
            }
        });
        assert_eq!(kept, 1);
        assert_eq!(seen, vec![first, second]);
        assert_eq!(RememberedSet::count(RememberedSetType::OldToNew, &pages), 1);
        assert_eq!(RememberedSet::count(RememberedSetType::OldToOld, &pages), 1);

        RememberedSet::remove_range(&page, page.area_start(), page.area_start().offset(16));
        assert_eq!(RememberedSet::count(RememberedSetType::OldToOld, &pages), 0);

        RememberedSet::clear_all(RememberedSetType::OldToNew, &pages);
        assert_eq!(RememberedSet::count(RememberedSetType::OldToNew, &pages), 0);
    }
}
