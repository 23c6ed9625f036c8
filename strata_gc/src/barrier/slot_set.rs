//! Per-page slot sets.
//!
//! A slot set is a bitmap with one bit per word of its page. Bit `i` set means
//! the tagged slot at `page.base + i * 8` was recorded. Insertion is a single
//! atomic `fetch_or` with release ordering so a marker thread that acquires
//! the cell observes the store that produced the entry.

use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::{Address, WORD_SIZE};

const BITS_PER_CELL: usize = 64;

/// Verdict of a slot callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotCallbackResult {
    /// Keep the slot recorded.
    Keep,
    /// Drop the slot.
    Remove,
}

/// Recorded slot offsets of one page.
pub struct SlotSet {
    cells: Box<[AtomicU64]>,
}

impl SlotSet {
    /// Create an empty set covering a page of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        let words = page_size / WORD_SIZE;
        let cells = (0..words.div_ceil(BITS_PER_CELL))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { cells }
    }

    #[inline]
    fn split(offset: usize) -> (usize, u64) {
        debug_assert_eq!(offset % WORD_SIZE, 0, "unaligned slot offset {offset}");
        let word = offset / WORD_SIZE;
        (word / BITS_PER_CELL, 1u64 << (word % BITS_PER_CELL))
    }

    /// Record the slot at byte `offset` from the page base.
    #[inline]
    pub fn insert(&self, offset: usize) {
        let (cell, mask) = Self::split(offset);
        self.cells[cell].fetch_or(mask, Ordering::Release);
    }

    /// Check whether the slot at `offset` is recorded.
    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        let (cell, mask) = Self::split(offset);
        self.cells[cell].load(Ordering::Acquire) & mask != 0
    }

    /// Drop the slot at `offset`.
    #[inline]
    pub fn remove(&self, offset: usize) {
        let (cell, mask) = Self::split(offset);
        self.cells[cell].fetch_and(!mask, Ordering::AcqRel);
    }

    /// Drop every slot in `[start, end)` (byte offsets).
    pub fn remove_range(&self, start: usize, end: usize) {
        let first = start / WORD_SIZE;
        let last = (end / WORD_SIZE).min(self.cells.len() * BITS_PER_CELL);
        let mut word = first;
        while word < last {
            let cell = word / BITS_PER_CELL;
            let bit = word % BITS_PER_CELL;
            let span = (BITS_PER_CELL - bit).min(last - word);
            let mask = if span == BITS_PER_CELL {
                !0u64
            } else {
                ((1u64 << span) - 1) << bit
            };
            self.cells[cell].fetch_and(!mask, Ordering::AcqRel);
            word += span;
        }
    }

    /// Drop every slot.
    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Number of recorded slots.
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Check whether no slot is recorded.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|c| c.load(Ordering::Relaxed) == 0)
    }

    /// Visit every recorded slot as an absolute address.
    ///
    /// Slots for which `callback` returns [`SlotCallbackResult::Remove`] are
    /// dropped. Returns the number of slots kept.
    pub fn iterate<F>(&self, page_base: Address, mut callback: F) -> usize
    where
        F: FnMut(Address) -> SlotCallbackResult,
    {
        let mut kept = 0;
        for (index, cell) in self.cells.iter().enumerate() {
            let mut bits = cell.load(Ordering::Acquire);
            if bits == 0 {
                continue;
            }
            let mut removed = 0u64;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let offset = (index * BITS_PER_CELL + bit) * WORD_SIZE;
                match callback(page_base.offset(offset)) {
                    SlotCallbackResult::Keep => kept += 1,
                    SlotCallbackResult::Remove => removed |= 1u64 << bit,
                }
            }
            if removed != 0 {
                cell.fetch_and(!removed, Ordering::AcqRel);
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 64 * 1024;

    #[test]
    fn test_insert_contains_remove() {
        let set = SlotSet::new(PAGE);
        assert!(set.is_empty());

        set.insert(64);
        set.insert(64);
        set.insert(4096);
        assert_eq!(set.len(), 2);
        assert!(set.contains(64));
        assert!(!set.contains(72));

        set.remove(64);
        assert!(!set.contains(64));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_iterate_keeps_and_removes() {
        let set = SlotSet::new(PAGE);
        let base = Address::new(0x10_0000);
        for offset in [8, 16, 512, 8192] {
            set.insert(offset);
        }

        let mut seen = Vec::new();
        let kept = set.iterate(base, |slot| {
            seen.push(slot.offset_from(base));
            if slot.offset_from(base) < 100 {
                SlotCallbackResult::Remove
            } else {
                SlotCallbackResult::Keep
            }
        });

        assert_eq!(seen, vec![8, 16, 512, 8192]);
        assert_eq!(kept, 2);
        assert!(!set.contains(8));
        assert!(set.contains(512));
    }

    #[test]
    fn test_remove_range_spans_cells() {
        let set = SlotSet::new(PAGE);
        for word in 0..300 {
            set.insert(word * WORD_SIZE);
        }
        set.remove_range(10 * WORD_SIZE, 200 * WORD_SIZE);

        assert!(set.contains(9 * WORD_SIZE));
        assert!(!set.contains(10 * WORD_SIZE));
        assert!(!set.contains(199 * WORD_SIZE));
        assert!(set.contains(200 * WORD_SIZE));
        assert_eq!(set.len(), 300 - 190);
    }

    #[test]
    fn test_remove_range_past_end_is_clamped() {
        let set = SlotSet::new(PAGE);
        set.insert(PAGE - WORD_SIZE);
        set.remove_range(PAGE - 64, PAGE * 2);
        assert!(set.is_empty());
    }

    #[test]
    fn test_concurrent_inserts() {
        let set = SlotSet::new(PAGE);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let set = &set;
                scope.spawn(move || {
                    for i in 0..256 {
                        set.insert((i * 4 + t) * WORD_SIZE);
                    }
                });
            }
        });
        assert_eq!(set.len(), 1024);
    }
}
