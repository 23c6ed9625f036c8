//! Side marking bitmap: one bit per heap word.
//!
//! Kept out of the objects so marking never writes to object memory and
//! marker threads race only on atomic `fetch_or`.

use std::sync::atomic::{AtomicU64, Ordering};

const BITS_PER_CELL: usize = 64;

/// Atomic bitmap indexed by word offset within a chunk.
pub struct MarkingBitmap {
    cells: Box<[AtomicU64]>,
}

impl MarkingBitmap {
    /// Create a cleared bitmap covering `bits` words.
    pub fn new(bits: usize) -> Self {
        let cells = (0..bits.div_ceil(BITS_PER_CELL))
            .map(|_| AtomicU64::new(0))
            .collect();
        Self { cells }
    }

    /// Number of bits covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len() * BITS_PER_CELL
    }

    /// Check whether the bitmap covers no bits.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Set a bit. Returns true if this call changed it.
    #[inline]
    pub fn set(&self, index: usize) -> bool {
        let mask = 1u64 << (index % BITS_PER_CELL);
        let previous = self.cells[index / BITS_PER_CELL].fetch_or(mask, Ordering::AcqRel);
        previous & mask == 0
    }

    /// Test a bit.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        let mask = 1u64 << (index % BITS_PER_CELL);
        self.cells[index / BITS_PER_CELL].load(Ordering::Acquire) & mask != 0
    }

    /// Clear a bit.
    #[inline]
    pub fn unset(&self, index: usize) {
        let mask = 1u64 << (index % BITS_PER_CELL);
        self.cells[index / BITS_PER_CELL].fetch_and(!mask, Ordering::AcqRel);
    }

    /// Clear every bit.
    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Check that no bit is set.
    pub fn is_clean(&self) -> bool {
        self.cells.iter().all(|c| c.load(Ordering::Relaxed) == 0)
    }

    /// Iterate set bits in ascending order, starting at `from`.
    pub fn iter_set(&self, from: usize) -> SetBits<'_> {
        let cell = from / BITS_PER_CELL;
        let current = self
            .cells
            .get(cell)
            .map(|c| c.load(Ordering::Acquire) & (!0u64 << (from % BITS_PER_CELL)))
            .unwrap_or(0);
        SetBits {
            bitmap: self,
            cell,
            current,
        }
    }
}

/// Iterator over set bit indices.
pub struct SetBits<'a> {
    bitmap: &'a MarkingBitmap,
    cell: usize,
    current: u64,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.cell * BITS_PER_CELL + bit);
            }
            self.cell += 1;
            let next = self.bitmap.cells.get(self.cell)?;
            self.current = next.load(Ordering::Acquire);
        }
    }
}
