//! Space identities and the common space capability.

use crate::error::AllocationFailure;
use crate::memory::PageRef;
use strata_core::{Address, HeapReference};

/// Identity of a space.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpaceKind {
    /// Young generation: semispaces and young large objects.
    New = 0,
    /// Old generation, regular pages.
    Old = 1,
    /// Executable code.
    Code = 2,
    /// Writable space shared across isolates.
    Shared = 3,
    /// Old generation, one object per page.
    LargeObject = 4,
    /// Immutable roots.
    ReadOnly = 5,
}

impl SpaceKind {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SpaceKind::New,
            1 => SpaceKind::Old,
            2 => SpaceKind::Code,
            3 => SpaceKind::Shared,
            4 => SpaceKind::LargeObject,
            _ => SpaceKind::ReadOnly,
        }
    }

    /// Young generation.
    #[inline]
    pub fn is_young(self) -> bool {
        self == SpaceKind::New
    }

    /// Spaces whose committed memory counts against the old-generation limit.
    #[inline]
    pub fn is_old_generation(self) -> bool {
        matches!(
            self,
            SpaceKind::Old | SpaceKind::Code | SpaceKind::Shared | SpaceKind::LargeObject
        )
    }
}

/// Result of classifying an arbitrary address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    /// The address lies in a page owned by this space.
    InSpace(SpaceKind),
    /// Not heap memory.
    NotHeap,
}

/// Who is asking for memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOrigin {
    /// Mutator allocation, bound by the soft old-generation limit.
    Mutator,
    /// Collector promotion or evacuation, bound only by the hard cap.
    Gc,
}

/// Bump-pointer window `[top, limit)` inside one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearAllocationArea {
    top: Address,
    limit: Address,
}

impl LinearAllocationArea {
    /// An area that satisfies no request.
    pub const EMPTY: Self = Self {
        top: Address::NULL,
        limit: Address::NULL,
    };

    /// Window over `[top, limit)`.
    #[inline]
    pub fn new(top: Address, limit: Address) -> Self {
        debug_assert!(top <= limit);
        Self { top, limit }
    }

    /// Next free byte.
    #[inline]
    pub fn top(&self) -> Address {
        self.top
    }

    /// End of the window.
    #[inline]
    pub fn limit(&self) -> Address {
        self.limit
    }

    /// Bytes left in the window.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit.as_usize() - self.top.as_usize()
    }

    /// Check whether the window holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top == self.limit
    }

    /// Bump `size` bytes at `alignment`.
    ///
    /// Returns the object start and the alignment gap before it, which the
    /// caller must format as a filler.
    #[inline]
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<(Address, usize)> {
        if self.limit.is_null() {
            return None;
        }
        let start = self.top.align_up(alignment);
        let end = start.as_usize().checked_add(size)?;
        if end > self.limit.as_usize() {
            return None;
        }
        let gap = start.offset_from(self.top);
        self.top = Address::new(end);
        Some((start, gap))
    }
}

/// Capability shared by every space.
pub trait Space {
    /// Which space this is.
    fn identity(&self) -> SpaceKind;

    /// Bump-allocate `size` bytes at `alignment`, committing a fresh page if
    /// the space may grow. Fails when the active page is exhausted and no
    /// further page can be committed.
    fn allocate_raw(&mut self, size: usize, alignment: usize) -> Result<Address, AllocationFailure>;

    /// Check whether the object lives in this space.
    fn contains(&self, object: HeapReference) -> bool;

    /// Bytes handed out to objects.
    fn size(&self) -> usize;

    /// Bytes of committed pages.
    fn committed(&self) -> usize {
        self.pages().iter().map(|page| page.size()).sum()
    }

    /// Pages owned by the space, in allocation order.
    fn pages(&self) -> &[PageRef];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_kind_roundtrip() {
        for kind in [
            SpaceKind::New,
            SpaceKind::Old,
            SpaceKind::Code,
            SpaceKind::Shared,
            SpaceKind::LargeObject,
            SpaceKind::ReadOnly,
        ] {
            assert_eq!(SpaceKind::from_u8(kind as u8), kind);
        }
    }

    #[test]
    fn test_linear_allocation_area() {
        let mut lab = LinearAllocationArea::new(Address::new(0x1008), Address::new(0x1100));
        assert_eq!(lab.allocate(16, 8), Some((Address::new(0x1008), 0)));
        assert_eq!(lab.allocate(32, 32), Some((Address::new(0x1020), 8)));
        assert_eq!(lab.top(), Address::new(0x1040));
        assert_eq!(lab.allocate(0x100, 8), None);
        assert_eq!(lab.remaining(), 0xc0);
        let mut empty = LinearAllocationArea::EMPTY;
        assert_eq!(empty.allocate(8, 8), None);
    }

    #[test]
    fn test_generations() {
        assert!(SpaceKind::New.is_young());
        assert!(!SpaceKind::New.is_old_generation());
        assert!(SpaceKind::LargeObject.is_old_generation());
        assert!(!SpaceKind::ReadOnly.is_old_generation());
    }
}
