//! Young generation: two semispaces of equal capacity.
//!
//! ```text
//!                 to-space (mutator allocates here)
//!  ┌──────────┬──────────┬──────────┐
//!  │ page 0   │ page 1   │ page 2   │   pages filled in order,
//!  │██████████│█████▌    │          │   high-water mark per page
//!  └──────────┴──────────┴──────────┘
//!                   ▲ top
//!                 from-space (evacuated by the scavenger)
//!  ┌──────────┬──────────┬──────────┐
//!  │ forwarded│ objects  │          │
//!  └──────────┴──────────┴──────────┘
//! ```
//!
//! A scavenge flips the roles: the old to-space becomes from-space and keeps
//! its forwarding words until the next flip, the old from-space is reset and
//! receives the survivors.

use super::space::{LinearAllocationArea, Space, SpaceKind};
use crate::barrier::RememberedSetType;
use crate::error::AllocationFailure;
use crate::memory::{ChunkFlags, MemoryAllocator, PageRef};
use crate::objects::HeapObject;
use std::sync::Arc;
use strata_core::{Address, HeapReference, WORD_SIZE};

/// Which half of the young generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemiSpaceId {
    /// Allocation target.
    To,
    /// Evacuation source.
    From,
}

impl SemiSpaceId {
    fn flag(self) -> ChunkFlags {
        match self {
            SemiSpaceId::To => ChunkFlags::IS_TO_PAGE,
            SemiSpaceId::From => ChunkFlags::IS_FROM_PAGE,
        }
    }
}

/// One half of the young generation.
pub struct SemiSpace {
    id: SemiSpaceId,
    pages: Vec<PageRef>,
}

impl SemiSpace {
    fn new(
        id: SemiSpaceId,
        memory: &MemoryAllocator,
        page_count: usize,
    ) -> Result<Self, AllocationFailure> {
        let pages = (0..page_count)
            .map(|_| {
                memory.allocate_page(SpaceKind::New, ChunkFlags::IN_NEW_SPACE | id.flag(), 0)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { id, pages })
    }

    /// Current role.
    #[inline]
    pub fn id(&self) -> SemiSpaceId {
        self.id
    }

    /// Pages in allocation order.
    #[inline]
    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    fn set_id(&mut self, id: SemiSpaceId) {
        self.id = id;
        for page in &self.pages {
            page.chunk()
                .clear_flags(ChunkFlags::IS_TO_PAGE | ChunkFlags::IS_FROM_PAGE);
            page.chunk().set_flags(id.flag());
        }
    }

    /// Capacity in object bytes.
    pub fn capacity(&self) -> usize {
        self.pages.iter().map(|page| page.area_size()).sum()
    }

    /// Check whether `object` lives on a page of this semispace.
    #[inline]
    pub fn contains(&self, object: HeapObject) -> bool {
        object.chunk().is_flag_set(self.id.flag())
    }

    /// Rewind every page to empty.
    pub fn reset(&mut self) {
        for page in &self.pages {
            page.set_high_water_mark(page.area_start());
            page.clear_ages();
            page.clear_marking();
            for kind in RememberedSetType::ALL {
                page.clear_slot_set(kind);
            }
        }
    }
}

/// The semispace young generation.
pub struct NewSpace {
    to_space: SemiSpace,
    from_space: SemiSpace,
    current_page: usize,
    lab: LinearAllocationArea,
}

impl NewSpace {
    /// Commit both semispaces, `pages_per_semispace` pages each.
    pub fn new(
        memory: &MemoryAllocator,
        pages_per_semispace: usize,
    ) -> Result<Self, AllocationFailure> {
        let to_space = SemiSpace::new(SemiSpaceId::To, memory, pages_per_semispace)?;
        let from_space = SemiSpace::new(SemiSpaceId::From, memory, pages_per_semispace)?;
        let first = to_space.pages[0];
        Ok(Self {
            to_space,
            from_space,
            current_page: 0,
            lab: LinearAllocationArea::new(first.area_start(), first.area_end()),
        })
    }

    /// The allocation half.
    #[inline]
    pub fn to_space(&self) -> &SemiSpace {
        &self.to_space
    }

    /// The evacuation half.
    #[inline]
    pub fn from_space(&self) -> &SemiSpace {
        &self.from_space
    }

    /// Index of the to-space page being filled.
    #[inline]
    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Allocation top in the current page.
    #[inline]
    pub fn top(&self) -> Address {
        self.lab.top()
    }

    /// End of the parsable prefix of to-space page `index`.
    pub fn object_limit(&self, index: usize) -> Address {
        let page = self.to_space.pages[index];
        match index.cmp(&self.current_page) {
            std::cmp::Ordering::Less => page.high_water_mark(),
            std::cmp::Ordering::Equal => self.lab.top(),
            std::cmp::Ordering::Greater => page.area_start(),
        }
    }

    /// Capacity of one semispace in object bytes.
    pub fn capacity(&self) -> usize {
        self.to_space.capacity()
    }

    /// Collector allocation into to-space.
    pub fn allocate_for_gc(&mut self, size: usize) -> Option<Address> {
        self.allocate_raw(size, WORD_SIZE).ok()
    }

    /// Swap the semispaces and reset the new to-space.
    pub fn flip(&mut self) {
        self.seal_current_page();
        std::mem::swap(&mut self.to_space, &mut self.from_space);
        self.to_space.set_id(SemiSpaceId::To);
        self.from_space.set_id(SemiSpaceId::From);
        self.to_space.reset();
        self.current_page = 0;
        let first = self.to_space.pages[0];
        self.lab = LinearAllocationArea::new(first.area_start(), first.area_end());
    }

    fn seal_current_page(&self) {
        self.to_space.pages[self.current_page].set_high_water_mark(self.lab.top());
    }

    /// Check whether `address` lies in from-space.
    pub fn in_from_space(&self, address: Address) -> bool {
        self.from_space.pages.iter().any(|page| page.contains(address))
    }
}

impl Space for NewSpace {
    fn identity(&self) -> SpaceKind {
        SpaceKind::New
    }

    fn allocate_raw(&mut self, size: usize, alignment: usize) -> Result<Address, AllocationFailure> {
        loop {
            if let Some((start, gap)) = self.lab.allocate(size, alignment) {
                debug_assert_eq!(gap, 0, "young objects are word aligned");
                return Ok(start);
            }
            if self.current_page + 1 >= self.to_space.pages.len() {
                return Err(AllocationFailure::SpaceExhausted {
                    space: SpaceKind::New,
                    size,
                });
            }
            self.seal_current_page();
            self.current_page += 1;
            let page = self.to_space.pages[self.current_page];
            self.lab = LinearAllocationArea::new(page.area_start(), page.area_end());
        }
    }

    fn contains(&self, object: HeapReference) -> bool {
        self.to_space
            .pages
            .iter()
            .any(|page| page.contains(object.address()))
    }

    fn size(&self) -> usize {
        (0..=self.current_page)
            .map(|index| {
                let page = self.to_space.pages[index];
                self.object_limit(index).offset_from(page.area_start())
            })
            .sum()
    }

    fn committed(&self) -> usize {
        self.to_space
            .pages
            .iter()
            .chain(self.from_space.pages.iter())
            .map(|page| page.size())
            .sum()
    }

    fn pages(&self) -> &[PageRef] {
        &self.to_space.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PAGE_AREA_SIZE;

    #[test]
    fn test_allocation_moves_through_pages() {
        let memory = MemoryAllocator::new(usize::MAX, 0);
        let mut young = NewSpace::new(&memory, 2).unwrap();
        assert_eq!(memory.old_generation_committed(), 0);

        let first = young.allocate_raw(PAGE_AREA_SIZE - 8, WORD_SIZE).unwrap();
        let second = young.allocate_raw(16, WORD_SIZE).unwrap();
        assert_eq!(young.current_page(), 1);
        assert_eq!(young.to_space().pages()[1].area_start(), second);
        assert_eq!(
            young.to_space().pages()[0].high_water_mark(),
            first.offset(PAGE_AREA_SIZE - 8)
        );
        assert_eq!(young.size(), PAGE_AREA_SIZE - 8 + 16);

        young.allocate_raw(PAGE_AREA_SIZE - 16, WORD_SIZE).unwrap();
        assert!(young.allocate_raw(8, WORD_SIZE).is_err());
    }

    #[test]
    fn test_flip_swaps_roles() {
        let memory = MemoryAllocator::new(usize::MAX, 0);
        let mut young = NewSpace::new(&memory, 1).unwrap();
        let object = young.allocate_raw(32, WORD_SIZE).unwrap();
        assert!(young.to_space().pages()[0].chunk().is_to_page());

        young.flip();
        assert!(young.in_from_space(object));
        assert!(young.from_space().contains(HeapObject::from_address(object)));
        assert!(!young.to_space().contains(HeapObject::from_address(object)));
        assert!(young.from_space().pages()[0].chunk().is_from_page());
        assert!(young.to_space().pages()[0].chunk().is_to_page());
        assert_eq!(young.size(), 0);
        assert_eq!(young.from_space().pages()[0].high_water_mark(), object.offset(32));
        assert_eq!(young.capacity(), PAGE_AREA_SIZE);
    }
}
