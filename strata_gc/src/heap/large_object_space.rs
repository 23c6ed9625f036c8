//! Large object spaces: one object per multi-chunk page.
//!
//! Large objects are never copied. The young large object space promotes a
//! surviving page by relinking it into the old one; the old spaces free
//! unmarked pages whole.

use super::space::{AllocationOrigin, Space, SpaceKind};
use crate::error::AllocationFailure;
use crate::memory::{CHUNK_HEADER_SIZE, ChunkFlags, MemoryAllocator, PageRef};
use crate::objects::HeapObject;
use std::sync::Arc;
use strata_core::{Address, HeapReference, align_up};

/// Pages holding one object each.
pub struct LargeObjectSpace {
    identity: SpaceKind,
    memory: Arc<MemoryAllocator>,
    pages: Vec<PageRef>,
    size: usize,
    /// Bound on `size`, for the young space only.
    capacity: Option<usize>,
    page_flags: ChunkFlags,
}

impl LargeObjectSpace {
    /// Create a space whose pages belong to `identity`.
    ///
    /// `New` is the young large object space, bounded by `young_capacity`.
    /// `LargeObject`, `Code` and `Shared` are old-generation variants.
    pub fn new(identity: SpaceKind, memory: Arc<MemoryAllocator>, young_capacity: usize) -> Self {
        let (page_flags, capacity) = match identity {
            SpaceKind::New => (ChunkFlags::IN_NEW_SPACE, Some(young_capacity)),
            SpaceKind::LargeObject => (ChunkFlags::empty(), None),
            SpaceKind::Code => (ChunkFlags::IS_EXECUTABLE, None),
            SpaceKind::Shared => (ChunkFlags::IN_WRITABLE_SHARED_SPACE, None),
            SpaceKind::Old | SpaceKind::ReadOnly => {
                unreachable!("{identity:?} has no large object space")
            }
        };
        Self {
            identity,
            memory,
            pages: Vec::new(),
            size: 0,
            capacity,
            page_flags: page_flags | ChunkFlags::IS_LARGE_PAGE,
        }
    }

    /// The object on `page`.
    #[inline]
    pub fn object_of(page: &PageRef) -> HeapObject {
        HeapObject::from_address(page.area_start())
    }

    /// Objects of the space, in allocation order.
    pub fn objects(&self) -> impl Iterator<Item = HeapObject> + '_ {
        self.pages.iter().map(Self::object_of)
    }

    /// Take over a page promoted from the young large object space.
    pub(crate) fn add_page(&mut self, page: PageRef) {
        self.memory.transfer_page(page, self.identity);
        page.chunk().clear_flags(ChunkFlags::IN_NEW_SPACE);
        page.chunk()
            .set_flags(self.page_flags | ChunkFlags::PAGE_NEW_OLD_PROMOTION);
        self.size += page.allocated_bytes();
        self.pages.push(page);
    }

    /// Give up a page without unmapping it.
    pub(crate) fn detach_page(&mut self, page: PageRef) {
        self.pages.retain(|candidate| *candidate != page);
        self.size -= page.allocated_bytes();
    }

    /// Unmap a dead page.
    pub(crate) fn free_page(&mut self, page: PageRef) {
        self.detach_page(page);
        self.memory.free_page(page);
    }
}

impl Space for LargeObjectSpace {
    fn identity(&self) -> SpaceKind {
        self.identity
    }

    fn allocate_raw(&mut self, size: usize, alignment: usize) -> Result<Address, AllocationFailure> {
        let reservation = align_up(CHUNK_HEADER_SIZE, alignment) + size;
        match self.capacity {
            Some(capacity) if self.size + size > capacity => {
                return Err(AllocationFailure::SpaceExhausted {
                    space: self.identity,
                    size,
                });
            }
            None if !self
                .memory
                .can_expand_old_generation(reservation, AllocationOrigin::Mutator) =>
            {
                return Err(AllocationFailure::LimitReached {
                    space: self.identity,
                    size,
                });
            }
            _ => {}
        }

        let page = self
            .memory
            .allocate_page(self.identity, self.page_flags, reservation)?;
        debug_assert!(page.area_start().is_aligned(alignment));
        page.set_allocated_bytes(size);
        self.size += size;
        self.pages.push(page);
        tracing::trace!(
            target: "strata_gc::heap",
            space = ?self.identity,
            base = %page.base(),
            size,
            "allocated large object page"
        );
        Ok(page.area_start())
    }

    fn contains(&self, object: HeapReference) -> bool {
        self.pages
            .iter()
            .any(|page| page.area_start() == object.address())
    }

    fn size(&self) -> usize {
        self.size
    }

    fn pages(&self) -> &[PageRef] {
        &self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::CHUNK_SIZE;
    use strata_core::WORD_SIZE;

    #[test]
    fn test_one_object_per_page() {
        let memory = Arc::new(MemoryAllocator::new(usize::MAX, 0));
        let mut large = LargeObjectSpace::new(SpaceKind::LargeObject, memory.clone(), 0);
        let object = large.allocate_raw(CHUNK_SIZE, WORD_SIZE).unwrap();
        let page = large.pages()[0];
        assert_eq!(object, page.area_start());
        assert_eq!(page.size(), 2 * CHUNK_SIZE);
        assert!(page.chunk().is_large_page());
        assert_eq!(large.size(), CHUNK_SIZE);
        assert_eq!(memory.old_generation_committed(), 2 * CHUNK_SIZE);

        large.free_page(page);
        assert_eq!(large.size(), 0);
        assert_eq!(memory.page_count(), 0);
    }

    #[test]
    fn test_young_capacity_and_promotion() {
        let memory = Arc::new(MemoryAllocator::new(usize::MAX, 0));
        let mut young = LargeObjectSpace::new(SpaceKind::New, memory.clone(), 64 * 1024);
        let mut old = LargeObjectSpace::new(SpaceKind::LargeObject, memory.clone(), 0);

        young.allocate_raw(40 * 1024, WORD_SIZE).unwrap();
        assert!(young.allocate_raw(40 * 1024, WORD_SIZE).is_err());
        let page = young.pages()[0];
        assert!(page.chunk().in_new_space());
        assert_eq!(memory.old_generation_committed(), 0);

        young.detach_page(page);
        old.add_page(page);
        assert_eq!(young.size(), 0);
        assert_eq!(old.size(), 40 * 1024);
        assert!(!page.chunk().in_new_space());
        assert!(page.chunk().is_flag_set(ChunkFlags::PAGE_NEW_OLD_PROMOTION));
        assert_eq!(page.owner(), SpaceKind::LargeObject);
        assert_eq!(memory.old_generation_committed(), page.size());
    }
}
