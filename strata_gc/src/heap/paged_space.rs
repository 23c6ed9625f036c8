//! Old, code and shared spaces: regular pages, a linear allocation area
//! and a segregated free list.
//!
//! ```text
//!  page 0            page 1            page 2
//!  ┌───────────────┐ ┌───────────────┐ ┌───────────────┐
//!  │objects│free│..│ │..objects......│ │objs│ LAB     │
//!  └───────────────┘ └───────────────┘ └────┴─────────┘
//!           │                               top  limit
//!           └── FreeSpace node on the free list
//! ```
//!
//! Mutator requests bump the LAB, then commit a new page if the soft limit
//! allows it. Refilling the LAB from the free list is a separate step, so
//! the allocator can order the fallbacks. Collector requests use every
//! source and may grow up to the hard cap.

use super::free_list::{FreeList, FreeRegion};
use super::space::{AllocationOrigin, LinearAllocationArea, Space, SpaceKind};
use crate::error::AllocationFailure;
use crate::memory::{CHUNK_SIZE, ChunkFlags, MemoryAllocator, PageRef};
use crate::objects::{ReadOnlyRoots, create_filler};
use std::sync::Arc;
use strata_core::{Address, HeapReference, WORD_SIZE};

/// A space made of regular pages.
pub struct PagedSpace {
    identity: SpaceKind,
    memory: Arc<MemoryAllocator>,
    roots: ReadOnlyRoots,
    pages: Vec<PageRef>,
    free_list: FreeList,
    lab: LinearAllocationArea,
    page_flags: ChunkFlags,
}

impl PagedSpace {
    /// Create an empty space. Pages are committed on demand.
    pub fn new(identity: SpaceKind, memory: Arc<MemoryAllocator>, roots: ReadOnlyRoots) -> Self {
        let page_flags = match identity {
            SpaceKind::Code => ChunkFlags::IS_EXECUTABLE,
            SpaceKind::Shared => ChunkFlags::IN_WRITABLE_SHARED_SPACE,
            SpaceKind::Old => ChunkFlags::empty(),
            other => unreachable!("{other:?} is not a paged space"),
        };
        Self {
            identity,
            memory,
            roots,
            pages: Vec::new(),
            free_list: FreeList::new(roots),
            lab: LinearAllocationArea::EMPTY,
            page_flags,
        }
    }

    /// The current linear allocation area.
    #[inline]
    pub fn linear_allocation_area(&self) -> LinearAllocationArea {
        self.lab
    }

    /// The space's free list.
    #[inline]
    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    pub(crate) fn free_list_mut(&mut self) -> &mut FreeList {
        &mut self.free_list
    }

    #[inline]
    pub(crate) fn allocate_from_lab(&mut self, size: usize, alignment: usize) -> Option<Address> {
        let top = self.lab.top();
        let (start, gap) = self.lab.allocate(size, alignment)?;
        if gap != 0 {
            create_filler(top, gap, &self.roots);
        }
        Some(start)
    }

    fn expand(&mut self, origin: AllocationOrigin, size: usize) -> Result<(), AllocationFailure> {
        if !self.memory.can_expand_old_generation(CHUNK_SIZE, origin) {
            return Err(AllocationFailure::LimitReached {
                space: self.identity,
                size,
            });
        }
        let page = self
            .memory
            .allocate_page(self.identity, self.page_flags, CHUNK_SIZE)?;
        self.free_linear_allocation_area();
        page.set_allocated_bytes(page.area_size());
        self.lab = LinearAllocationArea::new(page.area_start(), page.area_end());
        self.pages.push(page);
        tracing::trace!(
            target: "strata_gc::heap",
            space = ?self.identity,
            pages = self.pages.len(),
            ?origin,
            "expanded paged space"
        );
        Ok(())
    }

    /// Refill the LAB from the free list and allocate from it.
    ///
    /// The previous LAB's remainder goes back to the list.
    pub fn allocate_from_free_list(&mut self, size: usize, alignment: usize) -> Option<Address> {
        let needed = size + alignment.saturating_sub(WORD_SIZE);
        let FreeRegion { start, size: found } = self.free_list.allocate(needed)?;
        self.free_linear_allocation_area();
        self.lab = LinearAllocationArea::new(start, start.offset(found));
        self.allocate_from_lab(size, alignment)
    }

    /// Allocation on behalf of the collector: LAB, free list, then a new page
    /// bounded only by the hard cap.
    pub fn allocate_for_gc(&mut self, size: usize, alignment: usize) -> Option<Address> {
        if let Some(address) = self.allocate_from_lab(size, alignment) {
            return Some(address);
        }
        if let Some(address) = self.allocate_from_free_list(size, alignment) {
            return Some(address);
        }
        self.expand(AllocationOrigin::Gc, size).ok()?;
        self.allocate_from_lab(size, alignment)
    }

    /// Give the LAB's unused tail back and make the space iterable.
    pub fn free_linear_allocation_area(&mut self) {
        if !self.lab.is_empty() {
            let top = self.lab.top();
            let remaining = self.lab.remaining();
            self.free_list.add(top, remaining);
        }
        self.lab = LinearAllocationArea::EMPTY;
    }

    /// Remove a page from the space without unmapping it.
    pub(crate) fn detach_page(&mut self, page: PageRef) {
        self.pages.retain(|candidate| *candidate != page);
    }

    /// Remove and unmap an empty page.
    pub(crate) fn release_page(&mut self, page: PageRef) {
        self.free_list.evict_page(&page);
        self.detach_page(page);
        self.memory.free_page(page);
    }
}

impl Space for PagedSpace {
    fn identity(&self) -> SpaceKind {
        self.identity
    }

    fn allocate_raw(&mut self, size: usize, alignment: usize) -> Result<Address, AllocationFailure> {
        if let Some(address) = self.allocate_from_lab(size, alignment) {
            return Ok(address);
        }
        self.expand(AllocationOrigin::Mutator, size)?;
        self.allocate_from_lab(size, alignment)
            .ok_or(AllocationFailure::SpaceExhausted {
                space: self.identity,
                size,
            })
    }

    fn contains(&self, object: HeapReference) -> bool {
        self.pages
            .iter()
            .any(|page| page.contains(object.address()))
    }

    fn size(&self) -> usize {
        let allocated: usize = self.pages.iter().map(|page| page.allocated_bytes()).sum();
        allocated - self.lab.remaining()
    }

    fn pages(&self) -> &[PageRef] {
        &self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::ReadOnlySpace;
    use crate::memory::{CODE_ALIGNMENT, PAGE_AREA_SIZE};
    use crate::objects::HeapObject;

    fn space(identity: SpaceKind, limit: usize) -> PagedSpace {
        let memory = Arc::new(MemoryAllocator::new(limit, 0));
        let mut read_only = ReadOnlySpace::new(memory.clone()).unwrap();
        let roots = ReadOnlyRoots::bootstrap(&mut read_only).unwrap();
        PagedSpace::new(identity, memory, roots)
    }

    #[test]
    fn test_bump_then_expand() {
        let mut old = space(SpaceKind::Old, usize::MAX);
        let first = old.allocate_raw(64, WORD_SIZE).unwrap();
        let second = old.allocate_raw(64, WORD_SIZE).unwrap();
        assert_eq!(second, first.offset(64));
        assert_eq!(old.pages().len(), 1);
        assert_eq!(old.size(), 128);

        // Does not fit in the rest of the first page.
        old.allocate_raw(PAGE_AREA_SIZE - 64, WORD_SIZE).unwrap();
        assert_eq!(old.pages().len(), 2);
    }

    #[test]
    fn test_mutator_respects_soft_limit() {
        let mut old = space(SpaceKind::Old, CHUNK_SIZE);
        old.allocate_raw(PAGE_AREA_SIZE, WORD_SIZE).unwrap();
        let failure = old.allocate_raw(64, WORD_SIZE).unwrap_err();
        assert!(matches!(failure, AllocationFailure::LimitReached { .. }));
        // The collector may go past it.
        assert!(old.allocate_for_gc(64, WORD_SIZE).is_some());
    }

    #[test]
    fn test_free_list_refill_returns_old_tail() {
        let mut old = space(SpaceKind::Old, usize::MAX);
        let start = old.allocate_raw(1024, WORD_SIZE).unwrap();
        old.free_list_mut().add(start, 1024);
        assert_eq!(old.free_list().available(), 1024);

        let address = old.allocate_from_free_list(256, WORD_SIZE).unwrap();
        assert_eq!(address, start);
        // The previous LAB's tail went back to the list.
        assert!(old.free_list().available() > PAGE_AREA_SIZE / 2);
        assert_eq!(old.linear_allocation_area().limit(), start.offset(1024));
    }

    #[test]
    fn test_free_linear_allocation_area_keeps_page_iterable() {
        let mut old = space(SpaceKind::Old, usize::MAX);
        let object = old.allocate_raw(48, WORD_SIZE).unwrap();
        old.free_linear_allocation_area();
        assert!(old.linear_allocation_area().is_empty());

        let tail = HeapObject::from_address(object.offset(48));
        assert!(tail.kind().is_filler());
        assert_eq!(object.offset(48 + tail.size()), old.pages()[0].area_end());
    }

    #[test]
    fn test_code_alignment_leaves_filler() {
        let mut code = space(SpaceKind::Code, usize::MAX);
        let first = code.allocate_raw(40, CODE_ALIGNMENT).unwrap();
        let second = code.allocate_raw(40, CODE_ALIGNMENT).unwrap();
        assert!(first.is_aligned(CODE_ALIGNMENT));
        assert!(second.is_aligned(CODE_ALIGNMENT));
        assert_eq!(second, first.offset(64));
        let gap = HeapObject::from_address(first.offset(40));
        assert_eq!(gap.size(), 24);
    }

    #[test]
    fn test_shared_pages_are_flagged() {
        let mut shared = space(SpaceKind::Shared, usize::MAX);
        shared.allocate_raw(32, WORD_SIZE).unwrap();
        assert!(shared.pages()[0].chunk().in_writable_shared_space());
    }
}
