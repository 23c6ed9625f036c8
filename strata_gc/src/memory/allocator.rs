//! Chunk reservation, ownership and accounting.
//!
//! The allocator owns every [`PageMetadata`] in an address-ordered map. The
//! map doubles as the chunk registry used to classify arbitrary addresses:
//! masking alone is only valid for memory known to be on the heap, while
//! the registry answers "is this heap memory at all".

use super::os;
use super::{CHUNK_SIZE, ChunkFlags, MemoryChunk, PageMetadata, PageRef};
use crate::error::AllocationFailure;
use crate::heap::{AllocationOrigin, SpaceKind};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::{Address, align_up};

/// Owner of all chunk mappings of one heap.
pub struct MemoryAllocator {
    /// Page metadata keyed by chunk base.
    pages: RwLock<BTreeMap<usize, Box<PageMetadata>>>,
    /// Bytes mapped for all spaces.
    committed: AtomicUsize,
    /// Bytes mapped for old-generation spaces.
    old_generation_committed: AtomicUsize,
    /// Soft limit for mutator-driven old-generation growth.
    old_generation_limit: AtomicUsize,
    /// Hard cap for old-generation growth (0 = unlimited).
    max_old_generation_size: usize,
}

impl MemoryAllocator {
    /// Create an allocator with the given old-generation limits.
    pub fn new(initial_old_limit: usize, max_old_generation_size: usize) -> Self {
        Self {
            pages: RwLock::new(BTreeMap::new()),
            committed: AtomicUsize::new(0),
            old_generation_committed: AtomicUsize::new(0),
            old_generation_limit: AtomicUsize::new(initial_old_limit),
            max_old_generation_size,
        }
    }

    /// Map a new page of at least `size` bytes for `owner`.
    ///
    /// Executable pages fall back to read-write when the platform refuses
    /// W+X mappings; the `IS_EXECUTABLE` flag then stays clear.
    pub fn allocate_page(
        &self,
        owner: SpaceKind,
        mut flags: ChunkFlags,
        size: usize,
    ) -> Result<PageRef, AllocationFailure> {
        let size = align_up(size.max(CHUNK_SIZE), CHUNK_SIZE);
        let wants_exec = flags.contains(ChunkFlags::IS_EXECUTABLE);
        let mapping = os::map_chunk(size, wants_exec).ok_or(AllocationFailure::MapFailed(size))?;
        if wants_exec && !mapping.executable {
            flags.remove(ChunkFlags::IS_EXECUTABLE);
            tracing::debug!(
                target: "strata_gc::memory",
                base = %mapping.base,
                "executable mapping refused, code page stays read-write"
            );
        }

        let metadata = Box::new(PageMetadata::new(mapping.base, size, owner));
        // Safety: fresh chunk-aligned mapping; the boxed metadata lives in the
        // registry until `free_page` unmaps the chunk.
        unsafe { MemoryChunk::initialize(mapping.base, flags, &*metadata) };
        let page = PageRef::new(&metadata);

        self.pages.write().insert(mapping.base.as_usize(), metadata);
        self.committed.fetch_add(size, Ordering::Relaxed);
        if owner.is_old_generation() {
            self.old_generation_committed
                .fetch_add(size, Ordering::Relaxed);
        }

        tracing::trace!(
            target: "strata_gc::memory",
            base = %mapping.base,
            size,
            ?owner,
            "allocated page"
        );
        Ok(page)
    }

    /// Unmap a page and drop its metadata.
    ///
    /// The caller must hold no other handle to the page.
    pub fn free_page(&self, page: PageRef) {
        let base = page.base();
        let size = page.size();
        let owner = page.owner();

        let metadata = self.pages.write().remove(&base.as_usize());
        debug_assert!(metadata.is_some(), "freeing unknown page {base}");
        drop(metadata);

        self.committed.fetch_sub(size, Ordering::Relaxed);
        if owner.is_old_generation() {
            self.old_generation_committed
                .fetch_sub(size, Ordering::Relaxed);
        }
        os::unmap_chunk(base, size);

        tracing::trace!(target: "strata_gc::memory", %base, size, ?owner, "freed page");
    }

    /// Move a page to another space, keeping generation accounting right.
    pub fn transfer_page(&self, page: PageRef, owner: SpaceKind) {
        let previous = page.owner();
        let size = page.size();
        if previous.is_old_generation() && !owner.is_old_generation() {
            self.old_generation_committed
                .fetch_sub(size, Ordering::Relaxed);
        } else if !previous.is_old_generation() && owner.is_old_generation() {
            self.old_generation_committed
                .fetch_add(size, Ordering::Relaxed);
        }
        page.set_owner(owner);
    }

    /// Find the page whose reservation contains `address`.
    pub fn lookup(&self, address: Address) -> Option<PageRef> {
        let pages = self.pages.read();
        let (_, metadata) = pages.range(..=address.as_usize()).next_back()?;
        metadata
            .reservation_contains(address)
            .then(|| PageRef::new(metadata))
    }

    /// Number of mapped pages.
    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Bytes mapped for all spaces.
    #[inline]
    pub fn committed(&self) -> usize {
        self.committed.load(Ordering::Relaxed)
    }

    /// Bytes mapped for the old generation.
    #[inline]
    pub fn old_generation_committed(&self) -> usize {
        self.old_generation_committed.load(Ordering::Relaxed)
    }

    /// Current soft limit.
    #[inline]
    pub fn old_generation_limit(&self) -> usize {
        self.old_generation_limit.load(Ordering::Relaxed)
    }

    /// Replace the soft limit, clamped to the hard cap.
    pub fn set_old_generation_limit(&self, limit: usize) {
        let limit = if self.max_old_generation_size == 0 {
            limit
        } else {
            limit.min(self.max_old_generation_size)
        };
        self.old_generation_limit.store(limit, Ordering::Relaxed);
    }

    /// Hard cap (0 = unlimited).
    #[inline]
    pub fn max_old_generation_size(&self) -> usize {
        self.max_old_generation_size
    }

    /// Check whether the old generation may map `bytes` more.
    ///
    /// The collector may exceed the soft limit while evacuating, never the
    /// hard cap.
    pub fn can_expand_old_generation(&self, bytes: usize, origin: AllocationOrigin) -> bool {
        let after = self.old_generation_committed() + bytes;
        if self.max_old_generation_size != 0 && after > self.max_old_generation_size {
            return false;
        }
        origin == AllocationOrigin::Gc || after <= self.old_generation_limit()
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        let pages = std::mem::take(self.pages.get_mut());
        for (base, metadata) in pages {
            let size = metadata.size();
            drop(metadata);
            os::unmap_chunk(Address::new(base), size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_lookup() {
        let allocator = MemoryAllocator::new(usize::MAX, 0);
        let page = allocator
            .allocate_page(SpaceKind::Old, ChunkFlags::empty(), CHUNK_SIZE)
            .unwrap();

        assert_eq!(allocator.page_count(), 1);
        assert_eq!(allocator.committed(), CHUNK_SIZE);
        assert_eq!(allocator.old_generation_committed(), CHUNK_SIZE);

        let inside = page.area_start().offset(128);
        assert_eq!(allocator.lookup(inside), Some(page));
        assert_eq!(allocator.lookup(page.base().offset(CHUNK_SIZE)), None);
        assert_eq!(allocator.lookup(Address::new(8)), None);

        let chunk = unsafe { MemoryChunk::from_address(inside) };
        assert_eq!(chunk.base(), page.base());
        assert_eq!(chunk.metadata().owner(), SpaceKind::Old);

        allocator.free_page(page);
        assert_eq!(allocator.page_count(), 0);
        assert_eq!(allocator.committed(), 0);
    }

    #[test]
    fn test_large_page_rounds_to_chunks() {
        let allocator = MemoryAllocator::new(usize::MAX, 0);
        let page = allocator
            .allocate_page(
                SpaceKind::LargeObject,
                ChunkFlags::IS_LARGE_PAGE,
                CHUNK_SIZE + 1,
            )
            .unwrap();
        assert_eq!(page.size(), 2 * CHUNK_SIZE);
        assert!(page.chunk().is_large_page());
        assert_eq!(
            allocator.lookup(page.base().offset(CHUNK_SIZE + 64)),
            Some(page)
        );
    }

    #[test]
    fn test_young_pages_are_not_old_generation() {
        let allocator = MemoryAllocator::new(usize::MAX, 0);
        let page = allocator
            .allocate_page(SpaceKind::New, ChunkFlags::IN_NEW_SPACE, CHUNK_SIZE)
            .unwrap();
        assert_eq!(allocator.old_generation_committed(), 0);

        allocator.transfer_page(page, SpaceKind::LargeObject);
        assert_eq!(allocator.old_generation_committed(), CHUNK_SIZE);
    }

    #[test]
    fn test_expansion_limits() {
        let allocator = MemoryAllocator::new(CHUNK_SIZE, 2 * CHUNK_SIZE);
        assert!(allocator.can_expand_old_generation(CHUNK_SIZE, AllocationOrigin::Mutator));
        allocator
            .allocate_page(SpaceKind::Old, ChunkFlags::empty(), CHUNK_SIZE)
            .unwrap();

        assert!(!allocator.can_expand_old_generation(CHUNK_SIZE, AllocationOrigin::Mutator));
        assert!(allocator.can_expand_old_generation(CHUNK_SIZE, AllocationOrigin::Gc));
        assert!(!allocator.can_expand_old_generation(2 * CHUNK_SIZE, AllocationOrigin::Gc));

        allocator.set_old_generation_limit(usize::MAX);
        assert_eq!(allocator.old_generation_limit(), 2 * CHUNK_SIZE);
    }

    #[test]
    fn test_executable_request_sets_consistent_flag() {
        let allocator = MemoryAllocator::new(usize::MAX, 0);
        let page = allocator
            .allocate_page(SpaceKind::Code, ChunkFlags::IS_EXECUTABLE, CHUNK_SIZE)
            .unwrap();
        // Either mapped executable or the flag was dropped; never a lie.
        let _ = page.chunk().is_executable();
        assert_eq!(page.owner(), SpaceKind::Code);
    }
}
