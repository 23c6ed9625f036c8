//! In-band chunk header.

use super::{CHUNK_SIZE, PageMetadata};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use strata_core::Address;

bitflags::bitflags! {
    /// Per-chunk flag bits.
    ///
    /// Read on every barrier check, so each query is a single atomic load and
    /// mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChunkFlags: usize {
        /// Chunk holds exactly one large object.
        const IS_LARGE_PAGE = 1 << 0;
        /// Chunk belongs to the semispace the mutator allocates in.
        const IS_TO_PAGE = 1 << 1;
        /// Chunk belongs to the semispace being evacuated.
        const IS_FROM_PAGE = 1 << 2;
        /// Chunk is part of the young generation.
        const IN_NEW_SPACE = 1 << 3;
        /// Chunk belongs to the writable shared space.
        const IN_WRITABLE_SHARED_SPACE = 1 << 4;
        /// Chunk is part of the immutable read-only space.
        const READ_ONLY = 1 << 5;
        /// Chunk memory is mapped executable.
        const IS_EXECUTABLE = 1 << 6;
        /// Live objects will be moved off this page by the current major GC.
        const EVACUATION_CANDIDATE = 1 << 7;
        /// Page may never be selected for evacuation.
        const NEVER_EVACUATE = 1 << 8;
        /// Young large page that survived a scavenge and moves to old space.
        const PAGE_NEW_OLD_PROMOTION = 1 << 9;
        /// Evacuation of this candidate stopped part way.
        const EVACUATION_ABORTED = 1 << 10;
    }
}

/// Header stored at the base of every chunk.
#[repr(C)]
pub struct MemoryChunk {
    flags: AtomicUsize,
    metadata: AtomicPtr<PageMetadata>,
}

impl MemoryChunk {
    /// Find the chunk containing `address` by masking off the low bits.
    ///
    /// # Safety
    ///
    /// `address` must lie in the first `CHUNK_SIZE` bytes of a chunk owned by
    /// a live heap: an object start, or a slot of a regular-page object.
    #[inline]
    pub unsafe fn from_address<'a>(address: Address) -> &'a MemoryChunk {
        // Safety: forwarded to the caller.
        unsafe { &*address.align_down(CHUNK_SIZE).as_ptr::<MemoryChunk>() }
    }

    /// Write a fresh header at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the start of a writable, chunk-aligned mapping and
    /// `metadata` must outlive it.
    pub(crate) unsafe fn initialize<'a>(
        base: Address,
        flags: ChunkFlags,
        metadata: *const PageMetadata,
    ) -> &'a MemoryChunk {
        let chunk = base.as_mut_ptr::<MemoryChunk>();
        // Safety: forwarded to the caller.
        unsafe {
            chunk.write(MemoryChunk {
                flags: AtomicUsize::new(flags.bits()),
                metadata: AtomicPtr::new(metadata.cast_mut()),
            });
            &*chunk
        }
    }

    /// Chunk base address.
    #[inline]
    pub fn base(&self) -> Address {
        Address::from_ptr(self)
    }

    /// Out-of-band metadata for this chunk.
    #[inline]
    pub fn metadata(&self) -> &PageMetadata {
        // Safety: set once in `initialize`; the metadata is freed together
        // with the mapping, so it is live whenever the header is reachable.
        unsafe { &*self.metadata.load(Ordering::Relaxed) }
    }

    /// Check whether `address` lies in the object area.
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        self.metadata().contains(address)
    }

    // =========================================================================
    // Flags
    // =========================================================================

    /// Current flag set.
    #[inline]
    pub fn flags(&self) -> ChunkFlags {
        ChunkFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Test a single flag.
    #[inline]
    pub fn is_flag_set(&self, flag: ChunkFlags) -> bool {
        self.flags.load(Ordering::Relaxed) & flag.bits() != 0
    }

    /// Set flags.
    #[inline]
    pub fn set_flags(&self, flags: ChunkFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::Release);
    }

    /// Clear flags.
    #[inline]
    pub fn clear_flags(&self, flags: ChunkFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::Release);
    }

    /// Large-object page.
    #[inline]
    pub fn is_large_page(&self) -> bool {
        self.is_flag_set(ChunkFlags::IS_LARGE_PAGE)
    }

    /// Semispace page the mutator allocates into.
    #[inline]
    pub fn is_to_page(&self) -> bool {
        self.is_flag_set(ChunkFlags::IS_TO_PAGE)
    }

    /// Semispace page being evacuated.
    #[inline]
    pub fn is_from_page(&self) -> bool {
        self.is_flag_set(ChunkFlags::IS_FROM_PAGE)
    }

    /// Young-generation page (semispace or young large page).
    #[inline]
    pub fn in_new_space(&self) -> bool {
        self.is_flag_set(ChunkFlags::IN_NEW_SPACE)
    }

    /// Alias of [`in_new_space`](Self::in_new_space).
    #[inline]
    pub fn in_young_generation(&self) -> bool {
        self.in_new_space()
    }

    /// Writable shared space page.
    #[inline]
    pub fn in_writable_shared_space(&self) -> bool {
        self.is_flag_set(ChunkFlags::IN_WRITABLE_SHARED_SPACE)
    }

    /// Read-only space page.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.is_flag_set(ChunkFlags::READ_ONLY)
    }

    /// Mapped executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.is_flag_set(ChunkFlags::IS_EXECUTABLE)
    }

    /// Selected for evacuation in the current cycle.
    #[inline]
    pub fn is_evacuation_candidate(&self) -> bool {
        self.is_flag_set(ChunkFlags::EVACUATION_CANDIDATE)
    }

    /// Excluded from evacuation.
    #[inline]
    pub fn never_evacuate(&self) -> bool {
        self.is_flag_set(ChunkFlags::NEVER_EVACUATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_distinct() {
        let all = ChunkFlags::all();
        assert_eq!(all.bits().count_ones() as usize, all.iter().count());
    }

    #[test]
    fn test_flag_set_and_clear() {
        let mut storage = vec![0u64; 4];
        let base = Address::from_ptr(storage.as_mut_ptr());
        let chunk = unsafe {
            MemoryChunk::initialize(base, ChunkFlags::IN_NEW_SPACE, std::ptr::null())
        };

        assert!(chunk.in_new_space());
        assert!(!chunk.is_to_page());

        chunk.set_flags(ChunkFlags::IS_TO_PAGE | ChunkFlags::NEVER_EVACUATE);
        assert!(chunk.is_to_page());
        assert!(chunk.never_evacuate());

        chunk.clear_flags(ChunkFlags::IS_TO_PAGE);
        assert!(!chunk.is_to_page());
        assert_eq!(
            chunk.flags(),
            ChunkFlags::IN_NEW_SPACE | ChunkFlags::NEVER_EVACUATE
        );
    }
}
