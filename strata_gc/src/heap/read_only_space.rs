//! Read-only space for immortal roots.
//!
//! Filled once while the heap boots, then sealed. The collector never
//! visits its objects, and the barrier refuses stores into it.

use super::space::{Space, SpaceKind};
use crate::error::AllocationFailure;
use crate::memory::{CHUNK_HEADER_SIZE, ChunkFlags, MemoryAllocator, PageRef};
use std::sync::Arc;
use strata_core::{Address, HeapReference, WORD_SIZE, align_up};

/// Bump-allocated, never-collected space.
pub struct ReadOnlySpace {
    memory: Arc<MemoryAllocator>,
    pages: Vec<PageRef>,
    top: Address,
    limit: Address,
    size: usize,
    sealed: bool,
}

impl ReadOnlySpace {
    /// Create the space with its first page.
    pub fn new(memory: Arc<MemoryAllocator>) -> Result<Self, AllocationFailure> {
        let page = memory.allocate_page(SpaceKind::ReadOnly, ChunkFlags::READ_ONLY, 0)?;
        Ok(Self {
            memory,
            top: page.area_start(),
            limit: page.area_end(),
            pages: vec![page],
            size: 0,
            sealed: false,
        })
    }

    /// Allocate `size` bytes. Fails once the space is sealed.
    pub fn allocate(&mut self, size: usize) -> Result<Address, AllocationFailure> {
        self.allocate_raw(size, WORD_SIZE)
    }

    /// Forbid further allocation.
    pub fn seal(&mut self) {
        self.sealed = true;
        tracing::debug!(
            target: "strata_gc::heap",
            size = self.size,
            pages = self.pages.len(),
            "read-only space sealed"
        );
    }

    /// Check whether the space is sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl Space for ReadOnlySpace {
    fn identity(&self) -> SpaceKind {
        SpaceKind::ReadOnly
    }

    fn allocate_raw(&mut self, size: usize, alignment: usize) -> Result<Address, AllocationFailure> {
        let failure = AllocationFailure::SpaceExhausted {
            space: SpaceKind::ReadOnly,
            size,
        };
        if self.sealed {
            return Err(failure);
        }
        let start = self.top.align_up(alignment);
        if start.as_usize() + size > self.limit.as_usize() {
            let page = self.memory.allocate_page(
                SpaceKind::ReadOnly,
                ChunkFlags::READ_ONLY,
                align_up(size, WORD_SIZE) + CHUNK_HEADER_SIZE + alignment,
            )?;
            self.top = page.area_start();
            self.limit = page.area_end();
            self.pages.push(page);
            return self.allocate_raw(size, alignment);
        }
        self.top = start.offset(size);
        self.size += size;
        Ok(start)
    }

    fn contains(&self, object: HeapReference) -> bool {
        self.pages
            .iter()
            .any(|page| page.contains(object.address()))
    }

    fn size(&self) -> usize {
        self.size
    }

    fn pages(&self) -> &[PageRef] {
        &self.pages
    }
}
