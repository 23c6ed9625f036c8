//! Mutator allocation: space selection, fallbacks and GC escalation.
//!
//! ```text
//!  allocate(size, space)
//!    │  incremental marking step (every `marking_step_bytes`)
//!    ▼
//!  try_allocate ── LAB ── free list ── new page ──▶ ok
//!    │ fail
//!    ▼
//!  collect (minor for young, major otherwise) ── retry ──▶ ok
//!    │ fail
//!    ▼
//!  major (last resort) ── retry ──▶ ok
//!    │ fail
//!    ▼
//!  OOM handler (does not return)
//! ```
//!
//! Every returned object is formatted as a filler before it is handed out,
//! so the heap stays iterable even if the caller never initializes it.

use super::{Heap, LargeObjectSpace, PagedSpace, Space, SpaceKind};
use crate::collector::marking::mark_object;
use crate::collector::{GcKind, GcReason};
use crate::error::contract_violation;
use crate::memory::{CODE_ALIGNMENT, MAX_OBJECT_SIZE};
use crate::objects::{HeapObject, create_filler};
use strata_core::{Address, TaggedValue, WORD_SIZE, checked_align_up};

impl Heap {
    /// Allocate `size` bytes in `space` and return a tagged reference.
    ///
    /// The memory is formatted as a filler; the caller writes the real
    /// header. Never fails: exhaustion ends in the OOM handler.
    pub fn allocate(&mut self, size: usize, space: SpaceKind) -> TaggedValue {
        self.allocate_object(size, space).to_tagged()
    }

    pub(crate) fn allocate_object(&mut self, size: usize, space: SpaceKind) -> HeapObject {
        let Some(size) = checked_align_up(size.max(WORD_SIZE), WORD_SIZE)
            .filter(|aligned| *aligned <= MAX_OBJECT_SIZE)
        else {
            self.fatal_out_of_memory(&format!(
                "{size} bytes exceeds the largest object ({MAX_OBJECT_SIZE} bytes)"
            ))
        };
        let space = if space == SpaceKind::ReadOnly {
            contract_violation!("mutator allocation of {size} bytes in read-only space");
            SpaceKind::Old
        } else {
            space
        };

        self.advance_incremental_marking(size);
        let address = match self.try_allocate(size, space) {
            Some(address) => address,
            None => self.allocate_slow(size, space),
        };

        create_filler(address, size, &self.read_only_roots);
        let object = HeapObject::from_address(address);
        if self.marking.is_active() {
            // Black allocation: old objects born during marking survive the cycle.
            mark_object(object);
        }
        self.stats.record_allocation(size);
        object
    }

    fn allocate_slow(&mut self, size: usize, space: SpaceKind) -> Address {
        let first = if space == SpaceKind::New {
            GcKind::Minor
        } else {
            GcKind::Major
        };
        tracing::debug!(
            target: "strata_gc::heap",
            size,
            ?space,
            ?first,
            "allocation failed, collecting"
        );
        self.collect_garbage(first, GcReason::AllocationFailure);
        if let Some(address) = self.try_allocate(size, space) {
            return address;
        }

        self.collect_garbage(GcKind::Major, GcReason::LastResort);
        if let Some(address) = self.try_allocate(size, space) {
            return address;
        }
        self.fatal_out_of_memory(&format!(
            "cannot allocate {size} bytes in {space:?} space"
        ))
    }

    /// One attempt without collecting.
    fn try_allocate(&mut self, size: usize, space: SpaceKind) -> Option<Address> {
        let alignment = if space == SpaceKind::Code {
            CODE_ALIGNMENT
        } else {
            WORD_SIZE
        };
        let large = space == SpaceKind::LargeObject || size > self.config.large_object_threshold;
        let result = if large {
            let lo_space = self.large_object_space_for(space);
            lo_space.allocate_raw(size, alignment)
        } else {
            match space {
                SpaceKind::New => self.new_space.allocate_raw(size, alignment),
                SpaceKind::Code => return allocate_paged(&mut self.code_space, size, alignment),
                SpaceKind::Shared => {
                    return allocate_paged(&mut self.shared_space, size, alignment);
                }
                _ => return allocate_paged(&mut self.old_space, size, alignment),
            }
        };
        match result {
            Ok(address) => Some(address),
            Err(failure) => {
                tracing::trace!(target: "strata_gc::heap", %failure, "allocation attempt failed");
                None
            }
        }
    }

    fn large_object_space_for(&mut self, space: SpaceKind) -> &mut LargeObjectSpace {
        match space {
            SpaceKind::New => &mut self.new_lo_space,
            SpaceKind::Code => &mut self.code_lo_space,
            SpaceKind::Shared => &mut self.shared_lo_space,
            _ => &mut self.lo_space,
        }
    }

    /// Run a marking step every `marking_step_bytes` of allocation, start
    /// marking once the old generation nears its limit and finalize when
    /// the worklist runs dry.
    fn advance_incremental_marking(&mut self, size: usize) {
        if !self.config.incremental_marking {
            return;
        }
        self.bytes_since_marking_step += size;
        if self.bytes_since_marking_step < self.config.marking_step_bytes {
            return;
        }
        self.bytes_since_marking_step = 0;

        if !self.marking.is_active() {
            let committed = self.memory.old_generation_committed() as f64;
            let limit = self.memory.old_generation_limit() as f64;
            if committed >= self.config.major_gc_threshold * limit {
                self.start_incremental_marking();
            }
            return;
        }

        self.incremental_marking_step(self.config.marking_step_bytes);
        if self.marking.is_worklist_empty() {
            self.collect_garbage(GcKind::Major, GcReason::FinalizeMarking);
        }
    }
}

/// LAB, then free list, then a fresh page.
fn allocate_paged(space: &mut PagedSpace, size: usize, alignment: usize) -> Option<Address> {
    if let Some(address) = space.allocate_from_lab(size, alignment) {
        return Some(address);
    }
    if let Some(address) = space.allocate_from_free_list(size, alignment) {
        return Some(address);
    }
    match space.allocate_raw(size, alignment) {
        Ok(address) => Some(address),
        Err(failure) => {
            tracing::trace!(target: "strata_gc::heap", %failure, "paged allocation failed");
            None
        }
    }
}
