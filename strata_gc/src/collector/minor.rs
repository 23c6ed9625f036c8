//! Minor (young generation) garbage collection.
//!
//! A semispace scavenger in the style of Cheney:
//! 1. Flip the semispaces; every young object now lives in from-space
//! 2. Evacuate objects referenced from roots and from OLD_TO_NEW slots
//! 3. Scan the copies breadth-first, evacuating what they reference
//! 4. Free young large objects that were not reached
//!
//! ```text
//!  FROM-SPACE                         TO-SPACE              OLD SPACE
//!  ┌─────┬─────┬─────┬─────┐         ┌─────┬─────┬──────┐  ┌─────┬────┐
//!  │  A  │  B  │  C  │  D  │  ──▶    │ A'  │ D'  │ free │  │ C'  │ .. │
//!  │age 0│dead │age 1│age 0│         │age 1│age 1│      │  │     │    │
//!  └─────┴─────┴─────┴─────┘         └─────┴─────┴──────┘  └─────┴────┘
//!   header of A, C, D: ForwardedTo      scan ──▶               promoted
//! ```
//!
//! An object is promoted once `age + 1` reaches the configured promotion
//! age. Promoted objects are scanned from a side list and re-record their
//! OLD_TO_NEW slots. The copy protocol claims the header with a
//! compare-exchange to `BeingMoved` before copying and publishes the
//! forwarding word afterwards.

use super::marking::mark_object;
use crate::barrier::{RememberedSet, RememberedSetType, SlotCallbackResult};
use crate::error::contract_violation;
use crate::heap::{Heap, Space};
use crate::objects::{HeapObject, MapWord, Slot};
use strata_core::{Address, TaggedValue, WORD_SIZE};

/// Result of a minor collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MinorResult {
    /// Bytes copied within the young generation.
    pub bytes_survived: usize,
    /// Objects copied within the young generation.
    pub objects_survived: usize,
    /// Bytes moved to the old generation, large pages included.
    pub bytes_promoted: usize,
    /// Objects moved to the old generation.
    pub objects_promoted: usize,
    /// Young large pages relinked into the old large object space.
    pub large_objects_promoted: usize,
    /// Young bytes that did not survive.
    pub bytes_freed: usize,
    /// OLD_TO_NEW slots still pointing into the young generation afterwards.
    pub remembered_slots: usize,
}

/// Scavenger for the young generation.
///
/// Holds the heap exclusively for the duration of one collection.
pub struct MinorCollector<'h> {
    heap: &'h mut Heap,
    /// Promote every survivor regardless of age.
    promote_all: bool,
    /// Promoted objects whose bodies still need scanning.
    promoted: Vec<HeapObject>,
    /// Promoted objects marked black while marking is active.
    newly_marked: Vec<HeapObject>,
    scan_page: usize,
    scan_cursor: Address,
    result: MinorResult,
}

impl<'h> MinorCollector<'h> {
    /// Prepare a scavenge of `heap`.
    ///
    /// With `promote_all`, every survivor is moved to the old generation;
    /// the mark-compact pause uses this to empty the young generation.
    pub fn new(heap: &'h mut Heap, promote_all: bool) -> Self {
        Self {
            heap,
            promote_all,
            promoted: Vec::new(),
            newly_marked: Vec::new(),
            scan_page: 0,
            scan_cursor: Address::NULL,
            result: MinorResult::default(),
        }
    }

    /// Perform the scavenge.
    pub fn collect(mut self) -> MinorResult {
        let young_before = self.heap.young_generation_size();
        tracing::debug!(
            target: "strata_gc::minor",
            young = young_before,
            promote_all = self.promote_all,
            "scavenge started"
        );

        self.heap.new_space.flip();
        self.scan_cursor = self.heap.new_space.to_space().pages()[0].area_start();

        self.process_roots();
        self.process_old_to_new();
        self.scan();
        self.free_dead_large_objects();

        if !self.newly_marked.is_empty() {
            let marked = std::mem::take(&mut self.newly_marked);
            self.heap.marking.worklist().push_all(marked);
        }

        let live = self.result.bytes_survived + self.result.bytes_promoted;
        self.result.bytes_freed = young_before.saturating_sub(live);
        tracing::debug!(
            target: "strata_gc::minor",
            survived = self.result.bytes_survived,
            promoted = self.result.bytes_promoted,
            freed = self.result.bytes_freed,
            "scavenge finished"
        );
        self.result
    }

    // =========================================================================
    // Roots
    // =========================================================================

    fn process_roots(&mut self) {
        let mut roots = std::mem::take(&mut self.heap.roots);
        roots.visit(&mut |slot: &mut TaggedValue| {
            if let Some(value) = self.evacuate_value(*slot) {
                *slot = value;
            }
        });
        self.heap.roots = roots;
    }

    fn process_old_to_new(&mut self) {
        let pages = self.heap.old_generation_pages();
        let kept = RememberedSet::iterate(
            RememberedSetType::OldToNew,
            &pages,
            |address| {
                let slot = Slot::new(address);
                let value = slot.load();
                let current = match self.evacuate_value(value) {
                    Some(moved) => {
                        slot.store_raw(moved);
                        moved
                    }
                    None => value,
                };
                if points_to_young(current) {
                    SlotCallbackResult::Keep
                } else {
                    SlotCallbackResult::Remove
                }
            },
        );
        self.result.remembered_slots = kept;
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Scan to-space copies and promoted objects until neither grows.
    fn scan(&mut self) {
        loop {
            let mut progress = false;

            loop {
                let limit = self.heap.new_space.object_limit(self.scan_page);
                if self.scan_cursor < limit {
                    let object = HeapObject::from_address(self.scan_cursor);
                    let size = self.scan_object(object);
                    self.scan_cursor = self.scan_cursor.offset(size);
                    progress = true;
                } else if self.scan_page < self.heap.new_space.current_page() {
                    self.scan_page += 1;
                    self.scan_cursor =
                        self.heap.new_space.to_space().pages()[self.scan_page].area_start();
                } else {
                    break;
                }
            }

            while let Some(object) = self.promoted.pop() {
                self.scan_object(object);
                progress = true;
            }

            if !progress {
                break;
            }
        }
    }

    /// Evacuate the referents of `host` and re-record its slots.
    fn scan_object(&mut self, host: HeapObject) -> usize {
        let kind = host.kind();
        let host_chunk = host.chunk();
        let host_young = host_chunk.in_young_generation();
        let host_shared = host_chunk.in_writable_shared_space();
        let host_page = host.page();

        kind.for_each_pointer_slot(|slot| {
            let value = slot.load();
            let current = match self.evacuate_value(value) {
                Some(moved) => {
                    slot.store_raw(moved);
                    moved
                }
                None => value,
            };
            let Some(reference) = current.as_heap_reference() else {
                return;
            };
            let target_chunk = HeapObject::from_reference(reference).chunk();
            if !host_young && target_chunk.in_young_generation() {
                host_page.record_slot(RememberedSetType::OldToNew, slot.address());
            }
            if !host_shared && target_chunk.in_writable_shared_space() {
                host_page.record_slot(RememberedSetType::OldToShared, slot.address());
            }
        });
        kind.size()
    }

    // =========================================================================
    // Evacuation
    // =========================================================================

    /// New value for a slot holding `value`, if its referent moved.
    fn evacuate_value(&mut self, value: TaggedValue) -> Option<TaggedValue> {
        let reference = value.as_heap_reference()?;
        let object = HeapObject::from_reference(reference);
        let chunk = object.chunk();
        if !chunk.in_young_generation() {
            return None;
        }
        if chunk.is_large_page() {
            self.promote_large_object(object);
            return None;
        }
        if !chunk.is_from_page() {
            return None;
        }
        Some(self.evacuate_object(object).to_tagged())
    }

    fn evacuate_object(&mut self, object: HeapObject) -> HeapObject {
        let map = match object.map_word() {
            MapWord::ForwardedTo(target) => return HeapObject::from_address(target),
            MapWord::Map(map) => map,
            MapWord::BeingMoved => {
                contract_violation!("object at {} is already being moved", object.address());
                return object;
            }
        };

        let size = object.size();
        let age = object.page().age(object.address());
        let promote = self.promote_all || age.saturating_add(1) >= self.heap.config.promotion_age;

        if !object.compare_exchange_map_word(MapWord::Map(map), MapWord::BeingMoved) {
            return object.forwarding_address().unwrap_or(object);
        }

        let target = if promote {
            self.heap
                .old_space
                .allocate_for_gc(size, WORD_SIZE)
                .or_else(|| {
                    (!self.promote_all)
                        .then(|| self.heap.new_space.allocate_for_gc(size))
                        .flatten()
                })
        } else {
            self.heap
                .new_space
                .allocate_for_gc(size)
                .or_else(|| self.heap.old_space.allocate_for_gc(size, WORD_SIZE))
        };
        let Some(target) = target else {
            self.heap
                .fatal_out_of_memory("scavenge could not find space for a survivor")
        };

        // Safety: source and target are distinct allocations of `size` bytes
        // in mapped pages; the source header is claimed, so nothing else
        // writes either range.
        unsafe {
            std::ptr::copy_nonoverlapping(
                object.address().as_ptr::<u8>(),
                target.as_mut_ptr::<u8>(),
                size,
            );
        }
        let copy = HeapObject::from_address(target);
        copy.set_map_word(MapWord::Map(map));
        object.set_map_word(MapWord::ForwardedTo(target));

        if copy.chunk().in_young_generation() {
            copy.page().set_age(target, age.saturating_add(1));
            self.result.bytes_survived += size;
            self.result.objects_survived += 1;
            self.heap.stats.record_survival(size);
        } else {
            self.record_promoted(copy, size);
        }
        copy
    }

    fn promote_large_object(&mut self, object: HeapObject) {
        let page = object.page();
        let size = page.allocated_bytes();
        self.heap.new_lo_space.detach_page(page);
        self.heap.lo_space.add_page(page);
        self.result.large_objects_promoted += 1;
        tracing::trace!(
            target: "strata_gc::minor",
            object = %object.address(),
            size,
            "promoted large object page"
        );
        self.record_promoted(object, size);
    }

    fn record_promoted(&mut self, object: HeapObject, size: usize) {
        self.result.bytes_promoted += size;
        self.result.objects_promoted += 1;
        self.heap.stats.record_promotion(size);
        self.promoted.push(object);
        if self.heap.marking.is_active() && mark_object(object) {
            self.newly_marked.push(object);
        }
    }

    fn free_dead_large_objects(&mut self) {
        let dead = self.heap.new_lo_space.pages().to_vec();
        for page in dead {
            self.heap.new_lo_space.free_page(page);
        }
    }
}

#[inline]
fn points_to_young(value: TaggedValue) -> bool {
    value
        .as_heap_reference()
        .is_some_and(|reference| HeapObject::from_reference(reference).chunk().in_young_generation())
}
