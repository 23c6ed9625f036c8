//! Evacuation of candidate pages and the pointer update that follows.
//!
//! Every marked object on a candidate is copied into fresh old-space memory
//! and its header replaced by a forwarding word. If the old generation
//! cannot take a copy, the page is flagged `EVACUATION_ABORTED`: the objects
//! moved so far stay forwarded, the rest stay put and the page is swept in
//! place.
//!
//! Pointers into candidates are then rewritten from:
//! - the roots
//! - OLD_TO_OLD slots recorded by the marker and the barrier
//! - the bodies of the copies
//! - the unmoved live objects of aborted pages
//! - the young generation

use super::marking::mark_object;
use crate::barrier::{RememberedSet, RememberedSetType, SlotCallbackResult};
use crate::heap::Heap;
use crate::memory::{ChunkFlags, PageRef};
use crate::objects::{HeapObject, MapWord, Slot};
use strata_core::{TaggedValue, WORD_SIZE};

/// What evacuation did.
#[derive(Debug, Default)]
pub(super) struct EvacuationOutcome {
    /// Candidates emptied completely, detached from their space.
    pub evacuated: Vec<PageRef>,
    /// Candidates that kept some objects.
    pub aborted: Vec<PageRef>,
    /// Copies made.
    pub copies: Vec<HeapObject>,
    /// Bytes copied.
    pub bytes: usize,
}

pub(super) fn evacuate_candidates(heap: &mut Heap) -> EvacuationOutcome {
    let mut outcome = EvacuationOutcome::default();
    let candidates = heap.marking.candidates().to_vec();

    for page in candidates {
        let mut aborted = false;
        for address in page.marked_objects() {
            let object = HeapObject::from_address(address);
            let MapWord::Map(map) = object.map_word() else {
                continue;
            };
            let size = object.size();
            let Some(target) = heap.old_space.allocate_for_gc(size, WORD_SIZE) else {
                aborted = true;
                break;
            };

            // Safety: the copy target is fresh old-space memory of `size`
            // bytes, distinct from the candidate page.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    object.address().as_ptr::<u8>(),
                    target.as_mut_ptr::<u8>(),
                    size,
                );
            }
            let copy = HeapObject::from_address(target);
            copy.set_map_word(MapWord::Map(map));
            mark_object(copy);
            object.set_map_word(MapWord::ForwardedTo(target));
            outcome.copies.push(copy);
            outcome.bytes += size;
        }

        if aborted {
            page.chunk().set_flags(ChunkFlags::EVACUATION_ABORTED);
            tracing::debug!(
                target: "strata_gc::major",
                page = %page.base(),
                "evacuation aborted, page kept in place"
            );
            outcome.aborted.push(page);
        } else {
            heap.old_space.detach_page(page);
            outcome.evacuated.push(page);
        }
    }
    outcome
}

/// Rewrite `slot` if it points to an object that moved off a candidate.
#[inline]
fn update_slot(slot: Slot) {
    if let Some(value) = forwarded_value(slot.load()) {
        slot.store_raw(value);
    }
}

#[inline]
fn forwarded_value(value: TaggedValue) -> Option<TaggedValue> {
    let object = HeapObject::from_reference(value.as_heap_reference()?);
    if !object.chunk().is_evacuation_candidate() {
        return None;
    }
    object.forwarding_address().map(HeapObject::to_tagged)
}

/// Update every slot of `host`, re-recording slots the move relocated.
fn update_object(host: HeapObject) {
    let host_chunk = host.chunk();
    let host_young = host_chunk.in_young_generation();
    let host_shared = host_chunk.in_writable_shared_space();
    let host_page = host.page();
    host.kind().for_each_pointer_slot(|slot| {
        update_slot(slot);
        let Some(reference) = slot.load().as_heap_reference() else {
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
}

pub(super) fn update_pointers(heap: &mut Heap, outcome: &EvacuationOutcome) {
    let mut roots = std::mem::take(&mut heap.roots);
    roots.visit(&mut |slot: &mut TaggedValue| {
        if let Some(value) = forwarded_value(*slot) {
            *slot = value;
        }
    });
    heap.roots = roots;

    let pages = heap.old_generation_pages();
    RememberedSet::iterate(RememberedSetType::OldToOld, &pages, |address| {
        update_slot(Slot::new(address));
        SlotCallbackResult::Remove
    });

    for copy in &outcome.copies {
        update_object(*copy);
    }

    for page in &outcome.aborted {
        for address in page.marked_objects() {
            let object = HeapObject::from_address(address);
            if matches!(object.map_word(), MapWord::Map(_)) {
                update_object(object);
            }
        }
    }

    let new_space = &heap.new_space;
    for (index, page) in new_space.to_space().pages().iter().enumerate() {
        let limit = new_space.object_limit(index);
        let mut cursor = page.area_start();
        while cursor < limit {
            let object = HeapObject::from_address(cursor);
            update_object(object);
            cursor = cursor.offset(object.size());
        }
    }
    for object in heap.new_lo_space.objects() {
        update_object(object);
    }
}
