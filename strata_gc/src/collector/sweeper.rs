//! Sweeping: rebuild free lists from the mark bitmaps.
//!
//! Each page is walked in address order over its marked objects. Every gap
//! between them becomes one free region, so adjacent dead objects coalesce
//! for free. Pages with nothing marked are unmapped. Large object pages are
//! freed whole when their object is unmarked.

use crate::heap::{Heap, LargeObjectSpace, PagedSpace, Space};
use crate::memory::{ChunkFlags, PageRef};
use crate::objects::{HeapObject, MapWord};
use strata_core::Address;

/// What sweeping did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct SweepResult {
    /// Bytes put on free lists or unmapped.
    pub freed_bytes: usize,
    /// Pages unmapped.
    pub released_pages: usize,
    /// Bytes of live objects found.
    pub live_bytes: usize,
}

impl SweepResult {
    fn merge(&mut self, other: SweepResult) {
        self.freed_bytes += other.freed_bytes;
        self.released_pages += other.released_pages;
        self.live_bytes += other.live_bytes;
    }
}

pub(super) fn sweep(heap: &mut Heap) -> SweepResult {
    let mut result = SweepResult::default();
    for space in [
        &mut heap.old_space,
        &mut heap.code_space,
        &mut heap.shared_space,
    ] {
        result.merge(sweep_paged_space(space));
    }
    for space in [
        &mut heap.lo_space,
        &mut heap.code_lo_space,
        &mut heap.shared_lo_space,
    ] {
        result.merge(sweep_large_object_space(space));
    }
    tracing::debug!(
        target: "strata_gc::sweep",
        freed = result.freed_bytes,
        released_pages = result.released_pages,
        live = result.live_bytes,
        "sweep finished"
    );
    result
}

/// A range of a page that sweeping keeps.
#[derive(Debug, Clone, Copy)]
struct Retained {
    start: Address,
    size: usize,
    live: bool,
}

/// Ranges of `page` that must survive the sweep, ascending.
///
/// On an aborted candidate, objects that were already copied out keep their
/// forwarding word until the next cycle. They stay off the free list but do
/// not count as live, and their slot-set entries are dropped.
fn retained_ranges(page: &PageRef) -> Vec<Retained> {
    let aborted = page.chunk().is_flag_set(ChunkFlags::EVACUATION_ABORTED);
    page.marked_objects()
        .filter_map(|start| {
            let object = HeapObject::from_address(start);
            match object.map_word() {
                MapWord::Map(_) => Some(Retained {
                    start,
                    size: object.size(),
                    live: true,
                }),
                MapWord::ForwardedTo(_) if aborted => {
                    let size = object.size_following_forwarding();
                    page.remove_slot_range(start, start.offset(size));
                    Some(Retained {
                        start,
                        size,
                        live: false,
                    })
                }
                _ => None,
            }
        })
        .collect()
}

fn sweep_paged_space(space: &mut PagedSpace) -> SweepResult {
    let mut result = SweepResult::default();
    space.free_list_mut().reset();

    for page in space.pages().to_vec() {
        let retained = retained_ranges(&page);
        page.clear_marking();
        if retained.is_empty() {
            result.freed_bytes += page.allocated_bytes();
            result.released_pages += 1;
            space.release_page(page);
            continue;
        }

        page.set_allocated_bytes(page.area_size());
        let mut cursor = page.area_start();
        let free_region = |start: Address, end: Address, space: &mut PagedSpace| {
            let size = end.offset_from(start);
            space.free_list_mut().add(start, size);
            page.remove_slot_range(start, end);
            size
        };
        for range in retained {
            if range.start > cursor {
                result.freed_bytes += free_region(cursor, range.start, space);
            }
            if range.live {
                result.live_bytes += range.size;
            }
            cursor = range.start.offset(range.size);
        }
        if cursor < page.area_end() {
            result.freed_bytes += free_region(cursor, page.area_end(), space);
        }
    }
    result
}

fn sweep_large_object_space(space: &mut LargeObjectSpace) -> SweepResult {
    let mut result = SweepResult::default();
    for page in space.pages().to_vec() {
        if page.is_marked(page.area_start()) {
            result.live_bytes += page.allocated_bytes();
            page.clear_marking();
        } else {
            result.freed_bytes += page.allocated_bytes();
            result.released_pages += 1;
            space.free_page(page);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapConfig;
    use crate::heap::SpaceKind;

    #[test]
    fn test_gaps_between_marked_objects_are_freed() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let a = heap.new_fixed_array(4, SpaceKind::Old);
        let _dead = heap.new_fixed_array(4, SpaceKind::Old);
        let c = heap.new_fixed_array(4, SpaceKind::Old);
        heap.free_linear_allocation_areas();

        let page = a.object().page();
        for live in [a.object(), c.object()] {
            assert!(page.mark(live.address()));
        }

        let result = sweep_paged_space(&mut heap.old_space);
        assert_eq!(result.live_bytes, 2 * a.object().size());
        assert_eq!(result.released_pages, 0);
        assert!(page.marking_is_clean());
        assert_eq!(page.allocated_bytes(), 2 * a.object().size());

        let hole = HeapObject::from_address(a.object().address().offset(a.object().size()));
        assert!(hole.kind().is_filler());
        assert_eq!(hole.size(), a.object().size());
    }

    #[test]
    fn test_aborted_page_keeps_forwarding_words() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let kept = heap.new_fixed_array(4, SpaceKind::Old);
        let moved = heap.new_fixed_array(4, SpaceKind::Old);
        let _dead = heap.new_fixed_array(4, SpaceKind::Old);
        let copy = heap.new_fixed_array(4, SpaceKind::Old);
        heap.free_linear_allocation_areas();

        let page = kept.object().page();
        for object in [kept.object(), moved.object(), copy.object()] {
            assert!(page.mark(object.address()));
        }
        moved
            .object()
            .set_map_word(MapWord::ForwardedTo(copy.object().address()));
        page.chunk().set_flags(ChunkFlags::EVACUATION_ABORTED);

        let result = sweep_paged_space(&mut heap.old_space);
        let size = kept.object().size();
        assert_eq!(result.live_bytes, 2 * size);
        assert_eq!(result.released_pages, 0);
        assert_eq!(
            moved.object().map_word(),
            MapWord::ForwardedTo(copy.object().address())
        );
        assert_eq!(heap.is_forwarded(moved.reference()), Some(copy.reference()));

        // The dead neighbour is reclaimed; the forwarded range is not.
        let hole = HeapObject::from_address(moved.object().address().offset(size));
        assert!(hole.kind().is_filler());
        assert_eq!(hole.size(), size);
        assert!(
            heap.old_space()
                .free_list()
                .iter_regions()
                .all(|region| !(region.start <= moved.object().address()
                    && moved.object().address() < region.end()))
        );
    }

    #[test]
    fn test_empty_pages_are_released() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        heap.new_fixed_array(4, SpaceKind::Old);
        heap.new_byte_array(20 * 1024, SpaceKind::Old);
        heap.free_linear_allocation_areas();
        assert_eq!(heap.old_space().pages().len(), 1);
        assert_eq!(heap.lo_space().pages().len(), 1);

        let result = sweep(&mut heap);
        assert_eq!(result.released_pages, 2);
        assert!(heap.old_space().pages().is_empty());
        assert!(heap.lo_space().pages().is_empty());
    }
}
