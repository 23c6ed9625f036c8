//! Major (full heap) garbage collection.
//!
//! Marking is incremental: [`Heap::start_incremental_marking`] picks
//! evacuation candidates and shades the roots, then the allocator runs
//! bounded [`Heap::incremental_marking_step`]s while the mutator continues.
//! The write barrier keeps the tri-colour invariant in between. The final
//! pause then:
//!
//! ```text
//!  ┌───────────────┐  ┌──────────────┐  ┌────────────┐  ┌────────┐  ┌───────┐
//!  │ scavenge,     │─▶│ rescan roots,│─▶│ evacuate   │─▶│ update │─▶│ sweep │
//!  │ promote all   │  │ drain marker │  │ candidates │  │pointers│  │       │
//!  └───────────────┘  └──────────────┘  └────────────┘  └────────┘  └───────┘
//!       young gen         parallel        copy + fwd     roots,        free
//!       emptied           markers         or abort       OLD_TO_OLD    lists
//! ```
//!
//! # Tri-Color Invariant
//!
//! - **White**: not marked, possibly dead
//! - **Grey**: marked, on the worklist, body not visited
//! - **Black**: marked and visited
//!
//! No black object points to a white one. Objects allocated in the old
//! generation while marking are black from the start.

use super::marking::{LocalMarkingWorklist, drain_parallel, drain_with_budget, mark_root};
use super::minor::{MinorCollector, MinorResult};
use super::{GcPhase, evacuation, sweeper};
use crate::heap::{Heap, Space};
use crate::memory::{ChunkFlags, PageRef};
use strata_core::TaggedValue;

/// Result of a major collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MajorResult {
    /// The promote-all scavenge that opened the pause.
    pub minor: MinorResult,
    /// Bytes visited by the marker this cycle.
    pub marked_bytes: usize,
    /// Pages selected for evacuation.
    pub candidates: usize,
    /// Candidates emptied completely.
    pub pages_evacuated: usize,
    /// Candidates whose evacuation ran out of space.
    pub pages_aborted: usize,
    /// Bytes copied off candidates.
    pub bytes_evacuated: usize,
    /// Bytes returned to free lists or unmapped by sweeping.
    pub bytes_freed: usize,
    /// Empty pages unmapped by sweeping.
    pub pages_released: usize,
    /// Old-generation limit for the next cycle.
    pub old_generation_limit: usize,
}

/// Mark-compact collector for the whole heap.
pub struct MajorCollector<'h> {
    heap: &'h mut Heap,
    result: MajorResult,
}

impl<'h> MajorCollector<'h> {
    /// Prepare a collection of `heap`.
    pub fn new(heap: &'h mut Heap) -> Self {
        Self {
            heap,
            result: MajorResult::default(),
        }
    }

    /// Finish (or run from scratch) a marking cycle, then compact and sweep.
    pub fn collect(mut self) -> MajorResult {
        if !self.heap.marking.is_active() {
            self.heap.start_incremental_marking();
        }
        self.result.candidates = self.heap.marking.candidates().len();

        // Afterwards every live object is in the old generation.
        self.result.minor = MinorCollector::new(self.heap, true).collect();
        self.finish_marking();

        self.heap.phase = GcPhase::Evacuating;
        self.heap.free_linear_allocation_areas();
        let evacuation = evacuation::evacuate_candidates(self.heap);
        self.heap.free_linear_allocation_areas();
        evacuation::update_pointers(self.heap, &evacuation);
        self.result.pages_evacuated = evacuation.evacuated.len();
        self.result.pages_aborted = evacuation.aborted.len();
        self.result.bytes_evacuated = evacuation.bytes;

        self.heap.phase = GcPhase::Sweeping;
        let sweep = sweeper::sweep(self.heap);
        self.result.bytes_freed = sweep.freed_bytes;
        self.result.pages_released = sweep.released_pages;

        for page in self.heap.marking.finish() {
            if page.chunk().is_flag_set(ChunkFlags::EVACUATION_ABORTED) {
                page.chunk()
                    .clear_flags(ChunkFlags::EVACUATION_CANDIDATE | ChunkFlags::EVACUATION_ABORTED);
            }
        }
        self.heap.pending_release.extend(evacuation.evacuated);

        self.result.old_generation_limit = self.heap.recompute_old_generation_limit();
        self.heap
            .stats
            .record_compaction(self.result.bytes_evacuated, self.result.pages_aborted);
        self.heap
            .stats
            .record_sweep(self.result.bytes_freed, self.result.pages_released);

        tracing::debug!(
            target: "strata_gc::major",
            marked = self.result.marked_bytes,
            evacuated_pages = self.result.pages_evacuated,
            aborted_pages = self.result.pages_aborted,
            freed = self.result.bytes_freed,
            released_pages = self.result.pages_released,
            limit = self.result.old_generation_limit,
            "mark-compact finished"
        );
        self.result
    }

    fn finish_marking(&mut self) {
        self.heap.mark_roots();
        self.heap.marking.drain_barrier_worklist();
        let threads = self.heap.config.marker_threads;
        let visited = drain_parallel(self.heap.marking.worklist(), threads);
        self.heap.marking.add_marked_bytes(visited);
        self.result.marked_bytes = self.heap.marking.marked_bytes();
        debug_assert!(self.heap.marking.is_worklist_empty());
    }
}

// =============================================================================
// Incremental Marking
// =============================================================================

impl Heap {
    /// Begin a marking cycle.
    ///
    /// Selects evacuation candidates, shades the roots and turns on the
    /// marking barrier. Does nothing if a cycle is already running.
    pub fn start_incremental_marking(&mut self) {
        if self.marking.is_active() {
            return;
        }
        self.free_linear_allocation_areas();
        let candidates = self.select_evacuation_candidates();
        for page in &candidates {
            page.chunk().set_flags(ChunkFlags::EVACUATION_CANDIDATE);
            self.old_space.free_list_mut().evict_page(page);
        }
        tracing::debug!(
            target: "strata_gc::major",
            candidates = candidates.len(),
            old = self.old_generation_size(),
            "marking started"
        );
        self.marking.start(candidates);
        self.phase = GcPhase::Marking;
        self.mark_roots();
    }

    /// Visit up to `budget` bytes of grey objects. Returns the bytes visited.
    pub fn incremental_marking_step(&mut self, budget: usize) -> usize {
        if !self.marking.is_active() {
            return 0;
        }
        self.marking.drain_barrier_worklist();
        let visited = drain_with_budget(self.marking.worklist(), budget);
        self.marking.add_marked_bytes(visited);
        self.stats.record_marking_step();
        tracing::trace!(
            target: "strata_gc::major",
            visited,
            total = self.marking.marked_bytes(),
            "marking step"
        );
        visited
    }

    /// Shade every old object referenced from a root.
    pub(crate) fn mark_roots(&mut self) {
        let mut roots = std::mem::take(&mut self.roots);
        {
            let mut local = LocalMarkingWorklist::new(self.marking.worklist());
            roots.visit(&mut |slot: &mut TaggedValue| mark_root(*slot, &mut local));
        }
        self.roots = roots;
    }

    /// Old-space pages worth compacting, emptiest first.
    fn select_evacuation_candidates(&self) -> Vec<PageRef> {
        let threshold = self.config.compaction_threshold;
        let mut candidates: Vec<PageRef> = self
            .old_space
            .pages()
            .iter()
            .copied()
            .filter(|page| !page.chunk().never_evacuate())
            .filter(|page| page.free_bytes() as f64 > threshold * page.area_size() as f64)
            .collect();
        candidates.sort_by_key(|page| page.allocated_bytes());
        candidates.truncate(self.config.max_evacuation_candidates);
        candidates
    }

    /// Set the next old-generation limit from what survived.
    fn recompute_old_generation_limit(&self) -> usize {
        let pending: usize = self.pending_release.iter().map(|page| page.size()).sum();
        let surviving = self.memory.old_generation_committed().saturating_sub(pending);
        let grown = (surviving as f64 * self.config.old_growth_factor) as usize;
        self.memory
            .set_old_generation_limit(grown.max(self.config.initial_old_size));
        self.memory.old_generation_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapConfig;
    use crate::heap::SpaceKind;
    use crate::objects::{FixedArray, HeapObject};

    fn heap() -> Heap {
        Heap::new(HeapConfig::for_testing()).unwrap()
    }

    fn array_of(heap: &Heap, handle: crate::roots::GlobalHandle) -> FixedArray {
        let reference = heap.global(handle).unwrap().as_heap_reference().unwrap();
        FixedArray::cast(HeapObject::from_reference(reference)).unwrap()
    }

    #[test]
    fn test_unreachable_old_objects_are_swept() {
        let mut heap = heap();
        let keep = heap.new_fixed_array(4, SpaceKind::Old);
        let handle = heap.create_global(keep.to_tagged());
        for _ in 0..100 {
            heap.new_fixed_array(16, SpaceKind::Old);
        }
        let before = heap.old_space().size();

        let result = MajorCollector::new(&mut heap).collect();
        assert!(result.bytes_freed > 0);
        assert!(heap.old_space().size() < before);
        assert_eq!(array_of(&heap, handle).length(), 4);
        assert!(!heap.is_marking());
    }

    #[test]
    fn test_marking_reaches_transitive_objects() {
        let mut heap = heap();
        let head = heap.new_fixed_array(1, SpaceKind::Old);
        let handle = heap.create_global(head.to_tagged());
        let middle = heap.new_fixed_array(1, SpaceKind::Old);
        let tail = heap.new_byte_array(32, SpaceKind::Old);
        heap.store_field(head.reference(), FixedArray::offset_of(0), middle.to_tagged())
            .unwrap();
        heap.store_field(middle.reference(), FixedArray::offset_of(0), tail.to_tagged())
            .unwrap();

        MajorCollector::new(&mut heap).collect();

        let head = array_of(&heap, handle);
        let middle = head.get(0).unwrap().as_heap_reference().unwrap();
        let middle = FixedArray::cast(HeapObject::from_reference(middle)).unwrap();
        let tail = middle.get(0).unwrap().as_heap_reference().unwrap();
        let tail = crate::objects::ByteArray::cast(HeapObject::from_reference(tail)).unwrap();
        assert_eq!(tail.length(), 32);
    }

    #[test]
    fn test_incremental_marking_steps_and_barrier() {
        let mut heap = heap();
        let root = heap.new_fixed_array(1, SpaceKind::Old);
        let handle = heap.create_global(root.to_tagged());
        // Unreachable when marking starts.
        let hidden = heap.new_fixed_array(1, SpaceKind::Old);

        heap.start_incremental_marking();
        assert!(heap.is_marking());
        assert_eq!(heap.phase(), GcPhase::Marking);
        while heap.incremental_marking_step(1024) > 0 {}
        assert!(heap.marking().is_worklist_empty());
        assert!(!hidden.object().page().is_marked(hidden.object().address()));

        // The root is black now; storing a white object into it must shade it.
        heap.store_field(root.reference(), FixedArray::offset_of(0), hidden.to_tagged())
            .unwrap();
        assert!(hidden.object().page().is_marked(hidden.object().address()));

        heap.collect_garbage(crate::GcKind::Major, crate::GcReason::Testing);
        let root = array_of(&heap, handle);
        assert!(root.get(0).unwrap().is_heap_reference());
        assert_eq!(heap.phase(), GcPhase::Idle);
    }

    #[test]
    fn test_sparse_page_is_evacuated() {
        let mut heap = Heap::new(HeapConfig {
            compaction_threshold: 0.5,
            ..HeapConfig::for_testing()
        })
        .unwrap();
        let mut kept = Vec::new();
        for index in 0..400 {
            let array = heap.new_fixed_array(30, SpaceKind::Old);
            if index % 10 == 0 {
                kept.push(heap.create_global(array.to_tagged()));
            }
        }
        heap.store_field(
            array_of(&heap, kept[0]).reference(),
            FixedArray::offset_of(0),
            array_of(&heap, kept[1]).to_tagged(),
        )
        .unwrap();

        // The page is less than half full, so it is a candidate.
        let result = MajorCollector::new(&mut heap).collect();
        assert_eq!(result.pages_evacuated, 1);
        assert!(result.bytes_evacuated > 0);

        let first = array_of(&heap, kept[0]);
        assert!(!first.object().chunk().is_evacuation_candidate());
        assert_eq!(first.get(0), Ok(array_of(&heap, kept[1]).to_tagged()));
        for handle in &kept {
            assert_eq!(array_of(&heap, *handle).length(), 30);
        }
    }

    #[test]
    fn test_limit_is_recomputed() {
        let mut heap = heap();
        let result = MajorCollector::new(&mut heap).collect();
        assert_eq!(result.old_generation_limit, heap.config().initial_old_size);
        assert_eq!(heap.memory().old_generation_limit(), result.old_generation_limit);
    }
}
