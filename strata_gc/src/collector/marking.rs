//! Marking: side-bitmap marking with a segmented, shareable worklist.
//!
//! ```text
//!   thread-local                      global pool (Mutex)
//!  ┌──────────────┐  full segment   ┌─────┬─────┬─────┐
//!  │ push segment │ ──────────────▶ │ seg │ seg │ ... │
//!  │ pop segment  │ ◀────────────── └─────┴─────┴─────┘
//!  └──────────────┘   when empty
//! ```
//!
//! Objects are marked before they are pushed, so each object is visited at
//! most once per cycle. Visiting an object shades every old-generation
//! object it references and records slots that point into evacuation
//! candidates. Young objects are never marked here: the pause that finishes
//! a cycle promotes all of them first.

use crate::barrier::RememberedSetType;
use crate::memory::PageRef;
use crate::objects::{HeapObject, Slot};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::TaggedValue;

/// Objects per worklist segment.
pub const SEGMENT_SIZE: usize = 64;

type Segment = SmallVec<[HeapObject; SEGMENT_SIZE]>;

// =============================================================================
// Worklist
// =============================================================================

/// Pool of published segments shared by all markers.
#[derive(Default)]
pub struct MarkingWorklist {
    pool: Mutex<Vec<Segment>>,
}

impl MarkingWorklist {
    /// Create an empty worklist.
    pub fn new() -> Self {
        Self::default()
    }

    fn publish(&self, segment: Segment) {
        self.pool.lock().push(segment);
    }

    fn steal(&self) -> Option<Segment> {
        self.pool.lock().pop()
    }

    /// Check whether no segment is published.
    pub fn is_empty(&self) -> bool {
        self.pool.lock().is_empty()
    }

    /// Objects in published segments.
    pub fn len(&self) -> usize {
        self.pool.lock().iter().map(SmallVec::len).sum()
    }

    /// Publish a batch of objects at once.
    pub fn push_all(&self, objects: impl IntoIterator<Item = HeapObject>) {
        let mut local = LocalMarkingWorklist::new(self);
        for object in objects {
            local.push(object);
        }
    }

    /// Drop every published segment.
    pub fn clear(&self) {
        self.pool.lock().clear();
    }
}

/// A marker's private view of the worklist.
///
/// Pushes fill a private segment that is published once full; pops drain
/// private segments before stealing from the pool. Remaining private work
/// is published on drop.
pub struct LocalMarkingWorklist<'a> {
    global: &'a MarkingWorklist,
    push_segment: Segment,
    pop_segment: Segment,
}

impl<'a> LocalMarkingWorklist<'a> {
    /// Attach to `global`.
    pub fn new(global: &'a MarkingWorklist) -> Self {
        Self {
            global,
            push_segment: Segment::new(),
            pop_segment: Segment::new(),
        }
    }

    /// Add a grey object.
    #[inline]
    pub fn push(&mut self, object: HeapObject) {
        if self.push_segment.len() == SEGMENT_SIZE {
            let full = std::mem::take(&mut self.push_segment);
            self.global.publish(full);
        }
        self.push_segment.push(object);
    }

    /// Take a grey object.
    #[inline]
    pub fn pop(&mut self) -> Option<HeapObject> {
        if let Some(object) = self.pop_segment.pop() {
            return Some(object);
        }
        if !self.push_segment.is_empty() {
            std::mem::swap(&mut self.push_segment, &mut self.pop_segment);
            return self.pop_segment.pop();
        }
        self.pop_segment = self.global.steal()?;
        self.pop_segment.pop()
    }

    /// Publish all private work.
    pub fn publish(&mut self) {
        for segment in [&mut self.push_segment, &mut self.pop_segment] {
            if !segment.is_empty() {
                self.global.publish(std::mem::take(segment));
            }
        }
    }
}

impl Drop for LocalMarkingWorklist<'_> {
    fn drop(&mut self) {
        self.publish();
    }
}

// =============================================================================
// Marking State
// =============================================================================

/// Per-heap marking state.
#[derive(Default)]
pub struct MarkingState {
    active: bool,
    worklist: MarkingWorklist,
    /// Objects shaded by the write barrier, drained into the worklist.
    barrier_worklist: Mutex<Vec<HeapObject>>,
    candidates: Vec<PageRef>,
    marked_bytes: usize,
}

impl MarkingState {
    /// Create an idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a marking cycle is in progress.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn start(&mut self, candidates: Vec<PageRef>) {
        debug_assert!(!self.active);
        self.active = true;
        self.candidates = candidates;
        self.marked_bytes = 0;
    }

    pub(crate) fn finish(&mut self) -> Vec<PageRef> {
        self.active = false;
        self.worklist.clear();
        self.barrier_worklist.lock().clear();
        std::mem::take(&mut self.candidates)
    }

    /// The shared worklist.
    #[inline]
    pub fn worklist(&self) -> &MarkingWorklist {
        &self.worklist
    }

    /// Pages selected for evacuation this cycle.
    #[inline]
    pub fn candidates(&self) -> &[PageRef] {
        &self.candidates
    }

    /// Bytes visited so far this cycle.
    #[inline]
    pub fn marked_bytes(&self) -> usize {
        self.marked_bytes
    }

    pub(crate) fn add_marked_bytes(&mut self, bytes: usize) {
        self.marked_bytes += bytes;
    }

    /// Queue an object shaded outside a marker.
    #[inline]
    pub(crate) fn push_from_barrier(&self, object: HeapObject) {
        self.barrier_worklist.lock().push(object);
    }

    /// Move barrier-shaded objects onto the shared worklist.
    pub(crate) fn drain_barrier_worklist(&self) {
        let shaded = std::mem::take(&mut *self.barrier_worklist.lock());
        if !shaded.is_empty() {
            self.worklist.push_all(shaded);
        }
    }

    /// Check whether any grey object remains.
    pub fn is_worklist_empty(&self) -> bool {
        self.worklist.is_empty() && self.barrier_worklist.lock().is_empty()
    }
}

// =============================================================================
// Visiting
// =============================================================================

/// Mark `object` if it is an old-generation object. True if newly marked.
#[inline]
pub(crate) fn mark_object(object: HeapObject) -> bool {
    let chunk = object.chunk();
    if chunk.is_read_only() || chunk.in_young_generation() {
        return false;
    }
    let page = object.page();
    if page.mark(object.address()) {
        page.increment_live_bytes(object.size());
        true
    } else {
        false
    }
}

/// Shade the target of a root slot.
#[inline]
pub(crate) fn mark_root(value: TaggedValue, local: &mut LocalMarkingWorklist<'_>) {
    if let Some(reference) = value.as_heap_reference() {
        let object = HeapObject::from_reference(reference);
        if mark_object(object) {
            local.push(object);
        }
    }
}

/// Shade the target of `slot` in `host`, recording the slot when the target
/// may move.
#[inline]
fn mark_slot(
    host_page: PageRef,
    host_is_candidate: bool,
    slot: Slot,
    local: &mut LocalMarkingWorklist<'_>,
) {
    let Some(reference) = slot.load().as_heap_reference() else {
        return;
    };
    let target = HeapObject::from_reference(reference);
    if target.chunk().is_evacuation_candidate() && !host_is_candidate {
        host_page.record_slot(RememberedSetType::OldToOld, slot.address());
    }
    if mark_object(target) {
        local.push(target);
    }
}

/// Visit the body of a grey object. Returns its size.
pub(crate) fn visit_object(object: HeapObject, local: &mut LocalMarkingWorklist<'_>) -> usize {
    let kind = object.kind();
    let host_page = object.page();
    let host_is_candidate = object.chunk().is_evacuation_candidate();
    kind.for_each_pointer_slot(|slot| mark_slot(host_page, host_is_candidate, slot, local));
    kind.size()
}

/// Visit grey objects until `budget` bytes were visited or the worklist is
/// empty. Returns the bytes visited.
pub(crate) fn drain_with_budget(worklist: &MarkingWorklist, budget: usize) -> usize {
    let mut local = LocalMarkingWorklist::new(worklist);
    let mut visited = 0;
    while visited < budget {
        let Some(object) = local.pop() else { break };
        visited += visit_object(object, &mut local);
    }
    visited
}

/// Empty the worklist with `threads` markers. Returns the bytes visited.
///
/// Markers that run dry wait for published segments and stop once every
/// marker is idle and the pool is empty.
pub(crate) fn drain_parallel(worklist: &MarkingWorklist, threads: usize) -> usize {
    if threads <= 1 {
        return drain_with_budget(worklist, usize::MAX);
    }

    let active = AtomicUsize::new(threads);
    std::thread::scope(|scope| {
        let markers: Vec<_> = (0..threads)
            .map(|_| {
                let active = &active;
                scope.spawn(move || {
                    let mut local = LocalMarkingWorklist::new(worklist);
                    let mut visited = 0;
                    loop {
                        while let Some(object) = local.pop() {
                            visited += visit_object(object, &mut local);
                        }
                        active.fetch_sub(1, Ordering::SeqCst);
                        loop {
                            if !worklist.is_empty() {
                                active.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                            if active.load(Ordering::SeqCst) == 0 {
                                return visited;
                            }
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        markers
            .into_iter()
            .map(|marker| {
                marker
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .sum()
    })
}
