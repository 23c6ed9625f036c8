//! Garbage collection algorithms.
//!
//! - [`minor`]: semispace scavenger for the young generation
//! - [`major`]: incremental mark, evacuate and sweep for the whole heap
//! - [`marking`]: worklists and object visiting shared by both
//!
//! Every collection enters through [`Heap::collect_garbage`], which wraps the
//! collector in a tracing span, records statistics and a [`GcEvent`] and
//! optionally verifies the heap afterwards.

mod evacuation;
pub mod major;
pub(crate) mod marking;
pub mod minor;
mod sweeper;

pub use major::{MajorCollector, MajorResult};
pub use marking::{LocalMarkingWorklist, MarkingState, MarkingWorklist};
pub use minor::{MinorCollector, MinorResult};

use crate::error::contract_violation;
use crate::heap::Heap;
use crate::stats::GcTimer;
use crate::tracer::GcEvent;

/// Which collector runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcKind {
    /// Scavenge of the young generation.
    Minor,
    /// Mark-compact of the whole heap.
    Major,
}

/// Why a collection was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcReason {
    /// A space could not satisfy an allocation.
    AllocationFailure,
    /// Incremental marking ran out of work.
    FinalizeMarking,
    /// A scavenge did not free enough young memory.
    LastResort,
    /// Requested by the embedder.
    Explicit,
    /// Requested by a test.
    Testing,
}

/// What the collector is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GcPhase {
    /// No collection in progress.
    #[default]
    Idle,
    /// Incremental marking is running between allocations.
    Marking,
    /// Moving objects off evacuation candidates and updating pointers.
    Evacuating,
    /// Rebuilding free lists.
    Sweeping,
}

impl Heap {
    /// Run a collection of `kind` now.
    ///
    /// Every handle and root-provider slot is updated in place; any other
    /// reference held across this call is stale afterwards.
    pub fn collect_garbage(&mut self, kind: GcKind, reason: GcReason) {
        let span = tracing::info_span!(target: "strata_gc::gc", "gc", ?kind, ?reason);
        let _entered = span.enter();
        let timer = GcTimer::start(match kind {
            GcKind::Minor => "minor_gc",
            GcKind::Major => "major_gc",
        });

        self.release_pending_pages();
        let bytes_before = self.size_of_objects();
        let mut event = GcEvent {
            sequence: self.tracer.next_sequence(),
            kind,
            reason,
            duration: Default::default(),
            bytes_before,
            bytes_after: 0,
            promoted: 0,
            survived: 0,
            pages_evacuated: 0,
            pages_released: 0,
        };

        match kind {
            GcKind::Minor => {
                let result = MinorCollector::new(self, false).collect();
                event.promoted = result.bytes_promoted;
                event.survived = result.bytes_survived;
            }
            GcKind::Major => {
                let result = MajorCollector::new(self).collect();
                event.promoted = result.minor.bytes_promoted;
                event.survived = result.minor.bytes_survived;
                event.pages_evacuated = result.pages_evacuated;
                event.pages_released = result.pages_released;
            }
        }

        let duration = timer.stop();
        self.stats.record_collection(kind, duration);
        let young = self.young_generation_size();
        let old = self.old_generation_size();
        self.stats.record_heap_size(young, old);
        event.duration = duration;
        event.bytes_after = young + old;
        tracing::debug!(
            target: "strata_gc::gc",
            before = event.bytes_before,
            after = event.bytes_after,
            promoted = event.promoted,
            ?duration,
            "collection finished"
        );
        self.tracer.record(event);

        if self.config.verify_heap {
            if let Err(error) = self.verify() {
                contract_violation!("heap verification failed after {kind:?} gc: {error}");
            }
        }
        if !self.marking.is_active() {
            self.phase = GcPhase::Idle;
        }
    }
}
