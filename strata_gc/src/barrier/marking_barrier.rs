//! Marking half of the write barrier.
//!
//! While incremental marking runs, the mutator may store a white object into
//! a black one and then drop every other path to it. Shading the stored
//! value when the host is already marked keeps the strong tri-colour
//! invariant: no black object points to a white one.

use super::RememberedSetType;
use crate::collector::marking::{MarkingState, mark_object};
use crate::objects::HeapObject;
use strata_core::Address;

/// Shade `target`, just stored into `slot` of `host`.
#[inline]
pub(super) fn mark_stored_value(
    marking: &MarkingState,
    host: HeapObject,
    slot: Address,
    target: HeapObject,
) {
    let target_chunk = target.chunk();
    if target_chunk.is_read_only() || target_chunk.in_young_generation() {
        return;
    }
    let host_chunk = host.chunk();
    // Young hosts are visited when the final pause promotes them.
    if host_chunk.in_young_generation() {
        return;
    }
    if target_chunk.is_evacuation_candidate() && !host_chunk.is_evacuation_candidate() {
        host.page().record_slot(RememberedSetType::OldToOld, slot);
    }
    if host.page().is_marked(host.address()) && mark_object(target) {
        marking.push_from_barrier(target);
    }
}
