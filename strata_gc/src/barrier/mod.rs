//! Write barrier: the single choke point for pointer stores.
//!
//! Every store of a tagged value into a heap object goes through
//! [`FieldSlot::store`] or [`Heap::store_field`], which write the word and
//! then run [`Heap::on_store`]. The barrier inspects the chunk flags of host
//! and value and records the slot where a later collection needs it:
//!
//! ```text
//!  host            value                 action
//!  ─────────────── ───────────────────── ─────────────────────────────
//!  any             small integer         nothing
//!  read-only       any                   contract violation
//!  old generation  young                 record OLD_TO_NEW
//!  not shared      writable shared       record OLD_TO_SHARED
//!  (marking)       old, host marked      mark value, queue for visiting
//!  (marking)       on evac. candidate    record OLD_TO_OLD
//! ```
//!
//! The fast path is a tag test and two flag loads. Recording a slot is a
//! single atomic `fetch_or` with release ordering.

mod marking_barrier;
mod remembered_set;
mod slot_set;

pub use remembered_set::{RememberedSet, RememberedSetType};
pub use slot_set::{SlotCallbackResult, SlotSet};

use crate::error::{ObjectError, contract_violation};
use crate::heap::Heap;
use crate::objects::layout::MAP_OFFSET;
use crate::objects::{HeapObject, MapWord, Slot};
use strata_core::{HeapReference, TaggedValue};

// =============================================================================
// Field Slots
// =============================================================================

/// A validated pointer field of a heap object.
///
/// Construction checks that the offset names a tagged field other than the
/// map word and that the host is writable, so [`store`](Self::store) cannot
/// fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSlot {
    host: HeapObject,
    offset: usize,
}

impl FieldSlot {
    /// Validate `offset` as a pointer field of `host`.
    pub fn new(host: HeapObject, offset: usize) -> Result<Self, ObjectError> {
        if host.chunk().is_read_only() {
            return Err(ObjectError::ReadOnlyHost(host.address()));
        }
        let kind = host.kind();
        let size = kind.size();
        if offset >= size {
            return Err(ObjectError::FieldOutOfBounds { offset, size });
        }
        if offset == MAP_OFFSET || !kind.is_pointer_offset(offset) {
            return Err(ObjectError::NotAPointerField(offset));
        }
        Ok(Self { host, offset })
    }

    /// Object holding the field.
    #[inline]
    pub fn host(&self) -> HeapObject {
        self.host
    }

    /// Byte offset of the field.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    fn slot(&self) -> Slot {
        Slot::new(self.host.address().offset(self.offset))
    }

    /// Current value.
    #[inline]
    pub fn load(&self) -> TaggedValue {
        self.slot().load()
    }

    /// Write `value` and run the write barrier.
    #[inline]
    pub fn store(self, heap: &Heap, value: TaggedValue) {
        self.slot().store_raw(value);
        heap.on_store(self.host, self.offset, value);
    }
}

// =============================================================================
// Barrier
// =============================================================================

impl Heap {
    /// Write barrier for a store of `value` into `host` at `offset`.
    ///
    /// Must run after every pointer store into a heap object. Stores made
    /// through [`FieldSlot`] or [`store_field`](Self::store_field) call it
    /// already.
    #[inline]
    pub fn on_store(&self, host: HeapObject, offset: usize, value: TaggedValue) {
        let Some(reference) = value.as_heap_reference() else {
            return;
        };
        let host_chunk = host.chunk();
        if host_chunk.is_read_only() {
            contract_violation!("store into read-only object at {}", host.address());
            return;
        }

        let slot = host.address().offset(offset);
        let target = HeapObject::from_reference(reference);
        let target_chunk = target.chunk();

        if target_chunk.in_young_generation() && !host_chunk.in_young_generation() {
            host.page().record_slot(RememberedSetType::OldToNew, slot);
        }
        if target_chunk.in_writable_shared_space() && !host_chunk.in_writable_shared_space() {
            host.page().record_slot(RememberedSetType::OldToShared, slot);
        }
        if self.marking.is_active() {
            marking_barrier::mark_stored_value(&self.marking, host, slot, target);
        }
    }

    /// Store `value` into field `offset` of `host`, running the barrier.
    ///
    /// Fails if `host` is not an object of this heap or the offset is not a
    /// writable pointer field.
    pub fn store_field(
        &self,
        host: HeapReference,
        offset: usize,
        value: TaggedValue,
    ) -> Result<(), ObjectError> {
        let object = self.checked_object(host)?;
        FieldSlot::new(object, offset)?.store(self, value);
        Ok(())
    }

    /// Read field `offset` of `host`.
    pub fn read_field(&self, host: HeapReference, offset: usize) -> Result<TaggedValue, ObjectError> {
        let object = self.checked_object(host)?;
        let size = object.size();
        if offset >= size || offset % strata_core::WORD_SIZE != 0 {
            return Err(ObjectError::FieldOutOfBounds { offset, size });
        }
        Ok(object.field(offset))
    }

    /// Resolve `reference` to an object in a registered page with a map.
    pub(crate) fn checked_object(&self, reference: HeapReference) -> Result<HeapObject, ObjectError> {
        let address = reference.address();
        let page = self
            .memory
            .lookup(address)
            .ok_or(ObjectError::NotAHeapObject(address))?;
        if !page.contains(address) {
            return Err(ObjectError::NotAHeapObject(address));
        }
        let object = HeapObject::from_reference(reference);
        match object.map_word() {
            MapWord::Map(_) => Ok(object),
            MapWord::ForwardedTo(_) | MapWord::BeingMoved => {
                Err(ObjectError::NotAHeapObject(address))
            }
        }
    }
}
