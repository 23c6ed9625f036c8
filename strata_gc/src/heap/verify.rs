//! Heap verification.
//!
//! Walks every page object by object and checks:
//! - each header is a well-formed map whose own map is the meta map
//! - objects tile their page without overrunning it; forwarded objects left
//!   on an aborted candidate are stepped over
//! - every pointer field refers to the start of a live object
//! - every old-to-new pointer has a remembered-set entry
//! - free-list regions stay inside their page and never overlap
//!
//! Enabled after each collection by `HeapConfig::verify_heap`.

use super::{Heap, LinearAllocationArea, PagedSpace, Space};
use crate::barrier::RememberedSetType;
use crate::error::VerificationError;
use crate::objects::{HeapObject, Map, MapWord};
use rustc_hash::FxHashSet;
use strata_core::Address;

/// Objects found by the walk.
#[derive(Default)]
struct HeapWalk {
    starts: FxHashSet<Address>,
    objects: Vec<HeapObject>,
}

impl Heap {
    /// Check the heap invariants. Returns the first violation found.
    pub fn verify(&self) -> Result<(), VerificationError> {
        let mut walk = HeapWalk::default();

        for space in [&self.old_space, &self.code_space, &self.shared_space] {
            let lab = space.linear_allocation_area();
            for page in space.pages() {
                self.walk_region(&mut walk, page.area_start(), page.area_end(), lab)?;
            }
        }
        for (index, page) in self.new_space.to_space().pages().iter().enumerate() {
            let limit = self.new_space.object_limit(index);
            self.walk_region(&mut walk, page.area_start(), limit, LinearAllocationArea::EMPTY)?;
        }
        for space in [
            &self.new_lo_space,
            &self.lo_space,
            &self.code_lo_space,
            &self.shared_lo_space,
        ] {
            for object in space.objects() {
                self.check_map(object)?;
                walk.starts.insert(object.address());
                walk.objects.push(object);
            }
        }

        for object in &walk.objects {
            self.check_pointers(&walk, *object)?;
        }
        for space in [&self.old_space, &self.code_space, &self.shared_space] {
            check_free_list(space)?;
        }
        tracing::trace!(
            target: "strata_gc::verify",
            objects = walk.objects.len(),
            "heap verified"
        );
        Ok(())
    }

    fn walk_region(
        &self,
        walk: &mut HeapWalk,
        start: Address,
        end: Address,
        lab: LinearAllocationArea,
    ) -> Result<(), VerificationError> {
        let mut cursor = start;
        while cursor < end {
            if cursor == lab.top() && !lab.is_empty() {
                cursor = lab.limit();
                continue;
            }
            let object = HeapObject::from_address(cursor);
            if let MapWord::ForwardedTo(_) = object.map_word() {
                // Left behind on an aborted candidate until the next cycle.
                cursor = cursor.offset(object.size_following_forwarding());
                continue;
            }
            self.check_map(object)?;
            let size = object.size();
            if size == 0 || cursor.offset(size) > end {
                return Err(VerificationError::ObjectOverrunsPage(cursor));
            }
            walk.starts.insert(cursor);
            walk.objects.push(object);
            cursor = cursor.offset(size);
        }
        Ok(())
    }

    fn check_map(&self, object: HeapObject) -> Result<(), VerificationError> {
        let invalid = VerificationError::InvalidMap(object.address());
        let MapWord::Map(map) = object.map_word() else {
            return Err(invalid);
        };
        if self.memory.lookup(map.address()).is_none() {
            return Err(invalid);
        }
        let map_object = HeapObject::from_reference(map);
        let meta = self.read_only_roots.meta_map().object().reference();
        match map_object.map_word() {
            MapWord::Map(map_map) if map_map == meta => {}
            _ => return Err(invalid),
        }
        if !Map::from_object(map_object).is_well_formed() {
            return Err(invalid);
        }
        Ok(())
    }

    fn check_pointers(&self, walk: &HeapWalk, host: HeapObject) -> Result<(), VerificationError> {
        let kind = host.kind();
        if kind.is_filler() {
            return Ok(());
        }
        let host_young = host.chunk().in_young_generation();
        let host_page = host.page();
        let mut result = Ok(());
        kind.for_each_pointer_slot(|slot| {
            if result.is_err() {
                return;
            }
            let Some(reference) = slot.load().as_heap_reference() else {
                return;
            };
            let target = reference.address();
            let dangling = VerificationError::DanglingPointer {
                host: host.address(),
                slot: slot.address(),
                target,
            };
            let Some(target_page) = self.memory.lookup(target) else {
                result = Err(dangling);
                return;
            };
            let target_chunk = target_page.chunk();
            if target_chunk.is_read_only() {
                return;
            }
            if !walk.starts.contains(&target) || HeapObject::from_address(target).kind().is_filler() {
                result = Err(dangling);
                return;
            }
            if !host_young
                && target_chunk.in_young_generation()
                && !host_page.contains_slot(RememberedSetType::OldToNew, slot.address())
            {
                result = Err(VerificationError::MissingRememberedSlot {
                    host: host.address(),
                    slot: slot.address(),
                });
            }
        });
        result
    }
}

fn check_free_list(space: &PagedSpace) -> Result<(), VerificationError> {
    let mut regions: Vec<_> = space.free_list().iter_regions().collect();
    regions.sort_by_key(|region| region.start);
    let mut previous_end = Address::NULL;
    for region in regions {
        let escapes = !space.pages().iter().any(|page| {
            page.contains(region.start) && region.end() <= page.area_end()
        });
        if escapes || region.start < previous_end {
            return Err(VerificationError::BadFreeRegion(region.start));
        }
        previous_end = region.end();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapConfig;
    use crate::heap::SpaceKind;
    use crate::objects::layout::LENGTH_OFFSET;
    use strata_core::TaggedValue;

    #[test]
    fn test_fresh_heap_verifies() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        assert_eq!(heap.verify(), Ok(()));
        heap.new_fixed_array(8, SpaceKind::New);
        heap.new_byte_array(100, SpaceKind::Old);
        heap.new_code(&[0x90; 16], TaggedValue::ZERO);
        assert_eq!(heap.verify(), Ok(()));
    }

    #[test]
    fn test_dangling_pointer_is_reported() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let array = heap.new_fixed_array(1, SpaceKind::Old);
        let local = [0u64; 4];
        let bogus = TaggedValue::from_raw(Address::from_ptr(&local).as_usize() | 1);
        array.object().set_field_raw(crate::objects::FixedArray::offset_of(0), bogus);
        assert!(matches!(
            heap.verify(),
            Err(VerificationError::DanglingPointer { .. })
        ));
    }

    #[test]
    fn test_unrecorded_old_to_new_pointer_is_reported() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let old = heap.new_fixed_array(1, SpaceKind::Old);
        let young = heap.new_fixed_array(1, SpaceKind::New);
        old.object()
            .set_field_raw(crate::objects::FixedArray::offset_of(0), young.to_tagged());
        assert!(matches!(
            heap.verify(),
            Err(VerificationError::MissingRememberedSlot { .. })
        ));

        heap.store_field(old.reference(), crate::objects::FixedArray::offset_of(0), young.to_tagged())
            .unwrap();
        assert_eq!(heap.verify(), Ok(()));
    }

    #[test]
    fn test_corrupt_length_is_reported() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let array = heap.new_fixed_array(1, SpaceKind::New);
        let huge = TaggedValue::from_small_int(1 << 40).unwrap();
        array.object().set_field_raw(LENGTH_OFFSET, huge);
        assert_eq!(
            heap.verify(),
            Err(VerificationError::ObjectOverrunsPage(array.object().address()))
        );
    }
}
