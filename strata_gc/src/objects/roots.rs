//! Immortal maps and objects created once in read-only space.

use super::layout::{MAP_SIZE, fixed_array_size};
use super::{FixedArray, HeapObject, InstanceType, Map};
use crate::error::AllocationFailure;
use crate::heap::ReadOnlySpace;
use strata_core::HeapReference;

/// Handles to the root maps.
///
/// Created once per heap before any other space exists. The objects live in
/// read-only space, never move and are never collected.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyRoots {
    meta_map: Map,
    free_space_map: Map,
    one_pointer_filler_map: Map,
    two_pointer_filler_map: Map,
    fixed_array_map: Map,
    byte_array_map: Map,
    code_map: Map,
    empty_fixed_array: FixedArray,
}

impl ReadOnlyRoots {
    /// Allocate and initialize the root objects.
    pub(crate) fn bootstrap(space: &mut ReadOnlySpace) -> Result<Self, AllocationFailure> {
        let meta_object = HeapObject::from_address(space.allocate(MAP_SIZE)?);
        let meta_map = Map::initialize(meta_object, None, InstanceType::Map, MAP_SIZE);

        let mut new_map = |instance_type, instance_size| -> Result<Map, AllocationFailure> {
            let object = HeapObject::from_address(space.allocate(MAP_SIZE)?);
            Ok(Map::initialize(
                object,
                Some(meta_map),
                instance_type,
                instance_size,
            ))
        };

        let free_space_map = new_map(InstanceType::FreeSpace, 0)?;
        let one_pointer_filler_map = new_map(InstanceType::OnePointerFiller, 8)?;
        let two_pointer_filler_map = new_map(InstanceType::TwoPointerFiller, 16)?;
        let fixed_array_map = new_map(InstanceType::FixedArray, 0)?;
        let byte_array_map = new_map(InstanceType::ByteArray, 0)?;
        let code_map = new_map(InstanceType::Code, 0)?;

        let empty = HeapObject::from_address(space.allocate(fixed_array_size(0))?);
        let empty_fixed_array = FixedArray::initialize(empty, fixed_array_map, 0);

        Ok(Self {
            meta_map,
            free_space_map,
            one_pointer_filler_map,
            two_pointer_filler_map,
            fixed_array_map,
            byte_array_map,
            code_map,
            empty_fixed_array,
        })
    }

    /// Map of all maps.
    #[inline]
    pub fn meta_map(&self) -> Map {
        self.meta_map
    }

    /// Map of free-list nodes.
    #[inline]
    pub fn free_space_map(&self) -> Map {
        self.free_space_map
    }

    /// Map of one-word fillers.
    #[inline]
    pub fn one_pointer_filler_map(&self) -> Map {
        self.one_pointer_filler_map
    }

    /// Map of two-word fillers.
    #[inline]
    pub fn two_pointer_filler_map(&self) -> Map {
        self.two_pointer_filler_map
    }

    /// Map of tagged arrays.
    #[inline]
    pub fn fixed_array_map(&self) -> Map {
        self.fixed_array_map
    }

    /// Map of byte arrays.
    #[inline]
    pub fn byte_array_map(&self) -> Map {
        self.byte_array_map
    }

    /// Map of code objects.
    #[inline]
    pub fn code_map(&self) -> Map {
        self.code_map
    }

    /// The canonical zero-length array.
    #[inline]
    pub fn empty_fixed_array(&self) -> FixedArray {
        self.empty_fixed_array
    }

    /// Check whether `map` is the map of a hole.
    #[inline]
    pub fn is_filler_map(&self, map: HeapReference) -> bool {
        map == self.free_space_map.object().reference()
            || map == self.one_pointer_filler_map.object().reference()
            || map == self.two_pointer_filler_map.object().reference()
    }
}
