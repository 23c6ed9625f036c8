//! Maps: the layout descriptors every object header points to.

use super::HeapObject;
use super::layout::{MAP_INSTANCE_SIZE_OFFSET, MAP_INSTANCE_TYPE_OFFSET};
use strata_core::TaggedValue;

/// Closed set of object layouts.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceType {
    /// A map.
    Map = 0,
    /// Free-list node.
    FreeSpace = 1,
    /// One-word hole.
    OnePointerFiller = 2,
    /// Two-word hole.
    TwoPointerFiller = 3,
    /// Array of tagged values.
    FixedArray = 4,
    /// Array of raw bytes.
    ByteArray = 5,
    /// Script object with in-object tagged fields.
    JsObject = 6,
    /// Executable code with an embedded constant reference.
    Code = 7,
}

impl InstanceType {
    /// Decode from the integer stored in a map.
    pub fn from_i64(raw: i64) -> Option<Self> {
        Some(match raw {
            0 => InstanceType::Map,
            1 => InstanceType::FreeSpace,
            2 => InstanceType::OnePointerFiller,
            3 => InstanceType::TwoPointerFiller,
            4 => InstanceType::FixedArray,
            5 => InstanceType::ByteArray,
            6 => InstanceType::JsObject,
            7 => InstanceType::Code,
            _ => return None,
        })
    }

    /// Holes the allocator and sweeper leave behind.
    #[inline]
    pub fn is_filler(self) -> bool {
        matches!(
            self,
            InstanceType::FreeSpace
                | InstanceType::OnePointerFiller
                | InstanceType::TwoPointerFiller
        )
    }
}

/// Typed view of a map object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Map(HeapObject);

impl Map {
    #[inline]
    pub(crate) fn from_object(object: HeapObject) -> Self {
        Self(object)
    }

    /// The underlying object.
    #[inline]
    pub fn object(self) -> HeapObject {
        self.0
    }

    /// Instance type of objects using this map.
    #[inline]
    pub fn instance_type(self) -> InstanceType {
        let raw = (self.0.read_word(MAP_INSTANCE_TYPE_OFFSET) as i64) >> 1;
        match InstanceType::from_i64(raw) {
            Some(instance_type) => instance_type,
            None => panic!("map at {} has corrupt instance type {raw}", self.0.address()),
        }
    }

    /// Fixed instance size in bytes, or 0 for variable-sized types.
    #[inline]
    pub fn instance_size(self) -> usize {
        ((self.0.read_word(MAP_INSTANCE_SIZE_OFFSET) as i64) >> 1) as usize
    }

    /// Check the map's own header points at a map whose type is `Map`.
    pub fn is_well_formed(self) -> bool {
        let instance_type = self.0.field(MAP_INSTANCE_TYPE_OFFSET);
        let instance_size = self.0.field(MAP_INSTANCE_SIZE_OFFSET);
        instance_type.is_small_int()
            && instance_size.is_small_int()
            && instance_type
                .to_small_int()
                .ok()
                .and_then(InstanceType::from_i64)
                .is_some()
    }

    /// Initialize a map at `object`.
    pub(crate) fn initialize(
        object: HeapObject,
        meta_map: Option<Map>,
        instance_type: InstanceType,
        instance_size: usize,
    ) -> Map {
        let map = Map(object);
        match meta_map {
            Some(meta) => object.set_map(meta),
            // The meta map describes itself.
            None => object.set_map(map),
        }
        object.set_field_raw(
            MAP_INSTANCE_TYPE_OFFSET,
            smi(instance_type as usize),
        );
        object.set_field_raw(MAP_INSTANCE_SIZE_OFFSET, smi(instance_size));
        map
    }
}

/// Encode a non-negative size or count as a small integer.
#[inline]
pub(crate) fn smi(value: usize) -> TaggedValue {
    TaggedValue::from_raw(value << 1)
}
