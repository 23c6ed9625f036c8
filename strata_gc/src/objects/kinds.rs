//! Typed views over heap objects, one per instance type.
//!
//! [`ObjectKind`] is the closed sum of all views. Size computation and
//! pointer-slot enumeration are exhaustive matches over it, so adding an
//! instance type is a compile error until every body descriptor knows it.

use super::layout::*;
use super::map::smi;
use super::{HeapObject, InstanceType, Map, Slot};
use crate::error::ObjectError;
use strata_core::{Address, HeapReference, TaggedValue, WORD_SIZE};

macro_rules! object_view {
    ($(#[$meta:meta])* $name:ident, $instance_type:path) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(HeapObject);

        impl $name {
            /// View `object` as this type, if its map says so.
            pub fn cast(object: HeapObject) -> Result<Self, ObjectError> {
                if object.map().instance_type() == $instance_type {
                    Ok(Self(object))
                } else {
                    Err(ObjectError::WrongKind(object.address()))
                }
            }

            #[inline]
            pub(crate) fn unchecked(object: HeapObject) -> Self {
                Self(object)
            }

            /// The underlying object.
            #[inline]
            pub fn object(self) -> HeapObject {
                self.0
            }

            /// Reference to the object.
            #[inline]
            pub fn reference(self) -> HeapReference {
                self.0.reference()
            }

            /// Tagged reference to the object.
            #[inline]
            pub fn to_tagged(self) -> TaggedValue {
                self.0.to_tagged()
            }
        }
    };
}

object_view!(
    /// A free-list node: `{size, next}` written into reclaimed memory.
    FreeSpace,
    InstanceType::FreeSpace
);
object_view!(
    /// Fixed-length array of tagged values.
    FixedArray,
    InstanceType::FixedArray
);
object_view!(
    /// Fixed-length array of raw bytes.
    ByteArray,
    InstanceType::ByteArray
);
object_view!(
    /// Script object with in-object fields sized by its map.
    JsObject,
    InstanceType::JsObject
);
object_view!(
    /// Code object: header, one tagged constant reference, then instructions.
    Code,
    InstanceType::Code
);

#[inline]
fn read_length(object: HeapObject) -> usize {
    (object.read_word(LENGTH_OFFSET) >> 1) as usize
}

impl FreeSpace {
    /// Region size in bytes.
    #[inline]
    pub fn size(self) -> usize {
        (self.0.read_word(FREE_SPACE_SIZE_OFFSET) >> 1) as usize
    }

    /// Next node in the same free-list category.
    #[inline]
    pub fn next(self) -> Option<Address> {
        let raw = self.0.read_word(FREE_SPACE_NEXT_OFFSET);
        (raw != 0).then(|| Address::new(raw))
    }

    /// Link to the next node. Word-aligned addresses read as small integers,
    /// so the field never looks like a pointer to the collector.
    #[inline]
    pub(crate) fn set_next(self, next: Option<Address>) {
        self.0
            .write_word(FREE_SPACE_NEXT_OFFSET, next.map_or(0, Address::as_usize));
    }

    pub(crate) fn set_size(self, size: usize) {
        self.0.set_field_raw(FREE_SPACE_SIZE_OFFSET, smi(size));
    }
}

impl FixedArray {
    /// Number of elements.
    #[inline]
    pub fn length(self) -> usize {
        read_length(self.0)
    }

    /// Byte offset of element `index`.
    #[inline]
    pub fn offset_of(index: usize) -> usize {
        FIXED_ARRAY_HEADER_SIZE + index * WORD_SIZE
    }

    /// Read element `index`.
    pub fn get(self, index: usize) -> Result<TaggedValue, ObjectError> {
        if index >= self.length() {
            return Err(ObjectError::FieldOutOfBounds {
                offset: Self::offset_of(index),
                size: fixed_array_size(self.length()),
            });
        }
        Ok(self.0.field(Self::offset_of(index)))
    }

    pub(crate) fn initialize(object: HeapObject, map: Map, length: usize) -> Self {
        object.set_map(map);
        object.set_field_raw(LENGTH_OFFSET, smi(length));
        for index in 0..length {
            object.set_field_raw(Self::offset_of(index), TaggedValue::ZERO);
        }
        Self(object)
    }
}

impl ByteArray {
    /// Number of bytes.
    #[inline]
    pub fn length(self) -> usize {
        read_length(self.0)
    }

    fn data(self) -> *mut u8 {
        self.0.address().offset(BYTE_ARRAY_HEADER_SIZE).as_mut_ptr()
    }

    /// Read byte `index`.
    pub fn get(self, index: usize) -> Result<u8, ObjectError> {
        self.check(index)?;
        // Safety: bounds checked against the stored length.
        Ok(unsafe { self.data().add(index).read() })
    }

    /// Write byte `index`. Raw bytes are never pointers, so no barrier.
    pub fn set(self, index: usize, value: u8) -> Result<(), ObjectError> {
        self.check(index)?;
        // Safety: bounds checked against the stored length.
        unsafe { self.data().add(index).write(value) };
        Ok(())
    }

    fn check(self, index: usize) -> Result<(), ObjectError> {
        if index >= self.length() {
            return Err(ObjectError::FieldOutOfBounds {
                offset: BYTE_ARRAY_HEADER_SIZE + index,
                size: byte_array_size(self.length()),
            });
        }
        Ok(())
    }

    pub(crate) fn initialize(object: HeapObject, map: Map, length: usize) -> Self {
        object.set_map(map);
        object.set_field_raw(LENGTH_OFFSET, smi(length));
        let array = Self(object);
        let padded = byte_array_size(length) - BYTE_ARRAY_HEADER_SIZE;
        // Safety: the allocation covers the padded payload.
        unsafe { std::ptr::write_bytes(array.data(), 0, padded) };
        array
    }
}

impl JsObject {
    /// Number of in-object fields.
    #[inline]
    pub fn field_count(self) -> usize {
        (self.0.map().instance_size() - JS_OBJECT_HEADER_SIZE) / WORD_SIZE
    }

    /// Byte offset of field `index`.
    #[inline]
    pub fn offset_of(index: usize) -> usize {
        JS_OBJECT_HEADER_SIZE + index * WORD_SIZE
    }

    /// Read field `index`.
    pub fn field(self, index: usize) -> Result<TaggedValue, ObjectError> {
        if index >= self.field_count() {
            return Err(ObjectError::FieldOutOfBounds {
                offset: Self::offset_of(index),
                size: self.0.map().instance_size(),
            });
        }
        Ok(self.0.field(Self::offset_of(index)))
    }

    pub(crate) fn initialize(object: HeapObject, map: Map) -> Self {
        object.set_map(map);
        let view = Self(object);
        for index in 0..view.field_count() {
            object.set_field_raw(Self::offset_of(index), TaggedValue::ZERO);
        }
        view
    }
}

impl Code {
    /// Instruction-stream size in bytes.
    #[inline]
    pub fn body_size(self) -> usize {
        (self.0.read_word(CODE_BODY_SIZE_OFFSET) >> 1) as usize
    }

    /// First instruction byte.
    #[inline]
    pub fn instruction_start(self) -> Address {
        self.0.address().offset(CODE_HEADER_SIZE)
    }

    /// Constant-pool reference.
    #[inline]
    pub fn constants(self) -> TaggedValue {
        self.0.field(CODE_CONSTANTS_OFFSET)
    }

    /// Instruction bytes.
    pub fn instructions(&self) -> &[u8] {
        // Safety: the object covers `body_size` bytes past the header.
        unsafe {
            std::slice::from_raw_parts(self.instruction_start().as_ptr(), self.body_size())
        }
    }

    pub(crate) fn initialize(object: HeapObject, map: Map, instructions: &[u8]) -> Self {
        object.set_map(map);
        object.set_field_raw(CODE_BODY_SIZE_OFFSET, smi(instructions.len()));
        object.set_field_raw(CODE_CONSTANTS_OFFSET, TaggedValue::ZERO);
        object.set_field_raw(CODE_CONSTANTS_OFFSET + WORD_SIZE, TaggedValue::ZERO);
        let code = Self(object);
        let padded = code_size(instructions.len()) - CODE_HEADER_SIZE;
        // Safety: the allocation covers the padded instruction stream.
        unsafe {
            let start = code.instruction_start().as_mut_ptr::<u8>();
            std::ptr::write_bytes(start, 0, padded);
            std::ptr::copy_nonoverlapping(instructions.as_ptr(), start, instructions.len());
        }
        code
    }
}

/// Closed sum over every object layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// A map.
    Map(Map),
    /// A free-list node.
    FreeSpace(FreeSpace),
    /// A one- or two-word hole.
    Filler {
        /// The filler object.
        object: HeapObject,
        /// Its size in bytes.
        size: usize,
    },
    /// Array of tagged values.
    FixedArray(FixedArray),
    /// Array of raw bytes.
    ByteArray(ByteArray),
    /// Script object.
    JsObject(JsObject),
    /// Code object.
    Code(Code),
}

impl ObjectKind {
    /// Classify `object` by its map.
    pub fn of(object: HeapObject) -> Self {
        let map = object.map();
        match map.instance_type() {
            InstanceType::Map => ObjectKind::Map(Map::from_object(object)),
            InstanceType::FreeSpace => ObjectKind::FreeSpace(FreeSpace(object)),
            InstanceType::OnePointerFiller | InstanceType::TwoPointerFiller => {
                ObjectKind::Filler {
                    object,
                    size: map.instance_size(),
                }
            }
            InstanceType::FixedArray => ObjectKind::FixedArray(FixedArray(object)),
            InstanceType::ByteArray => ObjectKind::ByteArray(ByteArray(object)),
            InstanceType::JsObject => ObjectKind::JsObject(JsObject(object)),
            InstanceType::Code => ObjectKind::Code(Code(object)),
        }
    }

    /// The underlying object.
    pub fn object(self) -> HeapObject {
        match self {
            ObjectKind::Map(map) => map.object(),
            ObjectKind::FreeSpace(view) => view.object(),
            ObjectKind::Filler { object, .. } => object,
            ObjectKind::FixedArray(view) => view.object(),
            ObjectKind::ByteArray(view) => view.object(),
            ObjectKind::JsObject(view) => view.object(),
            ObjectKind::Code(view) => view.object(),
        }
    }

    /// Object size in bytes.
    pub fn size(self) -> usize {
        match self {
            ObjectKind::Map(_) => MAP_SIZE,
            ObjectKind::FreeSpace(view) => view.size(),
            ObjectKind::Filler { size, .. } => size,
            ObjectKind::FixedArray(view) => fixed_array_size(view.length()),
            ObjectKind::ByteArray(view) => byte_array_size(view.length()),
            ObjectKind::JsObject(view) => view.object().map().instance_size(),
            ObjectKind::Code(view) => code_size(view.body_size()),
        }
    }

    /// Check whether this is a hole rather than a real object.
    pub fn is_filler(self) -> bool {
        matches!(self, ObjectKind::FreeSpace(_) | ObjectKind::Filler { .. })
    }

    /// Call `visit` with the address of every slot that may hold a heap
    /// reference, the map slot first.
    pub fn for_each_pointer_slot<F: FnMut(Slot)>(self, mut visit: F) {
        let object = self.object();
        let base = object.address();
        let mut visit = |offset: usize| visit(Slot::new(base.offset(offset)));
        visit(MAP_OFFSET);
        match self {
            ObjectKind::Map(_)
            | ObjectKind::FreeSpace(_)
            | ObjectKind::Filler { .. }
            | ObjectKind::ByteArray(_) => {}
            ObjectKind::FixedArray(view) => {
                let end = fixed_array_size(view.length());
                for offset in (FIXED_ARRAY_HEADER_SIZE..end).step_by(WORD_SIZE) {
                    visit(offset);
                }
            }
            ObjectKind::JsObject(view) => {
                let end = view.object().map().instance_size();
                for offset in (JS_OBJECT_HEADER_SIZE..end).step_by(WORD_SIZE) {
                    visit(offset);
                }
            }
            ObjectKind::Code(_) => visit(CODE_CONSTANTS_OFFSET),
        }
    }

    /// Check whether `offset` is one of the pointer slots.
    pub fn is_pointer_offset(self, offset: usize) -> bool {
        if offset % WORD_SIZE != 0 || offset >= self.size() {
            return false;
        }
        match self {
            ObjectKind::Map(_)
            | ObjectKind::FreeSpace(_)
            | ObjectKind::Filler { .. }
            | ObjectKind::ByteArray(_) => offset == MAP_OFFSET,
            ObjectKind::FixedArray(_) => offset == MAP_OFFSET || offset >= FIXED_ARRAY_HEADER_SIZE,
            ObjectKind::JsObject(_) => true,
            ObjectKind::Code(_) => offset == MAP_OFFSET || offset == CODE_CONSTANTS_OFFSET,
        }
    }
}
