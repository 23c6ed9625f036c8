//! Typed object construction on top of [`Heap::allocate`].
//!
//! Every factory allocates, writes the header and body, then runs the write
//! barrier for any pointer it stored outside read-only space. Values passed
//! in are held in local handles across the allocation, which may collect.

use super::{Heap, SpaceKind};
use crate::error::ObjectError;
use crate::memory::ChunkFlags;
use crate::objects::layout::{
    CODE_CONSTANTS_OFFSET, MAP_OFFSET, MAP_SIZE, byte_array_size, code_size, fixed_array_size,
    js_object_size,
};
use crate::objects::{ByteArray, Code, FixedArray, InstanceType, JsObject, Map};
use strata_core::TaggedValue;

impl Heap {
    /// Allocate a fixed array of `length` small-integer zeros.
    pub fn new_fixed_array(&mut self, length: usize, space: SpaceKind) -> FixedArray {
        let object = self.allocate_object(fixed_array_size(length), space);
        FixedArray::initialize(object, self.read_only_roots.fixed_array_map(), length)
    }

    /// Allocate a zeroed byte array.
    pub fn new_byte_array(&mut self, length: usize, space: SpaceKind) -> ByteArray {
        let object = self.allocate_object(byte_array_size(length), space);
        ByteArray::initialize(object, self.read_only_roots.byte_array_map(), length)
    }

    /// Create the map for script objects with `field_count` in-object fields.
    ///
    /// Maps live on old pages flagged `NEVER_EVACUATE`, so an object's map
    /// word never needs relocation.
    pub fn new_js_object_map(&mut self, field_count: usize) -> Map {
        let object = self.allocate_object(MAP_SIZE, SpaceKind::Old);
        object.chunk().set_flags(ChunkFlags::NEVER_EVACUATE);
        Map::initialize(
            object,
            Some(self.read_only_roots.meta_map()),
            InstanceType::JsObject,
            js_object_size(field_count),
        )
    }

    /// Allocate a script object described by `map`, fields zeroed.
    pub fn new_js_object(&mut self, map: Map, space: SpaceKind) -> Result<JsObject, ObjectError> {
        if map.instance_type() != InstanceType::JsObject {
            return Err(ObjectError::WrongKind(map.object().address()));
        }
        let scope = self.open_handle_scope();
        self.create_local(map.object().to_tagged());
        let object = self.allocate_object(map.instance_size(), space);
        self.close_handle_scope(scope);

        let js_object = JsObject::initialize(object, map);
        self.on_store(object, MAP_OFFSET, map.object().to_tagged());
        Ok(js_object)
    }

    /// Allocate a code object holding `instructions` and a constant pool.
    pub fn new_code(&mut self, instructions: &[u8], constants: TaggedValue) -> Code {
        let scope = self.open_handle_scope();
        let held = self.create_local(constants);
        let object = self.allocate_object(code_size(instructions.len()), SpaceKind::Code);
        let constants = self.local(held).unwrap_or(constants);
        self.close_handle_scope(scope);

        let code = Code::initialize(object, self.read_only_roots.code_map(), instructions);
        object.set_field_raw(CODE_CONSTANTS_OFFSET, constants);
        self.on_store(object, CODE_CONSTANTS_OFFSET, constants);
        code
    }
}
