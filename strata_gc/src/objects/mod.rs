//! Heap object model.
//!
//! Every object starts with a map word. In a normal object it holds a tagged
//! reference to the object's [`Map`], which names the instance type and
//! therefore the layout. The collector temporarily reuses the word while
//! moving objects:
//!
//! ```text
//!  raw word           state                      meaning
//!  ....xxx1           MapWord::Map(ref)          normal object
//!  ....x000           MapWord::ForwardedTo(a)    moved, new copy at a
//!  0000..10           MapWord::BeingMoved        copy in progress
//! ```
//!
//! Only the collector performs the transitions, with compare-exchange.

mod filler;
mod kinds;
pub mod layout;
mod map;
mod roots;

pub use kinds::{ByteArray, Code, FixedArray, FreeSpace, JsObject, ObjectKind};
pub use map::{InstanceType, Map};
pub use roots::ReadOnlyRoots;

pub(crate) use filler::create_filler;
pub(crate) use map::smi;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::{Address, HeapReference, TaggedValue, WORD_SIZE};

/// Raw word of [`MapWord::BeingMoved`].
const BEING_MOVED: usize = 0b10;

/// Decoded first word of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapWord {
    /// Normal object described by this map.
    Map(HeapReference),
    /// Object has been moved; its copy lives at this address.
    ForwardedTo(Address),
    /// The collector is copying the object right now.
    BeingMoved,
}

impl MapWord {
    /// Decode a raw header word.
    #[inline]
    pub fn from_raw(raw: usize) -> Self {
        let tagged = TaggedValue::from_raw(raw);
        match tagged.as_heap_reference() {
            Some(map) => MapWord::Map(map),
            None if raw == BEING_MOVED => MapWord::BeingMoved,
            None => MapWord::ForwardedTo(Address::new(raw)),
        }
    }

    /// Encode as a raw header word.
    #[inline]
    pub fn to_raw(self) -> usize {
        match self {
            MapWord::Map(map) => map.to_tagged().raw(),
            MapWord::ForwardedTo(address) => {
                debug_assert!(address.is_aligned(WORD_SIZE) && !address.is_null());
                address.as_usize()
            }
            MapWord::BeingMoved => BEING_MOVED,
        }
    }

    /// Forwarding target, if any.
    #[inline]
    pub fn forwarding_address(self) -> Option<Address> {
        match self {
            MapWord::ForwardedTo(address) => Some(address),
            _ => None,
        }
    }
}

/// A tagged word inside a heap object.
///
/// Collectors read and rewrite slots through this type. Mutator stores go
/// through [`crate::barrier::FieldSlot`], which also runs the write barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(Address);

impl Slot {
    #[inline]
    pub(crate) fn new(address: Address) -> Self {
        debug_assert!(address.is_aligned(WORD_SIZE));
        Self(address)
    }

    /// Slot address.
    #[inline]
    pub fn address(self) -> Address {
        self.0
    }

    #[inline]
    fn cell(self) -> &'static AtomicUsize {
        // Safety: slots are only created for words inside mapped heap objects.
        unsafe { &*self.0.as_ptr::<AtomicUsize>() }
    }

    /// Current value.
    #[inline]
    pub fn load(self) -> TaggedValue {
        TaggedValue::from_raw(self.cell().load(Ordering::Relaxed))
    }

    /// Overwrite without a barrier.
    #[inline]
    pub(crate) fn store_raw(self, value: TaggedValue) {
        self.cell().store(value.raw(), Ordering::Relaxed);
    }
}

/// An object on the heap, identified by its start address.
///
/// Only the heap creates these, from addresses it handed out or found in
/// its own slots, so the address always has a mapped chunk behind it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapObject(Address);

impl HeapObject {
    #[inline]
    pub(crate) fn from_address(address: Address) -> Self {
        debug_assert!(address.is_aligned(WORD_SIZE));
        Self(address)
    }

    #[inline]
    pub(crate) fn from_reference(reference: HeapReference) -> Self {
        Self(reference.address())
    }

    /// Start address.
    #[inline]
    pub fn address(self) -> Address {
        self.0
    }

    /// Reference to this object.
    #[inline]
    pub fn reference(self) -> HeapReference {
        HeapReference::from_address(self.0)
    }

    /// Tagged reference to this object.
    #[inline]
    pub fn to_tagged(self) -> TaggedValue {
        self.reference().to_tagged()
    }

    /// Page holding the object.
    #[inline]
    pub fn page(self) -> crate::memory::PageRef {
        // Safety: HeapObject addresses always come from the heap.
        unsafe { crate::memory::PageRef::from_address(self.0) }
    }

    /// Chunk header of the object's page.
    #[inline]
    pub fn chunk<'a>(self) -> &'a crate::memory::MemoryChunk {
        // Safety: HeapObject addresses always come from the heap.
        unsafe { crate::memory::MemoryChunk::from_address(self.0) }
    }

    // =========================================================================
    // Raw Words
    // =========================================================================

    #[inline]
    fn word(self, offset: usize) -> &'static AtomicUsize {
        debug_assert_eq!(offset % WORD_SIZE, 0);
        // Safety: the word lies inside a mapped chunk owned by the heap;
        // atomic access tolerates concurrent marker reads.
        unsafe { &*self.0.offset(offset).as_ptr::<AtomicUsize>() }
    }

    /// Read the raw word at `offset`.
    #[inline]
    pub(crate) fn read_word(self, offset: usize) -> usize {
        self.word(offset).load(Ordering::Relaxed)
    }

    /// Write the raw word at `offset`.
    #[inline]
    pub(crate) fn write_word(self, offset: usize, value: usize) {
        self.word(offset).store(value, Ordering::Relaxed);
    }

    /// Read the tagged field at `offset`. Unchecked; callers bound `offset`.
    #[inline]
    pub(crate) fn field(self, offset: usize) -> TaggedValue {
        TaggedValue::from_raw(self.read_word(offset))
    }

    /// Write a tagged field without a barrier.
    ///
    /// Only for initializing stores and collector updates.
    #[inline]
    pub(crate) fn set_field_raw(self, offset: usize, value: TaggedValue) {
        self.write_word(offset, value.raw());
    }

    // =========================================================================
    // Header
    // =========================================================================

    /// Decoded header word.
    #[inline]
    pub fn map_word(self) -> MapWord {
        MapWord::from_raw(self.word(0).load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_map_word(self, map_word: MapWord) {
        self.word(0).store(map_word.to_raw(), Ordering::Release);
    }

    /// Transition the header from `current` to `new`. False if it changed.
    #[inline]
    pub(crate) fn compare_exchange_map_word(self, current: MapWord, new: MapWord) -> bool {
        self.word(0)
            .compare_exchange(
                current.to_raw(),
                new.to_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    #[inline]
    pub(crate) fn set_map(self, map: Map) {
        self.set_map_word(MapWord::Map(map.object().reference()));
    }

    /// The object's map. The header must be in the `Map` state.
    #[inline]
    pub fn map(self) -> Map {
        match self.map_word() {
            MapWord::Map(map) => Map::from_object(HeapObject::from_reference(map)),
            other => panic!("object at {} has no map: {other:?}", self.0),
        }
    }

    /// Typed view selected by the map's instance type.
    #[inline]
    pub fn kind(self) -> ObjectKind {
        ObjectKind::of(self)
    }

    /// Object size in bytes.
    #[inline]
    pub fn size(self) -> usize {
        self.kind().size()
    }

    /// Size of a possibly moved object, read from its latest copy.
    pub(crate) fn size_following_forwarding(self) -> usize {
        let mut current = self;
        while let Some(copy) = current.forwarding_address() {
            current = copy;
        }
        current.size()
    }

    /// Forwarding target, if the object has moved.
    #[inline]
    pub fn forwarding_address(self) -> Option<HeapObject> {
        self.map_word().forwarding_address().map(HeapObject)
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapObject({})", self.0)
    }
}
