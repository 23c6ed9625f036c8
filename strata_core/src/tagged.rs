//! Tagged values: small integers and heap references packed in one word.

use crate::address::{Address, WORD_SIZE};
use crate::ValueError;
use std::fmt;

/// Tag bit carried by heap references.
const HEAP_REFERENCE_TAG: usize = 1;

/// Mask selecting the tag bit.
const TAG_MASK: usize = 1;

/// Smallest integer representable as a small integer.
pub const SMI_MIN: i64 = i64::MIN >> 1;

/// Largest integer representable as a small integer.
pub const SMI_MAX: i64 = i64::MAX >> 1;

/// A reference to a heap object.
///
/// Holds the untagged object start address. Produced only from a tagged word
/// with the heap tag set or by the heap itself after allocation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapReference(Address);

impl HeapReference {
    /// Wrap an object start address.
    ///
    /// The address must be word aligned; misaligned addresses cannot be
    /// tagged without losing bits.
    #[inline]
    pub fn from_address(address: Address) -> Self {
        debug_assert!(
            address.is_aligned(WORD_SIZE),
            "heap object address {address} is not word aligned"
        );
        Self(address)
    }

    /// The object's start address.
    #[inline]
    pub const fn address(self) -> Address {
        self.0
    }

    /// Convert back into a tagged word.
    #[inline]
    pub const fn to_tagged(self) -> TaggedValue {
        TaggedValue(self.0.as_usize() | HEAP_REFERENCE_TAG)
    }
}

impl fmt::Debug for HeapReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapReference({})", self.0)
    }
}

impl From<HeapReference> for TaggedValue {
    #[inline]
    fn from(reference: HeapReference) -> Self {
        reference.to_tagged()
    }
}

/// A tagged machine word.
///
/// Either a small integer ("Smi", low bit 0, payload in the upper 63 bits) or
/// a heap reference (object address with the low bit set).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaggedValue(usize);

impl TaggedValue {
    /// The small integer zero. All-zero memory reads as this value.
    pub const ZERO: TaggedValue = TaggedValue(0);

    /// Encode a small integer.
    #[inline]
    pub fn from_small_int(value: i64) -> Result<Self, ValueError> {
        if !(SMI_MIN..=SMI_MAX).contains(&value) {
            return Err(ValueError::OutOfRange(value));
        }
        Ok(Self((value << 1) as usize))
    }

    /// Reinterpret a raw word read from memory.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// The raw word.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Check for a small integer.
    #[inline]
    pub const fn is_small_int(self) -> bool {
        self.0 & TAG_MASK == 0
    }

    /// Check for a heap reference.
    #[inline]
    pub const fn is_heap_reference(self) -> bool {
        self.0 & TAG_MASK == HEAP_REFERENCE_TAG
    }

    /// Decode a small integer.
    #[inline]
    pub fn to_small_int(self) -> Result<i64, ValueError> {
        if !self.is_small_int() {
            return Err(ValueError::TypeMismatch {
                expected: "small integer",
                found: "heap reference",
            });
        }
        Ok((self.0 as i64) >> 1)
    }

    /// Decode a heap reference.
    #[inline]
    pub fn to_heap_reference(self) -> Result<HeapReference, ValueError> {
        self.as_heap_reference().ok_or(ValueError::TypeMismatch {
            expected: "heap reference",
            found: "small integer",
        })
    }

    /// Decode a heap reference, if this is one.
    #[inline]
    pub fn as_heap_reference(self) -> Option<HeapReference> {
        if self.is_heap_reference() {
            Some(HeapReference(Address::new(self.0 & !TAG_MASK)))
        } else {
            None
        }
    }
}

impl Default for TaggedValue {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Debug for TaggedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_heap_reference() {
            Some(reference) => write!(f, "{reference:?}"),
            None => write!(f, "Smi({})", (self.0 as i64) >> 1),
        }
    }
}
