//! Field offsets and fixed sizes of the built-in object layouts.
//!
//! ```text
//!  Map         [map | instance_type:smi | instance_size:smi]
//!  FreeSpace   [map | size:smi | next]
//!  Fillers     [map] / [map | pad]
//!  FixedArray  [map | length:smi | element 0 | element 1 | ...]
//!  ByteArray   [map | length:smi | bytes ... (padded to a word)]
//!  JsObject    [map | field 0 | field 1 | ...]
//!  Code        [map | body_size:smi | constants | pad | instructions ...]
//! ```

use strata_core::WORD_SIZE;

/// Offset of the map word.
pub const MAP_OFFSET: usize = 0;

/// Size of the map word.
pub const HEADER_SIZE: usize = WORD_SIZE;

/// Map: instance type field.
pub const MAP_INSTANCE_TYPE_OFFSET: usize = 8;
/// Map: instance size field (0 for variable-sized types).
pub const MAP_INSTANCE_SIZE_OFFSET: usize = 16;
/// Map: total size.
pub const MAP_SIZE: usize = 24;

/// FreeSpace: size field.
pub const FREE_SPACE_SIZE_OFFSET: usize = 8;
/// FreeSpace: next-node field.
pub const FREE_SPACE_NEXT_OFFSET: usize = 16;
/// Smallest region that can carry a FreeSpace header.
pub const MIN_FREE_SPACE_SIZE: usize = 24;

/// One-word filler.
pub const ONE_POINTER_FILLER_SIZE: usize = WORD_SIZE;
/// Two-word filler.
pub const TWO_POINTER_FILLER_SIZE: usize = 2 * WORD_SIZE;

/// FixedArray and ByteArray: length field.
pub const LENGTH_OFFSET: usize = 8;
/// FixedArray: first element.
pub const FIXED_ARRAY_HEADER_SIZE: usize = 16;
/// ByteArray: first byte.
pub const BYTE_ARRAY_HEADER_SIZE: usize = 16;

/// JsObject: first in-object field.
pub const JS_OBJECT_HEADER_SIZE: usize = WORD_SIZE;

/// Code: instruction-stream size field.
pub const CODE_BODY_SIZE_OFFSET: usize = 8;
/// Code: tagged constant pool reference.
pub const CODE_CONSTANTS_OFFSET: usize = 16;
/// Code: first instruction byte. Aligned so instructions share the object's
/// code alignment.
pub const CODE_HEADER_SIZE: usize = 32;

// Size helpers saturate at `usize::MAX`, which the allocator rejects as
// larger than any object.

#[inline]
const fn word_aligned_or_max(size: usize) -> usize {
    match strata_core::checked_align_up(size, WORD_SIZE) {
        Some(aligned) => aligned,
        None => usize::MAX,
    }
}

/// Size of a FixedArray with `length` elements.
#[inline]
pub const fn fixed_array_size(length: usize) -> usize {
    FIXED_ARRAY_HEADER_SIZE.saturating_add(length.saturating_mul(WORD_SIZE))
}

/// Size of a ByteArray with `length` bytes.
#[inline]
pub const fn byte_array_size(length: usize) -> usize {
    word_aligned_or_max(BYTE_ARRAY_HEADER_SIZE.saturating_add(length))
}

/// Size of a JsObject with `fields` in-object fields.
#[inline]
pub const fn js_object_size(fields: usize) -> usize {
    JS_OBJECT_HEADER_SIZE.saturating_add(fields.saturating_mul(WORD_SIZE))
}

/// Size of a Code object with `body_size` instruction bytes.
#[inline]
pub const fn code_size(body_size: usize) -> usize {
    CODE_HEADER_SIZE.saturating_add(word_aligned_or_max(body_size))
}
