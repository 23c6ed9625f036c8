//! Fillers keep every page iterable.
//!
//! Holes left by alignment, abandoned allocation areas and sweeping are
//! formatted as objects so a linear walk can step over them by size.

use super::layout::{ONE_POINTER_FILLER_SIZE, TWO_POINTER_FILLER_SIZE};
use super::{FreeSpace, HeapObject, ReadOnlyRoots};
use strata_core::{Address, WORD_SIZE};

/// Format `[address, address + size)` as a filler.
///
/// Regions of three words or more become [`FreeSpace`] nodes with no
/// successor; smaller ones use the fixed-size filler maps.
pub(crate) fn create_filler(address: Address, size: usize, roots: &ReadOnlyRoots) {
    debug_assert_eq!(size % WORD_SIZE, 0, "filler size {size} is not word aligned");
    let object = HeapObject::from_address(address);
    match size {
        0 => {}
        ONE_POINTER_FILLER_SIZE => object.set_map(roots.one_pointer_filler_map()),
        TWO_POINTER_FILLER_SIZE => {
            object.set_map(roots.two_pointer_filler_map());
            object.write_word(WORD_SIZE, 0);
        }
        _ => {
            object.set_map(roots.free_space_map());
            let node = FreeSpace::unchecked(object);
            node.set_size(size);
            node.set_next(None);
        }
    }
}
