//! Strata Core
//!
//! Value-level building blocks shared by the heap and everything that talks
//! to it: machine addresses and the tagged word that every slot, register and
//! handle in the engine holds.
//!
//! # Tagging Scheme
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┬───┐
//! │                     63-bit signed payload                    │ 0 │  Smi
//! ├──────────────────────────────────────────────────────────────┼───┤
//! │             object address (8-byte aligned, low 3 bits 000)  │ 1 │  HeapReference
//! └──────────────────────────────────────────────────────────────┴───┘
//! ```
//!
//! Heap objects are always word aligned, so bit 0 of a real address is free
//! to carry the discriminant. Classification is a single AND.

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("strata requires a 64-bit target");

pub mod address;
pub mod tagged;

pub use address::{Address, WORD_SIZE, align_up, checked_align_up, is_aligned};
pub use tagged::{HeapReference, SMI_MAX, SMI_MIN, TaggedValue};

use thiserror::Error;

/// Errors produced by checked value conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValueError {
    /// Integer does not fit in the small-integer payload.
    #[error("integer {0} is outside the small-integer range")]
    OutOfRange(i64),
    /// Value has the wrong tag for the requested view.
    #[error("expected a {expected}, found a {found}")]
    TypeMismatch {
        /// Tag the caller asked for.
        expected: &'static str,
        /// Tag the value actually carries.
        found: &'static str,
    },
}
