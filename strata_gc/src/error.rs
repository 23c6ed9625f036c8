//! Error taxonomy for the heap.
//!
//! - [`AllocationFailure`]: a space could not satisfy a request. Recovered
//!   inside the allocator by falling back to the free list and then to a
//!   collection; never surfaced to the mutator.
//! - Out-of-memory: terminal, routed through the configured OOM handler.
//! - Contract violations: collaborator bugs, checked with
//!   [`contract_violation!`] (panic in debug builds, logged in release).
//! - [`ObjectError`]: checked field access failures.
//! - [`HeapError`]: the heap could not be created.

use crate::config::ConfigError;
use crate::heap::SpaceKind;
use strata_core::{Address, ValueError};
use thiserror::Error;

/// A space could not provide memory for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocationFailure {
    /// The space's committed pages are full and it may not grow.
    #[error("{space:?} space exhausted allocating {size} bytes")]
    SpaceExhausted {
        /// Space that refused the request.
        space: SpaceKind,
        /// Requested size in bytes.
        size: usize,
    },
    /// Growing would exceed the old-generation limit.
    #[error("old generation limit reached allocating {size} bytes in {space:?} space")]
    LimitReached {
        /// Space that refused the request.
        space: SpaceKind,
        /// Requested size in bytes.
        size: usize,
    },
    /// The operating system refused to map a chunk.
    #[error("failed to map a {0}-byte chunk")]
    MapFailed(usize),
}

/// Failure of a checked object access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// Offset lies outside the object.
    #[error("offset {offset} is outside an object of {size} bytes")]
    FieldOutOfBounds {
        /// Requested byte offset.
        offset: usize,
        /// Object size in bytes.
        size: usize,
    },
    /// Offset does not hold a tagged field.
    #[error("offset {0} is not a pointer field")]
    NotAPointerField(usize),
    /// Host lives in read-only space.
    #[error("object at {0} is read-only")]
    ReadOnlyHost(Address),
    /// Address is not a live object on this heap.
    #[error("{0} is not a heap object")]
    NotAHeapObject(Address),
    /// The object does not have the expected instance type.
    #[error("object at {0} has the wrong instance type")]
    WrongKind(Address),
    /// A value conversion failed.
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Heap invariant broken, found by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Object header is not a valid map.
    #[error("object at {0} has an invalid map word")]
    InvalidMap(Address),
    /// Pointer field refers outside the heap or into a stale location.
    #[error("slot {slot} of {host} points to {target}, which is not a live object")]
    DanglingPointer {
        /// Object holding the slot.
        host: Address,
        /// Slot address.
        slot: Address,
        /// Value found in the slot.
        target: Address,
    },
    /// An old-to-new pointer has no remembered-set entry.
    #[error("old-to-new slot {slot} of {host} is missing from the remembered set")]
    MissingRememberedSlot {
        /// Object holding the slot.
        host: Address,
        /// Slot address.
        slot: Address,
    },
    /// Object walks past the end of its page.
    #[error("object at {0} extends past its page area")]
    ObjectOverrunsPage(Address),
    /// Two free-list regions overlap or one escapes its page.
    #[error("free-list region at {0} overlaps another region or leaves its page")]
    BadFreeRegion(Address),
}

/// Failure to create a heap.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeapError {
    /// The configuration is inconsistent.
    #[error("invalid heap configuration: {0}")]
    Config(#[from] ConfigError),
    /// Initial pages could not be committed.
    #[error("failed to commit initial heap pages: {0}")]
    Memory(#[from] AllocationFailure),
}

/// Report a broken collaborator contract.
///
/// Panics in debug builds. Release builds log the violation and continue;
/// behavior after a violation is unspecified.
macro_rules! contract_violation {
    ($($arg:tt)*) => {{
        ::tracing::error!(target: "strata_gc::contract", $($arg)*);
        if cfg!(debug_assertions) {
            panic!("heap contract violation: {}", format_args!($($arg)*));
        }
    }};
}

pub(crate) use contract_violation;
