//! Strata garbage-collected heap
//!
//! A generational heap for a dynamic-language runtime, built on tagged
//! values from `strata_core`.
//!
//! # Architecture
//!
//! - **Young generation**: two semispaces plus a young large object space.
//!   Collected by a Cheney-style scavenger; survivors age and are promoted
//!   after `promotion_age` scavenges.
//!
//! - **Old generation**: paged old, code and shared spaces with linear
//!   allocation areas and segregated free lists, plus one-object-per-page
//!   large object spaces. Collected by incremental marking followed by
//!   evacuation of fragmented pages and sweeping.
//!
//! - **Read-only space**: immortal root maps, sealed after bootstrap.
//!
//! Every page is a `CHUNK_SIZE`-aligned chunk whose header carries the flags
//! the barriers test, so classifying an object is a mask and a load.
//!
//! # Write Barriers
//!
//! Every pointer store into the heap goes through [`Heap::store_field`] or
//! [`FieldSlot::store`]. The barrier records old-to-new and old-to-shared
//! slots in per-page remembered sets and, while marking, shades the stored
//! value so no marked object ever hides an unmarked one.
//!
//! # Usage
//!
//! ```
//! use strata_gc::{GcKind, GcReason, Heap, HeapConfig, SpaceKind};
//!
//! let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
//! let array = heap.new_fixed_array(4, SpaceKind::New);
//! let handle = heap.create_global(array.to_tagged());
//!
//! heap.collect_garbage(GcKind::Minor, GcReason::Explicit);
//! assert!(heap.global(handle).unwrap().is_heap_reference());
//! ```
//!
//! # Safety
//!
//! The heap requires that:
//! - Values held across an allocation live in a handle or a root provider
//! - Pointer fields are written through the barrier entry points
//! - A heap is used from one mutator thread at a time

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod collector;
pub mod config;
pub mod error;
pub mod heap;
pub mod memory;
pub mod objects;
pub mod roots;

mod stats;
mod tracer;

// Re-exports for convenient access
pub use barrier::{FieldSlot, RememberedSetType};
pub use collector::{GcKind, GcPhase, GcReason};
pub use config::{ConfigError, HeapConfig, OomHandler};
pub use error::{AllocationFailure, HeapError, ObjectError, VerificationError};
pub use heap::{AddressClass, Heap, SpaceKind};
pub use objects::{ByteArray, Code, FixedArray, JsObject, Map, ObjectKind, ReadOnlyRoots};
pub use roots::{GlobalHandle, HandleScope, LocalHandle, RootProvider, RootVisitor};
pub use stats::{GcStats, GcTimer, PauseCounter};
pub use tracer::{GcEvent, GcTracer};
pub use strata_core::{Address, HeapReference, TaggedValue};
