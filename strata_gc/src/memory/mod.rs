//! Chunk-level memory management.
//!
//! Every heap object lives inside a [`MemoryChunk`]: a `CHUNK_SIZE`-aligned
//! reservation whose first bytes hold an in-band header with atomic flags and
//! a pointer to the out-of-band [`PageMetadata`].
//!
//! ```text
//!  chunk base (CHUNK_SIZE aligned)
//!  ┌──────────────┬───────────────────────────────────────────────────────┐
//!  │ MemoryChunk  │                 object area                           │
//!  │ flags | meta │ area_start ─────────────────────────────▶ area_end    │
//!  └──────────────┴───────────────────────────────────────────────────────┘
//!    CHUNK_HEADER_SIZE
//! ```
//!
//! Masking the low bits of any object address yields its chunk header, so
//! classifying an address is O(1). Large-object pages are reservations of
//! several chunks whose single object starts inside the first chunk.

mod allocator;
mod bitmap;
mod chunk;
mod os;
mod page;

pub use allocator::MemoryAllocator;
pub use bitmap::MarkingBitmap;
pub use chunk::{ChunkFlags, MemoryChunk};
pub use page::{PageMetadata, PageRef};

/// Size and alignment of a regular page.
pub const CHUNK_SIZE: usize = 256 * 1024;

/// Bytes reserved for the in-band chunk header.
///
/// Also the offset of the first object; a multiple of [`CODE_ALIGNMENT`].
pub const CHUNK_HEADER_SIZE: usize = 64;

/// Usable object area of a regular page.
pub const PAGE_AREA_SIZE: usize = CHUNK_SIZE - CHUNK_HEADER_SIZE;

/// Largest object a regular page may hold.
pub const MAX_REGULAR_OBJECT_SIZE: usize = 128 * 1024;

/// Largest object any space accepts. Requests above it are fatal.
pub const MAX_OBJECT_SIZE: usize = 1 << 40;

/// Alignment of code objects, so instruction streams start on fetch boundaries.
pub const CODE_ALIGNMENT: usize = 32;
