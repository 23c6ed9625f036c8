//! Out-of-band page metadata.

use super::{CHUNK_HEADER_SIZE, CHUNK_SIZE, ChunkFlags, MarkingBitmap, MemoryChunk};
use crate::barrier::{RememberedSetType, SlotSet};
use crate::heap::SpaceKind;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use strata_core::{Address, WORD_SIZE};

/// Bookkeeping for one chunk.
///
/// Owned by the [`MemoryAllocator`](super::MemoryAllocator); spaces refer to
/// it through [`PageRef`]. Everything the marker threads touch is atomic.
pub struct PageMetadata {
    base: Address,
    size: usize,
    area_start: Address,
    area_end: Address,
    owner: AtomicU8,

    // =========================================================================
    // Collector State
    // =========================================================================
    /// One bit per word of the first chunk.
    marking_bitmap: MarkingBitmap,
    /// Bytes of marked objects in the current cycle.
    live_bytes: AtomicUsize,
    /// Bytes not on the free list after the last sweep, plus bytes handed
    /// out since.
    allocated_bytes: AtomicUsize,
    /// End of the parsable prefix of a new-space page.
    high_water_mark: AtomicUsize,
    /// Recorded slots, one lazily created set per remembered-set type.
    slot_sets: [OnceLock<SlotSet>; RememberedSetType::COUNT],
    /// Survived-scavenge counters for semispace pages, indexed by word.
    age_table: OnceLock<Box<[AtomicU8]>>,
}

impl PageMetadata {
    pub(crate) fn new(base: Address, size: usize, owner: SpaceKind) -> Self {
        let area_start = base.offset(CHUNK_HEADER_SIZE);
        Self {
            base,
            size,
            area_start,
            area_end: base.offset(size),
            owner: AtomicU8::new(owner as u8),
            marking_bitmap: MarkingBitmap::new(CHUNK_SIZE / WORD_SIZE),
            live_bytes: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
            high_water_mark: AtomicUsize::new(area_start.as_usize()),
            slot_sets: [OnceLock::new(), OnceLock::new(), OnceLock::new()],
            age_table: OnceLock::new(),
        }
    }

    /// The in-band header.
    #[inline]
    pub fn chunk(&self) -> &MemoryChunk {
        // Safety: the metadata is only reachable while its mapping is live.
        unsafe { MemoryChunk::from_address(self.base) }
    }

    /// Chunk base address.
    #[inline]
    pub fn base(&self) -> Address {
        self.base
    }

    /// Reservation size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// First object address.
    #[inline]
    pub fn area_start(&self) -> Address {
        self.area_start
    }

    /// End of the object area.
    #[inline]
    pub fn area_end(&self) -> Address {
        self.area_end
    }

    /// Object area size.
    #[inline]
    pub fn area_size(&self) -> usize {
        self.area_end.offset_from(self.area_start)
    }

    /// Check whether `address` lies in `[area_start, area_end)`.
    #[inline]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.area_start && address < self.area_end
    }

    /// Check whether `address` lies anywhere in the reservation.
    #[inline]
    pub fn reservation_contains(&self, address: Address) -> bool {
        address >= self.base && address < self.area_end
    }

    /// Space that currently owns the page.
    #[inline]
    pub fn owner(&self) -> SpaceKind {
        SpaceKind::from_u8(self.owner.load(Ordering::Acquire))
    }

    pub(crate) fn set_owner(&self, owner: SpaceKind) {
        self.owner.store(owner as u8, Ordering::Release);
    }

    /// Current chunk flags.
    #[inline]
    pub fn flags(&self) -> ChunkFlags {
        self.chunk().flags()
    }

    // =========================================================================
    // Marking
    // =========================================================================

    #[inline]
    fn bit_index(&self, address: Address) -> usize {
        debug_assert!(address >= self.base && address.offset_from(self.base) < CHUNK_SIZE);
        address.offset_from(self.base) / WORD_SIZE
    }

    /// Set the mark bit of the object at `address`. True if newly marked.
    #[inline]
    pub fn mark(&self, address: Address) -> bool {
        self.marking_bitmap.set(self.bit_index(address))
    }

    /// Test the mark bit of the object at `address`.
    #[inline]
    pub fn is_marked(&self, address: Address) -> bool {
        self.marking_bitmap.get(self.bit_index(address))
    }

    /// Clear the mark bit of the object at `address`.
    #[inline]
    pub fn unmark(&self, address: Address) {
        self.marking_bitmap.unset(self.bit_index(address))
    }

    /// Start addresses of marked objects, ascending.
    pub fn marked_objects(&self) -> impl Iterator<Item = Address> + '_ {
        let base = self.base;
        self.marking_bitmap
            .iter_set(CHUNK_HEADER_SIZE / WORD_SIZE)
            .map(move |bit| base.offset(bit * WORD_SIZE))
    }

    /// Drop all marks and the live-byte count.
    pub fn clear_marking(&self) {
        self.marking_bitmap.clear();
        self.live_bytes.store(0, Ordering::Relaxed);
    }

    /// Check the bitmap is empty.
    pub fn marking_is_clean(&self) -> bool {
        self.marking_bitmap.is_clean()
    }

    /// Bytes of marked objects.
    #[inline]
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Account marked bytes.
    #[inline]
    pub fn increment_live_bytes(&self, bytes: usize) {
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    // =========================================================================
    // Allocation Accounting
    // =========================================================================

    /// Bytes in use or handed out.
    #[inline]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Bytes that are neither used nor handed out.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.area_size().saturating_sub(self.allocated_bytes())
    }

    pub(crate) fn increment_allocated_bytes(&self, bytes: usize) {
        self.allocated_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn decrement_allocated_bytes(&self, bytes: usize) {
        let _ = self
            .allocated_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub(crate) fn set_allocated_bytes(&self, bytes: usize) {
        self.allocated_bytes.store(bytes, Ordering::Relaxed);
    }

    /// End of the parsable prefix of a new-space page.
    #[inline]
    pub fn high_water_mark(&self) -> Address {
        Address::new(self.high_water_mark.load(Ordering::Acquire))
    }

    pub(crate) fn set_high_water_mark(&self, top: Address) {
        debug_assert!(top >= self.area_start && top <= self.area_end);
        self.high_water_mark.store(top.as_usize(), Ordering::Release);
    }

    // =========================================================================
    // Remembered Slots
    // =========================================================================

    /// Slot set of the given type, if any slot was ever recorded.
    #[inline]
    pub fn slot_set(&self, kind: RememberedSetType) -> Option<&SlotSet> {
        self.slot_sets[kind.index()].get()
    }

    /// Slot set of the given type, created on first use.
    #[inline]
    pub fn slot_set_or_create(&self, kind: RememberedSetType) -> &SlotSet {
        self.slot_sets[kind.index()].get_or_init(|| SlotSet::new(self.size))
    }

    /// Record `slot` in the given remembered set.
    #[inline]
    pub fn record_slot(&self, kind: RememberedSetType, slot: Address) {
        debug_assert!(self.reservation_contains(slot));
        self.slot_set_or_create(kind)
            .insert(slot.offset_from(self.base));
    }

    /// Check whether `slot` is recorded.
    pub fn contains_slot(&self, kind: RememberedSetType, slot: Address) -> bool {
        self.slot_set(kind)
            .is_some_and(|set| set.contains(slot.offset_from(self.base)))
    }

    /// Forget recorded slots in `[start, end)` for every set type.
    pub fn remove_slot_range(&self, start: Address, end: Address) {
        let from = start.offset_from(self.base);
        let to = end.offset_from(self.base);
        for set in self.slot_sets.iter().filter_map(OnceLock::get) {
            set.remove_range(from, to);
        }
    }

    /// Forget every slot of one type.
    pub fn clear_slot_set(&self, kind: RememberedSetType) {
        if let Some(set) = self.slot_set(kind) {
            set.clear();
        }
    }

    // =========================================================================
    // Ages
    // =========================================================================

    fn ages(&self) -> &[AtomicU8] {
        self.age_table.get_or_init(|| {
            (0..CHUNK_SIZE / WORD_SIZE)
                .map(|_| AtomicU8::new(0))
                .collect()
        })
    }

    /// Scavenges survived by the object at `address`.
    #[inline]
    pub fn age(&self, address: Address) -> u8 {
        match self.age_table.get() {
            Some(ages) => ages[self.bit_index(address)].load(Ordering::Relaxed),
            None => 0,
        }
    }

    pub(crate) fn set_age(&self, address: Address, age: u8) {
        self.ages()[self.bit_index(address)].store(age, Ordering::Relaxed);
    }

    pub(crate) fn clear_ages(&self) {
        if let Some(ages) = self.age_table.get() {
            for age in ages.iter() {
                age.store(0, Ordering::Relaxed);
            }
        }
    }
}

/// Shared handle to a page's metadata.
///
/// Valid until the page is freed by the memory allocator. Spaces drop their
/// handles before freeing.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRef(NonNull<PageMetadata>);

// Safety: PageMetadata is Sync (atomics and OnceLock); the handle is a pointer
// to it whose lifetime is managed by the MemoryAllocator.
unsafe impl Send for PageRef {}
unsafe impl Sync for PageRef {}

impl PageRef {
    pub(crate) fn new(metadata: &PageMetadata) -> Self {
        Self(NonNull::from(metadata))
    }

    /// Page containing the object at `address`.
    ///
    /// # Safety
    ///
    /// Same contract as [`MemoryChunk::from_address`].
    #[inline]
    pub unsafe fn from_address(address: Address) -> Self {
        // Safety: forwarded to the caller.
        let chunk = unsafe { MemoryChunk::from_address(address) };
        Self::new(chunk.metadata())
    }
}

impl Deref for PageRef {
    type Target = PageMetadata;

    #[inline]
    fn deref(&self) -> &PageMetadata {
        // Safety: see the type-level contract.
        unsafe { self.0.as_ref() }
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}, {:?})", self.base(), self.owner())
    }
}
