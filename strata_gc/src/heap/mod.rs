//! The heap and its spaces.
//!
//! ```text
//!  ┌──────────────────────────── Heap ─────────────────────────────┐
//!  │ read-only │ new (to/from) │ old │ code │ shared │ large (x4)  │
//!  └───────────┴───────────────┴─────┴──────┴────────┴─────────────┘
//!        all pages registered with one MemoryAllocator
//! ```
//!
//! - Read-only: immortal root maps, sealed after bootstrap
//! - New: semispace young generation, scavenged by the minor collector
//! - Old, code, shared: paged spaces with LAB and free list
//! - Large object spaces: one object per page, young and old variants
//!
//! The [`Heap`] is the only entry point for the mutator: allocation,
//! object factories, checked field access, handles and explicit
//! collection all go through it.

mod allocator;
mod factory;
mod free_list;
mod large_object_space;
mod new_space;
mod paged_space;
mod read_only_space;
mod space;
mod verify;

pub use free_list::{CATEGORY_BOUNDARIES, FreeList, FreeRegion, MIN_BLOCK_SIZE, NUM_CATEGORIES};
pub use large_object_space::LargeObjectSpace;
pub use new_space::{NewSpace, SemiSpace, SemiSpaceId};
pub use paged_space::PagedSpace;
pub use read_only_space::ReadOnlySpace;
pub use space::{AddressClass, AllocationOrigin, LinearAllocationArea, Space, SpaceKind};

use crate::collector::{GcPhase, MarkingState};
use crate::config::HeapConfig;
use crate::error::HeapError;
use crate::memory::{MemoryAllocator, PageRef};
use crate::objects::{HeapObject, MapWord, ReadOnlyRoots};
use crate::roots::{GlobalHandle, HandleScope, LocalHandle, RootProvider, RootSet};
use crate::stats::GcStats;
use crate::tracer::{DEFAULT_EVENT_CAPACITY, GcTracer};
use std::sync::Arc;
use strata_core::{Address, HeapReference, TaggedValue};

/// A garbage-collected heap.
///
/// Owns every space, the root set and the collector state. References to
/// heap objects are plain [`TaggedValue`]s and become stale at the next
/// collection unless held in a handle.
pub struct Heap {
    pub(crate) config: HeapConfig,
    pub(crate) memory: Arc<MemoryAllocator>,

    pub(crate) read_only_space: ReadOnlySpace,
    pub(crate) read_only_roots: ReadOnlyRoots,
    pub(crate) new_space: NewSpace,
    pub(crate) new_lo_space: LargeObjectSpace,
    pub(crate) old_space: PagedSpace,
    pub(crate) code_space: PagedSpace,
    pub(crate) shared_space: PagedSpace,
    pub(crate) lo_space: LargeObjectSpace,
    pub(crate) code_lo_space: LargeObjectSpace,
    pub(crate) shared_lo_space: LargeObjectSpace,

    pub(crate) roots: RootSet,
    pub(crate) marking: MarkingState,
    pub(crate) phase: GcPhase,

    pub(crate) stats: GcStats,
    pub(crate) tracer: GcTracer,

    /// Evacuated pages kept mapped until the next collection so forwarding
    /// words stay readable.
    pub(crate) pending_release: Vec<PageRef>,
    /// Allocation volume since the last incremental marking step.
    pub(crate) bytes_since_marking_step: usize,
}

impl Heap {
    /// Create a heap: validate the configuration, bootstrap the read-only
    /// roots and commit the young generation.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        let memory = Arc::new(MemoryAllocator::new(
            config.initial_old_size,
            config.max_old_size,
        ));

        let mut read_only_space = ReadOnlySpace::new(memory.clone())?;
        let read_only_roots = ReadOnlyRoots::bootstrap(&mut read_only_space)?;
        read_only_space.seal();

        let new_space = NewSpace::new(&memory, config.semi_space_pages())?;
        let new_lo_space =
            LargeObjectSpace::new(SpaceKind::New, memory.clone(), new_space.capacity());
        let paged =
            |identity| PagedSpace::new(identity, memory.clone(), read_only_roots);
        let large = |identity| LargeObjectSpace::new(identity, memory.clone(), 0);

        let heap = Self {
            old_space: paged(SpaceKind::Old),
            code_space: paged(SpaceKind::Code),
            shared_space: paged(SpaceKind::Shared),
            lo_space: large(SpaceKind::LargeObject),
            code_lo_space: large(SpaceKind::Code),
            shared_lo_space: large(SpaceKind::Shared),
            tracer: GcTracer::new(DEFAULT_EVENT_CAPACITY, config.trace_gc),
            config,
            memory,
            read_only_space,
            read_only_roots,
            new_space,
            new_lo_space,
            roots: RootSet::new(),
            marking: MarkingState::new(),
            phase: GcPhase::Idle,
            stats: GcStats::default(),
            pending_release: Vec::new(),
            bytes_since_marking_step: 0,
        };
        tracing::info!(
            target: "strata_gc::heap",
            semi_space = heap.config.semi_space_size,
            initial_old = heap.config.initial_old_size,
            max_old = heap.config.max_old_size,
            "heap created"
        );
        Ok(heap)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The configuration the heap was created with.
    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// The page allocator and chunk registry.
    #[inline]
    pub fn memory(&self) -> &MemoryAllocator {
        &self.memory
    }

    /// Collection statistics.
    #[inline]
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Recent collection events.
    #[inline]
    pub fn tracer(&self) -> &GcTracer {
        &self.tracer
    }

    /// The root set.
    #[inline]
    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    /// Incremental marking state.
    #[inline]
    pub fn marking(&self) -> &MarkingState {
        &self.marking
    }

    /// What the collector is doing.
    #[inline]
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    /// Whether incremental marking is in progress.
    #[inline]
    pub fn is_marking(&self) -> bool {
        self.marking.is_active()
    }

    /// The immortal root maps.
    #[inline]
    pub fn read_only_roots(&self) -> &ReadOnlyRoots {
        &self.read_only_roots
    }

    /// The read-only space.
    #[inline]
    pub fn read_only_space(&self) -> &ReadOnlySpace {
        &self.read_only_space
    }

    /// The young generation.
    #[inline]
    pub fn new_space(&self) -> &NewSpace {
        &self.new_space
    }

    /// Young large objects.
    #[inline]
    pub fn new_lo_space(&self) -> &LargeObjectSpace {
        &self.new_lo_space
    }

    /// Old generation, regular pages.
    #[inline]
    pub fn old_space(&self) -> &PagedSpace {
        &self.old_space
    }

    /// Code pages.
    #[inline]
    pub fn code_space(&self) -> &PagedSpace {
        &self.code_space
    }

    /// Shared pages.
    #[inline]
    pub fn shared_space(&self) -> &PagedSpace {
        &self.shared_space
    }

    /// Old large objects.
    #[inline]
    pub fn lo_space(&self) -> &LargeObjectSpace {
        &self.lo_space
    }

    /// Large code objects.
    #[inline]
    pub fn code_lo_space(&self) -> &LargeObjectSpace {
        &self.code_lo_space
    }

    /// Large shared objects.
    #[inline]
    pub fn shared_lo_space(&self) -> &LargeObjectSpace {
        &self.shared_lo_space
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Hold `value` across collections until [`Heap::destroy_global`].
    pub fn create_global(&mut self, value: TaggedValue) -> GlobalHandle {
        self.roots.globals_mut().create(value)
    }

    /// Current value of a global handle.
    pub fn global(&self, handle: GlobalHandle) -> Option<TaggedValue> {
        self.roots.globals().get(handle)
    }

    /// Overwrite a global handle. Returns false for a destroyed handle.
    pub fn set_global(&mut self, handle: GlobalHandle, value: TaggedValue) -> bool {
        self.roots.globals_mut().set(handle, value)
    }

    /// Release a global handle.
    pub fn destroy_global(&mut self, handle: GlobalHandle) {
        self.roots.globals_mut().destroy(handle);
    }

    /// Open a handle scope; locals created until it closes are roots.
    pub fn open_handle_scope(&mut self) -> HandleScope {
        self.roots.locals_mut().open_scope()
    }

    /// Close a scope and drop its locals.
    pub fn close_handle_scope(&mut self, scope: HandleScope) {
        self.roots.locals_mut().close_scope(scope);
    }

    /// Hold `value` until the innermost scope closes.
    pub fn create_local(&mut self, value: TaggedValue) -> LocalHandle {
        self.roots.locals_mut().create(value)
    }

    /// Current value of a local handle.
    pub fn local(&self, handle: LocalHandle) -> Option<TaggedValue> {
        self.roots.locals().get(handle)
    }

    /// Register an external source of roots.
    pub fn add_root_provider(&mut self, provider: Box<dyn RootProvider + Send>) {
        self.roots.add_provider(provider);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Which space owns the page containing `address`.
    pub fn classify_address(&self, address: Address) -> AddressClass {
        match self.memory.lookup(address) {
            Some(page) => AddressClass::InSpace(page.owner()),
            None => AddressClass::NotHeap,
        }
    }

    /// Where `reference` moved during the last collection, if it did.
    ///
    /// Follows forwarding words left in from-space and on evacuated pages,
    /// which stay readable until the next collection starts.
    pub fn is_forwarded(&self, reference: HeapReference) -> Option<HeapReference> {
        let mut current = reference.address();
        let mut moved = false;
        while let Some(page) = self.memory.lookup(current) {
            if !page.contains(current) {
                break;
            }
            match HeapObject::from_address(current).map_word() {
                MapWord::ForwardedTo(target) => {
                    current = target;
                    moved = true;
                }
                _ => break,
            }
        }
        moved.then(|| HeapObject::from_address(current).reference())
    }

    /// Every page whose objects may hold old-generation slots.
    pub fn old_generation_pages(&self) -> Vec<PageRef> {
        let paged = [&self.old_space, &self.code_space, &self.shared_space];
        let large = [&self.lo_space, &self.code_lo_space, &self.shared_lo_space];
        paged
            .into_iter()
            .flat_map(|space| space.pages().iter().copied())
            .chain(large.into_iter().flat_map(|space| space.pages().iter().copied()))
            .collect()
    }

    /// Bytes held by young objects.
    pub fn young_generation_size(&self) -> usize {
        self.new_space.size() + self.new_lo_space.size()
    }

    /// Bytes held by old-generation objects.
    pub fn old_generation_size(&self) -> usize {
        self.old_space.size()
            + self.code_space.size()
            + self.shared_space.size()
            + self.lo_space.size()
            + self.code_lo_space.size()
            + self.shared_lo_space.size()
    }

    /// Bytes held by objects outside read-only space.
    pub fn size_of_objects(&self) -> usize {
        self.young_generation_size() + self.old_generation_size()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Return every paged space's LAB tail to its free list.
    ///
    /// Afterwards every page can be walked object by object.
    pub fn free_linear_allocation_areas(&mut self) {
        self.old_space.free_linear_allocation_area();
        self.code_space.free_linear_allocation_area();
        self.shared_space.free_linear_allocation_area();
    }

    /// Unmap the pages emptied by the previous evacuation.
    pub(crate) fn release_pending_pages(&mut self) {
        if self.pending_release.is_empty() {
            return;
        }
        let count = self.pending_release.len();
        for page in self.pending_release.drain(..) {
            self.memory.free_page(page);
        }
        tracing::debug!(target: "strata_gc::heap", count, "released evacuated pages");
    }

    /// Report an unrecoverable allocation failure to the OOM handler.
    pub(crate) fn fatal_out_of_memory(&self, message: &str) -> ! {
        tracing::error!(
            target: "strata_gc::heap",
            young = self.young_generation_size(),
            old = self.old_generation_size(),
            committed = self.memory.committed(),
            "out of memory: {message}"
        );
        self.stats.log_summary();
        (self.config.oom_handler)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::memory::{CHUNK_SIZE, PAGE_AREA_SIZE};

    #[test]
    fn test_new_heap_is_empty() {
        let heap = Heap::new(HeapConfig::for_testing()).unwrap();
        assert_eq!(heap.size_of_objects(), 0);
        assert!(heap.old_generation_pages().is_empty());
        assert_eq!(heap.phase(), GcPhase::Idle);
        assert!(heap.read_only_space().is_sealed());
        assert_eq!(heap.new_space().capacity(), PAGE_AREA_SIZE);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = HeapConfig {
            semi_space_size: CHUNK_SIZE / 2,
            ..HeapConfig::for_testing()
        };
        assert!(matches!(
            Heap::new(config),
            Err(HeapError::Config(ConfigError::SemiSpaceTooSmall))
        ));
    }

    #[test]
    fn test_classify_address() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let young = heap.new_fixed_array(2, SpaceKind::New);
        let old = heap.new_fixed_array(2, SpaceKind::Old);
        let code = heap.new_code(&[0x90; 8], TaggedValue::ZERO);
        let map = heap.read_only_roots().fixed_array_map();
        let local = 0u64;

        let class = |object: HeapObject| heap.classify_address(object.address());
        assert_eq!(class(young.object()), AddressClass::InSpace(SpaceKind::New));
        assert_eq!(class(old.object()), AddressClass::InSpace(SpaceKind::Old));
        assert_eq!(class(code.object()), AddressClass::InSpace(SpaceKind::Code));
        assert_eq!(class(map.object()), AddressClass::InSpace(SpaceKind::ReadOnly));
        assert_eq!(
            heap.classify_address(Address::from_ptr(&local)),
            AddressClass::NotHeap
        );
    }

    #[test]
    fn test_is_forwarded_after_scavenge() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let array = heap.new_fixed_array(3, SpaceKind::New);
        let before = array.reference();
        let handle = heap.create_global(array.to_tagged());
        assert_eq!(heap.is_forwarded(before), None);

        heap.collect_garbage(crate::GcKind::Minor, crate::GcReason::Testing);
        let after = heap.global(handle).unwrap().as_heap_reference().unwrap();
        assert_ne!(after, before);
        assert_eq!(heap.is_forwarded(before), Some(after));
        assert_eq!(heap.is_forwarded(after), None);
    }

    #[test]
    fn test_local_handles_scope() {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let scope = heap.open_handle_scope();
        let local = heap.create_local(TaggedValue::from_small_int(7).unwrap());
        assert_eq!(heap.local(local), TaggedValue::from_small_int(7).ok());
        heap.close_handle_scope(scope);
        assert_eq!(heap.local(local), None);
    }
}
