//! End-to-end collection scenarios through the public heap API.

use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use strata_gc::heap::Space;
use strata_gc::memory::CHUNK_SIZE;
use strata_gc::roots::RootVisitor;
use strata_gc::{
    AddressClass, FixedArray, GcKind, GcPhase, GcReason, GlobalHandle, Heap, HeapConfig,
    RememberedSetType, RootProvider, SpaceKind, TaggedValue,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn smi(value: i64) -> TaggedValue {
    TaggedValue::from_small_int(value).unwrap()
}

fn tag(heap: &Heap, array: TaggedValue, id: i64) {
    heap.store_field(array.as_heap_reference().unwrap(), FixedArray::offset_of(0), smi(id))
        .unwrap();
}

fn id_of(heap: &Heap, array: TaggedValue) -> i64 {
    heap.read_field(array.as_heap_reference().unwrap(), FixedArray::offset_of(0))
        .unwrap()
        .to_small_int()
        .unwrap()
}

/// Allocate `count` old arrays of `length` slots, rooting every `stride`-th.
fn fill_old_space(
    heap: &mut Heap,
    count: usize,
    length: usize,
    stride: usize,
) -> Vec<(i64, GlobalHandle)> {
    let mut rooted = Vec::new();
    for index in 0..count {
        let array = heap.new_fixed_array(length, SpaceKind::Old).to_tagged();
        tag(heap, array, index as i64);
        if index % stride == 0 {
            rooted.push((index as i64, heap.create_global(array)));
        }
    }
    rooted
}

#[test]
fn test_unreachable_young_pair_is_reclaimed() {
    init_tracing();
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let a = heap.new_fixed_array(1, SpaceKind::New);
    assert_eq!(a.object().size(), 24);
    assert!(a.object().chunk().is_to_page());
    let b = heap.new_fixed_array(1, SpaceKind::New);

    let slot = FixedArray::offset_of(0);
    heap.store_field(a.reference(), slot, b.to_tagged()).unwrap();
    let slot_address = a.object().address().offset(slot);
    assert!(!a.object().page().contains_slot(RememberedSetType::OldToNew, slot_address));

    // Neither object is rooted; b is reachable only through a.
    heap.collect_garbage(GcKind::Minor, GcReason::Testing);

    let event = heap.tracer().last().unwrap();
    assert_eq!(event.survived, 0);
    assert_eq!(event.promoted, 0);
    assert_eq!(heap.is_forwarded(a.reference()), None);
    assert_eq!(heap.is_forwarded(b.reference()), None);
    assert_eq!(heap.new_space().size(), 0);
    let to_space = heap.new_space().to_space();
    assert_eq!(heap.new_space().top(), to_space.pages()[0].area_start());
}

#[test]
fn test_classification_is_stable_between_collections() {
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let young = heap.new_fixed_array(1, SpaceKind::New).object().address();
    let large = heap.new_byte_array(64 * 1024, SpaceKind::Old).object().address();
    let local = 0u64;
    let foreign = strata_gc::Address::from_ptr(&local);
    for address in [young, large, foreign] {
        assert_eq!(heap.classify_address(address), heap.classify_address(address));
    }
    assert_eq!(
        heap.classify_address(large),
        AddressClass::InSpace(SpaceKind::LargeObject)
    );
    assert_eq!(heap.classify_address(foreign), AddressClass::NotHeap);
}

#[test]
fn test_compaction_moves_sparse_pages() {
    init_tracing();
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let rooted = fill_old_space(&mut heap, 700, 125, 25);
    // The first cycle sweeps the garbage; the sparse pages it leaves behind
    // become candidates for the next one.
    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    let pages_before = heap.old_space().pages().len();
    assert!(pages_before >= 2);
    let before: Vec<_> = rooted
        .iter()
        .map(|(_, handle)| heap.global(*handle).unwrap())
        .collect();

    heap.collect_garbage(GcKind::Major, GcReason::Testing);

    let event = heap.tracer().last().unwrap().clone();
    assert!(event.pages_evacuated >= 1);
    assert!(heap.old_space().pages().len() < pages_before);
    for ((id, handle), old) in rooted.iter().zip(before) {
        let now = heap.global(*handle).unwrap();
        assert_eq!(id_of(&heap, now), *id);
        if now != old {
            assert_eq!(
                heap.is_forwarded(old.as_heap_reference().unwrap()),
                now.as_heap_reference()
            );
        }
    }
    assert_eq!(heap.verify(), Ok(()));
}

#[test]
fn test_incremental_marking_finalizes_on_its_own() {
    init_tracing();
    let config = HeapConfig {
        incremental_marking: true,
        marking_step_bytes: 4 * 1024,
        major_gc_threshold: 0.25,
        ..HeapConfig::for_testing()
    };
    let mut heap = Heap::new(config).unwrap();
    let rooted = fill_old_space(&mut heap, 1000, 125, 50);

    let finalized = heap
        .tracer()
        .events()
        .any(|event| event.reason == GcReason::FinalizeMarking);
    assert!(finalized);
    for (id, handle) in &rooted {
        assert_eq!(id_of(&heap, heap.global(*handle).unwrap()), *id);
    }

    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    assert_eq!(heap.phase(), GcPhase::Idle);
    assert!(!heap.is_marking());
}

#[test]
fn test_store_during_marking_keeps_target_alive() {
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let host = heap.new_fixed_array(1, SpaceKind::Old).to_tagged();
    let host_handle = heap.create_global(host);
    // Unreachable when marking starts; only this local refers to it.
    let target = heap.new_fixed_array(1, SpaceKind::Old).to_tagged();
    tag(&heap, target, 42);

    heap.start_incremental_marking();
    heap.incremental_marking_step(usize::MAX);
    assert!(heap.marking().is_worklist_empty());

    let host = heap.global(host_handle).unwrap();
    heap.store_field(host.as_heap_reference().unwrap(), FixedArray::offset_of(0), target)
        .unwrap();

    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    let host = heap.global(host_handle).unwrap();
    let target = heap
        .read_field(host.as_heap_reference().unwrap(), FixedArray::offset_of(0))
        .unwrap();
    assert_eq!(id_of(&heap, target), 42);
}

struct StackRoots(Arc<Mutex<Vec<TaggedValue>>>);

impl RootProvider for StackRoots {
    fn visit_roots(&mut self, visitor: &mut dyn RootVisitor) {
        for slot in self.0.lock().iter_mut() {
            visitor.visit_root(slot);
        }
    }
}

#[test]
fn test_root_provider_slots_are_updated() {
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let stack = Arc::new(Mutex::new(Vec::new()));
    heap.add_root_provider(Box::new(StackRoots(stack.clone())));

    let young = heap.new_fixed_array(2, SpaceKind::New).to_tagged();
    tag(&heap, young, 7);
    stack.lock().push(young);
    stack.lock().push(smi(-3));

    heap.collect_garbage(GcKind::Minor, GcReason::Testing);
    let moved = stack.lock()[0];
    assert_ne!(moved, young);
    assert_eq!(id_of(&heap, moved), 7);
    assert_eq!(stack.lock()[1], smi(-3));

    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    let promoted = stack.lock()[0];
    assert_eq!(
        heap.classify_address(promoted.as_heap_reference().unwrap().address()),
        AddressClass::InSpace(SpaceKind::Old)
    );
    assert_eq!(id_of(&heap, promoted), 7);
}

#[test]
fn test_statistics_and_events() {
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    heap.new_fixed_array(16, SpaceKind::New);
    heap.collect_garbage(GcKind::Minor, GcReason::Explicit);
    heap.collect_garbage(GcKind::Major, GcReason::Explicit);

    let events: Vec<_> = heap.tracer().events().cloned().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sequence + 1, events[1].sequence);
    assert_eq!(events[0].kind, GcKind::Minor);
    assert_eq!(events[1].kind, GcKind::Major);
    assert_eq!(heap.tracer().total(), 2);
    assert!(heap.stats().total_gc_time() >= events[0].duration);
}

fn panic_on_out_of_memory(message: &str) -> ! {
    panic!("out of memory: {message}")
}

#[test]
fn test_exhaustion_reaches_oom_handler() {
    let config = HeapConfig {
        initial_old_size: 4 * CHUNK_SIZE,
        max_old_size: 4 * CHUNK_SIZE,
        oom_handler: panic_on_out_of_memory,
        ..HeapConfig::for_testing()
    };
    let mut heap = Heap::new(config).unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        for _ in 0..10_000 {
            let array = heap.new_fixed_array(1000, SpaceKind::Old);
            heap.create_global(array.to_tagged());
        }
    }));
    let payload = outcome.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.starts_with("out of memory"));
}

#[test]
fn test_oversized_request_reaches_oom_handler() {
    let config = HeapConfig {
        oom_handler: panic_on_out_of_memory,
        ..HeapConfig::for_testing()
    };
    for (length, space) in [
        (usize::MAX - 4, SpaceKind::Old),
        (usize::MAX / 2, SpaceKind::New),
    ] {
        let mut heap = Heap::new(config.clone()).unwrap();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            heap.new_byte_array(length, space);
        }));
        let payload = outcome.unwrap_err();
        let message = payload.downcast_ref::<String>().unwrap();
        assert!(message.starts_with("out of memory"), "{message}");
        assert!(message.contains("largest object"), "{message}");
    }

    let mut heap = Heap::new(config).unwrap();
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        heap.allocate(usize::MAX, SpaceKind::Old);
    }));
    assert!(outcome.is_err());
}

#[test]
fn test_partially_aborted_evacuation_keeps_forwarding() {
    init_tracing();
    let config = HeapConfig {
        initial_old_size: 2 * CHUNK_SIZE,
        max_old_size: 2 * CHUNK_SIZE,
        ..HeapConfig::for_testing()
    };
    let mut heap = Heap::new(config).unwrap();

    // First page: sparse survivors. Second page: fully live up to a small
    // tail, the only room left for copies once the cap is reached.
    let mut rooted = Vec::new();
    let mut first_page = None;
    let mut index = 0i64;
    loop {
        let array = heap.new_fixed_array(30, SpaceKind::Old);
        tag(&heap, array.to_tagged(), index);
        let page = *first_page.get_or_insert(array.object().page().base());
        let on_first_page = array.object().page().base() == page;
        if !on_first_page || index % 10 == 0 {
            rooted.push((index, heap.create_global(array.to_tagged())));
        }
        index += 1;
        let pages = heap.old_space().pages().len();
        if pages == 2 && heap.old_space().linear_allocation_area().remaining() < 4096 {
            break;
        }
    }

    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    let before: Vec<_> = rooted
        .iter()
        .map(|(_, handle)| heap.global(*handle).unwrap())
        .collect();
    heap.collect_garbage(GcKind::Major, GcReason::Testing);

    assert!(heap.stats().aborted_pages() > 0);
    let mut moved = 0;
    for ((id, handle), old) in rooted.iter().zip(before) {
        let now = heap.global(*handle).unwrap();
        assert_eq!(id_of(&heap, now), *id);
        if now != old {
            moved += 1;
            assert_eq!(
                heap.is_forwarded(old.as_heap_reference().unwrap()),
                now.as_heap_reference()
            );
        }
    }
    assert!(moved > 0);
    assert_eq!(heap.verify(), Ok(()));

    // The next cycle reclaims the forwarded leftovers.
    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    for (id, handle) in &rooted {
        assert_eq!(id_of(&heap, heap.global(*handle).unwrap()), *id);
    }
    assert_eq!(heap.verify(), Ok(()));
}
