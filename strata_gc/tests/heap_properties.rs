//! Model-based properties: random object graphs survive any sequence of
//! allocations, stores, root drops and collections with their shape intact.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use strata_gc::objects::layout::LENGTH_OFFSET;
use strata_gc::{
    AddressClass, FixedArray, GcKind, GcReason, GlobalHandle, Heap, HeapConfig, SpaceKind,
    TaggedValue,
};

const EDGES: usize = 2;

#[derive(Debug, Clone)]
enum Op {
    Alloc { space: SpaceKind },
    Link { from: usize, edge: usize, to: usize },
    Unlink { from: usize, edge: usize },
    Unroot(usize),
    Garbage(usize),
    Collect(GcKind),
}

fn arb_space() -> impl Strategy<Value = SpaceKind> {
    prop_oneof![
        3 => Just(SpaceKind::New),
        2 => Just(SpaceKind::Old),
        1 => Just(SpaceKind::Shared),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => arb_space().prop_map(|space| Op::Alloc { space }),
        4 => (any::<usize>(), 0..EDGES, any::<usize>())
            .prop_map(|(from, edge, to)| Op::Link { from, edge, to }),
        1 => (any::<usize>(), 0..EDGES).prop_map(|(from, edge)| Op::Unlink { from, edge }),
        1 => any::<usize>().prop_map(Op::Unroot),
        1 => (1usize..64).prop_map(|kb| Op::Garbage(kb * 1024)),
        1 => prop_oneof![Just(GcKind::Minor), Just(GcKind::Major)].prop_map(Op::Collect),
    ]
}

/// Expected graph: node id to its outgoing edges.
#[derive(Default)]
struct Model {
    edges: HashMap<i64, [Option<i64>; EDGES]>,
    roots: Vec<(i64, GlobalHandle)>,
    next_id: i64,
}

fn smi(value: i64) -> TaggedValue {
    TaggedValue::from_small_int(value).unwrap()
}

fn field(heap: &Heap, node: TaggedValue, index: usize) -> TaggedValue {
    heap.read_field(node.as_heap_reference().unwrap(), FixedArray::offset_of(index))
        .unwrap()
}

fn node_id(heap: &Heap, node: TaggedValue) -> i64 {
    field(heap, node, 0).to_small_int().unwrap()
}

/// Walk every rooted node and compare ids and edges with the model.
fn check_graph(heap: &Heap, model: &Model) -> Result<(), TestCaseError> {
    let mut seen = HashSet::new();
    let mut stack: Vec<(i64, TaggedValue)> = model
        .roots
        .iter()
        .map(|(id, handle)| (*id, heap.global(*handle).unwrap()))
        .collect();
    while let Some((id, node)) = stack.pop() {
        prop_assert_eq!(node_id(heap, node), id);
        let length = heap
            .read_field(node.as_heap_reference().unwrap(), LENGTH_OFFSET)
            .unwrap();
        prop_assert_eq!(length, smi(1 + EDGES as i64));
        if !seen.insert(id) {
            continue;
        }
        for (edge, expected) in model.edges[&id].iter().enumerate() {
            let value = field(heap, node, 1 + edge);
            match expected {
                Some(target) => {
                    prop_assert!(value.is_heap_reference());
                    stack.push((*target, value));
                }
                None => prop_assert_eq!(value, TaggedValue::ZERO),
            }
        }
    }
    Ok(())
}

fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
    let mut model = Model::default();

    for op in ops {
        match op {
            Op::Alloc { space } => {
                let array = heap.new_fixed_array(1 + EDGES, space);
                let id = model.next_id;
                model.next_id += 1;
                heap.store_field(array.reference(), FixedArray::offset_of(0), smi(id))
                    .unwrap();
                let handle = heap.create_global(array.to_tagged());
                model.edges.insert(id, [None; EDGES]);
                model.roots.push((id, handle));
            }
            Op::Link { from, edge, to } if !model.roots.is_empty() => {
                let (from_id, from_handle) = model.roots[from % model.roots.len()];
                let (to_id, to_handle) = model.roots[to % model.roots.len()];
                let host = heap.global(from_handle).unwrap();
                let value = heap.global(to_handle).unwrap();
                heap.store_field(
                    host.as_heap_reference().unwrap(),
                    FixedArray::offset_of(1 + edge),
                    value,
                )
                .unwrap();
                model.edges.get_mut(&from_id).unwrap()[edge] = Some(to_id);
            }
            Op::Unlink { from, edge } if !model.roots.is_empty() => {
                let (from_id, from_handle) = model.roots[from % model.roots.len()];
                let host = heap.global(from_handle).unwrap();
                heap.store_field(
                    host.as_heap_reference().unwrap(),
                    FixedArray::offset_of(1 + edge),
                    TaggedValue::ZERO,
                )
                .unwrap();
                model.edges.get_mut(&from_id).unwrap()[edge] = None;
            }
            Op::Unroot(index) if !model.roots.is_empty() => {
                let (_, handle) = model.roots.remove(index % model.roots.len());
                heap.destroy_global(handle);
            }
            Op::Garbage(size) => {
                heap.new_byte_array(size, SpaceKind::New);
            }
            Op::Collect(kind) => {
                heap.collect_garbage(kind, GcReason::Testing);
                check_graph(&heap, &model)?;
            }
            _ => {}
        }
    }

    heap.collect_garbage(GcKind::Major, GcReason::Testing);
    check_graph(&heap, &model)?;
    prop_assert_eq!(heap.verify(), Ok(()));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reachable_graph_survives_collections(ops in prop::collection::vec(arb_op(), 1..80)) {
        run(ops)?;
    }

    #[test]
    fn allocation_lands_in_requested_space(
        space in prop_oneof![
            Just(SpaceKind::New),
            Just(SpaceKind::Old),
            Just(SpaceKind::Code),
            Just(SpaceKind::Shared),
        ],
        size in 8usize..(40 * 1024),
    ) {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let large = size > heap.config().large_object_threshold;
        let reference = heap.allocate(size, space).as_heap_reference().unwrap();
        let expected = match space {
            SpaceKind::Old if large => SpaceKind::LargeObject,
            other => other,
        };
        prop_assert_eq!(
            heap.classify_address(reference.address()),
            AddressClass::InSpace(expected)
        );
    }

    #[test]
    fn survivors_keep_their_payload(bytes in prop::collection::vec(any::<u8>(), 1..512)) {
        let mut heap = Heap::new(HeapConfig::for_testing()).unwrap();
        let array = heap.new_byte_array(bytes.len(), SpaceKind::New);
        for (index, byte) in bytes.iter().enumerate() {
            array.set(index, *byte).unwrap();
        }
        let handle = heap.create_global(array.to_tagged());
        for kind in [GcKind::Minor, GcKind::Minor, GcKind::Major] {
            heap.collect_garbage(kind, GcReason::Testing);
        }

        let moved = heap.global(handle).unwrap().as_heap_reference().unwrap();
        prop_assert_eq!(
            heap.classify_address(moved.address()),
            AddressClass::InSpace(SpaceKind::Old)
        );
        let length = heap.read_field(moved, LENGTH_OFFSET).unwrap();
        prop_assert_eq!(length, smi(bytes.len() as i64));
    }
}
