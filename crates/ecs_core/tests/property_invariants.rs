//! Property tests over the invariants spec.md §8 calls out explicitly:
//! stage-partition disjointness, filter-result sortedness, and slice/merge
//! round-tripping for parallel dispatch.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;

use ecs_core::component::{Component, ComponentClass};
use ecs_core::entity::Entity;
use ecs_core::filter::FilterGroupKey;
use ecs_core::pack::{Binding, PackDescriptor, PackMode, Slicing};
use ecs_core::scheduler::ThreadingMode;
use ecs_core::state::State;
use ecs_core::storage::StagedSparseArray;

#[derive(Clone, Copy, Debug)]
enum Op {
    Add(u32),
    Destroy(u32),
    Promote,
}

fn op_strategy(max_id: u32) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..max_id).prop_map(Op::Add),
        (0..max_id).prop_map(Op::Destroy),
        Just(Op::Promote),
    ]
}

proptest! {
    /// After any sequence of add/destroy/promote, the ADDED/ALIVE/REMOVED
    /// partitions never overlap and their union is exactly every entity the
    /// array currently knows about (spec.md §4.1).
    #[test]
    fn stage_partitions_stay_disjoint_and_cover(ops in prop::collection::vec(op_strategy(16), 0..200)) {
        let mut array = StagedSparseArray::new(0);
        let dangling = std::ptr::NonNull::dangling().as_ptr();
        for op in ops {
            match op {
                Op::Add(id) => unsafe { array.add(Entity(id), dangling) },
                Op::Destroy(id) => array.destroy(Entity(id)),
                Op::Promote => unsafe { array.promote(None) },
            }
            let mut seen = std::collections::HashSet::new();
            for e in array.added().iter().chain(array.alive()).chain(array.removed()) {
                prop_assert!(seen.insert(*e), "entity {:?} appeared in more than one stage", e);
            }
            prop_assert_eq!(seen.len(), array.len());
        }
    }
}

#[derive(Clone, Copy)]
struct Marker;
impl Component for Marker {
    const CLASS: ComponentClass = ComponentClass::Flag;
    const NAME: &'static str = "PropertyMarker";
}

proptest! {
    /// A `filters` group's materialized entity list is always strictly
    /// ascending with no duplicates, across arbitrary add/destroy/tick
    /// sequences (spec.md §4.2, §8).
    #[test]
    fn filter_results_are_always_strictly_sorted(
        batches in prop::collection::vec(prop::collection::vec(0u32..64, 0..20), 1..6)
    ) {
        let mut state = State::default();
        let created = state.create(64);
        let marker_id = ecs_core::component::type_id_of::<Marker>();
        let key = FilterGroupKey::builder().filters(vec![marker_id]).build();
        let log: Arc<Mutex<Vec<Entity>>> = Arc::new(Mutex::new(Vec::new()));
        let log_in_cb = log.clone();
        state
            .declare(
                ThreadingMode::Serial,
                vec![PackDescriptor::new(key, vec![], PackMode::Direct, Slicing::Full)],
                Box::new(move |packs, _commands, _dt| {
                    *log_in_cb.lock().unwrap() = packs[0].entities.to_vec();
                }),
            )
            .unwrap();

        for ids in batches {
            let targets: Vec<Entity> = ids.into_iter().map(|i| created[i as usize % created.len()]).collect();
            if !targets.is_empty() {
                state.add::<Marker>(&targets, &Marker);
            }
            state.tick(1.0);
            let result = log.lock().unwrap().clone();
            for window in result.windows(2) {
                prop_assert!(window[0] < window[1], "result not strictly ascending: {:?}", result);
            }
        }
    }
}

#[derive(Clone, Copy)]
struct Counter(u32);
impl Component for Counter {
    const CLASS: ComponentClass = ComponentClass::Trivial;
    const NAME: &'static str = "PropertyCounter";
}

proptest! {
    /// Slicing a partial pack across `W` workers and concatenating the
    /// chunks (ordered by their first entity) recovers exactly the same
    /// entity order a serial (`W = 1`) pass would see (spec.md §4.3, §8).
    #[test]
    fn parallel_slices_reassemble_into_serial_order(
        entity_count in 1usize..500,
        worker_count in 0usize..8,
    ) {
        let mut state = State::new(worker_count, 1 << 20, 1);
        let entities = state.create(entity_count);
        state.add::<Counter>(&entities, &Counter(0));

        let counter_id = ecs_core::component::type_id_of::<Counter>();
        let key = FilterGroupKey::builder().filters(vec![counter_id]).build();
        let pack = PackDescriptor::new(key, vec![Binding::Read(counter_id)], PackMode::Direct, Slicing::Partial);

        let chunks: Arc<Mutex<Vec<Vec<Entity>>>> = Arc::new(Mutex::new(Vec::new()));
        let chunks_in_cb = chunks.clone();
        state
            .declare(
                ThreadingMode::Parallel,
                vec![pack],
                Box::new(move |packs, _commands, _dt| {
                    chunks_in_cb.lock().unwrap().push(packs[0].entities.to_vec());
                }),
            )
            .unwrap();

        state.tick(1.0);

        let mut collected = chunks.lock().unwrap().clone();
        collected.sort_by_key(|chunk| chunk.first().copied());
        let reassembled: Vec<Entity> = collected.into_iter().flatten().collect();

        let mut expected = entities.clone();
        expected.sort();
        prop_assert_eq!(reassembled, expected);
    }
}
