//! End-to-end scenario: a system's command buffer is invisible to every
//! other system in the same tick, and fully merged by the next one.

use std::sync::{Arc, Mutex};

use ecs_core::component::{Component, ComponentClass};
use ecs_core::entity::Entity;
use ecs_core::filter::FilterGroupKey;
use ecs_core::pack::{PackDescriptor, PackMode, Slicing};
use ecs_core::scheduler::ThreadingMode;
use ecs_core::state::State;

#[derive(Clone)]
struct Tag;
impl Component for Tag {
    const CLASS: ComponentClass = ComponentClass::Flag;
    const NAME: &'static str = "IsolationTag";
}

#[test]
fn a_systems_creation_is_not_visible_to_b_until_the_next_tick() {
    let mut state = State::default();
    let tag_id = ecs_core::component::type_id_of::<Tag>();

    // System A (declared first): creates one entity and tags it, every tick.
    state
        .declare(
            ThreadingMode::Serial,
            vec![PackDescriptor::new(FilterGroupKey::builder().build(), vec![], PackMode::Direct, Slicing::Full)],
            Box::new(|_packs, commands, _dt| {
                let created = commands.create(1);
                commands.add::<Tag>(&created, &[], true);
            }),
        )
        .unwrap();

    // System B (declared after A): records what it sees filtered by Tag.
    let b_log: Arc<Mutex<Vec<Vec<Entity>>>> = Arc::new(Mutex::new(Vec::new()));
    let b_log_in_cb = b_log.clone();
    state
        .declare(
            ThreadingMode::Serial,
            vec![PackDescriptor::new(
                FilterGroupKey::builder().filters(vec![tag_id]).build(),
                vec![],
                PackMode::Direct,
                Slicing::Full,
            )],
            Box::new(move |packs, _commands, _dt| {
                b_log_in_cb.lock().unwrap().push(packs[0].entities.to_vec());
            }),
        )
        .unwrap();

    state.tick(1.0);
    assert!(b_log.lock().unwrap()[0].is_empty(), "B must not observe A's same-tick creation");

    state.tick(1.0);
    assert_eq!(b_log.lock().unwrap()[1].len(), 1, "B observes the entity A created last tick");
}
