//! Per-system command buffer and merge protocol (spec.md §3, §4.4).
//!
//! A plain owned value moved into the state at merge time — the teacher's
//! smart-pointer-backed command buffers become ordinary struct fields here,
//! since no shared ownership is required once cyclic references are gone
//! (spec.md §9).

use crate::component::Component;
use crate::entity::{Entity, EntityAllocator};
use crate::storage::ComponentStore;
use crate::tracker::ChangeTracker;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub struct CommandBuffer {
    allocator: EntityAllocator,
    high_water_mark: u32,
    destroyed: HashSet<Entity>,
    containers: ComponentStore,
}

impl CommandBuffer {
    /// `high_water_mark` must be above every real entity ID currently live
    /// in the parent state, so provisional IDs can never collide before remap.
    pub fn new(high_water_mark: u32) -> Self {
        Self {
            allocator: EntityAllocator::starting_at(high_water_mark),
            high_water_mark,
            destroyed: HashSet::new(),
            containers: ComponentStore::new(),
        }
    }

    fn is_provisional(&self, entity: Entity) -> bool {
        entity.0 >= self.high_water_mark
    }

    pub fn create(&mut self, n: usize) -> Vec<Entity> {
        self.allocator.create(n)
    }

    pub fn destroy(&mut self, entities: &[Entity]) {
        self.destroyed.extend(entities.iter().copied());
        for container in self.containers.iter_mut().map(|(_, c)| c) {
            container.destroy(entities);
        }
    }

    pub fn add<T: Component>(&mut self, entities: &[Entity], payloads: &[u8], repeat: bool) {
        let container = self.containers.ensure::<T>();
        container.add_bytes(entities, payloads, repeat);
    }

    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty() && self.containers.iter().all(|(_, c)| c.is_empty())
    }

    /// Merges this buffer into the parent state, per spec.md §4.4.
    ///
    /// 1. Computes the set of entities created by this buffer (provisional
    ///    IDs not destroyed within the buffer).
    /// 2. Allocates real IDs in the parent allocator and records the mapping.
    /// 3. Remaps and merges every staged container.
    /// 4. Forwards pre-existing destroys to the parent; drops create+destroy
    ///    pairs that never left the buffer.
    /// 5. Marks all touched entities in the parent's change tracker.
    pub fn merge_into(
        self,
        parent_alloc: &mut EntityAllocator,
        parent_store: &mut ComponentStore,
        tracker: &mut ChangeTracker,
    ) {
        let buffer_end = self.allocator.high_water_mark();
        let CommandBuffer {
            high_water_mark,
            destroyed,
            mut containers,
            ..
        } = self;
        let is_provisional = |e: Entity| e.0 >= high_water_mark;

        let created: Vec<Entity> = (high_water_mark..buffer_end)
            .map(Entity)
            .filter(|e| !destroyed.contains(e))
            .collect();

        let mut mapping: HashMap<Entity, Entity> = HashMap::new();
        if !created.is_empty() {
            let real_ids = parent_alloc.create(created.len());
            for (provisional, real) in created.iter().zip(real_ids.iter()) {
                mapping.insert(*provisional, *real);
            }
        }

        let mut touched: Vec<Entity> = Vec::new();
        for (type_id, container) in containers.iter_mut() {
            container.remap(&mapping, is_provisional);
            touched.extend(container.alive_or_added().iter().copied());
            touched.extend(container.removed().iter().copied());
            match parent_store.get_mut(*type_id) {
                Some(parent_container) => parent_container.merge(container),
                None => {
                    // Installed fresh below, outside this loop (can't move
                    // `container` out of the iterator it came from).
                }
            }
        }
        for (type_id, container) in containers.iter() {
            if parent_store.get(*type_id).is_none() {
                parent_store.ensure_with_meta(container.meta).merge(container);
            }
        }

        for entity in destroyed {
            if is_provisional(entity) && !mapping.contains_key(&entity) {
                // created and destroyed within this buffer: drop entirely.
                continue;
            }
            let real = mapping.get(&entity).copied().unwrap_or(entity);
            parent_store.reset_entities(std::slice::from_ref(&real));
            touched.push(real);
        }

        let remapped_touched: Vec<Entity> = touched
            .into_iter()
            .map(|e| mapping.get(&e).copied().unwrap_or(e))
            .collect();
        tracker.mark(&remapped_touched);
    }
}

/// Lock-forwarding handle passed to system callbacks during `tick()`, so
/// systems record mutations without holding the buffer by value (spec.md
/// §4.3 step 3: systems run under a shared read of storage, with mutations
/// deferred into a buffer until the merge step).
pub struct CommandBufferHandle<'a> {
    buffer: &'a Mutex<CommandBuffer>,
}

impl<'a> CommandBufferHandle<'a> {
    pub fn new(buffer: &'a Mutex<CommandBuffer>) -> Self {
        Self { buffer }
    }

    pub fn create(&self, n: usize) -> Vec<Entity> {
        self.buffer.lock().unwrap().create(n)
    }

    pub fn destroy(&self, entities: &[Entity]) {
        self.buffer.lock().unwrap().destroy(entities);
    }

    pub fn add<T: Component>(&self, entities: &[Entity], payloads: &[u8], repeat: bool) {
        self.buffer.lock().unwrap().add::<T>(entities, payloads, repeat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentClass};

    #[derive(Clone)]
    struct Tag;
    impl Component for Tag {
        const CLASS: ComponentClass = ComponentClass::Flag;
        const NAME: &'static str = "CmdBufTag";
    }

    #[test]
    fn created_entity_is_remapped_and_visible_after_merge() {
        let mut alloc = EntityAllocator::new();
        alloc.create(2); // entities 0,1 already live in parent
        let mut store = ComponentStore::new();
        let mut tracker = ChangeTracker::new();

        let mut buffer = CommandBuffer::new(alloc.high_water_mark());
        let provisional = buffer.create(1)[0];
        buffer.add::<Tag>(&[provisional], &[], true);

        buffer.merge_into(&mut alloc, &mut store, &mut tracker);

        let tag_id = crate::component::type_id_of::<Tag>();
        let container = store.get(tag_id).unwrap();
        assert_eq!(container.len(), 1);
        // The real entity should be 2 (next after parent's 0,1), not the
        // buffer's provisional ID.
        assert!(container.alive_or_added().contains(&Entity(2)));
        assert!(!container.alive_or_added().contains(&provisional));
    }

    #[test]
    fn create_then_destroy_within_buffer_never_reaches_parent() {
        let mut alloc = EntityAllocator::new();
        let mut store = ComponentStore::new();
        let mut tracker = ChangeTracker::new();

        let mut buffer = CommandBuffer::new(alloc.high_water_mark());
        let provisional = buffer.create(1)[0];
        buffer.add::<Tag>(&[provisional], &[], true);
        buffer.destroy(&[provisional]);

        buffer.merge_into(&mut alloc, &mut store, &mut tracker);
        assert_eq!(alloc.high_water_mark(), 0);
    }

    #[test]
    fn handle_forwards_to_locked_buffer() {
        let mutex = Mutex::new(CommandBuffer::new(0));
        let handle = CommandBufferHandle::new(&mutex);
        let created = handle.create(1);
        handle.add::<Tag>(&created, &[], true);
        let buffer = mutex.into_inner().unwrap();
        assert!(!buffer.is_empty());
    }
}
