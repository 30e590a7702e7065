//! Type-erased container wrapping a [`StagedSparseArray`] with its
//! [`ComponentMeta`] tag (spec.md §9: virtual dispatch over
//! typed/untyped/flag containers becomes a match on this tag).

use crate::component::{Component, ComponentClass, ComponentMeta, ComponentTypeId};
use crate::entity::Entity;
use std::collections::HashMap;

use super::stage::StageMask;
use super::staged::StagedSparseArray;

pub struct Container {
    pub meta: ComponentMeta,
    storage: StagedSparseArray,
}

impl Container {
    pub fn new(meta: ComponentMeta) -> Self {
        Self {
            storage: StagedSparseArray::new(meta.size),
            meta,
        }
    }

    pub fn type_id(&self) -> ComponentTypeId {
        self.meta.type_id
    }

    pub fn has(&self, entity: Entity, mask: StageMask) -> bool {
        self.storage.has(entity, mask)
    }

    pub fn added(&self) -> &[Entity] {
        self.storage.added()
    }

    pub fn alive(&self) -> &[Entity] {
        self.storage.alive()
    }

    pub fn alive_or_added(&self) -> &[Entity] {
        self.storage.alive_or_added()
    }

    pub fn removed(&self) -> &[Entity] {
        self.storage.removed()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Adds `entities` with one payload each (`payloads.len() ==
    /// entities.len() * meta.size`), or repeats a single payload to all of
    /// them if `repeat`. `Complex` components clone via the meta's
    /// `clone_fn` for every entity under `repeat`, including the first —
    /// `payloads` may still be borrowed from a live caller-owned value, so a
    /// raw byte copy into storage would alias its heap allocation and double
    /// free it once both copies are eventually dropped.
    pub fn add_bytes(&mut self, entities: &[Entity], payloads: &[u8], repeat: bool) {
        if entities.is_empty() {
            return;
        }
        let size = self.meta.size;
        if repeat {
            if size > 0 {
                assert_eq!(payloads.len(), size, "add: repeat payload size mismatch");
            }
            match (self.meta.class, self.meta.clone_fn) {
                (ComponentClass::Complex, Some(clone_fn)) => {
                    let mut scratch = vec![0u8; size];
                    unsafe {
                        clone_fn(payloads.as_ptr(), scratch.as_mut_ptr());
                        self.storage.add(entities[0], scratch.as_ptr());
                    }
                }
                _ => unsafe {
                    self.storage.add(entities[0], payloads.as_ptr());
                },
            }
            for &entity in &entities[1..] {
                match (self.meta.class, self.meta.clone_fn) {
                    (ComponentClass::Complex, Some(clone_fn)) => {
                        let mut scratch = vec![0u8; size];
                        let src = self
                            .storage
                            .get(entities[0])
                            .expect("just added first entity");
                        unsafe {
                            clone_fn(src, scratch.as_mut_ptr());
                            self.storage.add(entity, scratch.as_ptr());
                        }
                    }
                    _ => unsafe {
                        self.storage.add(entity, payloads.as_ptr());
                    },
                }
            }
        } else {
            if size > 0 {
                assert_eq!(
                    payloads.len(),
                    entities.len() * size,
                    "add: arity mismatch between entities and payloads"
                );
            }
            for (i, &entity) in entities.iter().enumerate() {
                let src = if size == 0 {
                    std::ptr::NonNull::dangling().as_ptr()
                } else {
                    payloads[i * size..(i + 1) * size].as_ptr()
                };
                unsafe { self.storage.add(entity, src) };
            }
        }
    }

    pub fn destroy(&mut self, entities: &[Entity]) {
        for &entity in entities {
            self.storage.destroy(entity);
        }
    }

    pub fn get(&self, entity: Entity) -> Option<*const u8> {
        self.storage.get(entity)
    }

    pub fn slot_of(&self, entity: Entity) -> Option<usize> {
        self.storage.slot_of(entity)
    }

    pub fn data_base_ptr_mut(&mut self) -> *mut u8 {
        self.storage.data_base_ptr_mut()
    }

    pub fn copy_to(&self, entities: &[Entity], dst: &mut [u8]) {
        self.storage.copy_to(entities, dst);
    }

    pub fn copy_from(&mut self, entities: &[Entity], src: &[u8], repeat: bool) {
        self.storage.copy_from(entities, src, repeat);
    }

    pub fn promote(&mut self) {
        unsafe { self.storage.promote(self.meta.drop_fn) };
    }

    pub fn remap(&mut self, mapping: &HashMap<Entity, Entity>, predicate: impl Fn(Entity) -> bool) {
        self.storage.remap(mapping, predicate);
    }

    pub fn merge(&mut self, other: &Container) {
        assert_eq!(
            self.meta.type_id, other.meta.type_id,
            "merge: component key mismatch between containers"
        );
        unsafe { self.storage.merge(&other.storage) };
    }
}

/// Typed read of a single component's payload, used by `State::get`.
///
/// # Safety
/// The caller must have registered `T` with a layout matching this
/// container's `meta` (guaranteed when reached via `State::get::<T>`).
pub unsafe fn read_typed<T: Component>(container: &Container, entity: Entity) -> Option<&T> {
    container
        .get(entity)
        .map(|ptr| unsafe { &*(ptr as *const T) })
}
