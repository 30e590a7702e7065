//! Staged sparse component storage (spec.md §3, §4.1).

pub mod container;
pub mod stage;
pub mod staged;

pub use container::Container;
pub use stage::{Stage, StageMask};
pub use staged::StagedSparseArray;

use crate::component::{Component, ComponentMeta, ComponentTypeId};
use crate::entity::Entity;
use std::collections::HashMap;

/// Owns one [`Container`] per registered component type.
#[derive(Default)]
pub struct ComponentStore {
    containers: HashMap<ComponentTypeId, Container>,
}

impl ComponentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure<T: Component>(&mut self) -> &mut Container {
        let meta = crate::component::meta_of::<T>();
        self.ensure_with_meta(meta)
    }

    pub fn ensure_with_meta(&mut self, meta: ComponentMeta) -> &mut Container {
        self.containers
            .entry(meta.type_id)
            .or_insert_with(|| Container::new(meta))
    }

    pub fn get(&self, type_id: ComponentTypeId) -> Option<&Container> {
        self.containers.get(&type_id)
    }

    pub fn get_mut(&mut self, type_id: ComponentTypeId) -> Option<&mut Container> {
        self.containers.get_mut(&type_id)
    }

    pub fn typed<T: Component>(&self) -> Option<&Container> {
        self.get(crate::component::type_id_of::<T>())
    }

    pub fn typed_mut<T: Component>(&mut self) -> Option<&mut Container> {
        self.get_mut(crate::component::type_id_of::<T>())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ComponentTypeId, &Container)> {
        self.containers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&ComponentTypeId, &mut Container)> {
        self.containers.iter_mut()
    }

    /// Strips every registered component from `entities` without touching
    /// the entity IDs themselves — spec.md §6's `reset`, grounded on
    /// `state_t`'s entity-wide component removal helper (see SPEC_FULL.md §9).
    pub fn reset_entities(&mut self, entities: &[Entity]) {
        for container in self.containers.values_mut() {
            container.destroy(entities);
        }
    }

    pub fn promote_all(&mut self) {
        for container in self.containers.values_mut() {
            container.promote();
        }
    }
}
