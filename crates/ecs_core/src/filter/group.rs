//! Filter group identity (spec.md §3): an immutable key over six entity-set
//! operators plus optional ordering/condition. Two groups with equal
//! operator sets are the same group — equality and hashing drive the
//! evaluator's dedup, replacing the cyclic system↔group references in the
//! original source with a plain value key (spec.md §9).

use crate::component::ComponentTypeId;
use crate::storage::ComponentStore;
use crate::entity::Entity;
use std::cmp::Ordering;

pub type OnCondition = fn(&ComponentStore, Entity) -> bool;
pub type OrderBy = fn(Entity, Entity) -> Ordering;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterGroupKey {
    pub filters: Vec<ComponentTypeId>,
    pub except: Vec<ComponentTypeId>,
    pub on_add: Vec<ComponentTypeId>,
    pub on_remove: Vec<ComponentTypeId>,
    pub on_combine: Vec<ComponentTypeId>,
    pub on_break: Vec<ComponentTypeId>,
    pub on_condition: Option<OnCondition>,
    pub order_by: Option<OrderBy>,
}

impl FilterGroupKey {
    pub fn builder() -> FilterGroupBuilder {
        FilterGroupBuilder::default()
    }

    pub fn has_lifecycle_operators(&self) -> bool {
        !self.on_add.is_empty()
            || !self.on_remove.is_empty()
            || !self.on_combine.is_empty()
            || !self.on_break.is_empty()
    }

    /// spec.md §4.2 incremental mode: groups built purely from lifecycle
    /// operators have no persistent membership, so they're rebuilt fresh
    /// every tick rather than carried incrementally.
    pub fn is_lifecycle_only(&self) -> bool {
        self.filters.is_empty() && self.except.is_empty() && self.has_lifecycle_operators()
    }

    /// All component types this group reads, used for pack component lists.
    pub fn all_components(&self) -> Vec<ComponentTypeId> {
        let mut ids: Vec<ComponentTypeId> = self
            .filters
            .iter()
            .chain(&self.except)
            .chain(&self.on_add)
            .chain(&self.on_remove)
            .chain(&self.on_combine)
            .chain(&self.on_break)
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[derive(Default)]
pub struct FilterGroupBuilder {
    key: FilterGroupKeyBuilding,
}

#[derive(Default)]
struct FilterGroupKeyBuilding {
    filters: Vec<ComponentTypeId>,
    except: Vec<ComponentTypeId>,
    on_add: Vec<ComponentTypeId>,
    on_remove: Vec<ComponentTypeId>,
    on_combine: Vec<ComponentTypeId>,
    on_break: Vec<ComponentTypeId>,
    on_condition: Option<OnCondition>,
    order_by: Option<OrderBy>,
}

fn sorted(mut ids: Vec<ComponentTypeId>) -> Vec<ComponentTypeId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl FilterGroupBuilder {
    pub fn filters(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.filters = sorted(ids);
        self
    }

    pub fn except(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.except = sorted(ids);
        self
    }

    pub fn on_add(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.on_add = sorted(ids);
        self
    }

    pub fn on_remove(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.on_remove = sorted(ids);
        self
    }

    pub fn on_combine(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.on_combine = sorted(ids);
        self
    }

    pub fn on_break(mut self, ids: Vec<ComponentTypeId>) -> Self {
        self.key.on_break = sorted(ids);
        self
    }

    pub fn on_condition(mut self, f: OnCondition) -> Self {
        self.key.on_condition = Some(f);
        self
    }

    pub fn order_by(mut self, f: OrderBy) -> Self {
        self.key.order_by = Some(f);
        self
    }

    pub fn build(self) -> FilterGroupKey {
        FilterGroupKey {
            filters: self.key.filters,
            except: self.key.except,
            on_add: self.key.on_add,
            on_remove: self.key.on_remove,
            on_combine: self.key.on_combine,
            on_break: self.key.on_break,
            on_condition: self.key.on_condition,
            order_by: self.key.order_by,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_operator_sets_are_the_same_group() {
        let a = FilterGroupKey::builder().filters(vec![1, 2]).except(vec![3]).build();
        let b = FilterGroupKey::builder().filters(vec![2, 1]).except(vec![3]).build();
        assert_eq!(a, b);
    }

    #[test]
    fn lifecycle_only_detection() {
        let lifecycle = FilterGroupKey::builder().on_add(vec![1]).build();
        assert!(lifecycle.is_lifecycle_only());
        let mixed = FilterGroupKey::builder().filters(vec![1]).on_add(vec![2]).build();
        assert!(!mixed.is_lifecycle_only());
    }
}
