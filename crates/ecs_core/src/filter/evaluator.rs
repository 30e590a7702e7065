//! The filter evaluator (spec.md §4.2): turns a [`FilterGroupKey`] into a
//! sorted, deduplicated entity list, re-evaluated incrementally each tick.

use crate::entity::Entity;
use crate::storage::{ComponentStore, stage};
use std::collections::HashMap;

use super::group::FilterGroupKey;

struct GroupState {
    result: Vec<Entity>,
    ref_count: usize,
}

/// Caches one result per distinct [`FilterGroupKey`]. Groups are
/// reference-counted by the systems that declared them (spec.md §9) rather
/// than by Rust's `Drop` — `release` is called explicitly from
/// `State::revoke` at the next tick boundary.
#[derive(Default)]
pub struct FilterEvaluator {
    groups: HashMap<FilterGroupKey, GroupState>,
}

impl FilterEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new reference to `key`, creating the group lazily.
    pub fn acquire(&mut self, key: FilterGroupKey) {
        self.groups
            .entry(key)
            .or_insert_with(|| GroupState {
                result: Vec::new(),
                ref_count: 0,
            })
            .ref_count += 1;
    }

    /// Drops one reference to `key`. The group itself is torn down on the
    /// next call to [`Self::drop_unreferenced`].
    pub fn release(&mut self, key: &FilterGroupKey) {
        if let Some(state) = self.groups.get_mut(key) {
            state.ref_count = state.ref_count.saturating_sub(1);
        }
    }

    /// Tick step 1: drop filter groups whose last referencing system has
    /// unregistered.
    pub fn drop_unreferenced(&mut self) {
        self.groups.retain(|_, state| state.ref_count > 0);
    }

    pub fn result(&self, key: &FilterGroupKey) -> &[Entity] {
        self.groups
            .get(key)
            .map(|s| s.result.as_slice())
            .unwrap_or(&[])
    }

    /// Re-evaluates every live group against the tick's modified-entity
    /// snapshot (already sorted, per tick step 2).
    pub fn refresh_all(&mut self, store: &ComponentStore, modified_sorted: &[Entity]) {
        for (key, state) in self.groups.iter_mut() {
            state.result = if key.is_lifecycle_only() {
                evaluate_seeded(key, store)
            } else {
                incremental_refresh(key, store, modified_sorted, &state.result)
            };
        }
    }
}

fn component_has_all(store: &ComponentStore, ids: &[crate::component::ComponentTypeId], entity: Entity, mask: u8) -> bool {
    ids.iter().all(|id| {
        store
            .get(*id)
            .map(|c| c.has(entity, mask))
            .unwrap_or(false)
    })
}

fn component_has_any(store: &ComponentStore, ids: &[crate::component::ComponentTypeId], entity: Entity, mask: u8) -> bool {
    ids.iter().any(|id| {
        store
            .get(*id)
            .map(|c| c.has(entity, mask))
            .unwrap_or(false)
    })
}

/// Applies refinement steps 1–8 (spec.md §4.2) over `working`, which must
/// already be sorted ascending by entity ID and deduplicated.
fn refine(key: &FilterGroupKey, store: &ComponentStore, mut working: Vec<Entity>) -> Vec<Entity> {
    // 1. on_remove
    if !key.on_remove.is_empty() {
        working.retain(|&e| component_has_all(store, &key.on_remove, e, stage::REMOVED));
    }
    // 2. on_break: removed from >=1 tuple member, every other member still
    // known (alive or also removed) this tick.
    if !key.on_break.is_empty() {
        working.retain(|&e| {
            key.on_break.iter().enumerate().any(|(i, _)| {
                let removed_i = store
                    .get(key.on_break[i])
                    .map(|c| c.has(e, stage::REMOVED))
                    .unwrap_or(false);
                if !removed_i {
                    return false;
                }
                key.on_break
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .all(|(j, _)| {
                        store
                            .get(key.on_break[j])
                            .map(|c| c.has(e, stage::ALL))
                            .unwrap_or(false)
                    })
            })
        });
    }
    // 3. on_add
    if !key.on_add.is_empty() {
        working.retain(|&e| component_has_all(store, &key.on_add, e, stage::ADDED));
    }
    // 4. on_combine: at least one member in ADDED, all members currently present.
    if !key.on_combine.is_empty() {
        working.retain(|&e| {
            component_has_any(store, &key.on_combine, e, stage::ADDED)
                && component_has_all(store, &key.on_combine, e, stage::ALIVE_OR_ADDED)
        });
    }
    // 5. filters
    if !key.filters.is_empty() {
        working.retain(|&e| component_has_all(store, &key.filters, e, stage::ALIVE_OR_ADDED));
    }
    // 6. except
    if !key.except.is_empty() {
        working.retain(|&e| !component_has_any(store, &key.except, e, stage::ALIVE_OR_ADDED));
    }
    // 7. on_condition
    if let Some(predicate) = key.on_condition {
        working.retain(|&e| predicate(store, e));
    }
    // 8. order_by (exactly one sorting relation), else keep ascending entity order.
    if let Some(cmp) = key.order_by {
        working.sort_by(|a, b| cmp(*a, *b));
    }
    working
}

fn smallest_view<'a>(
    store: &'a ComponentStore,
    ids: &[crate::component::ComponentTypeId],
    pick: impl Fn(&'a crate::storage::Container) -> &'a [Entity],
) -> Vec<Entity> {
    ids.iter()
        .filter_map(|id| store.get(*id))
        .map(pick)
        .min_by_key(|v| v.len())
        .map(|v| v.to_vec())
        .unwrap_or_default()
}

/// Full seeding + refinement (spec.md §4.2 "Seeding"), used for lifecycle-only
/// groups (rebuilt fresh every tick) and for a group's first evaluation.
fn evaluate_seeded(key: &FilterGroupKey, store: &ComponentStore) -> Vec<Entity> {
    let mut seed = if !key.on_remove.is_empty() || !key.on_break.is_empty() {
        let ids: Vec<_> = key.on_remove.iter().chain(&key.on_break).copied().collect();
        smallest_view(store, &ids, |c| c.removed())
    } else if !key.on_add.is_empty() || !key.on_combine.is_empty() {
        let ids: Vec<_> = key.on_add.iter().chain(&key.on_combine).copied().collect();
        smallest_view(store, &ids, |c| c.added())
    } else {
        smallest_view(store, &key.filters, |c| c.alive())
    };
    seed.sort_unstable();
    seed.dedup();
    refine(key, store, seed)
}

fn evaluate_restricted(key: &FilterGroupKey, store: &ComponentStore, modified_sorted: &[Entity]) -> Vec<Entity> {
    let mut working = modified_sorted.to_vec();
    working.sort_unstable();
    working.dedup();
    refine(key, store, working)
}

fn sorted_merge_unique(a: &[Entity], b: &[Entity]) -> Vec<Entity> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// spec.md §4.2 incremental mode: subtract stale entries touched this tick,
/// re-evaluate the touched set, and merge in sorted order.
fn incremental_refresh(
    key: &FilterGroupKey,
    store: &ComponentStore,
    modified_sorted: &[Entity],
    previous: &[Entity],
) -> Vec<Entity> {
    if previous.is_empty() && modified_sorted.is_empty() {
        return evaluate_seeded(key, store);
    }
    let kept: Vec<Entity> = previous
        .iter()
        .copied()
        .filter(|e| modified_sorted.binary_search(e).is_err())
        .collect();
    let touched = evaluate_restricted(key, store, modified_sorted);
    let merged = sorted_merge_unique(&kept, &touched);
    if key.order_by.is_some() {
        // order_by is not a total order over entity ID, so the merge above
        // (which assumes ascending-by-ID inputs) must be re-sorted.
        let mut merged = merged;
        merged.sort_by(|a, b| (key.order_by.unwrap())(*a, *b));
        merged
    } else {
        merged
    }
}
