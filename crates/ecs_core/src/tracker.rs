//! Entity change tracker (spec.md §2, §5): the set of entities touched
//! this tick, driving incremental filter refresh.

use crate::entity::Entity;
use std::collections::HashSet;

#[derive(Default)]
pub struct ChangeTracker {
    touched: HashSet<Entity>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, entities: &[Entity]) {
        self.touched.extend(entities.iter().copied());
    }

    pub fn mark_one(&mut self, entity: Entity) {
        self.touched.insert(entity);
    }

    /// Tick step 2: snapshot and sort the modified set, then clear it.
    pub fn snapshot_and_clear(&mut self) -> Vec<Entity> {
        let mut snapshot: Vec<Entity> = self.touched.drain().collect();
        snapshot.sort_unstable();
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_sorted_and_clears() {
        let mut tracker = ChangeTracker::new();
        tracker.mark(&[Entity(3), Entity(1), Entity(2)]);
        let snap = tracker.snapshot_and_clear();
        assert_eq!(snap, vec![Entity(1), Entity(2), Entity(3)]);
        assert!(tracker.snapshot_and_clear().is_empty());
    }
}
