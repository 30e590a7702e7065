//! The staged sparse/dense container (spec.md §4.1).
//!
//! One sparse map (entity → dense slot) plus a dense byte array holding
//! `(entity, payload)` pairs, partitioned in place into three contiguous
//! regions `[ ADDED | ALIVE | REMOVED ]`. `add`/`destroy`/`promote` move
//! entities between regions with O(1) swaps against the region boundaries —
//! the same swap-to-boundary trick as `latch_core::pool::Page::free_one`'s
//! swap-remove, generalized from two states (live/free) to three.
//!
//! This type is byte-level and class-agnostic; [`super::container::Container`]
//! wraps it with the `Flag`/`Trivial`/`Complex` dispatch tag.

use crate::entity::Entity;
use std::collections::HashMap;

use super::stage::{self, Stage, StageMask};

pub struct StagedSparseArray {
    elem_size: usize,
    sparse: HashMap<Entity, usize>,
    dense_entities: Vec<Entity>,
    dense_data: Vec<u8>,
    /// end of the ADDED region / start of ALIVE
    added_end: usize,
    /// end of the ALIVE region / start of REMOVED
    alive_end: usize,
}

impl StagedSparseArray {
    pub fn new(elem_size: usize) -> Self {
        Self {
            elem_size,
            sparse: HashMap::new(),
            dense_entities: Vec::new(),
            dense_data: Vec::new(),
            added_end: 0,
            alive_end: 0,
        }
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn len(&self) -> usize {
        self.dense_entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense_entities.is_empty()
    }

    fn slot_byte_range(&self, slot: usize) -> std::ops::Range<usize> {
        let start = slot * self.elem_size;
        start..start + self.elem_size
    }

    fn swap_slots(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.dense_entities.swap(i, j);
        self.sparse.insert(self.dense_entities[i], i);
        self.sparse.insert(self.dense_entities[j], j);
        if self.elem_size > 0 {
            let (lo, hi) = if i < j { (i, j) } else { (j, i) };
            let (left, right) = self.dense_data.split_at_mut(hi * self.elem_size);
            let a = &mut left[lo * self.elem_size..lo * self.elem_size + self.elem_size];
            let b = &mut right[0..self.elem_size];
            a.swap_with_slice(b);
        }
    }

    pub fn slot_of(&self, entity: Entity) -> Option<usize> {
        self.sparse.get(&entity).copied()
    }

    pub fn stage_of(&self, entity: Entity) -> Option<Stage> {
        let slot = self.slot_of(entity)?;
        Some(if slot < self.added_end {
            Stage::Added
        } else if slot < self.alive_end {
            Stage::Alive
        } else {
            Stage::Removed
        })
    }

    pub fn has(&self, entity: Entity, mask: StageMask) -> bool {
        match self.stage_of(entity) {
            Some(stage) => stage.mask() & mask != 0,
            None => false,
        }
    }

    pub fn added(&self) -> &[Entity] {
        &self.dense_entities[0..self.added_end]
    }

    pub fn alive(&self) -> &[Entity] {
        &self.dense_entities[self.added_end..self.alive_end]
    }

    /// `ALIVE ∪ ADDED` — contiguous by construction, no allocation needed.
    pub fn alive_or_added(&self) -> &[Entity] {
        &self.dense_entities[0..self.alive_end]
    }

    pub fn removed(&self) -> &[Entity] {
        &self.dense_entities[self.alive_end..]
    }

    fn slot_ptr(&self, slot: usize) -> *const u8 {
        if self.elem_size == 0 {
            return std::ptr::NonNull::dangling().as_ptr();
        }
        self.dense_data[self.slot_byte_range(slot)].as_ptr()
    }

    fn slot_ptr_mut(&mut self, slot: usize) -> *mut u8 {
        if self.elem_size == 0 {
            return std::ptr::NonNull::dangling().as_ptr();
        }
        let range = self.slot_byte_range(slot);
        self.dense_data[range].as_mut_ptr()
    }

    pub fn get(&self, entity: Entity) -> Option<*const u8> {
        self.slot_of(entity).map(|s| self.slot_ptr(s))
    }

    pub fn get_mut(&mut self, entity: Entity) -> Option<*mut u8> {
        self.slot_of(entity).map(|s| self.slot_ptr_mut(s))
    }

    /// Raw base pointer into the dense payload array, for indirect-mode
    /// packs that index into live storage rather than gathering a copy.
    pub fn data_base_ptr_mut(&mut self) -> *mut u8 {
        self.dense_data.as_mut_ptr()
    }

    /// # Safety
    /// `src` must point at `elem_size` readable bytes, or be dangling when
    /// `elem_size == 0`.
    unsafe fn write_payload(&mut self, slot: usize, src: *const u8) {
        if self.elem_size == 0 {
            return;
        }
        unsafe {
            let dst = self.slot_ptr_mut(slot);
            std::ptr::copy_nonoverlapping(src, dst, self.elem_size);
        }
    }

    fn push_uninit(&mut self, entity: Entity) -> usize {
        let slot = self.dense_entities.len();
        self.dense_entities.push(entity);
        self.dense_data
            .resize(self.dense_data.len() + self.elem_size, 0);
        self.sparse.insert(entity, slot);
        slot
    }

    /// `add` per spec.md §4.1: overwrite in place if already `ADDED|ALIVE`,
    /// resurrect into `ADDED` if `REMOVED` (the "destroy then re-add" edge
    /// case ends in `ADDED`, identical to a brand-new entity), else insert
    /// fresh into `ADDED`.
    ///
    /// # Safety
    /// `src` must point at `elem_size` readable bytes (or be arbitrary when
    /// `elem_size == 0`).
    pub unsafe fn add(&mut self, entity: Entity, src: *const u8) {
        if let Some(slot) = self.slot_of(entity) {
            if slot < self.alive_end {
                unsafe { self.write_payload(slot, src) };
                return;
            }
            // REMOVED: migrate into ADDED via the same two boundary swaps
            // as a fresh insert below.
            self.swap_slots(slot, self.alive_end);
            self.swap_slots(self.alive_end, self.added_end);
            let new_slot = self.added_end;
            self.added_end += 1;
            self.alive_end += 1;
            unsafe { self.write_payload(new_slot, src) };
            return;
        }
        let n = self.push_uninit(entity);
        unsafe { self.write_payload(n, src) };
        // Migrate the fresh slot from the tail into ADDED via two
        // boundary swaps, preserving the other two regions' contents.
        self.swap_slots(n, self.alive_end);
        self.swap_slots(self.alive_end, self.added_end);
        self.added_end += 1;
        self.alive_end += 1;
    }

    /// `destroy` per spec.md §4.1: move from `ADDED`/`ALIVE` into `REMOVED`.
    /// No-op if absent or already `REMOVED` (idempotent).
    pub fn destroy(&mut self, entity: Entity) {
        let Some(slot) = self.slot_of(entity) else {
            return;
        };
        if slot >= self.alive_end {
            return;
        }
        if slot < self.added_end {
            // ADDED -> REMOVED, passing through the end of ADDED and the
            // end of ALIVE so both regions shrink by exactly one.
            self.swap_slots(slot, self.added_end - 1);
            self.swap_slots(self.added_end - 1, self.alive_end - 1);
            self.added_end -= 1;
            self.alive_end -= 1;
        } else {
            self.swap_slots(slot, self.alive_end - 1);
            self.alive_end -= 1;
        }
    }

    /// `promote` per spec.md §3: `ADDED -> ALIVE`, `REMOVED -> dropped`.
    ///
    /// # Safety
    /// `drop_fn`, if present, must be valid for this container's element type.
    pub unsafe fn promote(&mut self, drop_fn: Option<unsafe fn(*mut u8)>) {
        if let Some(drop_fn) = drop_fn {
            for slot in self.alive_end..self.dense_entities.len() {
                unsafe { drop_fn(self.slot_ptr_mut(slot)) };
            }
        }
        for entity in &self.dense_entities[self.alive_end..] {
            self.sparse.remove(entity);
        }
        self.dense_entities.truncate(self.alive_end);
        self.dense_data.truncate(self.alive_end * self.elem_size);
        self.added_end = 0;
    }

    /// Gathers payloads for `entities`, in order, into `dst`.
    /// `dst.len()` must equal `entities.len() * elem_size`.
    pub fn copy_to(&self, entities: &[Entity], dst: &mut [u8]) {
        assert_eq!(
            dst.len(),
            entities.len() * self.elem_size,
            "copy_to: destination buffer size mismatch"
        );
        if self.elem_size == 0 {
            return;
        }
        for (i, entity) in entities.iter().enumerate() {
            let slot = self
                .slot_of(*entity)
                .unwrap_or_else(|| panic!("copy_to: entity {entity:?} not present in container"));
            let src = &self.dense_data[self.slot_byte_range(slot)];
            let dst_range = i * self.elem_size..(i + 1) * self.elem_size;
            dst[dst_range].copy_from_slice(src);
        }
    }

    /// Scatters payloads from `src` back to storage, keyed by `entities`.
    /// If `repeat`, a single payload in `src` is written to every entity.
    pub fn copy_from(&mut self, entities: &[Entity], src: &[u8], repeat: bool) {
        if self.elem_size == 0 {
            return;
        }
        if repeat {
            assert_eq!(src.len(), self.elem_size, "copy_from: repeat payload size mismatch");
        } else {
            assert_eq!(
                src.len(),
                entities.len() * self.elem_size,
                "copy_from: source buffer size mismatch (arity mismatch without repeat)"
            );
        }
        for (i, entity) in entities.iter().enumerate() {
            let slot = self
                .slot_of(*entity)
                .unwrap_or_else(|| panic!("copy_from: entity {entity:?} not present in container"));
            let src_range = if repeat {
                0..self.elem_size
            } else {
                i * self.elem_size..(i + 1) * self.elem_size
            };
            let dst = self.slot_byte_range(slot);
            self.dense_data[dst].copy_from_slice(&src[src_range]);
        }
    }

    /// Rewrites sparse keys using `mapping[old] = new` for entities where
    /// `predicate(old)` holds, used by command-buffer merge to turn
    /// provisional IDs into real ones.
    pub fn remap(&mut self, mapping: &HashMap<Entity, Entity>, predicate: impl Fn(Entity) -> bool) {
        for slot in 0..self.dense_entities.len() {
            let old = self.dense_entities[slot];
            if !predicate(old) {
                continue;
            }
            if let Some(&new) = mapping.get(&old) {
                self.dense_entities[slot] = new;
                self.sparse.remove(&old);
                self.sparse.insert(new, slot);
            }
        }
    }

    /// Unions `other`'s contents into `self`, replaying its ADDED/ALIVE
    /// entities through `add` and its REMOVED entities through `destroy`.
    ///
    /// # Safety
    /// `self` and `other` must share the same element layout (asserted by
    /// the caller via matching `ComponentTypeId`, per spec.md §4.1).
    pub unsafe fn merge(&mut self, other: &StagedSparseArray) {
        assert_eq!(
            self.elem_size, other.elem_size,
            "merge: container element size mismatch"
        );
        for &entity in other.alive_or_added() {
            let slot = other.slot_of(entity).expect("entity just listed as present");
            unsafe { self.add(entity, other.slot_ptr(slot)) };
        }
        for &entity in other.removed() {
            self.destroy(entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(id: u32) -> Entity {
        Entity(id)
    }

    #[test]
    fn add_places_new_entity_in_added() {
        let mut s = StagedSparseArray::new(4);
        let payload = 7i32.to_ne_bytes();
        unsafe { s.add(e(1), payload.as_ptr()) };
        assert_eq!(s.stage_of(e(1)), Some(Stage::Added));
        assert!(s.has(e(1), stage::ALL));
        assert_eq!(s.added(), &[e(1)]);
    }

    #[test]
    fn promote_moves_added_to_alive() {
        let mut s = StagedSparseArray::new(4);
        let payload = 1i32.to_ne_bytes();
        unsafe {
            s.add(e(1), payload.as_ptr());
            s.add(e(2), payload.as_ptr());
            s.promote(None);
        }
        assert_eq!(s.stage_of(e(1)), Some(Stage::Alive));
        assert_eq!(s.stage_of(e(2)), Some(Stage::Alive));
        assert!(s.added().is_empty());
    }

    #[test]
    fn destroy_then_promote_drops_entity() {
        let mut s = StagedSparseArray::new(4);
        let payload = 1i32.to_ne_bytes();
        unsafe {
            s.add(e(1), payload.as_ptr());
            s.promote(None);
        }
        s.destroy(e(1));
        assert_eq!(s.stage_of(e(1)), Some(Stage::Removed));
        unsafe { s.promote(None) };
        assert_eq!(s.stage_of(e(1)), None);
        assert!(!s.has(e(1), stage::ALL));
    }

    #[test]
    fn add_then_destroy_same_tick_ends_removed_with_no_added() {
        let mut s = StagedSparseArray::new(4);
        let payload = 1i32.to_ne_bytes();
        unsafe { s.add(e(5), payload.as_ptr()) };
        s.destroy(e(5));
        assert_eq!(s.stage_of(e(5)), Some(Stage::Removed));
        assert!(s.added().is_empty());
    }

    #[test]
    fn destroy_then_readd_ends_in_added() {
        let mut s = StagedSparseArray::new(4);
        let payload = 1i32.to_ne_bytes();
        unsafe {
            s.add(e(1), payload.as_ptr());
            s.promote(None);
        }
        s.destroy(e(1));
        unsafe { s.add(e(1), payload.as_ptr()) };
        assert_eq!(s.stage_of(e(1)), Some(Stage::Added));
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut s = StagedSparseArray::new(4);
        let payload = 1i32.to_ne_bytes();
        unsafe {
            s.add(e(1), payload.as_ptr());
            s.promote(None);
        }
        s.destroy(e(1));
        s.destroy(e(1));
        assert_eq!(s.removed().len(), 1);
    }

    #[test]
    fn destroy_absent_entity_is_noop() {
        let mut s = StagedSparseArray::new(4);
        s.destroy(e(99));
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn gather_scatter_roundtrip() {
        let mut s = StagedSparseArray::new(4);
        let entities = [e(1), e(2), e(3)];
        unsafe {
            for (i, ent) in entities.iter().enumerate() {
                let v = (i as i32).to_ne_bytes();
                s.add(*ent, v.as_ptr());
            }
            s.promote(None);
        }
        let mut buf = vec![0u8; 12];
        s.copy_to(&entities, &mut buf);
        s.copy_from(&entities, &buf, false);
        let mut buf2 = vec![0u8; 12];
        s.copy_to(&entities, &mut buf2);
        assert_eq!(buf, buf2);
    }

    #[test]
    fn stage_partitions_are_disjoint_after_mixed_ops() {
        let mut s = StagedSparseArray::new(0);
        unsafe {
            for i in 0..10u32 {
                s.add(e(i), std::ptr::NonNull::dangling().as_ptr());
            }
            s.promote(None);
        }
        for i in 0..5u32 {
            s.destroy(e(i));
        }
        unsafe {
            for i in 10..15u32 {
                s.add(e(i), std::ptr::NonNull::dangling().as_ptr());
            }
        }
        let mut seen = std::collections::HashSet::new();
        for e in s.added().iter().chain(s.alive()).chain(s.removed()) {
            assert!(seen.insert(*e), "entity appeared in more than one stage");
        }
        assert_eq!(seen.len(), s.len());
    }
}
