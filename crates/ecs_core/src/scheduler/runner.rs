//! Prepare-and-run: per-system pack materialization, threading decision,
//! worker slicing, and write-back (spec.md §4.3, §4.5).

use crate::arena::ScratchArena;
use crate::command_buffer::{CommandBuffer, CommandBufferHandle};
use crate::entity::Entity;
use crate::filter::FilterEvaluator;
use crate::pack::{Binding, BindingView, MaterializedPack, PackDescriptor, PackMode, Slicing};
use crate::storage::ComponentStore;
use std::ops::Range;
use std::sync::Mutex;
use tracing::trace;

use super::descriptor::{SystemDescriptor, ThreadingMode};

pub struct SchedulerConfig {
    pub worker_count: usize,
    pub min_entities_per_worker: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            min_entities_per_worker: 1,
        }
    }
}

enum RawBindingView {
    Direct {
        binding: Binding,
        ptr: *mut u8,
        elem_size: usize,
    },
    Indirect {
        binding: Binding,
        indices_ptr: *mut u32,
        base: *mut u8,
        elem_size: usize,
    },
}

struct RawPackView {
    entities_ptr: *mut Entity,
    len: usize,
    mode: PackMode,
    slicing: Slicing,
    bindings: Vec<RawBindingView>,
}

// Worker slices over a view's regions are disjoint by construction
// (`slice_bounds` partitions each pack's range without overlap), so sharing
// `&RawPackView` across the scoped workers below is sound even though raw
// pointers aren't `Sync` by default.
unsafe impl Send for RawPackView {}
unsafe impl Sync for RawPackView {}

/// Materializes one pack into the arena (spec.md §4.5). Returns raw
/// pointers into arena-owned memory; reconstructed into borrowed slices by
/// the caller once every pack for this system has been materialized (the
/// arena can't be borrowed for each region individually and held
/// simultaneously through a safe API, since the regions are disjoint but
/// the borrow checker has no way to know that).
fn materialize_pack(
    pack: &PackDescriptor,
    evaluator: &FilterEvaluator,
    store: &mut ComponentStore,
    arena: &mut ScratchArena,
) -> RawPackView {
    let entities = evaluator.result(&pack.filter).to_vec();
    let entity_align = std::mem::align_of::<Entity>();
    let entity_size = std::mem::size_of::<Entity>();
    let entities_ptr = arena.alloc_raw(entities.len() * entity_size, entity_align) as *mut Entity;
    if !entities.is_empty() {
        unsafe { std::ptr::copy_nonoverlapping(entities.as_ptr(), entities_ptr, entities.len()) };
    }

    let mut bindings = Vec::with_capacity(pack.bindings.len());
    for &binding in &pack.bindings {
        let id = binding.component();
        let elem_size = store
            .get(id)
            .map(|c| c.meta.size)
            .expect("pack binding references an unregistered component");
        let align = store.get(id).map(|c| c.meta.align).unwrap_or(1).max(1);
        match pack.mode {
            PackMode::Direct => {
                let ptr = arena.alloc_raw(entities.len() * elem_size, align);
                if elem_size > 0 && !entities.is_empty() {
                    let buf = unsafe { std::slice::from_raw_parts_mut(ptr, entities.len() * elem_size) };
                    store.get(id).unwrap().copy_to(&entities, buf);
                }
                bindings.push(RawBindingView::Direct { binding, ptr, elem_size });
            }
            PackMode::Indirect => {
                let indices_ptr = arena.alloc_raw(entities.len() * 4, 4) as *mut u32;
                let container = store.get_mut(id).unwrap();
                if !entities.is_empty() {
                    let idx_slice = unsafe { std::slice::from_raw_parts_mut(indices_ptr, entities.len()) };
                    for (i, &e) in entities.iter().enumerate() {
                        idx_slice[i] = container
                            .slot_of(e)
                            .unwrap_or_else(|| panic!("indirect pack: entity {e:?} missing from storage"))
                            as u32;
                    }
                }
                let base = container.data_base_ptr_mut();
                bindings.push(RawBindingView::Indirect {
                    binding,
                    indices_ptr,
                    base,
                    elem_size,
                });
            }
        }
    }

    RawPackView {
        entities_ptr,
        len: entities.len(),
        mode: pack.mode,
        slicing: pack.slicing,
        bindings,
    }
}

/// # Safety
/// `view`'s pointers must still be valid (arena not reset) and the byte
/// range `[range.start*elem_size, range.end*elem_size)` must lie within the
/// allocation each pointer was given.
unsafe fn slice_view<'a>(view: &RawPackView, range: Range<usize>) -> MaterializedPack<'a> {
    let entities = unsafe {
        std::slice::from_raw_parts(view.entities_ptr.add(range.start), range.end - range.start)
    };
    let mut bindings = Vec::with_capacity(view.bindings.len());
    for raw in &view.bindings {
        match raw {
            RawBindingView::Direct { binding, ptr, elem_size } => {
                let data = if *elem_size == 0 {
                    unsafe { std::slice::from_raw_parts_mut(*ptr, 0) }
                } else {
                    unsafe {
                        std::slice::from_raw_parts_mut(
                            ptr.add(range.start * elem_size),
                            (range.end - range.start) * elem_size,
                        )
                    }
                };
                bindings.push((*binding, BindingView::Direct { data, elem_size: *elem_size }));
            }
            RawBindingView::Indirect { binding, indices_ptr, base, elem_size } => {
                let indices = unsafe {
                    std::slice::from_raw_parts(indices_ptr.add(range.start), range.end - range.start)
                };
                bindings.push((
                    *binding,
                    BindingView::Indirect { indices, base: *base, elem_size: *elem_size },
                ));
            }
        }
    }
    MaterializedPack { entities, bindings }
}

/// Writes every read-write binding's modified region back into storage via
/// `copy_from`, keyed by the pack's (possibly sliced) entity list.
fn write_back(view: &RawPackView, range: Range<usize>, store: &mut ComponentStore) {
    let entities = unsafe {
        std::slice::from_raw_parts(view.entities_ptr.add(range.start), range.end - range.start)
    };
    for raw in &view.bindings {
        let (binding, ptr, elem_size) = match raw {
            RawBindingView::Direct { binding, ptr, elem_size } => (*binding, *ptr, *elem_size),
            // Indirect bindings write directly into live storage; no
            // write-back copy is needed or possible without an owned region.
            RawBindingView::Indirect { .. } => continue,
        };
        if !binding.is_write() || elem_size == 0 || entities.is_empty() {
            continue;
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(ptr.add(range.start * elem_size), entities.len() * elem_size)
        };
        store.get_mut(binding.component()).unwrap().copy_from(entities, bytes, false);
    }
}

fn slice_bounds(len: usize, workers: usize) -> Vec<Range<usize>> {
    let base = len / workers;
    let mut bounds = Vec::with_capacity(workers);
    let mut start = 0;
    for i in 0..workers {
        let end = if i + 1 == workers { len } else { start + base };
        bounds.push(start..end);
        start = end;
    }
    bounds
}

/// `W = min(configured_workers + 1, max_by_min_batch)`, then reduced until
/// the smallest partial pack has at least one entity per worker.
fn compute_worker_count(config: &SchedulerConfig, partial_lens: &[usize]) -> usize {
    if config.worker_count == 0 || partial_lens.is_empty() {
        return 1;
    }
    let largest = *partial_lens.iter().max().unwrap();
    if largest == 0 {
        return 1;
    }
    let smallest = *partial_lens.iter().min().unwrap();
    let max_by_min_batch = (largest / config.min_entities_per_worker.max(1)).max(1);
    let w = (config.worker_count + 1).min(max_by_min_batch);
    w.min(smallest.max(1)).max(1)
}

/// Runs one system's prepare-and-run step. `commands` accumulates every
/// mutation the system's callback records via its [`CommandBufferHandle`];
/// callers merge it into parent state at tick step 7 (spec.md §4.3, §4.4).
pub fn prepare_and_run(
    descriptor: &SystemDescriptor,
    evaluator: &FilterEvaluator,
    store: &mut ComponentStore,
    arena: &mut ScratchArena,
    config: &SchedulerConfig,
    commands: &Mutex<CommandBuffer>,
    dt: f32,
) {
    let handle = CommandBufferHandle::new(commands);
    let views: Vec<RawPackView> = descriptor
        .packs
        .iter()
        .map(|pack| materialize_pack(pack, evaluator, store, arena))
        .collect();

    let partial_lens: Vec<usize> = views
        .iter()
        .filter(|v| v.slicing == Slicing::Partial)
        .map(|v| v.len)
        .collect();

    let eligible_for_parallel =
        descriptor.threading_mode == ThreadingMode::Parallel && !partial_lens.is_empty();

    if !eligible_for_parallel {
        let mut materialized: Vec<MaterializedPack> = views
            .iter()
            .map(|v| unsafe { slice_view(v, 0..v.len) })
            .collect();
        (descriptor.callback)(&mut materialized, &handle, dt);
        drop(materialized);
        for view in &views {
            write_back(view, 0..view.len, store);
        }
        return;
    }

    let w = compute_worker_count(config, &partial_lens);
    trace!(workers = w, "parallel system dispatch");
    if w <= 1 {
        let mut materialized: Vec<MaterializedPack> = views
            .iter()
            .map(|v| unsafe { slice_view(v, 0..v.len) })
            .collect();
        (descriptor.callback)(&mut materialized, &handle, dt);
        drop(materialized);
        for view in &views {
            write_back(view, 0..view.len, store);
        }
        return;
    }

    // Slice each partial pack into `w` chunks; full packs are broadcast
    // (the same 0..len range for every worker).
    let per_pack_bounds: Vec<Vec<Range<usize>>> = views
        .iter()
        .map(|v| match v.slicing {
            Slicing::Partial => slice_bounds(v.len, w),
            Slicing::Full => (0..w).map(|_| 0..v.len).collect(),
        })
        .collect();

    let views_ref = &views;
    let callback = &descriptor.callback;
    let handle_ref = &handle;
    rayon::scope(|scope| {
        for worker in 0..w {
            let per_pack_bounds = &per_pack_bounds;
            scope.spawn(move |_| {
                let mut materialized: Vec<MaterializedPack> = views_ref
                    .iter()
                    .enumerate()
                    .map(|(i, v)| unsafe { slice_view(v, per_pack_bounds[i][worker].clone()) })
                    .collect();
                callback(&mut materialized, handle_ref, dt);
            });
        }
    });

    for (i, view) in views.iter().enumerate() {
        for worker in 0..w {
            write_back(view, per_pack_bounds[i][worker].clone(), store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_bounds_cover_range_without_gaps() {
        let bounds = slice_bounds(10, 3);
        assert_eq!(bounds, vec![0..3, 3..6, 6..10]);
    }

    #[test]
    fn worker_count_respects_min_batch() {
        let config = SchedulerConfig {
            worker_count: 4,
            min_entities_per_worker: 1000,
        };
        assert_eq!(compute_worker_count(&config, &[500]), 1);
    }

    #[test]
    fn worker_count_caps_at_smallest_partial_pack() {
        let config = SchedulerConfig {
            worker_count: 8,
            min_entities_per_worker: 1,
        };
        assert!(compute_worker_count(&config, &[2, 100]) <= 2);
    }

    #[test]
    fn zero_configured_workers_disables_parallelism() {
        let config = SchedulerConfig {
            worker_count: 0,
            min_entities_per_worker: 1,
        };
        assert_eq!(compute_worker_count(&config, &[1000]), 1);
    }
}
