//! Top-level runtime state tying every module together (spec.md §4.3, §5,
//! §6): entity allocation, staged component storage, filter groups, system
//! registration, and the tick driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, debug_span, trace};

use crate::arena::ScratchArena;
use crate::command_buffer::CommandBuffer;
use crate::component::{Component, ComponentMeta};
use crate::entity::{Entity, EntityAllocator};
use crate::error::RegistrationError;
use crate::filter::{FilterEvaluator, FilterGroupKey};
use crate::pack::PackDescriptor;
use crate::scheduler::runner::{prepare_and_run, SchedulerConfig};
use crate::scheduler::{SystemDescriptor, SystemFn, SystemHandle, SystemRegistry, ThreadingMode};
use crate::storage::{Container, ComponentStore};
use crate::tracker::ChangeTracker;

static GENERATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Tracks where in the tick pipeline `State` currently is (spec.md §5).
/// `declare`/`revoke` called while `Ticking` or `Draining` are deferred to
/// the next tick boundary rather than applied immediately, mirroring the
/// teacher's system-registry double-buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickPhase {
    Idle,
    /// Systems are executing; state is read-only from their perspective.
    Ticking,
    /// Command buffers are being merged back into storage.
    Draining,
}

pub struct State {
    entities: EntityAllocator,
    store: ComponentStore,
    evaluator: FilterEvaluator,
    registry: SystemRegistry,
    tracker: ChangeTracker,
    arena: ScratchArena,
    scheduler_config: SchedulerConfig,
    generation: u64,
    tick_count: u64,
    phase: TickPhase,
    /// Filter groups acquired per system, released on `revoke` so the
    /// evaluator's ref-counts stay accurate without relying on `Drop`.
    system_filters: HashMap<SystemHandle, Vec<FilterGroupKey>>,
    /// Entities queued by direct `destroy` calls, applied at the next tick's
    /// drain step rather than immediately (spec.md §4.3 step 6).
    deferred_destroys: Vec<Entity>,
}

impl State {
    pub fn new(worker_count: usize, scratch_capacity_bytes: usize, min_entities_per_worker: usize) -> Self {
        let generation = GENERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(generation, "new ECS state");
        Self {
            entities: EntityAllocator::new(),
            store: ComponentStore::new(),
            evaluator: FilterEvaluator::new(),
            registry: SystemRegistry::new(),
            tracker: ChangeTracker::new(),
            arena: ScratchArena::new(scratch_capacity_bytes),
            scheduler_config: SchedulerConfig {
                worker_count,
                min_entities_per_worker,
            },
            generation,
            tick_count: 0,
            phase: TickPhase::Idle,
            system_filters: HashMap::new(),
            deferred_destroys: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // ---- entity lifecycle (spec.md §4) ----

    pub fn create(&mut self, n: usize) -> Vec<Entity> {
        let created = self.entities.create(n);
        self.tracker.mark(&created);
        created
    }

    /// Destroys `entities` immediately if called outside a tick; if called
    /// while ticking it queues them for the current tick's drain step
    /// (spec.md §5 "external mutators ... execute directly if idle").
    pub fn destroy(&mut self, entities: &[Entity]) {
        match self.phase {
            TickPhase::Idle => {
                self.store.reset_entities(entities);
                self.tracker.mark(entities);
            }
            TickPhase::Ticking | TickPhase::Draining => {
                self.deferred_destroys.extend_from_slice(entities);
            }
        }
    }

    /// Strips every component from `entities` immediately, without
    /// retiring the entity IDs (spec.md §6 `reset`).
    pub fn reset(&mut self, entities: &[Entity]) {
        self.store.reset_entities(entities);
        self.tracker.mark(entities);
    }

    // ---- component ops ----

    pub fn add<T: Component>(&mut self, entities: &[Entity], value: &T) {
        if entities.is_empty() {
            return;
        }
        let bytes = unsafe {
            std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>())
        };
        self.store.ensure::<T>().add_bytes(entities, bytes, true);
        self.tracker.mark(entities);
    }

    pub fn remove<T: Component>(&mut self, entities: &[Entity]) {
        if let Some(container) = self.store.typed_mut::<T>() {
            container.destroy(entities);
        }
        self.tracker.mark(entities);
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.store
            .typed::<T>()
            .map(|c| c.has(entity, crate::storage::stage::ALIVE_OR_ADDED))
            .unwrap_or(false)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let container = self.store.typed::<T>()?;
        unsafe { crate::storage::container::read_typed::<T>(container, entity) }
    }

    // ---- system registration (spec.md §4.3 step 8, §7) ----

    pub fn declare(
        &mut self,
        threading_mode: ThreadingMode,
        packs: Vec<PackDescriptor>,
        callback: SystemFn,
    ) -> Result<SystemHandle, RegistrationError> {
        let filter_keys: Vec<FilterGroupKey> = packs.iter().map(|p| p.filter.clone()).collect();
        let descriptor = SystemDescriptor {
            threading_mode,
            packs,
            callback,
        };
        let handle = match self.phase {
            TickPhase::Idle => self.registry.register(descriptor)?,
            TickPhase::Ticking | TickPhase::Draining => self.registry.register_deferred(descriptor)?,
        };
        for key in &filter_keys {
            self.evaluator.acquire(key.clone());
        }
        self.system_filters.insert(handle, filter_keys);
        Ok(handle)
    }

    pub fn revoke(&mut self, handle: SystemHandle) -> Result<(), RegistrationError> {
        self.registry.revoke(handle)?;
        if let Some(keys) = self.system_filters.remove(&handle) {
            for key in &keys {
                self.evaluator.release(key);
            }
        }
        Ok(())
    }

    // ---- the tick driver (spec.md §4.3) ----

    pub fn tick(&mut self, dt: f32) {
        assert_eq!(self.phase, TickPhase::Idle, "tick() is not reentrant");
        let span = debug_span!("tick", tick = self.tick_count, dt);
        let _guard = span.enter();
        self.phase = TickPhase::Ticking;

        // 1. drop filter groups no system still references.
        self.evaluator.drop_unreferenced();

        // 2. snapshot and clear the set of entities touched since the last tick.
        let modified = self.tracker.snapshot_and_clear();

        // 3. refresh every live filter group against current storage.
        self.evaluator.refresh_all(&self.store, &modified);

        // 4. run every system in registration order, each against its own
        // command buffer so mutations never alias storage mid-tick.
        let high_water_mark = self.entities.high_water_mark();
        let mut buffers: Vec<Mutex<CommandBuffer>> = Vec::new();
        for (_, descriptor) in self.registry.iter() {
            self.arena.reset();
            let commands = Mutex::new(CommandBuffer::new(high_water_mark));
            prepare_and_run(
                descriptor,
                &self.evaluator,
                &mut self.store,
                &mut self.arena,
                &self.scheduler_config,
                &commands,
                dt,
            );
            buffers.push(commands);
        }

        self.phase = TickPhase::Draining;

        // 5. apply entities queued by direct `destroy` calls.
        let deferred = std::mem::take(&mut self.deferred_destroys);
        if !deferred.is_empty() {
            trace!(count = deferred.len(), "draining deferred destroys");
            self.store.reset_entities(&deferred);
            self.tracker.mark(&deferred);
        }

        // 6. promote every container: ADDED -> ALIVE, drop REMOVED.
        trace!("promoting component containers");
        self.store.promote_all();

        // 7. merge each system's command buffer into state, in registration order.
        for commands in buffers {
            let buffer = commands.into_inner().unwrap();
            buffer.merge_into(&mut self.entities, &mut self.store, &mut self.tracker);
        }

        // 8. advance the tick counter, integrate systems declared/revoked mid-tick.
        self.tick_count += 1;
        self.registry.integrate_pending();
        self.phase = TickPhase::Idle;
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new(0, 1 << 20, 1)
    }
}
