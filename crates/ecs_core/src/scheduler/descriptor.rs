//! System registration (spec.md §6, §7), adapted from
//! `latch_core::ecs::system_registry`'s conflict-checked registration.

use crate::command_buffer::CommandBufferHandle;
use crate::component::{ComponentTypeId, meta_of_id};
use crate::error::RegistrationError;
use crate::pack::PackDescriptor;
use crate::pack::MaterializedPack;
use std::collections::HashMap;
use tracing::warn;

use super::handle::SystemHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadingMode {
    Serial,
    /// Eligible for worker fan-out when at least one bound pack is partial.
    Parallel,
}

/// `dt` is the duration passed to this tick's `State::tick(dt)` call
/// (spec.md §6), forwarded unchanged to every system invocation. Packs are
/// `&mut` so write bindings (`BindingView::Direct`'s `&mut [u8]`) can
/// actually be mutated through them.
pub type SystemFn = Box<dyn Fn(&mut [MaterializedPack], &CommandBufferHandle, f32) + Send + Sync>;

pub struct SystemDescriptor {
    pub threading_mode: ThreadingMode,
    pub packs: Vec<PackDescriptor>,
    pub callback: SystemFn,
}

impl SystemDescriptor {
    fn is_empty(&self) -> bool {
        self.packs.is_empty() || self.packs.iter().all(|p| p.bindings.is_empty())
    }

    fn check_conflicts(&self) -> Result<(), RegistrationError> {
        let mut writers: HashMap<ComponentTypeId, usize> = HashMap::new();
        let mut readers: HashMap<ComponentTypeId, usize> = HashMap::new();
        for binding in self.packs.iter().flat_map(|p| p.bindings.iter()) {
            let id = binding.component();
            if binding.is_write() {
                *writers.entry(id).or_insert(0) += 1;
            } else {
                *readers.entry(id).or_insert(0) += 1;
            }
        }
        for (&id, &count) in &writers {
            if count > 1 {
                warn!(component = component_name(id), "write-write conflict in system registration");
                return Err(RegistrationError::WriteWriteConflict {
                    component: component_name(id),
                });
            }
            if readers.contains_key(&id) {
                warn!(component = component_name(id), "read-write conflict in system registration");
                return Err(RegistrationError::ReadWriteConflict {
                    component: component_name(id),
                });
            }
        }
        Ok(())
    }
}

fn component_name(id: ComponentTypeId) -> &'static str {
    meta_of_id(id).map(|m| m.name).unwrap_or("<unregistered>")
}

#[derive(Default)]
pub struct SystemRegistry {
    systems: Vec<Option<SystemDescriptor>>,
    pending: Vec<(SystemHandle, SystemDescriptor)>,
    revoked_pending: Vec<SystemHandle>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers `descriptor` immediately. Returns a handle.
    pub fn register(&mut self, descriptor: SystemDescriptor) -> Result<SystemHandle, RegistrationError> {
        if descriptor.is_empty() {
            return Err(RegistrationError::EmptyAccess);
        }
        descriptor.check_conflicts()?;
        let handle = SystemHandle(self.systems.len() as u32);
        self.systems.push(Some(descriptor));
        Ok(handle)
    }

    /// Registers `descriptor` but defers its integration until the next
    /// tick boundary (spec.md §4.3 step 8) — used when `declare` is called
    /// from within `tick`.
    pub fn register_deferred(&mut self, descriptor: SystemDescriptor) -> Result<SystemHandle, RegistrationError> {
        if descriptor.is_empty() {
            return Err(RegistrationError::EmptyAccess);
        }
        descriptor.check_conflicts()?;
        let handle = SystemHandle((self.systems.len() + self.pending.len()) as u32);
        self.pending.push((handle, descriptor));
        Ok(handle)
    }

    pub fn revoke(&mut self, handle: SystemHandle) -> Result<(), RegistrationError> {
        if handle.index() < self.systems.len() && self.systems[handle.index()].is_some() {
            self.revoked_pending.push(handle);
            Ok(())
        } else {
            Err(RegistrationError::UnknownHandle(handle))
        }
    }

    /// Tick step 8: integrate systems registered mid-tick, process deregistrations.
    pub fn integrate_pending(&mut self) {
        for (handle, descriptor) in self.pending.drain(..) {
            while self.systems.len() <= handle.index() {
                self.systems.push(None);
            }
            self.systems[handle.index()] = Some(descriptor);
        }
        for handle in self.revoked_pending.drain(..) {
            if handle.index() < self.systems.len() {
                self.systems[handle.index()] = None;
            }
        }
    }

    /// Iterates active systems in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (SystemHandle, &SystemDescriptor)> {
        self.systems
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|d| (SystemHandle(i as u32), d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{Binding, PackMode, Slicing};
    use crate::filter::FilterGroupKey;

    fn pack_with(bindings: Vec<Binding>) -> PackDescriptor {
        PackDescriptor::new(FilterGroupKey::builder().build(), bindings, PackMode::Direct, Slicing::Full)
    }

    #[test]
    fn empty_system_is_rejected() {
        let mut registry = SystemRegistry::new();
        let descriptor = SystemDescriptor {
            threading_mode: ThreadingMode::Serial,
            packs: vec![],
            callback: Box::new(|_: &mut [MaterializedPack], _, _| {}),
        };
        assert_eq!(registry.register(descriptor), Err(RegistrationError::EmptyAccess));
    }

    #[test]
    fn write_write_conflict_is_rejected() {
        let mut registry = SystemRegistry::new();
        let descriptor = SystemDescriptor {
            threading_mode: ThreadingMode::Serial,
            packs: vec![pack_with(vec![Binding::Write(1)]), pack_with(vec![Binding::Write(1)])],
            callback: Box::new(|_: &mut [MaterializedPack], _, _| {}),
        };
        assert!(registry.register(descriptor).is_err());
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut registry = SystemRegistry::new();
        for i in 0..3 {
            let descriptor = SystemDescriptor {
                threading_mode: ThreadingMode::Serial,
                packs: vec![pack_with(vec![Binding::Write(i)])],
                callback: Box::new(|_: &mut [MaterializedPack], _, _| {}),
            };
            registry.register(descriptor).unwrap();
        }
        let order: Vec<_> = registry.iter().map(|(h, _)| h.index()).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
