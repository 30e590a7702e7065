//! Dependency pack descriptors (spec.md §3, §4.5).

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::filter::FilterGroupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackMode {
    /// Component data is copied contiguously into the scratch arena.
    Direct,
    /// The pack exposes dense-slot index arrays into live storage.
    Indirect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slicing {
    /// May be sliced across workers by the scheduler.
    Partial,
    /// Broadcast unchanged to every worker.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Read(ComponentTypeId),
    Write(ComponentTypeId),
}

impl Binding {
    pub fn component(self) -> ComponentTypeId {
        match self {
            Binding::Read(id) | Binding::Write(id) => id,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(self, Binding::Write(_))
    }
}

/// A descriptor built once per system registration (spec.md §3): the
/// filter group identity, the component bindings a system reads/writes,
/// its materialization mode, and whether it may be sliced.
#[derive(Debug, Clone)]
pub struct PackDescriptor {
    pub filter: FilterGroupKey,
    pub bindings: Vec<Binding>,
    pub mode: PackMode,
    pub slicing: Slicing,
}

impl PackDescriptor {
    pub fn new(filter: FilterGroupKey, bindings: Vec<Binding>, mode: PackMode, slicing: Slicing) -> Self {
        Self {
            filter,
            bindings,
            mode,
            slicing,
        }
    }

    pub fn reads(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.bindings.iter().filter(|b| !b.is_write()).map(|b| b.component())
    }

    pub fn writes(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.bindings.iter().filter(|b| b.is_write()).map(|b| b.component())
    }
}

/// One binding's materialized view inside the scratch arena.
pub enum BindingView<'a> {
    /// Direct mode: a contiguous gathered byte region, row-major by entity.
    Direct { data: &'a mut [u8], elem_size: usize },
    /// Indirect mode: dense-slot indices plus the live storage base pointer.
    Indirect { indices: &'a [u32], base: *mut u8, elem_size: usize },
}

/// The materialized result of one pack for one system invocation (or one
/// worker's slice of it).
pub struct MaterializedPack<'a> {
    pub entities: &'a [Entity],
    pub bindings: Vec<(Binding, BindingView<'a>)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_component_and_write_flag() {
        let r = Binding::Read(7);
        let w = Binding::Write(9);
        assert_eq!(r.component(), 7);
        assert!(!r.is_write());
        assert_eq!(w.component(), 9);
        assert!(w.is_write());
    }
}
