//! Component declaration and the global component registry.
//!
//! Mirrors `latch_core::ecs::component`'s `Registry`/`ComponentMeta` split,
//! but the container selected at registration is one of three explicit
//! classes (spec.md §3) rather than a single POD/non-POD flag: `Flag`
//! (zero-sized, presence-only), `Trivial` (bitwise-copyable), or `Complex`
//! (needs a drop/clone thunk). The class is a user-declared associated
//! constant, not inferred, matching `psl::ecs`'s `component_container_type_for`
//! trait dispatch.

use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

/// Stable per-process identity for a component type. Derived from
/// `TypeId` via a fixed-seed hasher (`DefaultHasher` is not randomized,
/// unlike `RandomState`), matching `latch_core::ecs::archetype`'s hashing.
pub type ComponentTypeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentClass {
    Flag,
    Trivial,
    Complex,
}

/// A user-declared component payload type.
///
/// `CLASS` is fixed at the impl site, not inferred, so the author states
/// up front which storage discipline applies — this is what lets the
/// staged container dispatch on a tag instead of a vtable (spec.md §9).
pub trait Component: Clone + Send + Sync + 'static {
    const CLASS: ComponentClass;
    const NAME: &'static str;
}

#[derive(Debug, Clone, Copy)]
pub struct ComponentMeta {
    pub type_id: ComponentTypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub class: ComponentClass,
    pub drop_fn: Option<unsafe fn(*mut u8)>,
    pub clone_fn: Option<unsafe fn(*const u8, *mut u8)>,
}

unsafe fn drop_in_place_thunk<T>(ptr: *mut u8) {
    unsafe { std::ptr::drop_in_place(ptr as *mut T) }
}

unsafe fn clone_thunk<T: Clone>(src: *const u8, dst: *mut u8) {
    unsafe {
        let value = (*(src as *const T)).clone();
        std::ptr::write(dst as *mut T, value);
    }
}

pub fn type_id_of<T: 'static>() -> ComponentTypeId {
    let mut hasher = DefaultHasher::new();
    TypeId::of::<T>().hash(&mut hasher);
    hasher.finish()
}

static REGISTRY: Lazy<Mutex<HashMap<ComponentTypeId, ComponentMeta>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn build_meta<T: Component>(type_id: ComponentTypeId) -> ComponentMeta {
    let size = std::mem::size_of::<T>();
    let align = std::mem::align_of::<T>();
    match T::CLASS {
        ComponentClass::Flag => {
            assert_eq!(
                size,
                0,
                "component `{}` declared Flag but is not zero-sized",
                T::NAME
            );
            ComponentMeta {
                type_id,
                name: T::NAME,
                size: 0,
                align: 1,
                class: ComponentClass::Flag,
                drop_fn: None,
                clone_fn: None,
            }
        }
        ComponentClass::Trivial => ComponentMeta {
            type_id,
            name: T::NAME,
            size,
            align,
            class: ComponentClass::Trivial,
            drop_fn: None,
            clone_fn: None,
        },
        ComponentClass::Complex => ComponentMeta {
            type_id,
            name: T::NAME,
            size,
            align,
            class: ComponentClass::Complex,
            drop_fn: Some(drop_in_place_thunk::<T>),
            clone_fn: Some(clone_thunk::<T>),
        },
    }
}

/// Registers `T` on first use and returns its metadata. Idempotent.
pub fn ensure_registered<T: Component>() -> ComponentMeta {
    let id = type_id_of::<T>();
    let mut registry = REGISTRY.lock().expect("component registry poisoned");
    *registry.entry(id).or_insert_with(|| build_meta::<T>(id))
}

pub fn meta_of<T: Component>() -> ComponentMeta {
    ensure_registered::<T>()
}

pub fn meta_of_id(id: ComponentTypeId) -> Option<ComponentMeta> {
    REGISTRY
        .lock()
        .expect("component registry poisoned")
        .get(&id)
        .copied()
}
