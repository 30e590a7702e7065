use ecs_core::pack::{BindingView, MaterializedPack};

/// Reinterprets a `Direct` write binding's gathered bytes as `&mut [T]`,
/// matching the row-major, per-entity layout `materialize_pack` writes.
pub fn direct_slice_mut<'a, T>(view: &'a mut BindingView) -> &'a mut [T] {
    match view {
        BindingView::Direct { data, elem_size } => {
            assert_eq!(*elem_size, std::mem::size_of::<T>());
            let len = data.len() / elem_size.max(1);
            unsafe { std::slice::from_raw_parts_mut(data.as_mut_ptr() as *mut T, len) }
        }
        BindingView::Indirect { .. } => panic!("expected a direct-mode binding"),
    }
}

pub fn binding_mut<'p, 'a>(pack: &'p mut MaterializedPack<'a>, index: usize) -> &'p mut BindingView<'a> {
    &mut pack.bindings[index].1
}
