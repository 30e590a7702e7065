//! System registration and the prepare-and-run scheduler (spec.md §4.3).

pub mod descriptor;
pub mod handle;
pub mod runner;

pub use descriptor::{SystemDescriptor, SystemFn, SystemRegistry, ThreadingMode};
pub use handle::SystemHandle;
pub use runner::SchedulerConfig;
