//! Recoverable error types.
//!
//! Per spec.md §7: registration conflicts surface synchronously as
//! [`RegistrationError`]; lookup misses return `Option`/absent values rather
//! than an error type; capacity exhaustion and contract violations are fatal
//! and abort via `panic!`/`assert!` (see `storage::container` and `arena`).

use crate::scheduler::SystemHandle;
use thiserror::Error;

/// Failure surfaced synchronously from [`crate::state::State::declare`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("system has no packs and no component bindings")]
    EmptyAccess,

    #[error("pack binding conflict: component `{component}` is bound as both read and write within the same system")]
    ReadWriteConflict { component: &'static str },

    #[error("pack binding conflict: component `{component}` is written by more than one pack in the same system")]
    WriteWriteConflict { component: &'static str },

    #[error("system handle {0} was already revoked or never registered")]
    UnknownHandle(SystemHandle),
}
