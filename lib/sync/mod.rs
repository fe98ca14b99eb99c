//! Synchronization primitives.
//!
//! The lock and condition variable types are re-exported from `loom` when the crate is built with
//! `--cfg loom`, so the refresh barrier can be model-checked with the same code that ships.
pub mod coordinator;

pub use coordinator::{
    CoordinatorError, OperationGuard, RefreshClaim, RefreshCoordinator, RefreshGuard, RefreshState,
};

#[cfg(loom)]
pub(crate) use loom::sync::{Condvar, Mutex, MutexGuard};

#[cfg(not(loom))]
pub(crate) use std::sync::{Condvar, Mutex, MutexGuard};
