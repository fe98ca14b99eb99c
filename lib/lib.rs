//! dbfs shared library.
//!
//! Serves database tables as read-only files. A [`snapshot::Snapshot`] of every table is loaded
//! from a [`source::DataSource`], published through a [`snapshot::SnapshotStore`], and read by the
//! filesystem operations in [`fs`]. Refreshes swap in a new snapshot behind the
//! [`sync::RefreshCoordinator`] barrier.

/// Filesystem operations and the FUSE adapter.
pub mod fs;
pub mod refresh;
/// Immutable table snapshots and their publication point.
pub mod snapshot;
/// Where table contents come from.
pub mod source;
/// Synchronization primitives, with a loom shim for model checking.
pub mod sync;
