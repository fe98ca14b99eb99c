//! Holder for the currently published [`Snapshot`].

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use super::Snapshot;
use crate::sync::RefreshGuard;

/// A reader's view of the published snapshot.
///
/// The handle keeps its snapshot alive and unchanged for as long as it is held, even if a newer
/// snapshot is published in the meantime. The old snapshot is freed when the last handle drops.
pub type SnapshotHandle = Arc<Snapshot>;

/// Owns the published snapshot and swaps it as one pointer store.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    /// Creates a store publishing `initial`.
    #[must_use]
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    /// The published snapshot.
    #[must_use]
    pub fn current(&self) -> SnapshotHandle {
        self.current.load_full()
    }

    /// Replaces the published snapshot and returns the one it retired.
    ///
    /// Requires the exclusive refresh token, so no operation is in flight while the swap happens.
    pub fn publish(&self, _gate: &RefreshGuard<'_>, snapshot: Snapshot) -> SnapshotHandle {
        let tables = snapshot.len();
        let retired = self.current.swap(Arc::new(snapshot));
        debug!(
            tables,
            retired_tables = retired.len(),
            "published new snapshot"
        );
        retired
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(Snapshot::empty())
    }
}
