//! Table name to inode mapping.
//!
//! FUSE addresses files by inode while the snapshot addresses tables by name. [`NameBridge`]
//! hands out one inode per name the first time the name is seen and keeps it for the life of the
//! mount, so a table keeps its inode across refreshes. Inodes are never reused; a name that
//! disappears from the snapshot keeps its mapping and simply resolves to `ENOENT` until it comes
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::fs::{InodeAddr, ROOT_INO};

/// Bidirectional inode <-> table name mapping.
///
/// Uses two concurrent `scc::HashMap`s for lock-free reads. Allocation touches both maps and is
/// serialized by a `Mutex<()>` so a name can never be given two inodes.
pub struct NameBridge {
    /// inode -> name
    by_ino: scc::HashMap<InodeAddr, Arc<str>>,
    /// name -> inode
    by_name: scc::HashMap<Arc<str>, InodeAddr>,
    next_ino: AtomicU64,
    mu: Mutex<()>,
}

impl NameBridge {
    /// Creates an empty bridge. The first allocated inode follows [`ROOT_INO`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_ino: scc::HashMap::new(),
            by_name: scc::HashMap::new(),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            mu: Mutex::new(()),
        }
    }

    /// The inode for `name`, allocating one on first sight.
    #[must_use]
    pub fn ino_for(&self, name: &str) -> InodeAddr {
        if let Some(ino) = self.by_name.read_sync(name, |_, &ino| ino) {
            return ino;
        }

        let _guard = self.mu.lock().unwrap_or_else(PoisonError::into_inner);
        let name: Arc<str> = Arc::from(name);
        match self.by_name.entry_sync(Arc::clone(&name)) {
            scc::hash_map::Entry::Occupied(occ) => *occ.get(),
            scc::hash_map::Entry::Vacant(vac) => {
                let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
                vac.insert_entry(ino);
                let _ = self.by_ino.insert_sync(ino, name);
                ino
            }
        }
    }

    /// The name an inode was allocated for.
    #[must_use]
    pub fn name_of(&self, ino: InodeAddr) -> Option<Arc<str>> {
        self.by_ino.read_sync(&ino, |_, name| Arc::clone(name))
    }

    /// The inode already allocated for `name`, without allocating.
    #[must_use]
    pub fn existing_ino(&self, name: &str) -> Option<InodeAddr> {
        self.by_name.read_sync(name, |_, &ino| ino)
    }

    /// Number of names that have been given an inode.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    /// Whether no inode has been allocated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_ino.is_empty()
    }
}

impl Default for NameBridge {
    fn default() -> Self {
        Self::new()
    }
}
