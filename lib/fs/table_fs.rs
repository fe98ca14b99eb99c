//! The filesystem operations, served from the published snapshot.
//!
//! Every operation first enters the refresh barrier, then takes one [`SnapshotHandle`] and answers
//! entirely from it. Leaving the barrier is tied to a guard, so it happens on every exit path,
//! including a panic inside the operation.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use thiserror::Error;
use tracing::{error, trace};

use super::path::{Resolved, resolve};
use super::{DirEntry, FileAttr, FileKind, InodePerms};
use crate::snapshot::{Entry, Snapshot, SnapshotHandle, SnapshotStore};
use crate::sync::{CoordinatorError, RefreshCoordinator, RefreshGuard};

/// Errors returned by [`DbFs`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsError {
    /// No table with that name in the current snapshot.
    #[error("table not found")]
    NotFound,

    /// The request itself is malformed, e.g. a negative read offset.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A file operation was aimed at the root directory.
    #[error("is a directory")]
    IsDirectory,

    /// The barrier is closed because the filesystem is going away.
    #[error("filesystem is shutting down")]
    ShuttingDown,

    /// Something unexpected went wrong inside the operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoordinatorError> for FsError {
    fn from(e: CoordinatorError) -> Self {
        match e {
            CoordinatorError::ShuttingDown => Self::ShuttingDown,
        }
    }
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => libc::ENOENT,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::IsDirectory => libc::EISDIR,
            FsError::ShuttingDown | FsError::Internal(_) => libc::EIO,
        }
    }
}

/// How [`DbFs::open`] treats a path that names no table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpenPolicy {
    /// Always succeed; a missing table surfaces on the first read.
    #[default]
    Lenient,
    /// Fail with [`FsError::NotFound`] up front.
    Strict,
}

/// Summary numbers for `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Number of tables.
    pub tables: u64,
    /// Total content bytes across all tables.
    pub total_bytes: u64,
}

/// The mounted filesystem's state: the snapshot store and the barrier guarding it.
///
/// One instance is built at startup and shared (usually behind an `Arc`) with the FUSE adapter and
/// the refresh worker.
#[derive(Debug)]
pub struct DbFs {
    store: SnapshotStore,
    coordinator: RefreshCoordinator,
    root_owner: (u32, u32),
    open_policy: OpenPolicy,
}

impl DbFs {
    /// Creates a filesystem serving `initial`. The root directory is owned by `root_owner`
    /// (`(uid, gid)`).
    #[must_use]
    pub fn new(initial: Snapshot, root_owner: (u32, u32)) -> Self {
        Self {
            store: SnapshotStore::new(initial),
            coordinator: RefreshCoordinator::new(),
            root_owner,
            open_policy: OpenPolicy::default(),
        }
    }

    /// Sets how `open` treats missing tables.
    #[must_use]
    pub fn with_open_policy(mut self, policy: OpenPolicy) -> Self {
        self.open_policy = policy;
        self
    }

    /// The refresh barrier.
    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// The snapshot store.
    #[must_use]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Publishes `snapshot` under an exclusive refresh token obtained from this filesystem's
    /// coordinator. Returns the retired snapshot.
    pub fn publish(&self, gate: &RefreshGuard<'_>, snapshot: Snapshot) -> SnapshotHandle {
        debug_assert!(
            std::ptr::eq(gate.coordinator(), &self.coordinator),
            "refresh token belongs to a different filesystem"
        );
        self.store.publish(gate, snapshot)
    }

    /// Runs `f` against the current snapshot inside the barrier.
    ///
    /// All operations are built on this. A panic in `f` is caught here and reported as
    /// [`FsError::Internal`] so it never unwinds into the FUSE dispatch loop.
    pub fn with_snapshot<R>(
        &self,
        f: impl FnOnce(&Snapshot) -> Result<R, FsError>,
    ) -> Result<R, FsError> {
        let _op = self.coordinator.enter_operation()?;
        let snapshot = self.store.current();
        std::panic::catch_unwind(AssertUnwindSafe(|| f(&*snapshot))).unwrap_or_else(|panic| {
            let msg = panic_message(&*panic);
            error!(panic = %msg, "filesystem operation panicked");
            Err(FsError::Internal(msg))
        })
    }

    /// Attributes of the root or of a table.
    pub fn attributes(&self, path: &str) -> Result<FileAttr, FsError> {
        trace!(path, "attributes");
        self.with_snapshot(|snapshot| match resolve(path) {
            Resolved::Root => Ok(self.root_attr(snapshot)),
            Resolved::Table(name) => snapshot.get(name).map(file_attr).ok_or(FsError::NotFound),
        })
    }

    /// Lists the root directory: `.`, `..`, then every table in name order.
    ///
    /// The namespace is flat, so `path` is not consulted.
    pub fn list(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        trace!(path, "list");
        self.with_snapshot(|snapshot| {
            let dots = [".", ".."].into_iter().map(|name| DirEntry {
                name: name.to_owned(),
                kind: FileKind::Directory,
            });
            let tables = snapshot.names().map(|name| DirEntry {
                name: name.to_owned(),
                kind: FileKind::File,
            });
            Ok(dots.chain(tables).collect())
        })
    }

    /// Opens a table. Stateless: reads are served by name, so there is no handle to allocate.
    pub fn open(&self, path: &str) -> Result<(), FsError> {
        trace!(path, "open");
        match self.open_policy {
            OpenPolicy::Lenient => self.with_snapshot(|_| Ok(())),
            OpenPolicy::Strict => self.with_snapshot(|snapshot| match resolve(path) {
                Resolved::Root => Err(FsError::IsDirectory),
                Resolved::Table(name) if snapshot.contains(name) => Ok(()),
                Resolved::Table(_) => Err(FsError::NotFound),
            }),
        }
    }

    /// Reads up to `length` bytes of a table starting at `offset`.
    ///
    /// Past the end this returns an empty buffer; a request running over the end is shortened to
    /// the available tail.
    pub fn read(&self, path: &str, offset: i64, length: usize) -> Result<Bytes, FsError> {
        trace!(path, offset, length, "read");
        self.with_snapshot(|snapshot| {
            let entry = lookup_file(snapshot, path)?;
            read_range(entry.content(), offset, length)
        })
    }

    /// Table count and total size of the current snapshot.
    pub fn stats(&self) -> Result<FsStats, FsError> {
        self.with_snapshot(|snapshot| {
            Ok(FsStats {
                tables: snapshot.len() as u64,
                total_bytes: snapshot.total_bytes(),
            })
        })
    }

    fn root_attr(&self, snapshot: &Snapshot) -> FileAttr {
        let published = snapshot.created_at();
        FileAttr {
            kind: FileKind::Directory,
            size: 0,
            perm: InodePerms::ALL_READ | InodePerms::ALL_EXECUTE,
            nlink: 2,
            uid: self.root_owner.0,
            gid: self.root_owner.1,
            atime: published,
            mtime: published,
            ctime: published,
        }
    }
}

fn lookup_file<'a>(snapshot: &'a Snapshot, path: &str) -> Result<&'a Entry, FsError> {
    match resolve(path) {
        Resolved::Root => Err(FsError::IsDirectory),
        Resolved::Table(name) => snapshot.get(name).ok_or(FsError::NotFound),
    }
}

fn file_attr(entry: &Entry) -> FileAttr {
    let meta = entry.meta();
    FileAttr {
        kind: FileKind::File,
        size: entry.size(),
        perm: meta.perm,
        nlink: meta.nlink,
        uid: meta.uid,
        gid: meta.gid,
        atime: meta.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
    }
}

/// The read clamp shared by every read path.
///
/// Negative offsets are rejected; offsets at or past the end give an empty buffer; otherwise the
/// result is `content[offset..min(offset + length, len)]`. The returned buffer shares memory with
/// `content`.
pub fn read_range(content: &Bytes, offset: i64, length: usize) -> Result<Bytes, FsError> {
    let offset =
        usize::try_from(offset).map_err(|_| FsError::InvalidArgument("negative read offset"))?;
    if offset >= content.len() {
        return Ok(Bytes::new());
    }
    let end = offset.saturating_add(length).min(content.len());
    Ok(content.slice(offset..end))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const CONTENT: &[u8] = b"0123456789";

    #[test]
    fn read_range_whole() {
        let c = Bytes::from_static(CONTENT);
        assert_eq!(read_range(&c, 0, 10).unwrap(), CONTENT);
    }

    #[test]
    fn read_range_clamps_tail() {
        let c = Bytes::from_static(CONTENT);
        assert_eq!(read_range(&c, 7, 100).unwrap().as_ref(), b"789");
    }

    #[test]
    fn read_range_past_end_is_empty() {
        let c = Bytes::from_static(CONTENT);
        assert!(read_range(&c, 10, 4).unwrap().is_empty());
        assert!(read_range(&c, 1_000, 4).unwrap().is_empty());
    }

    #[test]
    fn read_range_negative_offset() {
        let c = Bytes::from_static(CONTENT);
        for len in [0, 1, 10, usize::MAX] {
            assert_eq!(
                read_range(&c, -1, len),
                Err(FsError::InvalidArgument("negative read offset"))
            );
        }
    }

    #[test]
    fn read_range_huge_length_does_not_overflow() {
        let c = Bytes::from_static(CONTENT);
        assert_eq!(read_range(&c, 3, usize::MAX).unwrap().as_ref(), b"3456789");
    }

    #[test]
    fn errno_mapping() {
        assert_eq!(i32::from(FsError::NotFound), libc::ENOENT);
        assert_eq!(i32::from(FsError::InvalidArgument("x")), libc::EINVAL);
        assert_eq!(i32::from(FsError::ShuttingDown), libc::EIO);
        assert_eq!(i32::from(FsError::Internal("x".into())), libc::EIO);
    }
}
