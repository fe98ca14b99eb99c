//! The filesystem surface over the published snapshot.
/// Stable inode numbers for table names.
pub mod bridge;
/// FUSE adapter over [`DbFs`].
pub mod fuser;
/// Flat-namespace path resolution.
pub mod path;
/// The four filesystem operations.
pub mod table_fs;

pub use path::Resolved;
pub use table_fs::{DbFs, FsError, OpenPolicy};

use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Inode of the mount root, the only directory.
pub const ROOT_INO: InodeAddr = 1;

bitflags! {
    /// Unix permission bits of a file or directory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute (search for directories).
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read.
        const OTHER_READ    = 1 << 2;
        /// Group: execute.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read.
        const GROUP_READ    = 1 << 5;
        /// Owner: execute.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read.
        const OWNER_READ    = 1 << 8;

        /// Read for owner, group and other.
        const ALL_READ = Self::OWNER_READ.bits()
            | Self::GROUP_READ.bits()
            | Self::OTHER_READ.bits();
        /// Execute for owner, group and other.
        const ALL_EXECUTE = Self::OWNER_EXECUTE.bits()
            | Self::GROUP_EXECUTE.bits()
            | Self::OTHER_EXECUTE.bits();
    }
}

/// What kind of node a path names. There are only tables and the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// A table file.
    File,
    /// The mount root.
    Directory,
}

/// Attributes returned by [`DbFs::attributes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileAttr {
    /// File or directory.
    pub kind: FileKind,
    /// Size in bytes; zero for the root.
    pub size: u64,
    /// Permission bits.
    pub perm: InodePerms,
    /// Hard link count.
    pub nlink: u32,
    /// Owning user.
    pub uid: u32,
    /// Owning group.
    pub gid: u32,
    /// Last access time.
    pub atime: SystemTime,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Last status change time.
    pub ctime: SystemTime,
}

/// A directory entry yielded by [`DbFs::list`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DirEntry {
    /// Entry name: `.`, `..`, or a table name.
    pub name: String,
    /// Entry kind.
    pub kind: FileKind,
}
