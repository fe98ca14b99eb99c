//! FUSE adapter: maps [`fuser::Filesystem`] callbacks onto [`DbFs`].
//!
//! The kernel speaks inodes; [`DbFs`] speaks paths. Each callback turns its inode into a path via
//! the [`NameBridge`], then runs the operation on the runtime's blocking pool. Operations can park
//! on the refresh barrier, and doing that on the session thread would stall every other request.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument};

use super::bridge::NameBridge;
use super::{DbFs, FileAttr, FileKind, FsError, InodeAddr, ROOT_INO};

const BLOCK_SIZE: u32 = 4096;
const MAX_NAME_LENGTH: u32 = 255;

/// Trait abstracting the `.error(errno)` method common to the fuser reply types we use.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyDirectory,
    fuser::ReplyOpen,
    fuser::ReplyData,
    fuser::ReplyStatfs,
);

/// Centralizes the error-logging + errno-reply path so each callback only expresses its success
/// path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, FsError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(e.into());
            }
        }
    }
}

fn to_fuser_attr(ino: InodeAddr, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_fuser_kind(attr.kind),
        perm: attr.perm.bits(),
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn to_fuser_kind(kind: FileKind) -> fuser::FileType {
    match kind {
        FileKind::File => fuser::FileType::RegularFile,
        FileKind::Directory => fuser::FileType::Directory,
    }
}

/// Turns an inode into the path [`DbFs`] expects.
fn path_of(bridge: &NameBridge, ino: InodeAddr) -> Result<String, FsError> {
    if ino == ROOT_INO {
        return Ok("/".to_owned());
    }
    bridge
        .name_of(ino)
        .map(|name| format!("/{name}"))
        .ok_or(FsError::NotFound)
}

/// Bridges [`DbFs`] to the [`fuser::Filesystem`] trait.
pub struct FuserAdapter {
    fs: Arc<DbFs>,
    bridge: Arc<NameBridge>,
    runtime: tokio::runtime::Handle,
}

impl FuserAdapter {
    // Attributes may change on every refresh, so the kernel should not hold on to them for long.
    const TTL: Duration = Duration::from_secs(1);

    /// Creates an adapter that dispatches onto `runtime`'s blocking pool.
    pub fn new(fs: Arc<DbFs>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            fs,
            bridge: Arc::new(NameBridge::new()),
            runtime,
        }
    }

    /// Runs `op` on the blocking pool with clones of the shared state.
    fn dispatch<F>(&self, op: F)
    where
        F: FnOnce(&DbFs, &NameBridge) + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        let bridge = Arc::clone(&self.bridge);
        let task = self.runtime.spawn_blocking(move || op(&fs, &bridge));
        // A panicking task drops its reply, which fuser answers with EIO.
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                error!(error = %e, "filesystem task failed");
            }
        });
    }
}

impl fuser::Filesystem for FuserAdapter {
    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str().map(str::to_owned) else {
            debug!("non-utf8 name, no such table");
            reply.error(libc::ENOENT);
            return;
        };
        self.dispatch(move |fs, bridge| {
            fs.attributes(&format!("/{name}"))
                .fuse_reply(reply, |attr, reply| {
                    let ino = bridge.ino_for(&name);
                    let f_attr = to_fuser_attr(ino, &attr);
                    debug!(?f_attr, "replying...");
                    reply.entry(&Self::TTL, &f_attr, 0);
                });
        });
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.dispatch(move |fs, bridge| {
            path_of(bridge, ino)
                .and_then(|path| fs.attributes(&path))
                .fuse_reply(reply, |attr, reply| {
                    let f_attr = to_fuser_attr(ino, &attr);
                    debug!(?f_attr, "replying...");
                    reply.attr(&Self::TTL, &f_attr);
                });
        });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, offset, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        if ino != ROOT_INO {
            reply.error(libc::ENOTDIR);
            return;
        }
        let Ok(skip) = usize::try_from(offset) else {
            reply.error(libc::EINVAL);
            return;
        };
        self.dispatch(move |fs, bridge| {
            let entries = match fs.list("/") {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(error = %e, "replying error");
                    reply.error(e.into());
                    return;
                }
            };

            for (i, entry) in entries.iter().enumerate().skip(skip) {
                let entry_ino = match entry.kind {
                    FileKind::Directory => ROOT_INO,
                    FileKind::File => bridge.ino_for(&entry.name),
                };
                let Ok(idx): Result<i64, _> = (i + 1).try_into() else {
                    error!("Directory entry index {} too large for fuser", i + 1);
                    reply.error(libc::EIO);
                    return;
                };

                if reply.add(entry_ino, idx, to_fuser_kind(entry.kind), &entry.name) {
                    debug!("buffer full for now, stopping readdir");
                    break;
                }
            }

            debug!("finalizing reply...");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            reply.error(libc::EROFS);
            return;
        }
        self.dispatch(move |fs, bridge| {
            path_of(bridge, ino)
                .and_then(|path| fs.open(&path))
                .fuse_reply(reply, |(), reply| {
                    debug!("replying...");
                    reply.opened(0, 0);
                });
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _fh, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        self.dispatch(move |fs, bridge| {
            path_of(bridge, ino)
                .and_then(|path| fs.read(&path, offset, size as usize))
                .fuse_reply(reply, |data, reply| {
                    debug!(read_bytes = data.len(), "replying...");
                    reply.data(&data);
                });
        });
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        self.dispatch(move |fs, _bridge| {
            fs.stats().fuse_reply(reply, |stats, reply| {
                debug!(?stats, "replying...");
                let blocks = stats.total_bytes.div_ceil(u64::from(BLOCK_SIZE));
                reply.statfs(
                    blocks,
                    0,
                    0,
                    stats.tables + 1,
                    0,
                    BLOCK_SIZE,
                    MAX_NAME_LENGTH,
                    BLOCK_SIZE,
                );
            });
        });
    }
}
