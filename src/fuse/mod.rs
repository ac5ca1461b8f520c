//! Kernel bridge
//!
//! Implements the fuser [`Filesystem`] trait on top of an [`Operations`]
//! dispatcher. The bridge owns inode bookkeeping, converts attributes to
//! kernel form, and routes every dispatcher call through [`guard::call`] so
//! each request gets exactly one reply and no panic reaches the session.

pub mod guard;
pub mod inode;
pub mod signal;
pub mod workers;

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    consts, FileAttr, FileType as FuseFileType, Filesystem, KernelConfig, MountOption, ReplyAttr,
    ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs,
    ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{Attributes, EntryKind};
use crate::dispatch::Operations;

use self::inode::{child_path, InodeTable, ROOT_INODE};
use self::workers::WorkerPool;

/// Attribute cache TTL handed to the kernel
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Generation number (not used, always 0)
const GENERATION: u64 = 0;

/// Block size for reporting
const BLOCK_SIZE: u32 = 4096;

fn to_fuse_file_type(kind: EntryKind) -> FuseFileType {
    match kind {
        EntryKind::File => FuseFileType::RegularFile,
        EntryKind::Directory => FuseFileType::Directory,
    }
}

/// Convert backend attributes to a kernel `FileAttr`.
///
/// Ownership comes from the attributes when the backend reports it, else
/// from the mount's configured (or process) uid/gid.
pub fn attributes_to_attr(ino: u64, attrs: &Attributes, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: attrs.size,
        blocks: attrs.size.div_ceil(BLOCK_SIZE as u64),
        atime: attrs.atime,
        mtime: attrs.mtime,
        ctime: attrs.ctime,
        crtime: attrs.mtime,
        kind: to_fuse_file_type(attrs.kind),
        perm: (attrs.mode_or_default() & 0o7777) as u16,
        nlink: attrs.nlink_or_default(),
        uid: attrs.uid.unwrap_or(uid),
        gid: attrs.gid.unwrap_or(gid),
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Kernel mount options for one mount
pub fn mount_options(fs_name: &str, read_only: bool, allow_other: bool) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(fs_name.to_string()),
        MountOption::Subtype("fuse-bridge".to_string()),
        MountOption::DefaultPermissions,
    ];
    if read_only {
        options.push(MountOption::RO);
    }
    if allow_other {
        options.push(MountOption::AllowOther);
        options.push(MountOption::AutoUnmount);
    }
    options
}

/// Encode xattr names the way listxattr returns them
fn encode_xattr_names(names: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for name in names {
        out.extend_from_slice(name.as_bytes());
        out.push(0);
    }
    out
}

/// Answer an xattr request: size query when `size == 0`, else the data
fn reply_xattr(reply: ReplyXattr, data: &[u8], size: u32) {
    if size == 0 {
        reply.size(data.len() as u32);
    } else if data.len() > size as usize {
        reply.error(libc::ERANGE);
    } else {
        reply.data(data);
    }
}

/// Shared state moved into each request job
#[derive(Clone)]
struct Context {
    ops: Arc<dyn Operations>,
    inodes: Arc<InodeTable>,
    uid: u32,
    gid: u32,
}

impl Context {
    fn attr(&self, ino: u64, attrs: &Attributes) -> FileAttr {
        attributes_to_attr(ino, attrs, self.uid, self.gid)
    }
}

/// fuser filesystem delegating to an [`Operations`] dispatcher
pub struct FuseBridge {
    ctx: Context,
    workers: Option<WorkerPool>,
    worker_count: usize,
}

impl FuseBridge {
    /// Create a bridge over `ops`.
    ///
    /// # Arguments
    /// * `ops` - Dispatcher serving the mount
    /// * `uid` - User ID reported for entries without one (defaults to process uid)
    /// * `gid` - Group ID reported for entries without one (defaults to process gid)
    pub fn new(ops: Arc<dyn Operations>, uid: Option<u32>, gid: Option<u32>) -> Self {
        // Safety: getuid/getgid cannot fail
        let uid = uid.unwrap_or_else(|| unsafe { libc::getuid() });
        let gid = gid.unwrap_or_else(|| unsafe { libc::getgid() });

        Self {
            ctx: Context {
                ops,
                inodes: Arc::new(InodeTable::new()),
                uid,
                gid,
            },
            workers: None,
            worker_count: 0,
        }
    }

    /// Serve requests on `workers` threads instead of the session thread.
    /// The pool is started in `init`.
    pub fn multithreaded(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    fn path_of(&self, ino: u64) -> Result<String, c_int> {
        self.ctx.inodes.get_path(ino).ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let parent = self.path_of(parent)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(child_path(&parent, name))
    }

    /// Path for handle-based verbs. The inode may already be forgotten after
    /// an unlink while the file is still open; the handle id is what counts.
    fn handle_path(&self, ino: u64) -> String {
        self.ctx
            .inodes
            .get_path(ino)
            .unwrap_or_else(|| format!("<unlinked ino {}>", ino))
    }

    fn run<F>(&self, job: F)
    where
        F: FnOnce(Context) + Send + 'static,
    {
        let ctx = self.ctx.clone();
        match &self.workers {
            Some(pool) => pool.execute(move || job(ctx)),
            None => job(ctx),
        }
    }
}

/// Resolve a path or reply with the errno and return
macro_rules! resolve {
    ($expr:expr, $reply:expr) => {
        match $expr {
            Ok(path) => path,
            Err(errno) => {
                $reply.error(errno);
                return;
            }
        }
    };
}

impl Filesystem for FuseBridge {
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        // Writable opens of non-empty files are only honoured with O_TRUNC
        if let Err(missing) = config.add_capabilities(consts::FUSE_ATOMIC_O_TRUNC) {
            warn!("Kernel lacks atomic O_TRUNC (capabilities {:#x})", missing);
        }

        if self.worker_count > 0 && self.workers.is_none() {
            match WorkerPool::new(self.worker_count) {
                Ok(pool) => {
                    info!("Serving requests on {} worker threads", pool.size());
                    self.workers = Some(pool);
                }
                Err(e) => error!("Failed to start worker pool, serving inline: {}", e),
            }
        }

        // A failing init must not abort the session
        if let Err(errno) = guard::call("init", || self.ctx.ops.init()) {
            error!("init failed (errno {}), continuing", errno);
        }
        Ok(())
    }

    fn destroy(&mut self) {
        // Finish in-flight requests before handles are torn down
        self.workers.take();
        let _ = guard::call("destroy", || {
            self.ctx.ops.destroy();
            Ok::<_, crate::error::FuseBridgeError>(())
        });
        debug!("session destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = resolve!(self.child_of(parent, name), reply);
        trace!("lookup: {}", path);

        self.run(move |ctx| {
            match guard::call("lookup", || ctx.ops.getattr(&path, None)) {
                Ok(attrs) => {
                    let ino = ctx.inodes.get_or_create_inode(&path);
                    reply.entry(&ATTR_TTL, &ctx.attr(ino, &attrs), GENERATION);
                }
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let path = resolve!(self.path_of(ino), reply);

        self.run(move |ctx| match guard::call("getattr", || ctx.ops.getattr(&path, None)) {
            Ok(attrs) => reply.attr(&ATTR_TTL, &ctx.attr(ino, &attrs)),
            Err(errno) => reply.error(errno),
        });
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let path = resolve!(self.path_of(ino), reply);

        // Timestamp and ownership changes are accepted and ignored
        self.run(move |ctx| {
            let result = guard::call("setattr", || {
                if let Some(mode) = mode {
                    ctx.ops.chmod(&path, mode)?;
                }
                if let Some(size) = size {
                    ctx.ops.truncate(&path, size, fh)?;
                }
                ctx.ops.getattr(&path, fh)
            });
            match result {
                Ok(attrs) => reply.attr(&ATTR_TTL, &ctx.attr(ino, &attrs)),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let path = resolve!(self.child_of(parent, name), reply);
        let effective_mode = (mode & !umask) & 0o7777;

        self.run(move |ctx| {
            let result = guard::call("mkdir", || {
                ctx.ops.mkdir(&path, effective_mode)?;
                ctx.ops.getattr(&path, None)
            });
            match result {
                Ok(attrs) => {
                    let ino = ctx.inodes.get_or_create_inode(&path);
                    reply.entry(&ATTR_TTL, &ctx.attr(ino, &attrs), GENERATION);
                }
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = resolve!(self.child_of(parent, name), reply);

        self.run(move |ctx| match guard::call("unlink", || ctx.ops.unlink(&path)) {
            Ok(()) => {
                ctx.inodes.remove_path(&path);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        });
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = resolve!(self.child_of(parent, name), reply);

        self.run(move |ctx| match guard::call("rmdir", || ctx.ops.rmdir(&path)) {
            Ok(()) => {
                ctx.inodes.remove_path(&path);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        });
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = resolve!(self.child_of(parent, name), reply);
        let to = resolve!(self.child_of(newparent, newname), reply);

        self.run(move |ctx| match guard::call("rename", || ctx.ops.rename(&from, &to)) {
            Ok(()) => {
                ctx.inodes.rename_path(&from, &to);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = resolve!(self.path_of(ino), reply);

        self.run(move |ctx| match guard::call("open", || ctx.ops.open(&path, flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let path = self.handle_path(ino);
        let offset = offset.max(0) as u64;

        self.run(move |ctx| {
            match guard::call("read", || ctx.ops.read(&path, size, offset, fh)) {
                Ok(data) => reply.data(&data),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let path = self.handle_path(ino);
        let offset = offset.max(0) as u64;
        let data = data.to_vec();

        self.run(move |ctx| {
            match guard::call("write", || ctx.ops.write(&path, &data, offset, fh)) {
                Ok(written) => reply.written(written as u32),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = resolve!(self.child_of(parent, name), reply);
        let effective_mode = (mode & !umask) & 0o7777;

        self.run(move |ctx| {
            match guard::call("create", || ctx.ops.create(&path, effective_mode, flags)) {
                Ok(fh) => {
                    let ino = ctx.inodes.get_or_create_inode(&path);
                    let attrs = Attributes::file(0, SystemTime::now());
                    reply.created(&ATTR_TTL, &ctx.attr(ino, &attrs), GENERATION, fh, 0);
                }
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = self.handle_path(ino);

        self.run(move |ctx| match guard::call("flush", || ctx.ops.flush(&path, fh)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        });
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        let path = self.handle_path(ino);

        self.run(move |ctx| {
            match guard::call("fsync", || ctx.ops.fsync(&path, datasync, fh)) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.handle_path(ino);

        self.run(move |ctx| match guard::call("release", || ctx.ops.release(&path, fh)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let path = resolve!(self.path_of(ino), reply);

        match guard::call("opendir", || self.ctx.ops.opendir(&path, flags)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        let path = self.handle_path(ino);

        match guard::call("releasedir", || self.ctx.ops.releasedir(&path, fh)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = resolve!(self.path_of(ino), reply);
        trace!("readdir: {} offset={}", path, offset);

        self.run(move |ctx| {
            let entries = match guard::call("readdir", || ctx.ops.readdir(&path, fh)) {
                Ok(entries) => entries,
                Err(errno) => {
                    reply.error(errno);
                    return;
                }
            };

            for (idx, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
                let entry_ino = match entry.name.as_str() {
                    "." => ino,
                    ".." if ino == ROOT_INODE => ROOT_INODE,
                    ".." => ctx.inodes.parent_inode(&path),
                    name => ctx.inodes.get_or_create_inode(&child_path(&path, name)),
                };
                let next_offset = idx as i64 + 1;
                if reply.add(entry_ino, next_offset, to_fuse_file_type(entry.kind), &entry.name) {
                    // Buffer full
                    break;
                }
            }
            reply.ok();
        });
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let path = resolve!(self.path_of(ino), reply);

        self.run(move |ctx| match guard::call("access", || ctx.ops.access(&path, mask)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        let path = resolve!(self.path_of(ino), reply);

        self.run(move |ctx| match guard::call("statfs", || ctx.ops.statfs(&path)) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(errno) => reply.error(errno),
        });
    }

    fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        let path = resolve!(self.path_of(ino), reply);
        let name = resolve!(name.to_str().map(str::to_string).ok_or(libc::EINVAL), reply);

        self.run(move |ctx| match guard::call("getxattr", || ctx.ops.getxattr(&path, &name)) {
            Ok(value) => reply_xattr(reply, &value, size),
            Err(errno) => reply.error(errno),
        });
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        let path = resolve!(self.path_of(ino), reply);

        self.run(move |ctx| match guard::call("listxattr", || ctx.ops.listxattr(&path)) {
            Ok(names) => reply_xattr(reply, &encode_xattr_names(&names), size),
            Err(errno) => reply.error(errno),
        });
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let path = resolve!(self.path_of(ino), reply);
        let name = resolve!(name.to_str().map(str::to_string).ok_or(libc::EINVAL), reply);
        let value = value.to_vec();

        self.run(move |ctx| {
            match guard::call("setxattr", || ctx.ops.setxattr(&path, &name, &value, flags)) {
                Ok(()) => reply.ok(),
                Err(errno) => reply.error(errno),
            }
        });
    }
}
