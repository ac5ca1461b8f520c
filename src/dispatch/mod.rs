//! Operation dispatcher
//!
//! [`Operations`] is the path-based, one-method-per-verb surface the kernel
//! bridge calls into. [`Dispatcher`] implements it once, against the
//! cooperative backend interface, and is specialized by the concurrency model
//! of the backend: [`SyncDispatcher`] wraps a blocking [`Backend`] and polls on
//! the calling thread, [`AsyncDispatcher`] drives an [`AsyncBackend`] on its
//! own runtime.
//!
//! Every path handed to an `Operations` method is relative to the mount root
//! and starts with `/`. Errors come back as [`FuseBridgeError`]; the bridge
//! performs the single translation to errno.
//!
//! [`Backend`]: crate::backend::Backend
//! [`AsyncBackend`]: crate::backend::AsyncBackend

pub mod async_dispatch;
pub mod dispatcher;
pub mod handles;
pub mod path;
pub mod sync_dispatch;

use std::time::SystemTime;

use bytes::Bytes;

use crate::backend::{Attributes, Capabilities, DirEntry, EntryKind, OpenMode};
use crate::error::{FuseBridgeError, Result};

pub use async_dispatch::AsyncDispatcher;
pub use dispatcher::{Dispatcher, Executor};
pub use handles::{HandleMode, HandleTable, OpenHandle, STATELESS_HANDLE};
pub use path::{is_sentinel, PathResolver, READY_FILE, READY_PAYLOAD};
pub use sync_dispatch::{Blocking, Inline, SyncDispatcher};

/// Name and kind of one `readdir` result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListingEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirListingEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Filesystem statistics reported by `statfs`
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

impl Default for StatFs {
    /// Remote backends have no meaningful capacity; report "plenty"
    fn default() -> Self {
        Self {
            blocks: u64::MAX,
            bfree: u64::MAX,
            bavail: u64::MAX,
            files: u64::MAX,
            ffree: u64::MAX,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }
}

/// POSIX verbs served by a dispatcher
pub trait Operations: Send + Sync {
    /// Capabilities of the bound backend
    fn capabilities(&self) -> Capabilities;

    /// Called once when the kernel session starts
    fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Called once when the kernel session ends; releases open handles
    fn destroy(&self) {}

    fn getattr(&self, path: &str, fh: Option<u64>) -> Result<Attributes>;

    /// Entries of a directory: `.` and `..` first, then the backend listing
    fn readdir(&self, path: &str, fh: u64) -> Result<Vec<DirListingEntry>>;

    fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    fn rmdir(&self, path: &str) -> Result<()>;

    fn read(&self, path: &str, size: u32, offset: u64, fh: u64) -> Result<Bytes>;

    /// Returns the number of bytes written
    fn write(&self, path: &str, data: &[u8], offset: u64, fh: u64) -> Result<usize>;

    /// Create a file and open it for writing, returning the new handle id
    fn create(&self, path: &str, mode: u32, flags: i32) -> Result<u64>;

    /// Open a file, returning the new handle id
    fn open(&self, path: &str, flags: i32) -> Result<u64>;

    /// Only `length == 0` is supported
    fn truncate(&self, path: &str, length: u64, fh: Option<u64>) -> Result<()>;

    fn unlink(&self, path: &str) -> Result<()>;

    /// Close a handle. Releasing an unknown or already released id succeeds.
    fn release(&self, path: &str, fh: u64) -> Result<()>;

    fn chmod(&self, path: &str, mode: u32) -> Result<()>;

    fn rename(&self, from: &str, to: &str) -> Result<()>;

    fn flush(&self, _path: &str, _fh: u64) -> Result<()> {
        Ok(())
    }

    fn fsync(&self, path: &str, _datasync: bool, fh: u64) -> Result<()> {
        self.flush(path, fh)
    }

    fn access(&self, _path: &str, _mask: i32) -> Result<()> {
        Ok(())
    }

    fn statfs(&self, _path: &str) -> Result<StatFs> {
        Ok(StatFs::default())
    }

    fn opendir(&self, _path: &str, _flags: i32) -> Result<u64> {
        Ok(STATELESS_HANDLE)
    }

    fn releasedir(&self, _path: &str, _fh: u64) -> Result<()> {
        Ok(())
    }

    fn listxattr(&self, path: &str) -> Result<Vec<String>> {
        Err(FuseBridgeError::NotSupported(format!("listxattr on {}", path)))
    }

    fn getxattr(&self, path: &str, name: &str) -> Result<Vec<u8>> {
        Err(FuseBridgeError::NotSupported(format!("getxattr {} on {}", name, path)))
    }

    fn setxattr(&self, path: &str, name: &str, _value: &[u8], _flags: i32) -> Result<()> {
        Err(FuseBridgeError::NotSupported(format!("setxattr {} on {}", name, path)))
    }
}

/// Verb identity, used for per-verb error normalization and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Getattr,
    Readdir,
    Mkdir,
    Rmdir,
    Read,
    Write,
    Create,
    Open,
    Truncate,
    Unlink,
    Release,
    Chmod,
    Rename,
    Flush,
}

impl Verb {
    pub fn name(self) -> &'static str {
        match self {
            Verb::Getattr => "getattr",
            Verb::Readdir => "readdir",
            Verb::Mkdir => "mkdir",
            Verb::Rmdir => "rmdir",
            Verb::Read => "read",
            Verb::Write => "write",
            Verb::Create => "create",
            Verb::Open => "open",
            Verb::Truncate => "truncate",
            Verb::Unlink => "unlink",
            Verb::Release => "release",
            Verb::Chmod => "chmod",
            Verb::Rename => "rename",
            Verb::Flush => "flush",
        }
    }

    /// Verbs that change backend content
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            Verb::Mkdir
                | Verb::Rmdir
                | Verb::Write
                | Verb::Create
                | Verb::Truncate
                | Verb::Unlink
                | Verb::Rename
        )
    }
}

/// Normalize a backend error for the given verb.
///
/// NotSupported from a mutating verb on a read-only backend becomes
/// `ReadOnly` (EROFS); everywhere else it stays NotSupported (ENOTSUP).
pub fn normalize_error(verb: Verb, caps: &Capabilities, err: FuseBridgeError) -> FuseBridgeError {
    match err {
        FuseBridgeError::NotSupported(_) if verb.is_mutating() && !caps.write => {
            FuseBridgeError::ReadOnly
        }
        other => other,
    }
}

/// Fail early with EROFS when a mutating verb hits a read-only backend
pub fn require_writable(caps: &Capabilities) -> Result<()> {
    if !caps.write {
        return Err(FuseBridgeError::ReadOnly);
    }
    Ok(())
}

/// What a kernel `open` asks of the backend stream.
///
/// Backend write streams always start from an empty object, so a writable
/// open is only honoured when nothing would be lost by that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenIntent {
    /// `O_RDONLY`
    Read,
    /// Writable with `O_TRUNC`: the object is replaced
    Replace,
    /// Writable without `O_TRUNC`: allowed on a missing or empty object only
    Overwrite,
    /// Writable with `O_APPEND`
    Append,
}

impl OpenIntent {
    pub fn from_flags(flags: i32) -> Self {
        if flags & libc::O_ACCMODE == libc::O_RDONLY {
            OpenIntent::Read
        } else if flags & libc::O_APPEND != 0 {
            OpenIntent::Append
        } else if flags & libc::O_TRUNC != 0 {
            OpenIntent::Replace
        } else {
            OpenIntent::Overwrite
        }
    }

    pub fn is_write(self) -> bool {
        self != OpenIntent::Read
    }

    pub fn mode(self) -> OpenMode {
        if self.is_write() {
            OpenMode::Write
        } else {
            OpenMode::Read
        }
    }
}

/// Reject writable opens whose stream would silently drop existing data.
/// `existing` is the size of the object, when there is one.
pub fn check_open_intent(path: &str, intent: OpenIntent, existing: Option<u64>) -> Result<()> {
    match (intent, existing) {
        (OpenIntent::Append, _) => Err(FuseBridgeError::NotSupported(format!(
            "append to {}",
            path
        ))),
        (OpenIntent::Overwrite, Some(size)) if size > 0 => {
            Err(FuseBridgeError::NotSupported(format!(
                "open {} for writing without O_TRUNC ({} bytes would be discarded)",
                path, size
            )))
        }
        _ => Ok(()),
    }
}

pub fn handle_mode(mode: OpenMode) -> HandleMode {
    match mode {
        OpenMode::Read => HandleMode::ReadOnly,
        OpenMode::Write => HandleMode::WriteOnly,
    }
}

/// Partial truncation has no backend primitive
pub fn check_truncate_length(path: &str, length: u64) -> Result<()> {
    if length != 0 {
        return Err(FuseBridgeError::NotImplemented(format!(
            "truncate {} to {} bytes (only 0 is supported)",
            path, length
        )));
    }
    Ok(())
}

/// Attributes of the readiness sentinel
pub fn sentinel_attributes() -> Attributes {
    Attributes::file(READY_PAYLOAD.len() as u64, SystemTime::now()).with_mode(0o444)
}

/// Build a readdir result from a backend listing
pub fn listing_entries(listing: Vec<DirEntry>) -> Vec<DirListingEntry> {
    let mut entries = Vec::with_capacity(listing.len() + 2);
    entries.push(DirListingEntry::new(".", EntryKind::Directory));
    entries.push(DirListingEntry::new("..", EntryKind::Directory));
    entries.extend(
        listing
            .iter()
            .map(|entry| DirListingEntry::new(entry.basename(), entry.kind())),
    );
    entries
}
