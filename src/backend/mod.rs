pub mod local;
pub mod memory;
pub mod s3;

use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{FuseBridgeError, Result};

/// Entry kind as seen by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Default file mode (rw-r--r--)
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Default directory mode (rwxr-xr-x)
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// POSIX-stat view of a backend entry, derived from a single `info` call.
#[derive(Debug, Clone)]
pub struct Attributes {
    pub kind: EntryKind,
    pub size: u64,
    /// POSIX permission bits (e.g., 0o644). None means use default.
    pub mode: Option<u32>,
    /// Owner reported by the backend. None means the mount's owner.
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    /// Link count. None derives 2 for directories and 1 for files.
    pub nlink: Option<u32>,
}

impl Attributes {
    pub fn file(size: u64, mtime: SystemTime) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            mode: None,
            uid: None,
            gid: None,
            atime: mtime,
            mtime,
            ctime: mtime,
            nlink: None,
        }
    }

    pub fn directory(mtime: SystemTime) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            ..Self::file(0, mtime)
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Get the mode, using defaults if not set
    pub fn mode_or_default(&self) -> u32 {
        self.mode.unwrap_or(if self.is_dir() {
            DEFAULT_DIR_MODE
        } else {
            DEFAULT_FILE_MODE
        })
    }

    pub fn nlink_or_default(&self) -> u32 {
        self.nlink.unwrap_or(if self.is_dir() { 2 } else { 1 })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// One entry of a backend listing
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Full backend path of the entry
    pub path: String,
    /// Present when the listing was requested with `detail`
    pub attributes: Option<Attributes>,
}

impl DirEntry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            attributes: None,
        }
    }

    pub fn detailed(path: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            path: path.into(),
            attributes: Some(attributes),
        }
    }

    /// Last path component, ignoring trailing separators
    pub fn basename(&self) -> &str {
        let trimmed = self.path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    pub fn kind(&self) -> EntryKind {
        self.attributes
            .as_ref()
            .map(|a| a.kind)
            .unwrap_or(EntryKind::File)
    }
}

/// Mode a backend stream is opened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// "rb"
    Read,
    /// "wb": creates or replaces the object
    Write,
}

/// Backend capabilities declaration
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Can write files (false = read-only)
    pub write: bool,
    /// Can write at arbitrary offsets
    pub random_write: bool,
    /// Native rename support
    pub rename: bool,
    /// Can store and retrieve POSIX file modes
    pub set_mode: bool,
}

impl Capabilities {
    /// Full read-write capabilities
    pub fn full() -> Self {
        Self {
            write: true,
            random_write: true,
            rename: true,
            set_mode: true,
        }
    }

    /// Read-only capabilities
    pub fn read_only() -> Self {
        Self::default()
    }
}

/// Open stream on a blocking backend. The current offset lives in the handle.
pub trait BackendFile: Send {
    /// Read up to `size` bytes from the current offset. Empty at EOF.
    fn read(&mut self, size: usize) -> Result<Bytes>;

    /// Write at the current offset, returning the number of bytes accepted
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Move the current offset
    fn seek(&mut self, offset: u64) -> Result<u64>;

    /// Current offset
    fn tell(&self) -> u64;

    /// Push buffered data to the backend
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush and release the stream. Called exactly once per handle.
    fn close(&mut self) -> Result<()>;
}

/// Blocking storage backend
///
/// Backends are path-based: every path is a full path in the backend's own
/// namespace (an absolute local path, an object key, ...). The dispatcher
/// prefixes the mount's bound root before calling in.
pub trait Backend: Send + Sync {
    /// Short identifier used in logs and mount names ("local", "s3", ...)
    fn name(&self) -> &str;

    /// Get backend capabilities
    fn capabilities(&self) -> Capabilities;

    /// Get attributes for a path. Fails with NotFound when absent.
    fn info(&self, path: &str) -> Result<Attributes>;

    /// Check if a path exists
    ///
    /// Default implementation uses info()
    fn exists(&self, path: &str) -> Result<bool> {
        match self.info(path) {
            Ok(_) => Ok(true),
            Err(FuseBridgeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List the direct children of a directory
    fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>>;

    /// Open a stream on a file
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn BackendFile>>;

    /// Create a directory
    fn mkdir(&self, path: &str) -> Result<()>;

    /// Remove an empty directory
    fn rmdir(&self, path: &str) -> Result<()>;

    /// Remove a file, or a whole tree when `recursive`
    fn rm(&self, path: &str, recursive: bool) -> Result<()>;

    /// Create an empty file, replacing any existing content
    fn touch(&self, path: &str) -> Result<()>;

    /// Set permission bits
    ///
    /// Default implementation returns NotSupported
    fn chmod(&self, _path: &str, _mode: u32) -> Result<()> {
        Err(FuseBridgeError::NotSupported("chmod not supported".to_string()))
    }

    /// Rename/move a file or directory
    ///
    /// Default implementation returns NotSupported
    fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(FuseBridgeError::NotSupported("rename not supported".to_string()))
    }
}

/// Open stream on a cooperative backend
#[async_trait]
pub trait AsyncBackendFile: Send {
    async fn read(&mut self, size: usize) -> Result<Bytes>;

    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    async fn seek(&mut self, offset: u64) -> Result<u64>;

    fn tell(&self) -> u64;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()>;
}

/// Storage backend whose calls suspend instead of blocking.
///
/// Same contract as [`Backend`].
#[async_trait]
pub trait AsyncBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    async fn info(&self, path: &str) -> Result<Attributes>;

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.info(path).await {
            Ok(_) => Ok(true),
            Err(FuseBridgeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>>;

    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn AsyncBackendFile>>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    async fn rmdir(&self, path: &str) -> Result<()>;

    async fn rm(&self, path: &str, recursive: bool) -> Result<()>;

    async fn touch(&self, path: &str) -> Result<()>;

    async fn chmod(&self, _path: &str, _mode: u32) -> Result<()> {
        Err(FuseBridgeError::NotSupported("chmod not supported".to_string()))
    }

    async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(FuseBridgeError::NotSupported("rename not supported".to_string()))
    }
}
