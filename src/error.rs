use std::io;
use thiserror::Error;

/// Main error type for fuse-bridge operations
#[derive(Error, Debug)]
pub enum FuseBridgeError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Read-only filesystem")]
    ReadOnly,

    #[error("Permission denied")]
    PermissionDenied,

    /// A file handle id with no live entry. Always a dispatcher bug.
    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    /// A live handle used against its open mode (read on a write handle, etc.)
    #[error("File handle {0} not open for this operation")]
    BadHandleMode(u64),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Unexpected failure: {0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation interrupted")]
    Interrupted,
}

impl FuseBridgeError {
    /// Convert error to libc errno for FUSE responses
    pub fn to_errno(&self) -> i32 {
        match self {
            FuseBridgeError::NotFound(_) => libc::ENOENT,
            FuseBridgeError::AlreadyExists(_) => libc::EEXIST,
            FuseBridgeError::NotADirectory(_) => libc::ENOTDIR,
            FuseBridgeError::IsADirectory(_) => libc::EISDIR,
            FuseBridgeError::NotEmpty(_) => libc::ENOTEMPTY,
            FuseBridgeError::InvalidPath(_) => libc::EINVAL,
            FuseBridgeError::NotSupported(_) => libc::ENOTSUP,
            FuseBridgeError::ReadOnly => libc::EROFS,
            FuseBridgeError::PermissionDenied => libc::EACCES,
            FuseBridgeError::InvalidHandle(_) => libc::EIO,
            FuseBridgeError::BadHandleMode(_) => libc::EBADF,
            FuseBridgeError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FuseBridgeError::Backend(_) => libc::EIO,
            FuseBridgeError::NotImplemented(_) => libc::ENOSYS,
            FuseBridgeError::Fatal(_) => libc::EINVAL,
            FuseBridgeError::Config(_) => libc::EINVAL,
            FuseBridgeError::InvalidArgument(_) => libc::EINVAL,
            FuseBridgeError::Interrupted => libc::EINTR,
        }
    }

    /// Whether this error signals an internal fault rather than an
    /// ordinary filesystem condition the caller should expect.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            FuseBridgeError::InvalidHandle(_)
                | FuseBridgeError::Io(_)
                | FuseBridgeError::Backend(_)
                | FuseBridgeError::Fatal(_)
        )
    }

    /// Map a local `io::Error` onto the taxonomy, keeping the path for context.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FuseBridgeError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => FuseBridgeError::AlreadyExists(path.to_string()),
            io::ErrorKind::PermissionDenied => FuseBridgeError::PermissionDenied,
            io::ErrorKind::Unsupported => FuseBridgeError::NotSupported(path.to_string()),
            _ => FuseBridgeError::Io(err),
        }
    }
}

/// Result type alias for fuse-bridge operations
pub type Result<T> = std::result::Result<T, FuseBridgeError>;
