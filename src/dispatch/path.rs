//! Kernel path -> backend path resolution
//!
//! Every verb goes through [`PathResolver::resolve`] so a name produced by
//! `readdir` always resolves to the same backend path `getattr` will ask for.

/// Basename of the readiness sentinel, always at the mount root
pub const READY_FILE: &str = ".fuse_ready";

/// Content served for the readiness sentinel
pub const READY_PAYLOAD: &[u8] = b"ready";

/// Binds kernel paths (relative to the mount root) to a backend root
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Root with trailing separators removed ("" for "/" or "")
    root: String,
    /// Whether backend paths are absolute (root began with '/')
    absolute: bool,
}

impl PathResolver {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
            absolute: root.starts_with('/'),
        }
    }

    /// The bound root in resolved form
    pub fn root(&self) -> String {
        self.resolve("/")
    }

    /// Resolve a kernel path such as `/dir/file` to a backend path.
    ///
    /// Leading and trailing separators of the kernel path are dropped and the
    /// remainder is joined onto the root with exactly one separator.
    pub fn resolve(&self, kernel_path: &str) -> String {
        let rel = kernel_path.trim_matches('/');
        match (self.root.is_empty(), rel.is_empty()) {
            (true, true) => {
                if self.absolute {
                    "/".to_string()
                } else {
                    String::new()
                }
            }
            (true, false) => {
                if self.absolute {
                    format!("/{}", rel)
                } else {
                    rel.to_string()
                }
            }
            (false, true) => self.root.clone(),
            (false, false) => format!("{}/{}", self.root, rel),
        }
    }
}

/// Whether a kernel path names the readiness sentinel
pub fn is_sentinel(kernel_path: &str) -> bool {
    kernel_path.trim_matches('/') == READY_FILE
}
