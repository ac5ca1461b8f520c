//! Verb bodies shared by every dispatcher
//!
//! [`Dispatcher`] is written once against [`AsyncBackend`]. What differs
//! between a blocking and a cooperative backend is only how a backend future
//! is driven to completion on the kernel thread, and that is the job of the
//! [`Executor`].

use std::future::Future;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::backend::{AsyncBackend, AsyncBackendFile, Attributes, Capabilities, OpenMode};
use crate::dispatch::{
    check_open_intent, check_truncate_length, handle_mode, is_sentinel, listing_entries,
    normalize_error, require_writable, sentinel_attributes, DirListingEntry, HandleMode,
    HandleTable, OpenIntent, Operations, PathResolver, Verb, READY_PAYLOAD, STATELESS_HANDLE,
};
use crate::error::{FuseBridgeError, Result};

/// Lock-wrapped backend stream stored in the handle table
pub type Stream = Mutex<Box<dyn AsyncBackendFile>>;

/// Runs a backend future to completion on the calling thread
pub trait Executor: Send + Sync {
    fn block_on<F: Future>(&self, future: F) -> F::Output;
}

/// Operation dispatcher bound to one backend root
pub struct Dispatcher<B, E> {
    backend: B,
    resolver: PathResolver,
    handles: HandleTable<Stream>,
    executor: E,
}

impl<B: AsyncBackend, E: Executor> Dispatcher<B, E> {
    /// Bind `backend` at `root`, the backend path shown as the mount root
    pub fn with_executor(backend: B, root: &str, executor: E) -> Self {
        Self {
            backend,
            resolver: PathResolver::new(root),
            handles: HandleTable::new(),
            executor,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn handles(&self) -> &HandleTable<Stream> {
        &self.handles
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.executor.block_on(future)
    }

    fn caps(&self) -> Capabilities {
        self.backend.capabilities()
    }

    fn fail(&self, verb: Verb, err: FuseBridgeError) -> FuseBridgeError {
        normalize_error(verb, &self.caps(), err)
    }

    async fn open_stream(&self, path: &str, mode: OpenMode) -> Result<u64> {
        let resolved = self.resolver.resolve(path);
        let stream = self.backend.open(&resolved, mode).await?;
        let id = self
            .handles
            .allocate(path, handle_mode(mode), Mutex::new(stream));
        debug!("opened {} as fh={} ({:?})", resolved, id, mode);
        Ok(id)
    }

    /// Size of the file at `path`, None when absent or not a file
    async fn existing_size(&self, path: &str) -> Result<Option<u64>> {
        match self.backend.info(&self.resolver.resolve(path)).await {
            Ok(attrs) if attrs.is_file() => Ok(Some(attrs.size)),
            Ok(_) | Err(FuseBridgeError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<B: AsyncBackend, E: Executor> Operations for Dispatcher<B, E> {
    fn capabilities(&self) -> Capabilities {
        self.caps()
    }

    fn destroy(&self) {
        let handles = self.handles.drain();
        if handles.is_empty() {
            return;
        }
        info!("Releasing {} open handle(s) on shutdown", handles.len());
        self.block_on(async {
            for handle in handles {
                if let Err(e) = handle.stream.lock().await.close().await {
                    warn!("close of fh={} ({}) failed: {}", handle.id, handle.path, e);
                }
            }
        });
    }

    fn getattr(&self, path: &str, _fh: Option<u64>) -> Result<Attributes> {
        debug!("getattr: {}", path);
        if is_sentinel(path) {
            return Ok(sentinel_attributes());
        }
        self.block_on(self.backend.info(&self.resolver.resolve(path)))
            .map_err(|e| self.fail(Verb::Getattr, e))
    }

    fn readdir(&self, path: &str, _fh: u64) -> Result<Vec<DirListingEntry>> {
        debug!("readdir: {}", path);
        let listing = self
            .block_on(self.backend.ls(&self.resolver.resolve(path), true))
            .map_err(|e| self.fail(Verb::Readdir, e))?;
        Ok(listing_entries(listing))
    }

    fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        debug!("mkdir: {} mode={:o}", path, mode);
        require_writable(&self.caps())?;
        self.block_on(self.backend.mkdir(&self.resolver.resolve(path)))
            .map_err(|e| self.fail(Verb::Mkdir, e))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        debug!("rmdir: {}", path);
        require_writable(&self.caps())?;
        self.block_on(self.backend.rmdir(&self.resolver.resolve(path)))
            .map_err(|e| self.fail(Verb::Rmdir, e))
    }

    fn read(&self, path: &str, size: u32, offset: u64, fh: u64) -> Result<Bytes> {
        trace!("read: {} fh={} offset={} size={}", path, fh, offset, size);
        if is_sentinel(path) {
            return Ok(Bytes::from_static(READY_PAYLOAD));
        }

        let handle = self.handles.get(fh)?;
        if handle.mode != HandleMode::ReadOnly {
            return Err(FuseBridgeError::BadHandleMode(fh));
        }

        self.block_on(async {
            let mut stream = handle.stream.lock().await;
            if stream.tell() != offset {
                stream.seek(offset).await?;
            }
            stream.read(size as usize).await
        })
        .map_err(|e| self.fail(Verb::Read, e))
    }

    fn write(&self, path: &str, data: &[u8], offset: u64, fh: u64) -> Result<usize> {
        trace!("write: {} fh={} offset={} size={}", path, fh, offset, data.len());
        let caps = self.caps();
        require_writable(&caps)?;

        let handle = self.handles.get(fh)?;
        if handle.mode != HandleMode::WriteOnly {
            return Err(FuseBridgeError::BadHandleMode(fh));
        }

        self.block_on(async {
            let mut stream = handle.stream.lock().await;
            let position = stream.tell();
            if position != offset {
                if !caps.random_write {
                    return Err(FuseBridgeError::NotSupported(format!(
                        "non-sequential write to {} at {} (stream at {})",
                        path, offset, position
                    )));
                }
                stream.seek(offset).await?;
            }
            stream.write(data).await
        })
        .map_err(|e| self.fail(Verb::Write, e))
    }

    fn create(&self, path: &str, mode: u32, _flags: i32) -> Result<u64> {
        debug!("create: {} mode={:o}", path, mode);
        require_writable(&self.caps())?;
        self.block_on(async {
            self.backend.touch(&self.resolver.resolve(path)).await?;
            self.open_stream(path, OpenMode::Write).await
        })
        .map_err(|e| self.fail(Verb::Create, e))
    }

    fn open(&self, path: &str, flags: i32) -> Result<u64> {
        debug!("open: {} flags={:#x}", path, flags);
        let intent = OpenIntent::from_flags(flags);
        if is_sentinel(path) {
            if intent.is_write() {
                return Err(FuseBridgeError::PermissionDenied);
            }
            return Ok(STATELESS_HANDLE);
        }
        if intent.is_write() {
            require_writable(&self.caps())?;
        }

        self.block_on(async {
            let existing = match intent {
                OpenIntent::Overwrite => self.existing_size(path).await?,
                _ => None,
            };
            check_open_intent(path, intent, existing)?;
            self.open_stream(path, intent.mode()).await
        })
        .map_err(|e| self.fail(Verb::Open, e))
    }

    fn truncate(&self, path: &str, length: u64, fh: Option<u64>) -> Result<()> {
        debug!("truncate: {} length={} fh={:?}", path, length, fh);
        if is_sentinel(path) {
            return Err(FuseBridgeError::PermissionDenied);
        }
        check_truncate_length(path, length)?;
        require_writable(&self.caps())?;
        if let Some(fh) = fh.filter(|&fh| fh != STATELESS_HANDLE) {
            self.handles.get(fh)?;
        }
        self.block_on(self.backend.touch(&self.resolver.resolve(path)))
            .map_err(|e| self.fail(Verb::Truncate, e))
    }

    fn unlink(&self, path: &str) -> Result<()> {
        debug!("unlink: {}", path);
        require_writable(&self.caps())?;
        self.block_on(self.backend.rm(&self.resolver.resolve(path), false))
            .map_err(|e| self.fail(Verb::Unlink, e))
    }

    fn release(&self, path: &str, fh: u64) -> Result<()> {
        debug!("release: {} fh={}", path, fh);
        let Some(handle) = self.handles.take(fh) else {
            trace!("release: fh={} not live, ignoring", fh);
            return Ok(());
        };
        self.block_on(async { handle.stream.lock().await.close().await })
            .map_err(|e| self.fail(Verb::Release, e))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        debug!("chmod: {} mode={:o}", path, mode);
        if is_sentinel(path) {
            return Err(FuseBridgeError::PermissionDenied);
        }
        if !self.caps().set_mode {
            return Err(FuseBridgeError::NotSupported(format!("chmod on {}", path)));
        }
        self.block_on(self.backend.chmod(&self.resolver.resolve(path), mode & 0o7777))
            .map_err(|e| self.fail(Verb::Chmod, e))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        debug!("rename: {} -> {}", from, to);
        require_writable(&self.caps())?;
        let (from_path, to_path) = (self.resolver.resolve(from), self.resolver.resolve(to));
        self.block_on(self.backend.rename(&from_path, &to_path))
            .map_err(|e| self.fail(Verb::Rename, e))
    }

    fn flush(&self, path: &str, fh: u64) -> Result<()> {
        trace!("flush: {} fh={}", path, fh);
        match self.handles.get(fh) {
            Ok(handle) if handle.mode == HandleMode::WriteOnly => self
                .block_on(async { handle.stream.lock().await.flush().await })
                .map_err(|e| self.fail(Verb::Flush, e)),
            _ => Ok(()),
        }
    }
}
