//! Dispatcher over a blocking backend
//!
//! [`Blocking`] presents a [`Backend`] through the cooperative interface; its
//! futures never suspend on I/O, so [`Inline`] polls them on the calling
//! thread without any runtime. With the bridge in single-threaded mode that
//! serializes all requests; in multithreaded mode each request runs on its
//! own worker and only the handle table is shared.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::{
    AsyncBackend, AsyncBackendFile, Attributes, Backend, BackendFile, Capabilities, DirEntry,
    OpenMode,
};
use crate::dispatch::{Dispatcher, Executor};
use crate::error::Result;

/// Operation dispatcher for a [`Backend`]
pub type SyncDispatcher<B> = Dispatcher<Blocking<B>, Inline>;

impl<B: Backend> Dispatcher<Blocking<B>, Inline> {
    /// Bind `backend` at `root`, the backend path shown as the mount root
    pub fn new(backend: B, root: &str) -> Self {
        Self::with_executor(Blocking(backend), root, Inline)
    }
}

/// Polls futures on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        futures::executor::block_on(future)
    }
}

/// A blocking backend seen through [`AsyncBackend`]
pub struct Blocking<B>(pub B);

impl<B> Blocking<B> {
    pub fn inner(&self) -> &B {
        &self.0
    }
}

#[async_trait]
impl<B: Backend> AsyncBackend for Blocking<B> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn capabilities(&self) -> Capabilities {
        self.0.capabilities()
    }

    async fn info(&self, path: &str) -> Result<Attributes> {
        self.0.info(path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.0.exists(path)
    }

    async fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>> {
        self.0.ls(path, detail)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn AsyncBackendFile>> {
        Ok(Box::new(BlockingFile(self.0.open(path, mode)?)))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.0.mkdir(path)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        self.0.rmdir(path)
    }

    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.0.rm(path, recursive)
    }

    async fn touch(&self, path: &str) -> Result<()> {
        self.0.touch(path)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.0.chmod(path, mode)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.0.rename(from, to)
    }
}

struct BlockingFile(Box<dyn BackendFile>);

#[async_trait]
impl AsyncBackendFile for BlockingFile {
    async fn read(&mut self, size: usize) -> Result<Bytes> {
        self.0.read(size)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.0.write(data)
    }

    async fn seek(&mut self, offset: u64) -> Result<u64> {
        self.0.seek(offset)
    }

    fn tell(&self) -> u64 {
        self.0.tell()
    }

    async fn flush(&mut self) -> Result<()> {
        self.0.flush()
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}
