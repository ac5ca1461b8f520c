//! Dispatcher over a cooperative (async) backend
//!
//! Owns a tokio runtime and drives each backend future to completion on the
//! calling kernel thread. The runtime is multi-threaded, so concurrent
//! requests from a multithreaded bridge each block only their own thread.

use std::future::Future;

use tokio::runtime::{Builder, Runtime};

use crate::backend::AsyncBackend;
use crate::dispatch::{Dispatcher, Executor};
use crate::error::{FuseBridgeError, Result};

/// Operation dispatcher for an [`AsyncBackend`]
pub type AsyncDispatcher<B> = Dispatcher<B, Runtime>;

/// Runtime used by an [`AsyncDispatcher`] that was not handed one
pub fn build_runtime() -> Result<Runtime> {
    Builder::new_multi_thread()
        .thread_name("fuse-bridge-io")
        .enable_all()
        .build()
        .map_err(FuseBridgeError::Io)
}

impl Executor for Runtime {
    /// Panics when called from inside a runtime worker
    fn block_on<F: Future>(&self, future: F) -> F::Output {
        Runtime::block_on(self, future)
    }
}

impl<B: AsyncBackend> Dispatcher<B, Runtime> {
    /// Bind `backend` at `root` on a fresh runtime
    pub fn new(backend: B, root: &str) -> Result<Self> {
        Ok(Self::with_runtime(backend, root, build_runtime()?))
    }

    /// Bind `backend` at `root`, driving it on `runtime`.
    ///
    /// Use this when the backend itself was built on that runtime (an S3
    /// client, for instance).
    pub fn with_runtime(backend: B, root: &str, runtime: Runtime) -> Self {
        Self::with_executor(backend, root, runtime)
    }
}
