//! fuse-bridge: expose pluggable storage backends as FUSE mounts
//!
//! # Architecture
//!
//! - **Backends**: path-based storage (local disk, memory, S3) implementing
//!   either the blocking [`backend::Backend`] or the
//!   [`backend::AsyncBackend`] trait.
//! - **Dispatcher**: maps kernel verbs onto backend calls, tracking open
//!   streams in a handle table and normalizing errors to POSIX codes.
//! - **Kernel bridge**: the `fuser::Filesystem` implementation. Turns inode
//!   requests into path calls and contains panics and errors per request.
//! - **Mount supervisor**: runs each session inline, on a thread, or in a
//!   forked process, and records mounts in a registry.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fuse_bridge::backend::memory::MemoryBackend;
//! use fuse_bridge::dispatch::{Operations, SyncDispatcher};
//! use fuse_bridge::mount::{MountOptions, MountRequest, MountSupervisor};
//!
//! # fn example() -> fuse_bridge::Result<()> {
//! let supervisor = MountSupervisor::default();
//! let request = MountRequest {
//!     backend_name: "memory".to_string(),
//!     source: "/".to_string(),
//!     mount_path: "/mnt/scratch".into(),
//!     read_only: false,
//!     uid: None,
//!     gid: None,
//!     options: MountOptions::default(),
//! };
//! supervisor.mount(request, || {
//!     Ok(Arc::new(SyncDispatcher::new(MemoryBackend::new(), "/")) as Arc<dyn Operations>)
//! })?;
//! // ...
//! supervisor.unmount_all();
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod fuse;
pub mod mount;

pub use error::{FuseBridgeError, Result};
