//! File handle table
//!
//! Maps the integer file handles given to the kernel onto open backend
//! streams. Ids come from a monotonic counter and are never reused, so a
//! late `release` for an old id can never hit a newer stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{FuseBridgeError, Result};

/// Id handed out for handles that are not backed by a table entry
/// (directories, the readiness sentinel).
pub const STATELESS_HANDLE: u64 = 0;

/// Direction a handle was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    ReadOnly,
    WriteOnly,
}

/// Live table entry. `F` is the lock-wrapped stream type of the dispatcher.
pub struct OpenHandle<F> {
    pub id: u64,
    pub path: String,
    pub mode: HandleMode,
    pub stream: Arc<F>,
}

impl<F> Clone for OpenHandle<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            path: self.path.clone(),
            mode: self.mode,
            stream: self.stream.clone(),
        }
    }
}

/// Table of open handles for one mount
pub struct HandleTable<F> {
    entries: DashMap<u64, OpenHandle<F>>,
    next_id: AtomicU64,
}

impl<F> HandleTable<F> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(STATELESS_HANDLE + 1),
        }
    }

    /// Store a stream and return its new id
    pub fn allocate(&self, path: &str, mode: HandleMode, stream: F) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(
            id,
            OpenHandle {
                id,
                path: path.to_string(),
                mode,
                stream: Arc::new(stream),
            },
        );
        id
    }

    /// Look up a live handle
    pub fn get(&self, id: u64) -> Result<OpenHandle<F>> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(FuseBridgeError::InvalidHandle(id))
    }

    /// Remove a handle, returning it for closing. Only the first caller for a
    /// given id gets `Some`; later calls are no-ops.
    pub fn take(&self, id: u64) -> Option<OpenHandle<F>> {
        self.entries.remove(&id).map(|(_, handle)| handle)
    }

    /// Remove every live handle
    pub fn drain(&self) -> Vec<OpenHandle<F>> {
        let ids: Vec<u64> = self.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.take(id)).collect()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F> Default for HandleTable<F> {
    fn default() -> Self {
        Self::new()
    }
}
