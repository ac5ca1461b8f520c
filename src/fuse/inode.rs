//! Inode <-> path mapping
//!
//! The kernel addresses entries by inode while dispatchers work on paths
//! relative to the mount root. Inodes are handed out on first sight of a
//! path (lookup, readdir, create) and follow the path across renames.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Root directory inode (always 1 in FUSE)
pub const ROOT_INODE: u64 = 1;

/// Bidirectional inode <-> path table
pub struct InodeTable {
    inode_to_path: DashMap<u64, String>,
    path_to_inode: DashMap<String, u64>,
    next_inode: AtomicU64,
}

impl InodeTable {
    /// Create a table with the root pre-registered
    pub fn new() -> Self {
        let table = Self {
            inode_to_path: DashMap::new(),
            path_to_inode: DashMap::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        };
        table.inode_to_path.insert(ROOT_INODE, "/".to_string());
        table.path_to_inode.insert("/".to_string(), ROOT_INODE);
        table
    }

    /// Inode for a path, allocating one on first sight
    pub fn get_or_create_inode(&self, path: &str) -> u64 {
        let normalized = normalize_path(path);
        if let Some(inode) = self.path_to_inode.get(&normalized) {
            return *inode;
        }

        match self.path_to_inode.entry(normalized.clone()) {
            Entry::Occupied(existing) => *existing.get(),
            Entry::Vacant(slot) => {
                let inode = self.next_inode.fetch_add(1, Ordering::SeqCst);
                self.inode_to_path.insert(inode, normalized);
                slot.insert(inode);
                inode
            }
        }
    }

    pub fn get_path(&self, inode: u64) -> Option<String> {
        self.inode_to_path.get(&inode).map(|p| p.clone())
    }

    /// Inode for a path without allocating
    pub fn get_inode(&self, path: &str) -> Option<u64> {
        self.path_to_inode.get(&normalize_path(path)).map(|i| *i)
    }

    /// Inode of the directory containing `path` (root for top-level entries)
    pub fn parent_inode(&self, path: &str) -> u64 {
        self.get_inode(parent_path(&normalize_path(path)))
            .unwrap_or(ROOT_INODE)
    }

    /// Forget a path and everything below it
    pub fn remove_path(&self, path: &str) {
        for (old, inode) in self.subtree(&normalize_path(path)) {
            self.path_to_inode.remove(&old);
            self.inode_to_path.remove(&inode);
        }
    }

    /// Move a path and everything below it, keeping inode numbers
    pub fn rename_path(&self, old: &str, new: &str) {
        let old = normalize_path(old);
        let new = normalize_path(new);

        // Whatever the destination used to be is gone
        self.remove_path(&new);

        for (path, inode) in self.subtree(&old) {
            let moved = format!("{}{}", new, &path[old.len()..]);
            self.path_to_inode.remove(&path);
            self.inode_to_path.insert(inode, moved.clone());
            self.path_to_inode.insert(moved, inode);
        }
    }

    /// Number of tracked inodes, root included
    pub fn len(&self) -> usize {
        self.inode_to_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode_to_path.is_empty()
    }

    fn subtree(&self, path: &str) -> Vec<(String, u64)> {
        if path == "/" {
            return Vec::new();
        }
        let prefix = format!("{}/", path);
        self.path_to_inode
            .iter()
            .filter(|e| e.key() == path || e.key().starts_with(&prefix))
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a directory path and an entry name
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

fn parent_path(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// Leading slash, no trailing slash
fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}
