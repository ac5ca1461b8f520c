//! In-memory backend
//!
//! Keeps a tree of files and directories in a `BTreeMap` keyed by absolute
//! path. Write streams buffer locally and commit on flush/close, the way an
//! object store publishes an upload. Implements both the blocking and the
//! cooperative backend traits so either dispatcher can drive it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use crate::backend::{
    AsyncBackend, AsyncBackendFile, Attributes, Backend, BackendFile, Capabilities, DirEntry,
    OpenMode, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE,
};
use crate::error::{FuseBridgeError, Result};

#[derive(Debug, Clone)]
enum Node {
    File {
        data: Bytes,
        mode: u32,
        mtime: SystemTime,
    },
    Directory {
        mode: u32,
        mtime: SystemTime,
    },
}

impl Node {
    fn attributes(&self) -> Attributes {
        match self {
            Node::File { data, mode, mtime } => {
                Attributes::file(data.len() as u64, *mtime).with_mode(*mode)
            }
            Node::Directory { mode, mtime } => Attributes::directory(*mtime).with_mode(*mode),
        }
    }
}

type Tree = Arc<RwLock<BTreeMap<String, Node>>>;

/// In-memory backend. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryBackend {
    tree: Tree,
    read_only: bool,
    offline: Arc<AtomicBool>,
}

impl MemoryBackend {
    /// Create an empty, writable backend containing only `/`
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                mode: DEFAULT_DIR_MODE,
                mtime: SystemTime::now(),
            },
        );
        Self {
            tree: Arc::new(RwLock::new(nodes)),
            read_only: false,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Turn this backend into a read-only one sharing the same tree
    pub fn into_read_only(self) -> Self {
        Self {
            read_only: true,
            ..self
        }
    }

    /// Insert a file, creating missing parent directories
    pub fn insert_file(&self, path: &str, content: impl Into<Bytes>) {
        let path = normalize(path);
        let mut tree = self.tree.write();
        ensure_parents(&mut tree, &path);
        tree.insert(
            path,
            Node::File {
                data: content.into(),
                mode: DEFAULT_FILE_MODE,
                mtime: SystemTime::now(),
            },
        );
    }

    /// Insert a directory, creating missing parent directories
    pub fn insert_dir(&self, path: &str) {
        let path = normalize(path);
        let mut tree = self.tree.write();
        ensure_parents(&mut tree, &path);
        tree.entry(path).or_insert(Node::Directory {
            mode: DEFAULT_DIR_MODE,
            mtime: SystemTime::now(),
        });
    }

    /// Current content of a file, if present
    pub fn contents(&self, path: &str) -> Option<Bytes> {
        match self.tree.read().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Simulate an unreachable backend: every call fails with a backend error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FuseBridgeError::Backend("memory backend offline".to_string()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_online()?;
        if self.read_only {
            return Err(FuseBridgeError::NotSupported("read-only backend".to_string()));
        }
        Ok(())
    }

    fn open_stream(&self, path: &str, mode: OpenMode) -> Result<MemoryStream> {
        let path = normalize(path);
        trace!("memory open: {} {:?}", path, mode);
        match mode {
            OpenMode::Read => {
                self.check_online()?;
                match self.tree.read().get(&path) {
                    Some(Node::File { data, .. }) => Ok(MemoryStream::Reader {
                        data: data.clone(),
                        pos: 0,
                    }),
                    Some(Node::Directory { .. }) => Err(FuseBridgeError::IsADirectory(path)),
                    None => Err(FuseBridgeError::NotFound(path)),
                }
            }
            OpenMode::Write => {
                self.check_writable()?;
                let tree = self.tree.read();
                check_parent_dir(&tree, &path)?;
                if let Some(Node::Directory { .. }) = tree.get(&path) {
                    return Err(FuseBridgeError::IsADirectory(path));
                }
                drop(tree);
                Ok(MemoryStream::Writer {
                    tree: self.tree.clone(),
                    path,
                    buffer: Vec::new(),
                    pos: 0,
                })
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize to a leading slash and no trailing slash ("/" for the root)
fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

fn ensure_parents(tree: &mut BTreeMap<String, Node>, path: &str) {
    let mut current = parent_of(path).to_string();
    let mut missing = Vec::new();
    while !tree.contains_key(&current) {
        missing.push(current.clone());
        current = parent_of(&current).to_string();
    }
    for dir in missing {
        tree.insert(
            dir,
            Node::Directory {
                mode: DEFAULT_DIR_MODE,
                mtime: SystemTime::now(),
            },
        );
    }
}

fn check_parent_dir(tree: &BTreeMap<String, Node>, path: &str) -> Result<()> {
    let parent = parent_of(path);
    match tree.get(parent) {
        Some(Node::Directory { .. }) => Ok(()),
        Some(Node::File { .. }) => Err(FuseBridgeError::NotADirectory(parent.to_string())),
        None => Err(FuseBridgeError::NotFound(parent.to_string())),
    }
}

/// Keys of the direct children of `dir`, in tree order
fn children<'a>(tree: &'a BTreeMap<String, Node>, dir: &str) -> Vec<&'a String> {
    let prefix = if dir == "/" {
        "/".to_string()
    } else {
        format!("{}/", dir)
    };
    tree.range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
        .map(|(k, _)| k)
        .collect()
}

/// Keys of `dir` and everything below it
fn subtree(tree: &BTreeMap<String, Node>, dir: &str) -> Vec<String> {
    let prefix = format!("{}/", dir);
    tree.keys()
        .filter(|k| k.as_str() == dir || k.starts_with(&prefix))
        .cloned()
        .collect()
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::read_only()
        } else {
            Capabilities {
                write: true,
                random_write: false,
                rename: true,
                set_mode: true,
            }
        }
    }

    fn info(&self, path: &str) -> Result<Attributes> {
        self.check_online()?;
        let path = normalize(path);
        self.tree
            .read()
            .get(&path)
            .map(Node::attributes)
            .ok_or(FuseBridgeError::NotFound(path))
    }

    fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>> {
        self.check_online()?;
        let path = normalize(path);
        let tree = self.tree.read();
        match tree.get(&path) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(FuseBridgeError::NotADirectory(path)),
            None => return Err(FuseBridgeError::NotFound(path)),
        }

        Ok(children(&tree, &path)
            .into_iter()
            .map(|key| match (detail, tree.get(key)) {
                (true, Some(node)) => DirEntry::detailed(key.clone(), node.attributes()),
                _ => DirEntry::new(key.clone()),
            })
            .collect())
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn BackendFile>> {
        Ok(Box::new(self.open_stream(path, mode)?))
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        let mut tree = self.tree.write();
        check_parent_dir(&tree, &path)?;
        if tree.contains_key(&path) {
            return Err(FuseBridgeError::AlreadyExists(path));
        }
        tree.insert(
            path,
            Node::Directory {
                mode: DEFAULT_DIR_MODE,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        let mut tree = self.tree.write();
        match tree.get(&path) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(FuseBridgeError::NotADirectory(path)),
            None => return Err(FuseBridgeError::NotFound(path)),
        }
        if path == "/" {
            return Err(FuseBridgeError::PermissionDenied);
        }
        if !children(&tree, &path).is_empty() {
            return Err(FuseBridgeError::NotEmpty(path));
        }
        tree.remove(&path);
        Ok(())
    }

    fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        let mut tree = self.tree.write();
        let is_dir = match tree.get(&path) {
            Some(node) => matches!(node, Node::Directory { .. }),
            None => return Err(FuseBridgeError::NotFound(path)),
        };
        if !is_dir {
            tree.remove(&path);
            return Ok(());
        }
        if !recursive || path == "/" {
            return Err(FuseBridgeError::IsADirectory(path));
        }
        for key in subtree(&tree, &path) {
            tree.remove(&key);
        }
        Ok(())
    }

    fn touch(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        let mut tree = self.tree.write();
        check_parent_dir(&tree, &path)?;
        let mode = match tree.get(&path) {
            Some(Node::Directory { .. }) => return Err(FuseBridgeError::IsADirectory(path)),
            Some(Node::File { mode, .. }) => *mode,
            None => DEFAULT_FILE_MODE,
        };
        tree.insert(
            path,
            Node::File {
                data: Bytes::new(),
                mode,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn chmod(&self, path: &str, new_mode: u32) -> Result<()> {
        self.check_writable()?;
        let path = normalize(path);
        let mut tree = self.tree.write();
        match tree.get_mut(&path) {
            Some(Node::File { mode, .. }) | Some(Node::Directory { mode, .. }) => {
                *mode = new_mode & 0o7777;
                Ok(())
            }
            None => Err(FuseBridgeError::NotFound(path)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_writable()?;
        let from = normalize(from);
        let to = normalize(to);
        let mut tree = self.tree.write();
        if !tree.contains_key(&from) {
            return Err(FuseBridgeError::NotFound(from));
        }
        check_parent_dir(&tree, &to)?;
        if let Some(Node::Directory { .. }) = tree.get(&to) {
            if !children(&tree, &to).is_empty() {
                return Err(FuseBridgeError::NotEmpty(to));
            }
        }
        for key in subtree(&tree, &from) {
            if let Some(node) = tree.remove(&key) {
                let moved = format!("{}{}", to, &key[from.len()..]);
                tree.insert(moved, node);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AsyncBackend for MemoryBackend {
    fn name(&self) -> &str {
        Backend::name(self)
    }

    fn capabilities(&self) -> Capabilities {
        Backend::capabilities(self)
    }

    async fn info(&self, path: &str) -> Result<Attributes> {
        Backend::info(self, path)
    }

    async fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>> {
        Backend::ls(self, path, detail)
    }

    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn AsyncBackendFile>> {
        Ok(Box::new(self.open_stream(path, mode)?))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        Backend::mkdir(self, path)
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        Backend::rmdir(self, path)
    }

    async fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        Backend::rm(self, path, recursive)
    }

    async fn touch(&self, path: &str) -> Result<()> {
        Backend::touch(self, path)
    }

    async fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        Backend::chmod(self, path, mode)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        Backend::rename(self, from, to)
    }
}

/// Stream over a memory file
enum MemoryStream {
    Reader {
        data: Bytes,
        pos: u64,
    },
    Writer {
        tree: Tree,
        path: String,
        buffer: Vec<u8>,
        pos: u64,
    },
}

impl BackendFile for MemoryStream {
    fn read(&mut self, size: usize) -> Result<Bytes> {
        match self {
            MemoryStream::Reader { data, pos } => {
                let start = (*pos as usize).min(data.len());
                let end = start.saturating_add(size).min(data.len());
                *pos = end as u64;
                Ok(data.slice(start..end))
            }
            MemoryStream::Writer { .. } => Err(FuseBridgeError::NotSupported(
                "read on write stream".to_string(),
            )),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            MemoryStream::Writer { buffer, pos, .. } => {
                let start = *pos as usize;
                let end = start + data.len();
                if buffer.len() < end {
                    buffer.resize(end, 0);
                }
                buffer[start..end].copy_from_slice(data);
                *pos = end as u64;
                Ok(data.len())
            }
            MemoryStream::Reader { .. } => Err(FuseBridgeError::NotSupported(
                "write on read stream".to_string(),
            )),
        }
    }

    fn seek(&mut self, offset: u64) -> Result<u64> {
        match self {
            MemoryStream::Reader { pos, .. } => *pos = offset,
            MemoryStream::Writer { buffer, pos, .. } => {
                if offset > buffer.len() as u64 {
                    return Err(FuseBridgeError::InvalidArgument(format!(
                        "seek past end of write buffer: {}",
                        offset
                    )));
                }
                *pos = offset;
            }
        }
        Ok(offset)
    }

    fn tell(&self) -> u64 {
        match self {
            MemoryStream::Reader { pos, .. } | MemoryStream::Writer { pos, .. } => *pos,
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let MemoryStream::Writer {
            tree, path, buffer, ..
        } = self
        {
            let mut tree = tree.write();
            let mode = match tree.get(path.as_str()) {
                Some(Node::File { mode, .. }) => *mode,
                _ => DEFAULT_FILE_MODE,
            };
            tree.insert(
                path.clone(),
                Node::File {
                    data: Bytes::copy_from_slice(buffer),
                    mode,
                    mtime: SystemTime::now(),
                },
            );
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        BackendFile::flush(self)
    }
}

#[async_trait]
impl AsyncBackendFile for MemoryStream {
    async fn read(&mut self, size: usize) -> Result<Bytes> {
        BackendFile::read(self, size)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        BackendFile::write(self, data)
    }

    async fn seek(&mut self, offset: u64) -> Result<u64> {
        BackendFile::seek(self, offset)
    }

    fn tell(&self) -> u64 {
        BackendFile::tell(self)
    }

    async fn flush(&mut self) -> Result<()> {
        BackendFile::flush(self)
    }

    async fn close(&mut self) -> Result<()> {
        BackendFile::close(self)
    }
}
