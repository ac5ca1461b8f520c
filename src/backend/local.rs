//! Local disk backend
//!
//! Paths are absolute paths on the host filesystem. The mount's bound root
//! selects which directory is exposed.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tracing::trace;

use crate::backend::{Attributes, Backend, BackendFile, Capabilities, DirEntry, OpenMode};
use crate::error::{FuseBridgeError, Result};

/// Backend over the host filesystem
pub struct LocalBackend {
    read_only: bool,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self { read_only: false }
    }

    pub fn read_only() -> Self {
        Self { read_only: true }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(FuseBridgeError::NotSupported(
                "local backend mounted read-only".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_system_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        SystemTime::UNIX_EPOCH + Duration::new(secs as u64, nsecs.clamp(0, 999_999_999) as u32)
    } else {
        SystemTime::UNIX_EPOCH
    }
}

fn metadata_to_attributes(meta: &fs::Metadata) -> Attributes {
    let mtime = to_system_time(meta.mtime(), meta.mtime_nsec());
    let base = if meta.is_dir() {
        Attributes::directory(mtime)
    } else {
        Attributes::file(meta.len(), mtime)
    };
    Attributes {
        mode: Some(meta.mode() & 0o7777),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        atime: to_system_time(meta.atime(), meta.atime_nsec()),
        ctime: to_system_time(meta.ctime(), meta.ctime_nsec()),
        nlink: Some(meta.nlink() as u32),
        ..base
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        if self.read_only {
            Capabilities::read_only()
        } else {
            Capabilities::full()
        }
    }

    fn info(&self, path: &str) -> Result<Attributes> {
        let meta = fs::metadata(path).map_err(|e| FuseBridgeError::from_io(e, path))?;
        Ok(metadata_to_attributes(&meta))
    }

    fn ls(&self, path: &str, detail: bool) -> Result<Vec<DirEntry>> {
        let read_dir = fs::read_dir(path).map_err(|e| FuseBridgeError::from_io(e, path))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| FuseBridgeError::from_io(e, path))?;
            let entry_path = entry.path().to_string_lossy().into_owned();
            if detail {
                let meta = entry
                    .metadata()
                    .map_err(|e| FuseBridgeError::from_io(e, &entry_path))?;
                entries.push(DirEntry::detailed(entry_path, metadata_to_attributes(&meta)));
            } else {
                entries.push(DirEntry::new(entry_path));
            }
        }
        Ok(entries)
    }

    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn BackendFile>> {
        trace!("local open: {} {:?}", path, mode);
        let file = match mode {
            OpenMode::Read => File::open(path),
            OpenMode::Write => {
                self.check_writable()?;
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
            }
        }
        .map_err(|e| FuseBridgeError::from_io(e, path))?;

        if file
            .metadata()
            .map_err(|e| FuseBridgeError::from_io(e, path))?
            .is_dir()
        {
            return Err(FuseBridgeError::IsADirectory(path.to_string()));
        }

        Ok(Box::new(LocalFile {
            file,
            path: path.to_string(),
            pos: 0,
        }))
    }

    fn mkdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        fs::create_dir(path).map_err(|e| FuseBridgeError::from_io(e, path))
    }

    fn rmdir(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        if !self.info(path)?.is_dir() {
            return Err(FuseBridgeError::NotADirectory(path.to_string()));
        }
        if fs::read_dir(path)
            .map_err(|e| FuseBridgeError::from_io(e, path))?
            .next()
            .is_some()
        {
            return Err(FuseBridgeError::NotEmpty(path.to_string()));
        }
        fs::remove_dir(path).map_err(|e| FuseBridgeError::from_io(e, path))
    }

    fn rm(&self, path: &str, recursive: bool) -> Result<()> {
        self.check_writable()?;
        if self.info(path)?.is_dir() {
            if !recursive {
                return Err(FuseBridgeError::IsADirectory(path.to_string()));
            }
            return fs::remove_dir_all(path).map_err(|e| FuseBridgeError::from_io(e, path));
        }
        fs::remove_file(path).map_err(|e| FuseBridgeError::from_io(e, path))
    }

    fn touch(&self, path: &str) -> Result<()> {
        self.check_writable()?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| FuseBridgeError::from_io(e, path))
    }

    fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        self.check_writable()?;
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
            .map_err(|e| FuseBridgeError::from_io(e, path))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.check_writable()?;
        fs::rename(from, to).map_err(|e| FuseBridgeError::from_io(e, from))
    }
}

/// Open file on local disk
struct LocalFile {
    file: File,
    path: String,
    pos: u64,
}

impl BackendFile for LocalFile {
    fn read(&mut self, size: usize) -> Result<Bytes> {
        let mut buffer = Vec::with_capacity(size);
        (&mut self.file)
            .take(size as u64)
            .read_to_end(&mut buffer)
            .map_err(|e| FuseBridgeError::from_io(e, &self.path))?;
        self.pos += buffer.len() as u64;
        Ok(Bytes::from(buffer))
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.file
            .write_all(data)
            .map_err(|e| FuseBridgeError::from_io(e, &self.path))?;
        self.pos += data.len() as u64;
        Ok(data.len())
    }

    fn seek(&mut self, offset: u64) -> Result<u64> {
        self.pos = self
            .file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| FuseBridgeError::from_io(e, &self.path))?;
        Ok(self.pos)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| FuseBridgeError::from_io(e, &self.path))
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.file
            .sync_all()
            .or_else(|e| match e.raw_os_error() {
                // Read-only descriptors on some filesystems refuse fsync
                Some(libc::EBADF) | Some(libc::EINVAL) => Ok(()),
                _ => Err(e),
            })
            .map_err(|e| FuseBridgeError::from_io(e, &self.path))
    }
}
