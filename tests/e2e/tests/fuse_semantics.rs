//! FUSE semantics tests
//!
//! Kernel-visible behavior of a mounted bridge:
//! - open/read/write/close through file handles
//! - the readiness sentinel
//! - directory listing and inode stability
//! - POSIX error codes for unsupported or invalid requests

#[macro_use]
mod common;

use anyhow::Result;
use common::*;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;

// =============================================================================
// File Handle Behavior Tests
// =============================================================================

/// Written content is visible through the mount and on the backing store
#[tokio::test]
async fn test_write_read_round_trip() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let mount = harness.mount();

    let name = random_filename("round-trip");
    create_file_str(&mount.join(&name), "hello through fuse")?;

    assert_file_content_str(&mount.join(&name), "hello through fuse");
    assert_file_content_str(&harness.backing().join(&name), "hello through fuse");

    harness.cleanup().await
}

/// Several read handles on one file see the same bytes
#[tokio::test]
async fn test_multiple_opens_same_file() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("shared.txt");
    create_file_str(&path, "shared content")?;

    let mut handles = vec![File::open(&path)?, File::open(&path)?, File::open(&path)?];
    for handle in handles.iter_mut() {
        let mut content = String::new();
        handle.read_to_string(&mut content)?;
        assert_eq!(content, "shared content");
    }
    drop(handles);

    harness.cleanup().await
}

/// Seeking a read handle reads from the requested offset
#[tokio::test]
async fn test_partial_reads_at_offsets() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("offsets.bin");
    let data = random_bytes(64 * 1024);
    create_file(&path, &data)?;

    let mut file = File::open(&path)?;
    file.seek(SeekFrom::Start(40_000))?;
    let mut buf = vec![0u8; 1000];
    file.read_exact(&mut buf)?;
    assert_eq!(&buf[..], &data[40_000..41_000]);

    file.seek(SeekFrom::Start(10))?;
    file.read_exact(&mut buf[..10])?;
    assert_eq!(&buf[..10], &data[10..20]);

    harness.cleanup().await
}

/// Large sequential writes arrive intact
#[tokio::test]
async fn test_large_sequential_write() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("large.bin");
    let data = random_bytes(3 * 1024 * 1024 + 17);

    let mut file = File::create(&path)?;
    for chunk in data.chunks(100_000) {
        file.write_all(chunk)?;
    }
    file.sync_all()?;
    drop(file);

    assert_file_content(&harness.backing().join("large.bin"), &data);
    harness.cleanup().await
}

/// Reading a handle opened write-only fails with EBADF
#[tokio::test]
async fn test_read_on_write_handle() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("wo.txt");

    let mut file = OpenOptions::new().write(true).create(true).open(&path)?;
    file.write_all(b"abc")?;
    let mut buf = [0u8; 3];
    assert_errno(file.read(&mut buf), libc::EBADF);

    harness.cleanup().await
}

/// Opening a missing file fails with ENOENT
#[tokio::test]
async fn test_open_nonexistent() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    assert_errno(File::open(harness.mount().join("missing")), libc::ENOENT);
    harness.cleanup().await
}

/// Truncating to zero empties the file; other lengths are not implemented
#[tokio::test]
async fn test_truncate() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("trunc.txt");
    create_file_str(&path, "some content")?;

    let handle = OpenOptions::new().write(true).truncate(true).open(&path)?;
    assert_eq!(fs::metadata(&path)?.len(), 0);

    assert_errno(handle.set_len(5), libc::ENOSYS);
    handle.set_len(0)?;

    harness.cleanup().await
}

/// Writable opens that would discard or zero-fill existing data are refused
#[tokio::test]
async fn test_open_without_truncate_keeps_data() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("log.txt");
    create_file_str(&path, "line1\n")?;

    assert_errno(OpenOptions::new().read(true).write(true).open(&path), libc::ENOTSUP);
    assert_errno(OpenOptions::new().append(true).open(&path), libc::ENOTSUP);
    assert_file_content_str(&harness.backing().join("log.txt"), "line1\n");

    let mut file = File::create(&path)?;
    file.write_all(b"rewritten")?;
    drop(file);
    assert_file_content_str(&harness.backing().join("log.txt"), "rewritten");

    harness.cleanup().await
}

/// fsync and close flush buffered writes to the backend
#[tokio::test]
async fn test_fsync_and_flush_on_close() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("sync.txt");

    let mut file = File::create(&path)?;
    file.write_all(b"synced")?;
    file.sync_all()?;
    file.sync_data()?;
    assert_file_content_str(&harness.backing().join("sync.txt"), "synced");
    drop(file);

    harness.cleanup().await
}

/// Non-sequential writes are rejected by backends without random writes
#[tokio::test]
async fn test_seek_write_on_memory_backend() -> Result<()> {
    let harness = require_harness!(TestHarness::memory());
    let path = harness.mount().join("seq.txt");

    let mut file = File::create(&path)?;
    file.write_all(b"0123456789")?;
    file.seek(SeekFrom::Start(2))?;
    assert_errno(file.write_all(b"xx"), libc::ENOTSUP);

    harness.cleanup().await
}

// =============================================================================
// Readiness Sentinel Tests
// =============================================================================

/// The sentinel answers at the root but is not listed
#[tokio::test]
async fn test_ready_sentinel() -> Result<()> {
    let harness = require_harness!(TestHarness::memory());
    let mount = harness.mount();

    assert_file_content_str(&mount.join(READY_FILE), "ready");
    let names: Vec<String> = fs::read_dir(mount)?
        .filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().to_string()))
        .collect();
    assert!(!names.iter().any(|n| n == READY_FILE));

    // Writes to the sentinel never reach the backend
    assert_errno(
        OpenOptions::new().write(true).truncate(true).open(mount.join(READY_FILE)),
        libc::EACCES,
    );
    assert_file_content_str(&mount.join(READY_FILE), "ready");

    // Only the root has one
    fs::create_dir(mount.join("sub"))?;
    assert!(!mount.join("sub").join(READY_FILE).exists());

    harness.cleanup().await
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

/// Concurrent readers on a multithreaded mount
#[tokio::test]
async fn test_concurrent_reads_multithreaded() -> Result<()> {
    let harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .local_mount(dir.join("mnt"), dir.join("backing"))
            .with_last(|m| {
                m.options.multithreaded = Some(true);
                m.options.workers = Some(4);
            })
    }));
    let path = harness.mount().join("concurrent.bin");
    let data = Arc::new(random_bytes(256 * 1024));
    create_file(&path, &data)?;

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            let data = data.clone();
            std::thread::spawn(move || {
                let content = fs::read(&path).expect("read through mount");
                assert_eq!(content, *data);
            })
        })
        .collect();
    for reader in readers {
        reader.join().expect("reader thread");
    }

    harness.cleanup().await
}

/// Concurrent writers to distinct files
#[tokio::test]
async fn test_concurrent_writes_different_files() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let mount = harness.mount().to_path_buf();

    let writers: Vec<_> = (0..6)
        .map(|i| {
            let path = mount.join(format!("writer-{}.txt", i));
            std::thread::spawn(move || {
                fs::write(&path, format!("writer {}", i)).expect("write through mount");
            })
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    for i in 0..6 {
        assert_file_content_str(
            &harness.backing().join(format!("writer-{}.txt", i)),
            &format!("writer {}", i),
        );
    }
    harness.cleanup().await
}

// =============================================================================
// Directory Tests
// =============================================================================

/// readdir lists every entry exactly once
#[tokio::test]
async fn test_readdir_completeness() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let dir = harness.mount().join("listing");
    fs::create_dir(&dir)?;

    let names: Vec<String> = (0..50).map(|i| format!("entry-{:02}", i)).collect();
    for name in &names {
        create_file_str(&dir.join(name), name)?;
    }

    let expected: Vec<&str> = names.iter().map(String::as_str).collect();
    assert_dir_contains_exactly(&dir, &expected);
    harness.cleanup().await
}

/// mkdir, rename and rmdir through the mount
#[tokio::test]
async fn test_directory_lifecycle() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let mount = harness.mount();

    fs::create_dir(mount.join("a"))?;
    create_file_str(&mount.join("a/f.txt"), "inside")?;
    assert_errno(fs::remove_dir(mount.join("a")), libc::ENOTEMPTY);

    fs::rename(mount.join("a"), mount.join("b"))?;
    assert_not_exists(&mount.join("a"));
    assert_file_content_str(&mount.join("b/f.txt"), "inside");

    fs::remove_file(mount.join("b/f.txt"))?;
    fs::remove_dir(mount.join("b"))?;
    assert_not_exists(&harness.backing().join("b"));

    harness.cleanup().await
}

/// A path keeps its inode while it exists
#[tokio::test]
async fn test_inode_stability() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let mount = harness.mount();
    create_file_str(&mount.join("one"), "1")?;
    create_file_str(&mount.join("two"), "2")?;

    let first = fs::metadata(mount.join("one"))?.ino();
    assert_eq!(fs::metadata(mount.join("one"))?.ino(), first);
    assert_ne!(fs::metadata(mount.join("two"))?.ino(), first);

    harness.cleanup().await
}

/// chmod reaches the backend when it supports modes
#[tokio::test]
async fn test_chmod() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("mode.sh");
    create_file_str(&path, "#!/bin/sh")?;

    fs::set_permissions(&path, fs::Permissions::from_mode(0o750))?;
    assert_file_mode(&harness.backing().join("mode.sh"), 0o750);

    harness.cleanup().await
}

// =============================================================================
// Error Mapping Tests
// =============================================================================

/// Mutations on a read-only mount fail with EROFS
#[tokio::test]
async fn test_read_only_mount() -> Result<()> {
    let harness = require_harness!(TestHarness::with_config(|builder, dir| {
        std::fs::create_dir_all(dir.join("backing")).expect("backing dir");
        std::fs::write(dir.join("backing/existing.txt"), "kept").expect("seed file");
        builder
            .local_mount(dir.join("mnt"), dir.join("backing"))
            .with_last(|m| m.read_only = Some(true))
    }));
    let mount = harness.mount();

    assert_file_content_str(&mount.join("existing.txt"), "kept");
    assert_errno(fs::write(mount.join("new.txt"), "x"), libc::EROFS);
    assert_errno(fs::create_dir(mount.join("dir")), libc::EROFS);
    assert_errno(fs::remove_file(mount.join("existing.txt")), libc::EROFS);

    harness.cleanup().await
}

/// Extended attributes are not supported
#[tokio::test]
async fn test_xattr_not_supported() -> Result<()> {
    let harness = require_harness!(TestHarness::local());
    let path = harness.mount().join("x.txt");
    create_file_str(&path, "x")?;

    let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes())?;
    let name = std::ffi::CString::new("user.test")?;
    let mut buf = [0u8; 64];
    // Safety: both strings are NUL-terminated and buf outlives the call
    let rc = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    assert_eq!(rc, -1);
    assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::ENOTSUP));

    harness.cleanup().await
}
