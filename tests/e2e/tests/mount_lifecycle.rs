//! Mount lifecycle tests
//!
//! Start-up, readiness, shutdown on signals, mount directory cleanup, and
//! the mount registry, for each way a session can be run.

#[macro_use]
mod common;

use anyhow::Result;
use common::*;
use nix::sys::signal::Signal;
use std::fs;
use std::time::Duration;
use test_case::test_case;

/// SIGTERM unmounts and keeps the mount directory by default
#[tokio::test]
async fn test_sigterm_unmounts() -> Result<()> {
    let mut harness = require_harness!(TestHarness::memory());
    let mount = harness.mount().to_path_buf();
    assert!(is_mounted(&mount));

    let status = harness.bridge().stop().await?;
    assert!(status.success(), "bridge exited with {:?}", status);
    assert!(!is_mounted(&mount));
    assert_dir_exists(&mount);

    Ok(())
}

/// cleanup_on_unmount decides whether the mount directory survives
#[test_case(true ; "removed")]
#[test_case(false ; "kept")]
#[tokio::test]
async fn test_cleanup_on_unmount(cleanup: bool) -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .memory_mount(dir.join("mnt"))
            .with_last(|m| m.options.cleanup_on_unmount = Some(cleanup))
    }));
    let mount = harness.mount().to_path_buf();
    fs::write(mount.join("scratch.txt"), "gone with the mount")?;

    harness.bridge().stop().await?;
    assert!(!is_mounted(&mount));
    assert_eq!(mount.exists(), !cleanup);

    Ok(())
}

/// Ctrl-C behaves like SIGTERM
#[tokio::test]
async fn test_sigint_unmounts() -> Result<()> {
    let mut harness = require_harness!(TestHarness::local());
    let mount = harness.mount().to_path_buf();

    let status = harness.bridge().stop_with(Signal::SIGINT).await?;
    assert!(status.success(), "bridge exited with {:?}", status);
    assert!(!is_mounted(&mount));

    Ok(())
}

/// A foreground mount blocks the process and ends on SIGINT
#[tokio::test]
async fn test_foreground_mount() -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .memory_mount(dir.join("mnt"))
            .with_last(|m| m.options.foreground = Some(true))
    }));
    let mount = harness.mount().to_path_buf();
    fs::write(mount.join("a.txt"), "foreground")?;
    assert_file_content_str(&mount.join("a.txt"), "foreground");

    let status = harness.bridge().stop_with(Signal::SIGINT).await?;
    assert!(status.success(), "bridge exited with {:?}", status);
    assert!(!is_mounted(&mount));

    Ok(())
}

/// A daemonized mount is served by a child process and torn down with
/// its parent
#[tokio::test]
async fn test_daemonized_mount() -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .local_mount(dir.join("mnt"), dir.join("backing"))
            .with_last(|m| m.options.daemonized = Some(true))
    }));
    let mount = harness.mount().to_path_buf();
    fs::write(mount.join("daemon.txt"), "served by a child")?;
    assert_file_content_str(&harness.backing().join("daemon.txt"), "served by a child");

    harness.bridge().stop().await?;
    assert_eventually(
        || if is_mounted(&mount) { Err("still mounted") } else { Ok(()) },
        Duration::from_secs(10),
    )
    .await?;

    Ok(())
}

/// A daemonized mount listed after a threaded one still comes up, and both
/// serve independently
#[tokio::test]
async fn test_daemonized_after_threaded_mount() -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .memory_mount(dir.join("mnt-threaded"))
            .with_last(|m| m.options.multithreaded = Some(true))
            .local_mount(dir.join("mnt-daemon"), dir.join("backing"))
            .with_last(|m| m.options.daemonized = Some(true))
    }));
    let threaded = harness.mount_path(0).map(|p| p.to_path_buf());
    let daemon = harness.mount_path(1).map(|p| p.to_path_buf());
    let (Some(threaded), Some(daemon)) = (threaded, daemon) else {
        anyhow::bail!("expected two mount points");
    };

    fs::write(threaded.join("t.txt"), "in memory")?;
    fs::write(daemon.join("d.txt"), "on disk")?;
    assert_file_content_str(&threaded.join("t.txt"), "in memory");
    assert_file_content_str(&harness.backing().join("d.txt"), "on disk");

    harness.bridge().stop().await?;
    assert!(!is_mounted(&threaded));
    assert_eventually(
        || if is_mounted(&daemon) { Err("still mounted") } else { Ok(()) },
        Duration::from_secs(10),
    )
    .await?;

    Ok(())
}

/// Several mounts from one config, each with its own backend
#[tokio::test]
async fn test_multiple_mounts() -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .local_mount(dir.join("mnt-local"), dir.join("backing"))
            .memory_mount(dir.join("mnt-memory"))
    }));
    let local = harness.mount_path(0).map(|p| p.to_path_buf());
    let memory = harness.mount_path(1).map(|p| p.to_path_buf());
    let (Some(local), Some(memory)) = (local, memory) else {
        anyhow::bail!("expected two mount points");
    };

    fs::write(local.join("x"), "local")?;
    fs::write(memory.join("x"), "memory")?;
    assert_file_content_str(&local.join("x"), "local");
    assert_file_content_str(&memory.join("x"), "memory");
    assert_file_content_str(&harness.backing().join("x"), "local");

    harness.bridge().stop().await?;
    assert!(!is_mounted(&local));
    assert!(!is_mounted(&memory));

    Ok(())
}

/// The registry file lists live mounts and is emptied on shutdown
#[tokio::test]
async fn test_registry_records_mounts() -> Result<()> {
    let mut harness = require_harness!(TestHarness::with_config(|builder, dir| {
        builder
            .registry(dir.join("state/mounts.yaml"))
            .memory_mount(dir.join("mnt"))
    }));
    let registry = harness.workdir().join("state/mounts.yaml");
    let pid = harness.bridge().pid();

    let records: Vec<serde_yaml::Value> = serde_yaml::from_str(&fs::read_to_string(&registry)?)?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["backend_name"].as_str(), Some("memory"));
    assert_eq!(records[0]["process_id"].as_u64(), Some(u64::from(pid)));

    harness.bridge().stop().await?;
    let records: Vec<serde_yaml::Value> = serde_yaml::from_str(&fs::read_to_string(&registry)?)?;
    assert!(records.is_empty());

    Ok(())
}

/// A config referencing an unset variable is rejected before mounting
#[tokio::test]
async fn test_missing_env_var_fails_startup() -> Result<()> {
    if !fuse_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("config.yaml");
    fs::write(
        &config_path,
        format!(
            "mounts:\n  - path: {}\n    backend:\n      type: local\n      root: ${{FUSE_BRIDGE_E2E_UNSET_ROOT}}\n",
            dir.path().join("mnt").display()
        ),
    )?;

    let status = run_to_exit(&config_path, Duration::from_secs(10)).await?;
    assert!(!status.success());

    assert!(!dir.path().join("mnt").exists());
    Ok(())
}

/// A mount with every worker switched off is rejected before mounting
#[tokio::test]
async fn test_mount_without_worker_fails_startup() -> Result<()> {
    if !fuse_available() {
        return Ok(());
    }
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("config.yaml");
    TestConfig::builder()
        .memory_mount(dir.path().join("mnt"))
        .with_last(|m| m.options.threaded = Some(false))
        .build()
        .write_to_file(&config_path)?;

    let status = run_to_exit(&config_path, Duration::from_secs(10)).await?;
    assert!(!status.success());

    assert!(!dir.path().join("mnt").exists());
    Ok(())
}
