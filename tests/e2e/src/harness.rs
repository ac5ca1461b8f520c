//! Per-test harness
//!
//! Each harness owns a scratch directory holding the config file, the mount
//! points, and (for local mounts) the backing directories, plus the running
//! fuse-bridge process serving them.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

use crate::config::{TestConfig, TestConfigBuilder};
use crate::mount::{fuse_available, MountedBridge};

/// A running fuse-bridge with its scratch directory
pub struct TestHarness {
    workdir: TempDir,
    config: TestConfig,
    bridge: MountedBridge,
}

impl TestHarness {
    /// One local mount at `<workdir>/mnt` backed by `<workdir>/backing`.
    /// `None` when the host cannot create FUSE mounts.
    pub async fn local() -> Result<Option<Self>> {
        Self::with_config(|builder, dir| {
            builder.local_mount(dir.join("mnt"), dir.join("backing"))
        })
        .await
    }

    /// One in-memory mount at `<workdir>/mnt`
    pub async fn memory() -> Result<Option<Self>> {
        Self::with_config(|builder, dir| builder.memory_mount(dir.join("mnt"))).await
    }

    /// Build a config rooted in a fresh scratch directory and start the
    /// bridge on it
    pub async fn with_config<F>(build: F) -> Result<Option<Self>>
    where
        F: FnOnce(TestConfigBuilder, &Path) -> TestConfigBuilder,
    {
        if !fuse_available() {
            info!("FUSE is not available on this host, skipping");
            return Ok(None);
        }
        init_logging();

        let workdir = tempfile::Builder::new().prefix("fuse-bridge-e2e").tempdir()?;
        std::fs::create_dir_all(workdir.path().join("backing"))?;
        let config = build(TestConfig::builder(), workdir.path()).build();

        let bridge = MountedBridge::start(&config, &workdir.path().join("config.yaml")).await?;
        Ok(Some(Self {
            workdir,
            config,
            bridge,
        }))
    }

    /// The first mount point
    pub fn mount(&self) -> &Path {
        self.bridge.mount()
    }

    pub fn mount_path(&self, index: usize) -> Option<&Path> {
        self.bridge.mount_path(index)
    }

    /// Backing directory of local mounts created by [`TestHarness::local`]
    pub fn backing(&self) -> PathBuf {
        self.workdir.path().join("backing")
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn bridge(&mut self) -> &mut MountedBridge {
        &mut self.bridge
    }

    /// Stop the bridge; the scratch directory goes away on drop
    pub async fn cleanup(mut self) -> Result<()> {
        self.bridge.stop().await?;
        Ok(())
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
