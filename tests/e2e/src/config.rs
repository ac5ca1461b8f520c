//! Configuration builder for e2e tests
//!
//! Generates YAML configuration files in the format the fuse-bridge binary
//! reads.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Backend section of a mount
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Local { root: PathBuf },
    Memory { root: String },
}

/// Per-mount option overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threaded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemonized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multithreaded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_on_unmount: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmount_timeout: Option<String>,
}

/// Mount point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub path: PathBuf,
    pub backend: BackendConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    #[serde(default)]
    pub options: MountOptions,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
        }
    }
}

/// Full test configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestConfig {
    pub logging: LoggingConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<PathBuf>,
    pub mounts: Vec<MountConfig>,
}

impl TestConfig {
    pub fn builder() -> TestConfigBuilder {
        TestConfigBuilder::default()
    }

    /// Write the config as YAML
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

/// Builder for [`TestConfig`]
#[derive(Debug, Default)]
pub struct TestConfigBuilder {
    config: TestConfig,
}

impl TestConfigBuilder {
    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn registry(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.registry = Some(path.into());
        self
    }

    /// Mount the local directory `root` at `path`
    pub fn local_mount(self, path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        self.mount(MountConfig {
            path: path.into(),
            backend: BackendConfig::Local { root: root.into() },
            read_only: None,
            uid: None,
            gid: None,
            options: MountOptions::default(),
        })
    }

    /// Mount an empty in-memory tree at `path`
    pub fn memory_mount(self, path: impl Into<PathBuf>) -> Self {
        self.mount(MountConfig {
            path: path.into(),
            backend: BackendConfig::Memory {
                root: "/".to_string(),
            },
            read_only: None,
            uid: None,
            gid: None,
            options: MountOptions::default(),
        })
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.config.mounts.push(mount);
        self
    }

    /// Adjust the most recently added mount
    pub fn with_last<F: FnOnce(&mut MountConfig)>(mut self, f: F) -> Self {
        if let Some(mount) = self.config.mounts.last_mut() {
            f(mount);
        }
        self
    }

    pub fn build(self) -> TestConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_serializes_backend_tags() {
        let config = TestConfig::builder()
            .local_mount("/mnt/a", "/srv/a")
            .memory_mount("/mnt/b")
            .with_last(|m| {
                m.read_only = Some(true);
                m.options.cleanup_on_unmount = Some(true);
            })
            .build();

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("type: local"));
        assert!(yaml.contains("type: memory"));
        assert!(yaml.contains("cleanup_on_unmount: true"));
        assert!(!yaml.contains("foreground"));
    }
}
