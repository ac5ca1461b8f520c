//! Configuration parsing and structures

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;
use crate::mount::{MountOptions, WorkerKind};

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Mount registry file; in-memory when absent
    pub registry: Option<PathBuf>,

    /// Values inherited by every mount
    #[serde(default)]
    pub defaults: Defaults,

    /// Mount points
    pub mounts: Vec<RawMountConfig>,
}

/// Top-level defaults section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Defaults {
    /// S3 backend defaults
    pub s3: Option<S3Defaults>,

    /// Mount option defaults
    #[serde(default)]
    pub options: RawMountOptions,
}

/// S3 backend defaults
#[derive(Debug, Clone, Deserialize, Default)]
pub struct S3Defaults {
    pub bucket: Option<String>,

    /// AWS region
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Raw mount configuration before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawMountConfig {
    /// Path where the filesystem will be mounted
    pub path: PathBuf,

    /// Backend configuration (may be partial, inheriting from defaults)
    pub backend: RawBackendConfig,

    /// Mount as read-only (disables all write operations)
    #[serde(default)]
    pub read_only: bool,

    /// Owner reported for entries the backend has no owner for
    pub uid: Option<u32>,
    pub gid: Option<u32>,

    /// Overrides of `defaults.options`
    #[serde(default)]
    pub options: RawMountOptions,
}

/// Mount-level backend configuration (tagged enum)
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawBackendConfig {
    /// A directory on local disk
    Local { root: PathBuf },

    /// A process-local in-memory tree
    Memory {
        #[serde(default = "default_memory_root")]
        root: String,
    },

    /// S3 or S3-compatible bucket; unset fields inherit from `defaults.s3`
    S3(S3MountConfig),
}

fn default_memory_root() -> String {
    "/".to_string()
}

/// S3 mount backend - all fields optional for override mode
#[derive(Debug, Clone, Deserialize, Default)]
pub struct S3MountConfig {
    /// S3 bucket name
    pub bucket: Option<String>,

    /// Key prefix mounted as the root
    pub prefix: Option<String>,

    pub region: Option<String>,

    pub endpoint: Option<String>,

    pub force_path_style: Option<bool>,
}

/// Mount options where every field is optional
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMountOptions {
    pub foreground: Option<bool>,
    pub threaded: Option<bool>,
    pub daemonized: Option<bool>,
    pub multithreaded: Option<bool>,
    pub workers: Option<usize>,
    pub ready_file: Option<bool>,
    pub cleanup_on_unmount: Option<bool>,
    pub allow_other: Option<bool>,
    #[serde(default, with = "humantime_serde")]
    pub unmount_timeout: Option<Duration>,
}

impl RawMountOptions {
    /// Fill unset fields from `fallback`
    fn or(self, fallback: &RawMountOptions) -> RawMountOptions {
        RawMountOptions {
            foreground: self.foreground.or(fallback.foreground),
            threaded: self.threaded.or(fallback.threaded),
            daemonized: self.daemonized.or(fallback.daemonized),
            multithreaded: self.multithreaded.or(fallback.multithreaded),
            workers: self.workers.or(fallback.workers),
            ready_file: self.ready_file.or(fallback.ready_file),
            cleanup_on_unmount: self.cleanup_on_unmount.or(fallback.cleanup_on_unmount),
            allow_other: self.allow_other.or(fallback.allow_other),
            unmount_timeout: self.unmount_timeout.or(fallback.unmount_timeout),
        }
    }

    fn resolve(self) -> MountOptions {
        let base = MountOptions::default();
        MountOptions {
            foreground: self.foreground.unwrap_or(base.foreground),
            threaded: self.threaded.unwrap_or(base.threaded),
            daemonized: self.daemonized.unwrap_or(base.daemonized),
            multithreaded: self.multithreaded.unwrap_or(base.multithreaded),
            workers: self.workers.unwrap_or(base.workers),
            ready_file: self.ready_file.unwrap_or(base.ready_file),
            cleanup_on_unmount: self.cleanup_on_unmount.unwrap_or(base.cleanup_on_unmount),
            allow_other: self.allow_other.unwrap_or(base.allow_other),
            unmount_timeout: self.unmount_timeout.unwrap_or(base.unmount_timeout),
        }
    }
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Mount registry file, if persisted
    pub registry: Option<PathBuf>,

    /// Mount points (fully resolved)
    pub mounts: Vec<MountConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Mount point configuration (resolved)
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Path where the filesystem will be mounted
    pub path: PathBuf,

    /// Backend configuration (fully resolved)
    pub backend: BackendConfig,

    pub read_only: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub options: MountOptions,
}

/// Backend configuration (fully resolved)
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local { root: PathBuf },
    Memory { root: String },
    S3 { config: S3Config, prefix: String },
}

impl BackendConfig {
    /// Backend kind as used in filesystem names and the mount registry
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Local { .. } => "local",
            BackendConfig::Memory { .. } => "memory",
            BackendConfig::S3 { .. } => "s3",
        }
    }

    /// Source URI of the mounted root
    pub fn source(&self) -> String {
        match self {
            BackendConfig::Local { root } => root.display().to_string(),
            BackendConfig::Memory { root } => root.clone(),
            BackendConfig::S3 { config, prefix } => {
                format!("s3://{}/{}", config.bucket, prefix.trim_matches('/'))
            }
        }
    }
}

/// S3 backend configuration (fully resolved)
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region
    pub region: Option<String>,

    /// Custom endpoint URL (for S3-compatible stores)
    pub endpoint: Option<String>,

    /// Force path-style addressing (for MinIO, LocalStack, etc.)
    pub force_path_style: bool,

    /// Reject all write operations
    pub read_only: bool,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by merging mount overrides with defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            registry,
            defaults,
            mounts,
        } = self;

        let mounts = mounts
            .into_iter()
            .map(|raw| Self::resolve_mount(&defaults, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            logging,
            registry,
            mounts,
        })
    }

    fn resolve_mount(defaults: &Defaults, raw: RawMountConfig) -> Result<MountConfig, ConfigError> {
        let backend = match raw.backend {
            RawBackendConfig::Local { root } => BackendConfig::Local { root },
            RawBackendConfig::Memory { root } => BackendConfig::Memory { root },
            RawBackendConfig::S3(mount_s3) => {
                Self::resolve_s3(defaults, mount_s3, raw.read_only, &raw.path)?
            }
        };

        Ok(MountConfig {
            path: raw.path,
            backend,
            read_only: raw.read_only,
            uid: raw.uid,
            gid: raw.gid,
            options: raw.options.or(&defaults.options).resolve(),
        })
    }

    fn resolve_s3(
        defaults: &Defaults,
        mount: S3MountConfig,
        read_only: bool,
        mount_path: &Path,
    ) -> Result<BackendConfig, ConfigError> {
        let defaults = defaults.s3.clone().unwrap_or_default();

        // Mount values override defaults; bucket must be specified somewhere
        let bucket = mount.bucket.or(defaults.bucket).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "Mount {:?} uses the S3 backend but no bucket specified (either on mount or in defaults.s3)",
                mount_path
            ))
        })?;

        Ok(BackendConfig::S3 {
            config: S3Config {
                bucket,
                region: mount.region.or(defaults.region),
                endpoint: mount.endpoint.or(defaults.endpoint),
                force_path_style: mount.force_path_style.unwrap_or(defaults.force_path_style),
                read_only,
            },
            prefix: mount.prefix.unwrap_or_default(),
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string, substituting `${VAR}` references first
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one mount point is required".to_string(),
            ));
        }

        // Check for duplicate mount paths
        let mut paths = std::collections::HashSet::new();
        for mount in &self.mounts {
            if !paths.insert(&mount.path) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate mount path: {:?}",
                    mount.path
                )));
            }
        }

        let foreground = self.mounts.iter().filter(|m| m.options.foreground).count();
        if foreground > 1 {
            return Err(ConfigError::ValidationError(format!(
                "At most one mount can run in the foreground ({} requested)",
                foreground
            )));
        }

        for mount in &self.mounts {
            if WorkerKind::from_options(&mount.options).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Mount {:?}: threaded is off but neither foreground nor daemonized is set",
                    mount.path
                )));
            }
            match &mount.backend {
                BackendConfig::S3 { config, .. } if config.bucket.is_empty() => {
                    return Err(ConfigError::ValidationError(format!(
                        "Mount {:?}: S3 bucket cannot be empty",
                        mount.path
                    )));
                }
                BackendConfig::Local { root } if !root.is_absolute() => {
                    return Err(ConfigError::ValidationError(format!(
                        "Mount {:?}: local root {:?} must be absolute",
                        mount.path, root
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
