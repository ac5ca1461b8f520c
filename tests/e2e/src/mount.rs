//! Mount management for e2e tests
//!
//! Handles starting/stopping the fuse-bridge process and waiting for mounts.

use crate::config::TestConfig;
use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Default timeout for waiting for mounts to become ready
const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often to poll for mount readiness
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Readiness sentinel served at every mount root
pub const READY_FILE: &str = ".fuse_ready";

/// Manages a running fuse-bridge process
pub struct MountedBridge {
    process: Child,
    mount_points: Vec<PathBuf>,
    exit_status: Option<ExitStatus>,
}

impl MountedBridge {
    /// Start fuse-bridge with the given configuration and wait for every
    /// mount to answer its readiness sentinel
    pub async fn start(config: &TestConfig, config_path: &Path) -> Result<Self> {
        let bridge = Self::spawn(config, config_path)?;
        bridge.wait_ready(DEFAULT_MOUNT_TIMEOUT).await?;
        Ok(bridge)
    }

    /// Start fuse-bridge without waiting for readiness
    pub fn spawn(config: &TestConfig, config_path: &Path) -> Result<Self> {
        config.write_to_file(config_path)?;

        let mount_points: Vec<PathBuf> = config.mounts.iter().map(|m| m.path.clone()).collect();
        let binary = find_fuse_bridge_binary()?;
        info!("Using fuse-bridge binary: {:?}", binary);

        // In CI, capture output for debugging; locally, discard for cleaner output
        let is_ci = std::env::var("CI").is_ok();
        let (stdout, stderr) = if is_ci {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        let process = Command::new(&binary)
            .arg(config_path)
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .with_context(|| format!("Failed to start fuse-bridge: {:?}", binary))?;
        info!("Started fuse-bridge with PID {}", process.id());

        Ok(Self {
            process,
            mount_points,
            exit_status: None,
        })
    }

    /// Wait for all mount points to become ready
    pub async fn wait_ready(&self, max_wait: Duration) -> Result<()> {
        timeout(max_wait, async {
            for mount_point in &self.mount_points {
                loop {
                    if is_ready(mount_point) {
                        debug!("Mount {:?} is ready", mount_point);
                        break;
                    }
                    if !self.is_running() {
                        anyhow::bail!(
                            "fuse-bridge exited before mount {:?} was ready",
                            mount_point
                        );
                    }
                    sleep(POLL_INTERVAL).await;
                }
            }
            Ok(())
        })
        .await
        .map_err(|_| anyhow::anyhow!("Timeout waiting for mounts after {:?}", max_wait))?
    }

    /// Check if the bridge process is still running
    pub fn is_running(&self) -> bool {
        self.exit_status.is_none()
            && signal::kill(Pid::from_raw(self.process.id() as i32), None).is_ok()
            && !is_zombie(self.process.id())
    }

    /// Get the first (or only) mount point
    pub fn mount(&self) -> &Path {
        &self.mount_points[0]
    }

    pub fn mount_path(&self, index: usize) -> Option<&Path> {
        self.mount_points.get(index).map(|p| p.as_path())
    }

    pub fn pid(&self) -> u32 {
        self.process.id()
    }

    /// Send `sig` and wait for the process to exit, escalating to SIGKILL
    /// after ten seconds
    pub async fn stop_with(&mut self, sig: Signal) -> Result<ExitStatus> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        info!("Stopping fuse-bridge (PID {}) with {:?}", self.process.id(), sig);
        let pid = Pid::from_raw(self.process.id() as i32);
        if let Err(e) = signal::kill(pid, sig) {
            warn!("Failed to send {:?}: {}", sig, e);
        }

        let exited = timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(Some(status)) = self.process.try_wait() {
                    return status;
                }
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        let status = match exited {
            Ok(status) => status,
            Err(_) => {
                warn!("Graceful shutdown timed out, sending SIGKILL");
                let _ = signal::kill(pid, Signal::SIGKILL);
                self.process.wait()?
            }
        };
        self.exit_status = Some(status);
        Ok(status)
    }

    /// Stop the bridge gracefully
    pub async fn stop(&mut self) -> Result<ExitStatus> {
        self.stop_with(Signal::SIGTERM).await
    }
}

impl Drop for MountedBridge {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            // Best-effort cleanup in drop
            let pid = Pid::from_raw(self.process.id() as i32);
            let _ = signal::kill(pid, Signal::SIGKILL);
            let _ = self.process.wait();
        }
        for mount_point in &self.mount_points {
            if is_mounted(mount_point) {
                force_unmount(mount_point);
            }
        }
    }
}

/// Run fuse-bridge on an existing config file and wait for it to exit on
/// its own. For configs that must be rejected at start-up.
pub async fn run_to_exit(config_path: &Path, max_wait: Duration) -> Result<ExitStatus> {
    let binary = find_fuse_bridge_binary()?;
    let mut process = Command::new(&binary)
        .arg(config_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start fuse-bridge: {:?}", binary))?;

    let exited = timeout(max_wait, async {
        loop {
            if let Ok(Some(status)) = process.try_wait() {
                return status;
            }
            sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    match exited {
        Ok(status) => Ok(status),
        Err(_) => {
            let _ = process.kill();
            let _ = process.wait();
            anyhow::bail!("fuse-bridge still running after {:?}", max_wait)
        }
    }
}

/// Find the fuse-bridge binary
fn find_fuse_bridge_binary() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("FUSE_BRIDGE_BINARY") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }

    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let workspace = PathBuf::from(&manifest_dir)
        .parent()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    for candidate in [
        PathBuf::from("target/release/fuse-bridge"),
        PathBuf::from("target/debug/fuse-bridge"),
        workspace.join("target/release/fuse-bridge"),
        workspace.join("target/debug/fuse-bridge"),
    ] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(anyhow::anyhow!(
        "Could not find fuse-bridge binary. Run 'cargo build' first."
    ))
}

/// Whether the readiness sentinel under `path` answers
pub fn is_ready(path: &Path) -> bool {
    matches!(std::fs::read(path.join(READY_FILE)), Ok(content) if content == b"ready")
}

/// Whether `path` is a mount point, per /proc/self/mounts
pub fn is_mounted(path: &Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/self/mounts") else {
        return false;
    };
    let target = path.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point == target)
}

/// Whether FUSE mounts can be created on this host
pub fn fuse_available() -> bool {
    Path::new("/dev/fuse").exists()
        && ["fusermount", "fusermount3"].iter().any(|tool| {
            Command::new(tool)
                .arg("-V")
                .output()
                .map(|o| o.status.success())
                .unwrap_or(false)
        })
}

fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .map(|stat| {
            stat.rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false)
        })
        .unwrap_or(true)
}

/// Lazily unmount `path`, ignoring failures
pub fn force_unmount(path: &Path) {
    for tool in ["fusermount", "fusermount3"] {
        if let Ok(output) = Command::new(tool).arg("-uz").arg(path).output() {
            if output.status.success() {
                return;
            }
        }
    }
    warn!("Could not unmount {:?}", path);
}
