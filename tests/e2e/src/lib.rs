//! E2E test harness for fuse-bridge
//!
//! Starts the `fuse-bridge` binary against generated configs and exercises
//! the resulting mounts through ordinary filesystem calls. Tests skip
//! themselves on hosts without `/dev/fuse`.
//!
//! ```ignore
//! use fuse_bridge_e2e::TestHarness;
//!
//! #[tokio::test]
//! async fn my_test() -> anyhow::Result<()> {
//!     let Some(harness) = TestHarness::local().await? else { return Ok(()) };
//!     std::fs::write(harness.mount().join("a.txt"), "hi")?;
//!     harness.cleanup().await
//! }
//! ```

pub mod assertions;
pub mod config;
pub mod harness;
pub mod mount;

pub use assertions::*;
pub use config::{BackendConfig, MountConfig, MountOptions, TestConfig, TestConfigBuilder};
pub use harness::TestHarness;
pub use mount::{fuse_available, is_mounted, is_ready, run_to_exit, MountedBridge, READY_FILE};
