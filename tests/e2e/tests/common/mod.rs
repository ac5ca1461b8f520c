//! Common test utilities and fixtures

#![allow(dead_code)]

pub use fuse_bridge_e2e::*;

use std::fs;
use std::path::Path;

/// Start a harness or return early from a test when FUSE is unavailable
macro_rules! require_harness {
    ($start:expr) => {
        match $start.await? {
            Some(harness) => harness,
            None => {
                eprintln!("skipping: FUSE is not available");
                return Ok(());
            }
        }
    };
}

/// Create a test file with content, creating parent directories
pub fn create_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Create a test file with string content
pub fn create_file_str(path: &Path, content: &str) -> std::io::Result<()> {
    create_file(path, content.as_bytes())
}

/// Read file content as string
pub fn read_file_str(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path)
}
