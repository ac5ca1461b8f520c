//! Filesystem assertions for e2e tests

use anyhow::Result;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Assert that a file exists at the given path
pub fn assert_file_exists(path: &Path) {
    assert!(
        path.is_file(),
        "Expected file to exist at {:?}, but it doesn't or is not a file",
        path
    );
}

/// Assert that a path does not exist at all
pub fn assert_not_exists(path: &Path) {
    assert!(
        !path.exists(),
        "Expected path {:?} to not exist, but it does",
        path
    );
}

/// Assert that a directory exists at the given path
pub fn assert_dir_exists(path: &Path) {
    assert!(
        path.is_dir(),
        "Expected directory to exist at {:?}, but it doesn't or is not a directory",
        path
    );
}

/// Assert that a file has the expected content
pub fn assert_file_content(path: &Path, expected: &[u8]) {
    let actual = fs::read(path).unwrap_or_else(|e| panic!("Failed to read {:?}: {}", path, e));
    assert_eq!(
        actual,
        expected,
        "File content mismatch at {:?}\nExpected {} bytes, got {} bytes",
        path,
        expected.len(),
        actual.len()
    );
}

/// Assert that a file contains the expected text
pub fn assert_file_content_str(path: &Path, expected: &str) {
    assert_file_content(path, expected.as_bytes());
}

/// Assert that a directory lists exactly `expected`, in any order
pub fn assert_dir_contains_exactly(path: &Path, expected: &[&str]) {
    let mut entries: Vec<String> = fs::read_dir(path)
        .unwrap_or_else(|e| panic!("Failed to read directory {:?}: {}", path, e))
        .filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().to_string()))
        .collect();
    entries.sort();

    let mut expected: Vec<&str> = expected.to_vec();
    expected.sort();

    assert_eq!(
        entries, expected,
        "Directory {:?} contents mismatch.\nExpected: {:?}\nGot: {:?}",
        path, expected, entries
    );
}

/// Assert that `result` failed with the raw OS error `errno`
pub fn assert_errno<T: std::fmt::Debug>(result: io::Result<T>, errno: i32) {
    match result {
        Ok(value) => panic!("Expected errno {}, got Ok({:?})", errno, value),
        Err(e) => assert_eq!(
            e.raw_os_error(),
            Some(errno),
            "Expected errno {}, got {:?}",
            errno,
            e
        ),
    }
}

/// Assert file mode permission bits
pub fn assert_file_mode(path: &Path, expected_mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    let metadata =
        fs::metadata(path).unwrap_or_else(|e| panic!("Failed to stat {:?}: {}", path, e));
    let actual_mode = metadata.permissions().mode() & 0o7777;
    assert_eq!(
        actual_mode,
        expected_mode & 0o7777,
        "File mode mismatch at {:?}: expected {:o}, got {:o}",
        path,
        expected_mode & 0o7777,
        actual_mode
    );
}

/// Retry an assertion until it succeeds or times out
pub async fn assert_eventually<F, E>(f: F, timeout_duration: Duration) -> Result<()>
where
    F: Fn() -> Result<(), E>,
    E: std::fmt::Debug,
{
    let poll_interval = Duration::from_millis(100);
    let mut last_error = None;

    timeout(timeout_duration, async {
        loop {
            match f() {
                Ok(()) => return,
                Err(e) => {
                    last_error = Some(format!("{:?}", e));
                    sleep(poll_interval).await;
                }
            }
        }
    })
    .await
    .map_err(|_| {
        anyhow::anyhow!(
            "Assertion did not succeed within {:?}. Last error: {:?}",
            timeout_duration,
            last_error
        )
    })
}

/// Generate random bytes of the specified size
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Generate a random filename with the given prefix
pub fn random_filename(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
