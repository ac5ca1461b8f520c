//! Signal interception for blocking sessions
//!
//! While a foreground or daemonized session blocks in the kernel loop, SIGINT
//! (and SIGTERM in a daemon) must turn into a clean unmount instead of
//! killing the process with the mount still attached. The handler only sets
//! a flag; a watcher thread sees it and runs the shutdown callback outside
//! signal context. Previous handlers are restored when the guard drops.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

static SIGNALLED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

extern "C" fn record_signal(_signum: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Active interception. Dropping it stops the watcher and restores the
/// handlers that were installed before.
pub struct SignalGuard {
    previous: Vec<(libc::c_int, libc::sigaction)>,
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

/// Intercept `signals`, running `on_signal` once when any of them arrives
pub fn intercept<F>(signals: &[libc::c_int], on_signal: F) -> io::Result<SignalGuard>
where
    F: FnOnce() + Send + 'static,
{
    SIGNALLED.store(false, Ordering::SeqCst);

    let mut guard = SignalGuard {
        previous: Vec::with_capacity(signals.len()),
        stop: Arc::new(AtomicBool::new(false)),
        watcher: None,
    };

    for &signum in signals {
        // Safety: the handler only touches an atomic; sigaction structs are
        // plain data and fully initialized before use.
        let previous = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = record_signal as extern "C" fn(libc::c_int) as usize;
            libc::sigemptyset(&mut action.sa_mask);
            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(signum, &action, &mut previous) != 0 {
                return Err(io::Error::last_os_error());
            }
            previous
        };
        guard.previous.push((signum, previous));
    }

    let stop = guard.stop.clone();
    let watcher = thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if SIGNALLED.swap(false, Ordering::SeqCst) {
                    info!("Received shutdown signal");
                    on_signal();
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
        })?;
    guard.watcher = Some(watcher);

    debug!("intercepting signals {:?}", signals);
    Ok(guard)
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                warn!("signal watcher exited with a panic");
            }
        }
        for (signum, previous) in self.previous.drain(..).rev() {
            // Safety: restoring an action previously returned by sigaction
            unsafe {
                libc::sigaction(signum, &previous, std::ptr::null_mut());
            }
        }
    }
}
