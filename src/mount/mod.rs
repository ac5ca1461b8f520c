//! Mount supervision and lifecycle
//!
//! [`MountSupervisor`] runs one kernel session per mount point, either inline
//! (foreground), on a background thread, or in a forked background process.
//! A session that ends on its own, cleanly or not, is never restarted: its
//! mount point is marked not alive and left for `unmount` to clean up.

pub mod registry;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fuser::{MountOption, Session, SessionUnmounter};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::Capabilities;
use crate::dispatch::{Operations, READY_FILE, READY_PAYLOAD};
use crate::error::{FuseBridgeError, Result};
use crate::fuse::guard::panic_message;
use crate::fuse::workers::DEFAULT_WORKERS;
use crate::fuse::{mount_options, signal, FuseBridge};

use self::registry::{MemoryRegistry, MountRecord, MountRegistry};

/// How long a background worker may take to bring its session up
const START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a graceful unmount before forcing it
pub const DEFAULT_UNMOUNT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Builds the dispatcher for a mount. Runs on the worker that serves the
/// mount: the mount thread, or the child process for daemonized mounts.
pub type OperationsFactory = Box<dyn FnOnce() -> Result<Arc<dyn Operations>> + Send + 'static>;

/// Per-mount behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Serve the session on the calling thread, blocking until unmount
    pub foreground: bool,
    /// Serve the session on a background thread
    pub threaded: bool,
    /// Serve the session in a forked background process
    pub daemonized: bool,
    /// Dispatch requests on a worker pool instead of the session thread
    pub multithreaded: bool,
    /// Worker pool size when multithreaded
    pub workers: usize,
    /// Wait for the readiness sentinel before `mount` returns
    pub ready_file: bool,
    /// Remove the mount directory after unmount
    pub cleanup_on_unmount: bool,
    pub allow_other: bool,
    pub unmount_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            foreground: false,
            threaded: true,
            daemonized: false,
            multithreaded: false,
            workers: DEFAULT_WORKERS,
            ready_file: true,
            cleanup_on_unmount: false,
            allow_other: false,
            unmount_timeout: DEFAULT_UNMOUNT_TIMEOUT,
        }
    }
}

/// Where a mount's session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Inline,
    Thread,
    Process,
}

impl WorkerKind {
    /// Foreground wins over daemonized, which wins over threaded. None when
    /// no flag selects a worker.
    pub fn from_options(options: &MountOptions) -> Option<Self> {
        if options.foreground {
            Some(WorkerKind::Inline)
        } else if options.daemonized {
            Some(WorkerKind::Process)
        } else if options.threaded {
            Some(WorkerKind::Thread)
        } else {
            None
        }
    }
}

/// Everything needed to mount one backend
#[derive(Debug, Clone)]
pub struct MountRequest {
    /// Backend kind, e.g. `local`, `memory`, `s3`
    pub backend_name: String,
    /// Source URI shown as the filesystem name, e.g. `s3://bucket/prefix`
    pub source: String,
    pub mount_path: PathBuf,
    pub read_only: bool,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub options: MountOptions,
}

impl MountRequest {
    fn fs_name(&self) -> String {
        format!("{}:{}", self.backend_name, self.source)
    }

    fn kernel_options(&self, capabilities: Option<&Capabilities>) -> Vec<MountOption> {
        let read_only = self.read_only || capabilities.map(|c| !c.write).unwrap_or(false);
        mount_options(&self.fs_name(), read_only, self.options.allow_other)
    }

    fn bridge(&self, ops: Arc<dyn Operations>) -> FuseBridge {
        let bridge = FuseBridge::new(ops, self.uid, self.gid);
        if self.options.multithreaded {
            bridge.multithreaded(self.options.workers)
        } else {
            bridge
        }
    }
}

enum Worker {
    Inline,
    Thread {
        handle: Option<JoinHandle<()>>,
        unmounter: Option<SessionUnmounter>,
        done: Receiver<()>,
    },
    Process {
        pid: libc::pid_t,
    },
}

/// A live (or recently live) mount
pub struct MountPoint {
    pub backend_identifier: String,
    pub source_uri: String,
    pub local_mount_path: PathBuf,
    /// Known when the dispatcher was built in this process
    pub capability_set: Option<Capabilities>,
    alive: Arc<AtomicBool>,
    options: MountOptions,
    worker: Worker,
    stopped: bool,
}

impl MountPoint {
    /// Whether the session is still being served
    pub fn is_alive(&self) -> bool {
        if let Worker::Process { pid } = self.worker {
            if self.alive.load(Ordering::SeqCst) && reap(pid) {
                self.alive.store(false, Ordering::SeqCst);
            }
        }
        self.alive.load(Ordering::SeqCst)
    }

    pub fn worker_kind(&self) -> WorkerKind {
        match self.worker {
            Worker::Inline => WorkerKind::Inline,
            Worker::Thread { .. } => WorkerKind::Thread,
            Worker::Process { .. } => WorkerKind::Process,
        }
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Stop the worker, forcing it after `timeout`, then clean up the
    /// mount directory if requested. Safe to call more than once.
    pub fn unmount(&mut self, timeout: Duration) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.alive.store(false, Ordering::SeqCst);
        info!("Unmounting {:?}", self.local_mount_path);

        match &mut self.worker {
            Worker::Inline => {}
            Worker::Thread {
                handle,
                unmounter,
                done,
            } => {
                if let Some(mut unmounter) = unmounter.take() {
                    // A stalled session can block the unmount request itself
                    let path = self.local_mount_path.clone();
                    let requested = thread::Builder::new()
                        .name("fuse-unmount".to_string())
                        .spawn(move || {
                            if let Err(e) = unmounter.unmount() {
                                debug!("unmount of {:?}: {}", path, e);
                            }
                        });
                    if let Err(e) = requested {
                        warn!("Could not request unmount of {:?}: {}", self.local_mount_path, e);
                    }
                }
                match done.recv_timeout(timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        if let Some(handle) = handle.take() {
                            if handle.join().is_err() {
                                warn!("mount worker for {:?} panicked", self.local_mount_path);
                            }
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            "Session at {:?} did not stop within {:?}, forcing",
                            self.local_mount_path, timeout
                        );
                        lazy_unmount(&self.local_mount_path);
                        // Detach: the worker exits once its kernel channel closes
                        handle.take();
                    }
                }
            }
            Worker::Process { pid } => terminate(*pid, &self.local_mount_path, timeout),
        }

        if self.options.cleanup_on_unmount {
            remove_mount_dir(&self.local_mount_path);
        }
    }
}

impl Drop for MountPoint {
    fn drop(&mut self) {
        let timeout = self.options.unmount_timeout;
        self.unmount(timeout);
    }
}

/// Owner of every mount started by this process
pub struct MountSupervisor {
    mounts: Mutex<HashMap<PathBuf, MountPoint>>,
    registry: Arc<dyn MountRegistry>,
}

impl MountSupervisor {
    pub fn new(registry: Arc<dyn MountRegistry>) -> Self {
        Self {
            mounts: Mutex::new(HashMap::new()),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<dyn MountRegistry> {
        &self.registry
    }

    /// Mount a backend.
    ///
    /// Background mounts return once the kernel mount exists (and, with
    /// `ready_file`, once the sentinel answers). Foreground mounts block
    /// until the session ends and are cleaned up before returning.
    pub fn mount<F>(&self, request: MountRequest, factory: F) -> Result<()>
    where
        F: FnOnce() -> Result<Arc<dyn Operations>> + Send + 'static,
    {
        let path = request.mount_path.clone();
        if self.mounts.lock().contains_key(&path) {
            return Err(FuseBridgeError::AlreadyExists(format!("{:?}", path)));
        }
        let kind = WorkerKind::from_options(&request.options).ok_or_else(|| {
            FuseBridgeError::InvalidArgument(format!(
                "no worker selected for {:?} (foreground, threaded and daemonized are all off)",
                path
            ))
        })?;
        ensure_mount_dir(&path)?;

        info!("Mounting {} at {:?} ({:?})", request.fs_name(), path, kind);

        let mount = match kind {
            WorkerKind::Inline => return self.run_foreground(request, Box::new(factory)),
            WorkerKind::Thread => self.spawn_thread(&request, Box::new(factory))?,
            WorkerKind::Process => self.spawn_process(&request, Box::new(factory))?,
        };

        let pid = match mount.worker {
            Worker::Process { pid } => pid as u32,
            _ => std::process::id(),
        };
        self.record(&request, pid);
        self.mounts.lock().insert(path.clone(), mount);
        info!("Successfully mounted at {:?}", path);
        Ok(())
    }

    fn record(&self, request: &MountRequest, process_id: u32) {
        let record = MountRecord {
            backend_name: request.backend_name.clone(),
            source: request.source.clone(),
            mount_target: request.mount_path.clone(),
            process_id,
            alive: true,
        };
        if let Err(e) = self.registry.set(record) {
            warn!("Failed to record mount {:?}: {}", request.mount_path, e);
        }
    }

    fn forget(&self, path: &Path) {
        if let Err(e) = self.registry.delete(path) {
            warn!("Failed to remove registry record for {:?}: {}", path, e);
        }
    }

    fn run_foreground(&self, request: MountRequest, factory: OperationsFactory) -> Result<()> {
        let ops = factory()?;
        let capabilities = ops.capabilities();
        let options = request.kernel_options(Some(&capabilities));
        let bridge = request.bridge(ops);
        self.record(&request, std::process::id());

        // Drop the registry record however the session ends
        let _record = scopeguard::guard(request.mount_path.clone(), |path| {
            self.forget(&path);
        });

        let outcome = serve(bridge, &request.mount_path, &options, |unmounter| {
            intercept_shutdown(&[libc::SIGINT], unmounter)
        });

        let mut mount = MountPoint {
            backend_identifier: request.backend_name.clone(),
            source_uri: request.source.clone(),
            local_mount_path: request.mount_path.clone(),
            capability_set: Some(capabilities),
            alive: Arc::new(AtomicBool::new(false)),
            options: request.options.clone(),
            worker: Worker::Inline,
            stopped: false,
        };
        if outcome.is_err() && is_mounted(&request.mount_path) {
            lazy_unmount(&request.mount_path);
        }
        mount.unmount(request.options.unmount_timeout);

        outcome.map_err(FuseBridgeError::Io)?;
        info!("Foreground session at {:?} ended", request.mount_path);
        Ok(())
    }

    fn spawn_thread(&self, request: &MountRequest, factory: OperationsFactory) -> Result<MountPoint> {
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(Capabilities, SessionUnmounter)>>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let worker_request = request.clone();
        let worker_alive = alive.clone();
        let handle = thread::Builder::new()
            .name(format!("fuse-mount-{}", request.backend_name))
            .spawn(move || {
                let path = worker_request.mount_path.clone();
                let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
                    let ops = factory()?;
                    let capabilities = ops.capabilities();
                    let options = worker_request.kernel_options(Some(&capabilities));
                    let bridge = worker_request.bridge(ops);
                    serve(bridge, &path, &options, |unmounter| {
                        let _ = ready_tx.send(Ok((capabilities, unmounter)));
                    })
                    .map_err(FuseBridgeError::Io)
                }));

                worker_alive.store(false, Ordering::SeqCst);
                match outcome {
                    Ok(Ok(())) => info!("Session at {:?} ended", path),
                    Ok(Err(e)) => {
                        error!("Session at {:?} failed: {}", path, e);
                        let _ = ready_tx.send(Err(e));
                    }
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        error!("Session at {:?} panicked: {}", path, message);
                        let _ = ready_tx.send(Err(FuseBridgeError::Fatal(message)));
                    }
                }
                if is_mounted(&path) {
                    lazy_unmount(&path);
                }
                let _ = done_tx.send(());
            })?;

        let (capabilities, unmounter) = match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(started)) => started,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                return Err(FuseBridgeError::Fatal(
                    "mount worker exited before the session started".to_string(),
                ));
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(FuseBridgeError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("mount at {:?} did not start", request.mount_path),
                )));
            }
        };

        let mut mount = MountPoint {
            backend_identifier: request.backend_name.clone(),
            source_uri: request.source.clone(),
            local_mount_path: request.mount_path.clone(),
            capability_set: Some(capabilities),
            alive: alive.clone(),
            options: request.options.clone(),
            worker: Worker::Thread {
                handle: Some(handle),
                unmounter: Some(unmounter),
                done: done_rx,
            },
            stopped: false,
        };

        if request.options.ready_file {
            let started = poll_ready(&request.mount_path, START_TIMEOUT, || {
                alive.load(Ordering::SeqCst)
            });
            if let Err(e) = started {
                mount.unmount(request.options.unmount_timeout);
                return Err(e);
            }
        }
        Ok(mount)
    }

    fn spawn_process(&self, request: &MountRequest, factory: OperationsFactory) -> Result<MountPoint> {
        // Only the forking thread survives in the child, along with any lock
        // another thread held at that moment
        let threads = thread_count();
        if threads > 1 {
            return Err(FuseBridgeError::InvalidArgument(format!(
                "daemonized mount at {:?} must start before any other thread ({} running)",
                request.mount_path, threads
            )));
        }

        // Safety: the child only runs the factory and the session, then
        // leaves through _exit without returning into the caller.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(FuseBridgeError::Io(io::Error::last_os_error()));
        }
        if pid == 0 {
            let code = run_daemon_child(request, factory);
            // Safety: terminates the forked child without running the
            // parent's atexit handlers
            unsafe { libc::_exit(code) }
        }

        info!("Daemonized mount at {:?} served by pid {}", request.mount_path, pid);
        let mut mount = MountPoint {
            backend_identifier: request.backend_name.clone(),
            source_uri: request.source.clone(),
            local_mount_path: request.mount_path.clone(),
            capability_set: None,
            alive: Arc::new(AtomicBool::new(true)),
            options: request.options.clone(),
            worker: Worker::Process { pid },
            stopped: false,
        };

        if request.options.ready_file {
            if let Err(e) = poll_ready(&request.mount_path, START_TIMEOUT, || !reap(pid)) {
                mount.unmount(request.options.unmount_timeout);
                return Err(e);
            }
        }
        Ok(mount)
    }

    /// Unmount `path`. Returns false when nothing was mounted there, so a
    /// second call is a harmless no-op.
    pub fn unmount(&self, path: &Path, timeout: Duration) -> Result<bool> {
        let mount = self.mounts.lock().remove(path);
        let Some(mut mount) = mount else {
            debug!("unmount: nothing mounted at {:?}", path);
            return Ok(false);
        };
        mount.unmount(timeout);
        self.forget(path);
        Ok(true)
    }

    /// Unmount everything, each mount with its own timeout
    pub fn unmount_all(&self) {
        let mounts: Vec<MountPoint> = self.mounts.lock().drain().map(|(_, m)| m).collect();
        if mounts.is_empty() {
            return;
        }
        info!("Unmounting all filesystems");
        for mut mount in mounts {
            let timeout = mount.options.unmount_timeout;
            mount.unmount(timeout);
            self.forget(&mount.local_mount_path);
        }
    }

    /// Drop registry records whose serving process is gone, lazily
    /// unmounting anything they left attached. Returns the pruned targets.
    pub fn prune_stale(&self) -> Result<Vec<PathBuf>> {
        let mut pruned = Vec::new();
        for record in self.registry.list()? {
            if process_exists(record.process_id) {
                continue;
            }
            warn!(
                "Pruning stale mount {:?} (pid {} is gone)",
                record.mount_target, record.process_id
            );
            if is_mounted(&record.mount_target) {
                lazy_unmount(&record.mount_target);
            }
            self.registry.delete(&record.mount_target)?;
            pruned.push(record.mount_target);
        }
        Ok(pruned)
    }

    pub fn is_alive(&self, path: &Path) -> bool {
        self.mounts
            .lock()
            .get(path)
            .map(MountPoint::is_alive)
            .unwrap_or(false)
    }

    pub fn capabilities(&self, path: &Path) -> Option<Capabilities> {
        self.mounts
            .lock()
            .get(path)
            .and_then(|m| m.capability_set.clone())
    }

    /// Paths of mounts started by this supervisor
    pub fn list_mounts(&self) -> Vec<PathBuf> {
        self.mounts.lock().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.mounts.lock().len()
    }
}

impl Default for MountSupervisor {
    fn default() -> Self {
        Self::new(Arc::new(MemoryRegistry::new()))
    }
}

impl Drop for MountSupervisor {
    fn drop(&mut self) {
        self.unmount_all();
    }
}

/// Mount, hand the unmounter to `on_session`, and serve until the kernel
/// channel closes. Whatever `on_session` returns lives for the session.
fn serve<G>(
    bridge: FuseBridge,
    path: &Path,
    options: &[MountOption],
    on_session: impl FnOnce(SessionUnmounter) -> G,
) -> io::Result<()> {
    let mut session = Session::new(bridge, path, options)?;
    let _scope = on_session(session.unmount_callable());
    session.run()
}

/// Unmount through `unmounter` when one of `signals` arrives
fn intercept_shutdown(
    signals: &[libc::c_int],
    mut unmounter: SessionUnmounter,
) -> Option<signal::SignalGuard> {
    let guard = signal::intercept(signals, move || {
        if let Err(e) = unmounter.unmount() {
            warn!("Unmount on signal failed: {}", e);
        }
    });
    match guard {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!("Could not intercept {:?}: {}", signals, e);
            None
        }
    }
}

fn run_daemon_child(request: &MountRequest, factory: OperationsFactory) -> i32 {
    // Safety: detaching from the parent's session has no memory effects
    unsafe {
        libc::setsid();
    }

    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<()> {
        let ops = factory()?;
        let capabilities = ops.capabilities();
        let options = request.kernel_options(Some(&capabilities));
        let bridge = request.bridge(ops);
        serve(bridge, &request.mount_path, &options, |unmounter| {
            intercept_shutdown(&[libc::SIGINT, libc::SIGTERM], unmounter)
        })
        .map_err(FuseBridgeError::Io)
    }));

    match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!("Daemonized session at {:?} failed: {}", request.mount_path, e);
            1
        }
        Err(panic) => {
            error!(
                "Daemonized session at {:?} panicked: {}",
                request.mount_path,
                panic_message(&*panic)
            );
            1
        }
    }
}

fn ensure_mount_dir(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            return Err(FuseBridgeError::NotADirectory(format!("{:?}", path)));
        }
        return Ok(());
    }
    debug!("Creating mount point directory {:?}", path);
    fs::create_dir_all(path)?;
    Ok(())
}

fn remove_mount_dir(path: &Path) {
    match fs::remove_dir(path) {
        Ok(()) => debug!("Removed mount directory {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove mount directory {:?}: {}", path, e),
    }
}

/// Poll the readiness sentinel under `mount_path` until it answers `ready`.
/// Gives up early once `running` reports the worker gone.
fn poll_ready(mount_path: &Path, timeout: Duration, running: impl Fn() -> bool) -> Result<()> {
    let sentinel = mount_path.join(READY_FILE);
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(content) = fs::read(&sentinel) {
            if content == READY_PAYLOAD {
                debug!("{:?} is ready", mount_path);
                return Ok(());
            }
        }
        if !running() {
            return Err(FuseBridgeError::Fatal(format!(
                "mount worker for {:?} exited before becoming ready",
                mount_path
            )));
        }
        if Instant::now() >= deadline {
            return Err(FuseBridgeError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{:?} not ready after {:?}", mount_path, timeout),
            )));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Wait until the mount at `mount_path` serves its readiness sentinel
pub fn wait_ready(mount_path: &Path, timeout: Duration) -> Result<()> {
    poll_ready(mount_path, timeout, || true)
}

/// Whether `path` is currently a mount point, per /proc/self/mounts
pub fn is_mounted(path: &Path) -> bool {
    let Ok(mounts) = fs::read_to_string("/proc/self/mounts") else {
        return false;
    };
    let target = path.to_string_lossy();
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mount_point| mount_point.replace("\\040", " ") == target)
}

/// Detach a mount even while it is busy
pub fn lazy_unmount(path: &Path) {
    for tool in ["fusermount", "fusermount3"] {
        match Command::new(tool).arg("-u").arg("-z").arg(path).status() {
            Ok(status) if status.success() => {
                info!("Lazily unmounted {:?}", path);
                return;
            }
            Ok(status) => debug!("{} -u -z {:?} exited with {}", tool, path, status),
            Err(e) => debug!("{} unavailable: {}", tool, e),
        }
    }

    let Ok(c_path) = std::ffi::CString::new(path.to_string_lossy().as_bytes()) else {
        return;
    };
    // Safety: c_path is a valid NUL-terminated string for the call's duration
    if unsafe { libc::umount2(c_path.as_ptr(), libc::MNT_DETACH) } != 0 {
        warn!(
            "Could not detach {:?}: {}",
            path,
            io::Error::last_os_error()
        );
    }
}

/// Threads in this process, 1 when /proc is unavailable
fn thread_count() -> usize {
    fs::read_dir("/proc/self/task")
        .map(|tasks| tasks.count())
        .unwrap_or(1)
}

fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // Safety: signal 0 only checks for existence and permission
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Non-blocking reap. True once the child has exited (or is not ours).
fn reap(pid: libc::pid_t) -> bool {
    let mut status = 0;
    // Safety: status is a valid out pointer
    let result = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    result == pid || result < 0
}

/// SIGTERM, bounded wait, then SIGKILL
fn terminate(pid: libc::pid_t, path: &Path, timeout: Duration) {
    if reap(pid) {
        return;
    }
    // Safety: pid is our own child
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    if wait_exit(pid, timeout) {
        return;
    }
    warn!("pid {} serving {:?} ignored SIGTERM, killing", pid, path);
    // Safety: as above
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    wait_exit(pid, Duration::from_secs(1));
    lazy_unmount(path);
}

fn wait_exit(pid: libc::pid_t, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if reap(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
