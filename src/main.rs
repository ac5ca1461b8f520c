//! fuse-bridge daemon entry point

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fuse_bridge::backend::local::LocalBackend;
use fuse_bridge::backend::memory::MemoryBackend;
use fuse_bridge::backend::s3::S3Backend;
use fuse_bridge::config::{BackendConfig, Config, MountConfig};
use fuse_bridge::dispatch::async_dispatch::build_runtime;
use fuse_bridge::dispatch::{AsyncDispatcher, Operations, SyncDispatcher};
use fuse_bridge::mount::registry::{FileRegistry, MemoryRegistry, MountRegistry};
use fuse_bridge::mount::{MountRequest, MountSupervisor, OperationsFactory, WorkerKind};

/// Print usage information
fn print_usage() {
    eprintln!("Usage: fuse-bridge <config.yaml>");
    eprintln!();
    eprintln!("fuse-bridge - mount local, in-memory and S3 storage through FUSE");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG       Overrides logging.level from the config");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  fuse-bridge /etc/fuse-bridge/config.yaml");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 || args[1] == "-h" || args[1] == "--help" {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    info!("fuse-bridge starting");
    info!("Loaded configuration from {:?}", config_path);

    let registry: Arc<dyn MountRegistry> = match &config.registry {
        Some(path) => Arc::new(FileRegistry::new(path)),
        None => Arc::new(MemoryRegistry::new()),
    };
    let supervisor = Arc::new(MountSupervisor::new(registry));
    match supervisor.prune_stale() {
        Ok(pruned) if !pruned.is_empty() => info!("Pruned {} stale mount(s)", pruned.len()),
        Ok(_) => {}
        Err(e) => warn!("Could not prune stale mounts: {}", e),
    }

    // Daemonized mounts fork, so they go before anything starts a thread.
    // Threaded mounts follow; a foreground mount blocks until it ends.
    let (foreground, mut background): (Vec<&MountConfig>, Vec<&MountConfig>) =
        config.mounts.iter().partition(|m| m.options.foreground);
    background.sort_by_key(|m| WorkerKind::from_options(&m.options) != Some(WorkerKind::Process));

    for mount_config in background {
        info!("Setting up mount at {:?}", mount_config.path);
        if let Err(e) = supervisor.mount(request_for(mount_config), factory_for(mount_config)) {
            error!("Failed to mount {:?}: {}", mount_config.path, e);
        }
    }

    if let Some(mount_config) = foreground.first() {
        info!(
            "{} background filesystem(s) mounted, serving {:?} in the foreground",
            supervisor.count(),
            mount_config.path
        );
        if let Err(e) = supervisor.mount(request_for(mount_config), factory_for(mount_config)) {
            error!("Foreground mount {:?} failed: {}", mount_config.path, e);
            supervisor.unmount_all();
            std::process::exit(1);
        }
        info!("Shutting down");
        supervisor.unmount_all();
        return Ok(());
    }

    if supervisor.count() == 0 {
        error!("No filesystems were mounted successfully");
        std::process::exit(1);
    }

    info!("{} filesystem(s) mounted successfully", supervisor.count());
    info!("Press Ctrl+C to unmount and exit");

    // Wait for shutdown signal
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(());
    })?;
    let _ = shutdown_rx.recv();

    info!("Shutting down");
    supervisor.unmount_all();
    info!("All filesystems unmounted, exiting");

    Ok(())
}

fn request_for(mount: &MountConfig) -> MountRequest {
    MountRequest {
        backend_name: mount.backend.name().to_string(),
        source: mount.backend.source(),
        mount_path: mount.path.clone(),
        read_only: mount.read_only,
        uid: mount.uid,
        gid: mount.gid,
        options: mount.options.clone(),
    }
}

/// Dispatcher construction for a mount; runs on whichever worker serves it
fn factory_for(mount: &MountConfig) -> OperationsFactory {
    let read_only = mount.read_only;
    match mount.backend.clone() {
        BackendConfig::Local { root } => Box::new(move || {
            let backend = if read_only {
                LocalBackend::read_only()
            } else {
                LocalBackend::new()
            };
            let root = root.to_string_lossy().into_owned();
            Ok(Arc::new(SyncDispatcher::new(backend, &root)) as Arc<dyn Operations>)
        }),
        BackendConfig::Memory { root } => Box::new(move || {
            let mut backend = MemoryBackend::new();
            if read_only {
                backend = backend.into_read_only();
            }
            Ok(Arc::new(SyncDispatcher::new(backend, &root)) as Arc<dyn Operations>)
        }),
        BackendConfig::S3 { config, prefix } => Box::new(move || {
            let runtime = build_runtime()?;
            let backend = runtime.block_on(S3Backend::new(config))?;
            let root = format!("/{}", prefix.trim_matches('/'));
            info!("Serving {}", backend.uri(&root));
            Ok(Arc::new(AsyncDispatcher::with_runtime(backend, &root, runtime))
                as Arc<dyn Operations>)
        }),
    }
}
