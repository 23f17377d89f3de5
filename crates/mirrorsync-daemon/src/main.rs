//! mirrorsync daemon - keeps a local directory mirrored into a cloud container
//!
//! This binary runs as a user service and handles:
//! - Watching the local directory and the cloud container
//! - Reconciling both sides through the sync orchestrator
//! - Lifecycle control through OS signals
//!
//! # Signals
//!
//! | Signal          | Effect                                          |
//! |-----------------|-------------------------------------------------|
//! | SIGINT, SIGTERM | stop synchronization and exit                   |
//! | SIGUSR1         | enter the background (finish work, then pause)  |
//! | SIGUSR2         | enter the foreground (start or resume)          |
//! | SIGHUP          | re-read the config file and apply `sync.enabled`|

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::Parser;
use mirrorsync_core::config::Config;
use mirrorsync_core::domain::SyncError;
use mirrorsync_core::ports::{IBookmarksEngine, IBookmarksObserver};
use mirrorsync_sync::{
    ActionExecutor, CloudDirectoryMonitor, CloudSource, JsonSyncStateStore, LocalDirectoryMonitor,
    LocalSource, MirrorContainer, OrchestratorSettings, SyncComponents, SyncObserver,
    SyncOrchestrator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "mirrorsyncd",
    version,
    about = "Mirrors a local directory into a cloud container"
)]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,
}

// ============================================================================
// Collaborators without a host application
// ============================================================================

/// Bookmarks engine stand-in for a daemon without a host application
///
/// There is nothing to reload in memory, so every reload request is
/// confirmed right away.
#[derive(Default)]
struct HeadlessBookmarks {
    observers: Mutex<Vec<Arc<dyn IBookmarksObserver>>>,
}

impl HeadlessBookmarks {
    fn observers(&self) -> Vec<Arc<dyn IBookmarksObserver>> {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl IBookmarksEngine for HeadlessBookmarks {
    fn load_bookmarks(&self) {
        info!("Local directory changed");
        for observer in self.observers() {
            observer.on_bookmarks_load_finished();
        }
    }

    fn add_observer(&self, observer: Arc<dyn IBookmarksObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn remove_observer(&self, observer: &Arc<dyn IBookmarksObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| !Arc::ptr_eq(o, observer));
    }
}

/// Logs error and activity changes of the sync engine
struct StatusLogger;

impl SyncObserver for StatusLogger {
    fn on_sync_error_changed(&self, error: Option<&SyncError>) {
        match error {
            Some(err) => warn!(error = %err, fatal = err.is_fatal(), "Sync error"),
            None => debug!("Sync error cleared"),
        }
    }

    fn on_sync_busy_changed(&self, busy: bool) {
        debug!(busy, "Sync activity changed");
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Lifecycle requests delivered to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Background,
    Foreground,
    ReloadConfig,
}

/// Owns the orchestrator and applies lifecycle requests to it
struct DaemonService {
    /// File the configuration was loaded from, re-read on reload
    config_path: Option<PathBuf>,
    orchestrator: SyncOrchestrator,
    /// Held so the weakly subscribed logger stays alive
    _status: Arc<dyn SyncObserver>,
}

impl DaemonService {
    /// Builds the adapters and the orchestrator described by `config`
    ///
    /// Creates the local directory if it does not exist yet. Synchronization
    /// is not started.
    async fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        let sync = &config.sync;
        tokio::fs::create_dir_all(&sync.local_dir)
            .await
            .with_context(|| format!("Failed to create {}", sync.local_dir.display()))?;

        let local_monitor = LocalDirectoryMonitor::new(
            LocalSource::new(&sync.local_dir, &sync.file_extension),
            sync.poll_interval(),
            sync.debounce(),
        );
        let cloud_monitor = CloudDirectoryMonitor::new(
            CloudSource::new(&sync.cloud_dir, &sync.file_extension),
            sync.poll_interval(),
            sync.debounce(),
        );
        let state_store = Arc::new(JsonSyncStateStore::new(&config.state.file));
        let executor = ActionExecutor::new(
            &sync.local_dir,
            Arc::new(MirrorContainer::new(&sync.cloud_dir)),
            state_store.clone(),
            config.device.name.clone(),
        );

        let orchestrator = SyncOrchestrator::new(
            SyncComponents {
                local_monitor: Arc::new(local_monitor),
                cloud_monitor: Arc::new(cloud_monitor),
                executor: Arc::new(executor),
                bookmarks: Arc::new(HeadlessBookmarks::default()),
                state_store,
            },
            OrchestratorSettings::from_config(sync),
        );
        let status: Arc<dyn SyncObserver> = Arc::new(StatusLogger);
        orchestrator.subscribe(&status);

        info!(
            local = %sync.local_dir.display(),
            cloud = %sync.cloud_dir.display(),
            device = %config.device.name,
            "Sync engine configured"
        );
        Ok(Self {
            config_path,
            orchestrator,
            _status: status,
        })
    }

    /// Starts synchronization if it is enabled
    ///
    /// A failed start is not fatal for the daemon: the error stays the
    /// current sync error and a later foreground request retries.
    async fn start_sync(&self) {
        if !self.orchestrator.is_enabled() {
            info!("Synchronization disabled in configuration");
            return;
        }
        if let Err(e) = self.orchestrator.start().await {
            error!(error = %e, "Synchronization could not start");
        }
    }

    async fn handle(&self, control: Control) {
        debug!(?control, "Handling control request");
        match control {
            Control::Background => self.orchestrator.enter_background().await,
            Control::Foreground => {
                if let Err(e) = self.orchestrator.enter_foreground().await {
                    error!(error = %e, "Synchronization could not start");
                }
            }
            Control::ReloadConfig => self.reload_config().await,
        }
    }

    /// Re-reads the config file and applies the settings toggle
    ///
    /// Other settings only take effect after a restart.
    async fn reload_config(&self) {
        let Some(path) = &self.config_path else {
            debug!("No config file to reload");
            return;
        };
        let config = match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Keeping current configuration");
                return;
            }
        };
        info!(enabled = config.sync.enabled, "Configuration reloaded");
        if let Err(e) = self.orchestrator.set_enabled(config.sync.enabled).await {
            error!(error = %e, "Synchronization could not start");
        }
    }

    /// Runs until `shutdown` is cancelled, then stops synchronization
    async fn run(
        &self,
        mut controls: mpsc::Receiver<Control>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        self.start_sync().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                control = controls.recv() => match control {
                    Some(control) => self.handle(control).await,
                    None => shutdown.cancelled().await,
                },
            }
        }

        self.orchestrator.stop().await;
        Ok(())
    }
}

// ============================================================================
// Signal handling
// ============================================================================

/// Forwards OS signals as control requests until a shutdown signal arrives
#[cfg(unix)]
async fn handle_signals(
    controls: mpsc::Sender<Control>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut background = signal(SignalKind::user_defined1())?;
    let mut foreground = signal(SignalKind::user_defined2())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        let control = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C)");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = background.recv() => Control::Background,
            _ = foreground.recv() => Control::Foreground,
            _ = hangup.recv() => Control::ReloadConfig,
        };
        if controls.send(control).await.is_err() {
            break;
        }
    }

    shutdown.cancel();
    Ok(())
}

#[cfg(not(unix))]
async fn handle_signals(
    _controls: mpsc::Sender<Control>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    shutdown.cancel();
    Ok(())
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    let level = args
        .log_level
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "mirrorsync daemon starting (mirrorsyncd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("Invalid configuration in {}", config_path.display());
    }

    let shutdown = CancellationToken::new();
    let (tx, rx) = mpsc::channel(8);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(tx, signal_token.clone()).await {
            error!(error = %e, "Signal handling failed, shutting down");
            signal_token.cancel();
        }
    });

    let service = DaemonService::new(config, Some(config_path)).await?;
    let result = service.run(rx, shutdown).await;

    match &result {
        Ok(()) => info!("mirrorsync daemon shut down gracefully"),
        Err(e) => error!(error = %e, "mirrorsync daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
