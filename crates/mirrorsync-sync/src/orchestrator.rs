//! Sync orchestration
//!
//! The [`SyncOrchestrator`] owns the sync lifecycle:
//!
//! ```text
//!            start                 pause
//! Stopped ─────────→ Starting ──→ Running ⇄ Paused
//!    ↑                  │            │        │
//!    └──── stop / failure / fatal error ──────┘
//! ```
//!
//! While running, a session task receives monitor events one at a time,
//! resolves each with the [`Reconciler`] and dispatches the resulting
//! actions to a bounded pool of executor tasks. A new event is only taken
//! once the previous batch finished, so resolution passes never interleave.
//!
//! ## Design Decisions
//!
//! - **Session epoch**: every start and stop bumps an epoch; results of a
//!   batch dispatched under an older epoch are discarded.
//! - **Pause** stops taking new events but lets a running batch finish.
//!   Queued events and the reconciler state survive until resume.
//! - **Reload hand-off**: after a batch that changed local files the
//!   bookmarks engine is asked to reload, and the session waits for its
//!   completion signal for at most `reload_timeout`.

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mirrorsync_core::config::SyncConfig;
use mirrorsync_core::domain::{Action, ErrorSeverity, SyncError};
use mirrorsync_core::ports::{
    IBookmarksEngine, IBookmarksObserver, IDirectoryMonitor, IMonitorDelegate, ISyncStateStore,
    MonitorEvent,
};
use tokio::sync::{mpsc, watch, Mutex, MutexGuard, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::executor::{ActionExecutor, Effect};
use crate::observers::{ObserverRegistry, SubscriptionId, SyncObserver};
use crate::reconciler::Reconciler;

// ============================================================================
// Public types
// ============================================================================

/// Lifecycle of the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Paused,
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Tunables of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Whether synchronization is switched on in the settings
    pub enabled: bool,
    /// Upper bound on actions executing at the same time
    pub max_concurrent_actions: usize,
    /// How long to wait for the bookmarks engine to confirm a reload
    pub reload_timeout: Duration,
    /// How long in-flight work may continue after entering the background
    pub background_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_concurrent_actions: config.max_concurrent_actions,
            reload_timeout: config.reload_timeout(),
            background_grace: config.background_grace(),
        }
    }
}

/// Collaborators the orchestrator drives
pub struct SyncComponents {
    pub local_monitor: Arc<dyn IDirectoryMonitor>,
    pub cloud_monitor: Arc<dyn IDirectoryMonitor>,
    pub executor: Arc<ActionExecutor>,
    pub bookmarks: Arc<dyn IBookmarksEngine>,
    pub state_store: Arc<dyn ISyncStateStore>,
}

// ============================================================================
// Internals
// ============================================================================

/// Forwards monitor events into the session queue
struct EventForwarder {
    tx: mpsc::UnboundedSender<MonitorEvent>,
}

impl IMonitorDelegate for EventForwarder {
    fn on_event(&self, event: MonitorEvent) {
        if self.tx.send(event).is_err() {
            trace!("Session gone, dropping monitor event");
        }
    }
}

/// Wakes the session waiting for a bookmarks reload
struct ReloadSignal(Arc<Notify>);

impl IBookmarksObserver for ReloadSignal {
    fn on_bookmarks_load_finished(&self) {
        trace!("Bookmarks load finished");
        self.0.notify_waiters();
    }
}

struct Session {
    cancel: CancellationToken,
    paused_tx: watch::Sender<bool>,
    // Detached on stop; a running batch finishes and its results are dropped
    _task: JoinHandle<()>,
}

struct Inner {
    local_monitor: Arc<dyn IDirectoryMonitor>,
    cloud_monitor: Arc<dyn IDirectoryMonitor>,
    executor: Arc<ActionExecutor>,
    bookmarks: Arc<dyn IBookmarksEngine>,
    state_store: Arc<dyn ISyncStateStore>,
    observers: ObserverRegistry,
    settings: OrchestratorSettings,
    control: Mutex<Option<Session>>,
    lifecycle: watch::Sender<LifecycleState>,
    busy: watch::Sender<bool>,
    epoch: AtomicU64,
    enabled: AtomicBool,
    reload_done: Arc<Notify>,
    reload_observer: Arc<dyn IBookmarksObserver>,
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Drives both monitors, the reconciler and the executor
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(components: SyncComponents, settings: OrchestratorSettings) -> Self {
        let reload_done = Arc::new(Notify::new());
        let reload_observer: Arc<dyn IBookmarksObserver> =
            Arc::new(ReloadSignal(reload_done.clone()));
        let (lifecycle, _) = watch::channel(LifecycleState::Stopped);
        let (busy, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                local_monitor: components.local_monitor,
                cloud_monitor: components.cloud_monitor,
                executor: components.executor,
                bookmarks: components.bookmarks,
                state_store: components.state_store,
                observers: ObserverRegistry::new(),
                enabled: AtomicBool::new(settings.enabled),
                settings,
                control: Mutex::new(None),
                lifecycle,
                busy,
                epoch: AtomicU64::new(0),
                reload_done,
                reload_observer,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle control
    // ------------------------------------------------------------------------

    /// Starts synchronization, or resumes it when paused
    ///
    /// Starts the cloud monitor, then the local one. If either fails both
    /// are stopped again and the error becomes the current sync error.
    ///
    /// # Errors
    /// Returns the error of the monitor that failed to start
    pub async fn start(&self) -> Result<(), SyncError> {
        let inner = &self.inner;
        let mut control = inner.control.lock().await;
        match inner.lifecycle() {
            LifecycleState::Running => {
                debug!("Synchronization already running");
                return Ok(());
            }
            LifecycleState::Paused => {
                inner.resume_locked(&control).await;
                return Ok(());
            }
            LifecycleState::Stopped | LifecycleState::Starting => {}
        }

        info!("Starting synchronization");
        inner.lifecycle.send_replace(LifecycleState::Starting);
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder: Arc<dyn IMonitorDelegate> = Arc::new(EventForwarder { tx });

        let started = async {
            inner.cloud_monitor.start(forwarder.clone()).await?;
            inner.local_monitor.start(forwarder).await
        }
        .await;
        if let Err(e) = started {
            error!(error = %e, "Failed to start synchronization");
            inner.stop_locked(&mut control).await;
            inner.observers.set_error(Some(e.clone()));
            return Err(e);
        }

        inner.bookmarks.add_observer(inner.reload_observer.clone());
        let reconciler = Reconciler::new(inner.state_store.initial_sync_finished().await);
        if reconciler.state().is_initial_synchronization() {
            info!("Performing initial synchronization");
        }

        let cancel = CancellationToken::new();
        let (paused_tx, paused_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(
            inner.clone(),
            reconciler,
            rx,
            cancel.clone(),
            paused_rx,
            epoch,
        ));
        *control = Some(Session {
            cancel,
            paused_tx,
            _task: task,
        });

        inner.lifecycle.send_replace(LifecycleState::Running);
        info!(epoch, "Synchronization started");
        Ok(())
    }

    /// Stops synchronization from any state
    ///
    /// Forgets both listings, clears the current error and unregisters from
    /// the bookmarks engine.
    pub async fn stop(&self) {
        let mut control = self.inner.control.lock().await;
        self.inner.stop_locked(&mut control).await;
    }

    /// Suspends synchronization without discarding state
    ///
    /// A batch already executing runs to completion. Ignored unless running.
    pub async fn pause(&self) {
        let control = self.inner.control.lock().await;
        if self.inner.lifecycle() != LifecycleState::Running {
            debug!(state = %self.inner.lifecycle(), "Pause ignored");
            return;
        }
        if let Some(session) = control.as_ref() {
            session.paused_tx.send_replace(true);
        }
        self.inner.local_monitor.pause().await;
        self.inner.cloud_monitor.pause().await;
        self.inner.lifecycle.send_replace(LifecycleState::Paused);
        info!("Synchronization paused");
    }

    /// Resumes a paused synchronization. Ignored unless paused.
    pub async fn resume(&self) {
        let control = self.inner.control.lock().await;
        if self.inner.lifecycle() != LifecycleState::Paused {
            debug!(state = %self.inner.lifecycle(), "Resume ignored");
            return;
        }
        self.inner.resume_locked(&control).await;
    }

    /// Applies the settings toggle: start when enabled, stop when disabled
    ///
    /// # Errors
    /// Returns the start error when enabling fails
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.start().await
        } else {
            self.stop().await;
            Ok(())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// The application came to the foreground: start or resume if enabled
    ///
    /// # Errors
    /// Returns the start error
    pub async fn enter_foreground(&self) -> Result<(), SyncError> {
        if !self.is_enabled() {
            return Ok(());
        }
        self.start().await
    }

    /// The application went to the background
    ///
    /// Waits up to `background_grace` for the current batch to finish, then
    /// pauses whether or not it did.
    pub async fn enter_background(&self) {
        if !self.is_enabled() {
            return;
        }
        let mut busy = self.inner.busy.subscribe();
        let grace = self.inner.settings.background_grace;
        let settled = tokio::time::timeout(grace, busy.wait_for(|b| !*b))
            .await
            .is_ok();
        if settled {
            debug!("No work in flight, pausing");
        } else {
            warn!(grace_secs = grace.as_secs(), "Background grace expired, pausing");
        }
        self.pause().await;
    }

    // ------------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------------

    pub fn lifecycle(&self) -> LifecycleState {
        self.inner.lifecycle()
    }

    /// Receiver following every lifecycle transition
    pub fn watch_lifecycle(&self) -> watch::Receiver<LifecycleState> {
        self.inner.lifecycle.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        *self.inner.busy.borrow()
    }

    pub fn current_error(&self) -> Option<SyncError> {
        self.inner.observers.error()
    }

    /// Subscribes `observer` to error and busy changes
    ///
    /// The observer is held weakly and notified immediately with the current
    /// state.
    pub fn subscribe(&self, observer: &Arc<dyn SyncObserver>) -> SubscriptionId {
        self.inner.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.observers.unsubscribe(id);
    }
}

impl Inner {
    fn lifecycle(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn set_busy(&self, busy: bool) {
        self.busy.send_replace(busy);
        self.observers.set_busy(busy);
    }

    async fn resume_locked(&self, control: &MutexGuard<'_, Option<Session>>) {
        self.local_monitor.resume().await;
        self.cloud_monitor.resume().await;
        if let Some(session) = control.as_ref() {
            session.paused_tx.send_replace(false);
        }
        self.lifecycle.send_replace(LifecycleState::Running);
        info!("Synchronization resumed");
    }

    async fn stop_locked(&self, control: &mut MutexGuard<'_, Option<Session>>) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(session) = control.take() {
            session.cancel.cancel();
        }
        self.local_monitor.stop().await;
        self.cloud_monitor.stop().await;
        self.bookmarks.remove_observer(&self.reload_observer);
        self.lifecycle.send_replace(LifecycleState::Stopped);
        self.observers.set_error(None);
        self.set_busy(false);
        info!("Synchronization stopped");
    }

    /// Executes one batch of actions and handles its outcome
    ///
    /// Returns the actions that failed so the reconciler can reconsider
    /// their identities.
    async fn process_actions(&self, actions: Vec<Action>, epoch: u64) -> Vec<Action> {
        if actions.is_empty() {
            self.observers.set_error(None);
            return Vec::new();
        }

        self.set_busy(true);
        debug!(count = actions.len(), "Processing actions");
        let results = self.dispatch(actions).await;

        let mut reload = false;
        let mut failed = Vec::new();
        for (action, result) in results {
            if self.current_epoch() != epoch {
                debug!("Session ended, discarding remaining results");
                break;
            }
            match result {
                Ok(effect) => reload |= effect == Effect::LocalChanged,
                Err(e) => {
                    debug!(action = %action, error = %e, "Action failed");
                    self.process_error(e, epoch).await;
                    failed.push(action);
                }
            }
        }

        if self.current_epoch() != epoch {
            return Vec::new();
        }
        self.set_busy(false);
        if reload {
            self.reload_bookmarks().await;
        }
        failed
    }

    /// Runs `actions` on a bounded set of tasks, returning results in order
    async fn dispatch(&self, actions: Vec<Action>) -> Vec<(Action, Result<Effect, SyncError>)> {
        let limit = Arc::new(Semaphore::new(self.settings.max_concurrent_actions.max(1)));
        let mut tasks = JoinSet::new();

        for (index, action) in actions.into_iter().enumerate() {
            let Ok(permit) = limit.clone().acquire_owned().await else {
                break;
            };
            let executor = self.executor.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = executor.execute(&action).await;
                (index, action, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Action task failed"),
            }
        }
        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, action, result)| (action, result))
            .collect()
    }

    /// Classifies `err` and reacts to it
    async fn process_error(&self, err: SyncError, epoch: u64) {
        match err.severity() {
            ErrorSeverity::Transient | ErrorSeverity::LocalIo => {
                warn!(error = %err, "Synchronization error");
                self.observers.set_error(Some(err));
            }
            ErrorSeverity::EnvironmentFatal => {
                let mut control = self.control.lock().await;
                if self.current_epoch() != epoch {
                    return;
                }
                error!(error = %err, "Stopping synchronization");
                self.stop_locked(&mut control).await;
                self.observers.set_error(Some(err));
            }
            ErrorSeverity::Unclassified => {
                warn!(error = %err, "Unclassified synchronization error ignored");
            }
        }
    }

    /// Asks the bookmarks engine to reload and waits for it, bounded
    async fn reload_bookmarks(&self) {
        let finished = self.reload_done.notified();
        tokio::pin!(finished);
        finished.as_mut().enable();

        debug!("Reloading bookmarks");
        self.bookmarks.load_bookmarks();

        let timeout = self.settings.reload_timeout;
        match tokio::time::timeout(timeout, finished).await {
            Ok(()) => debug!("Bookmarks reloaded"),
            Err(_) => {
                let err = SyncError::ReloadTimedOut(timeout.as_secs());
                error!(error = %err, "Bookmarks engine did not confirm reload");
                self.observers.set_error(Some(err));
            }
        }
    }
}

// ============================================================================
// Session loop
// ============================================================================

async fn run_session(
    inner: Arc<Inner>,
    mut reconciler: Reconciler,
    mut events: mpsc::UnboundedReceiver<MonitorEvent>,
    cancel: CancellationToken,
    mut paused: watch::Receiver<bool>,
    epoch: u64,
) {
    loop {
        if *paused.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = paused.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        trace!(event = event.name(), "Handling monitor event");
        let actions = reconciler.resolve(event);
        for action in inner.process_actions(actions, epoch).await {
            reconciler.action_failed(&action);
        }
    }
    debug!(epoch, "Session loop exited");
}
