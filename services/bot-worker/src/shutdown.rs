//! Shutdown Coordination - Signal traps, activity cancellation and teardown

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use crate::registry::{ActivityError, ActivityHandle, TaskRegistry};

/// One-shot, process-wide shutdown signal.
///
/// Clones share the same flag. Once triggered it stays triggered.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the signal. Returns true only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender is owned by `self`, so the channel cannot close here
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    ShutdownRequested,
    Draining,
    Terminated,
}

type TeardownFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type TeardownAction = Box<dyn FnOnce() -> TeardownFuture + Send>;

/// Process-wide cooperative cancellation authority
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    registry: TaskRegistry,
    callbacks: Mutex<Vec<(String, TeardownAction)>>,
    phase: watch::Sender<ShutdownPhase>,
    signal_listener: Mutex<Option<AbortHandle>>,
}

impl ShutdownCoordinator {
    pub fn new(signal: ShutdownSignal) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            signal,
            registry: TaskRegistry::new(),
            callbacks: Mutex::new(Vec::new()),
            phase,
            signal_listener: Mutex::new(None),
        }
    }

    pub fn signal(&self) -> &ShutdownSignal {
        &self.signal
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signal.is_triggered()
    }

    pub fn phase(&self) -> ShutdownPhase {
        let phase = *self.phase.borrow();
        if phase == ShutdownPhase::Running && self.signal.is_triggered() {
            ShutdownPhase::ShutdownRequested
        } else {
            phase
        }
    }

    /// Number of registered activities still executing
    pub fn active_activities(&self) -> usize {
        self.registry.len()
    }

    /// Trap SIGTERM, SIGINT and SIGHUP (Ctrl-C elsewhere). The listener only
    /// flips the shutdown signal.
    #[cfg(unix)]
    pub fn install_signal_traps(&self) -> anyhow::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let shutdown = self.signal.clone();

        let listener = tokio::spawn(async move {
            let name = tokio::select! {
                _ = terminate.recv() => "SIGTERM",
                _ = interrupt.recv() => "SIGINT",
                _ = hangup.recv() => "SIGHUP",
            };
            info!("Received {}, initiating graceful shutdown...", name);
            shutdown.trigger();
        });

        *lock(&self.signal_listener) = Some(listener.abort_handle());
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_traps(&self) -> anyhow::Result<()> {
        let shutdown = self.signal.clone();

        let listener = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, initiating graceful shutdown...");
                shutdown.trigger();
            }
        });

        *lock(&self.signal_listener) = Some(listener.abort_handle());
        Ok(())
    }

    /// Spawn `fut` as a cancellable activity tracked until it completes
    pub fn register_activity<F>(&self, name: &str, fut: F) -> ActivityHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.registry.spawn(name, fut)
    }

    /// Queue a teardown action for `shutdown()`. Actions run in registration order.
    pub fn add_shutdown_callback<F, Fut>(&self, name: &str, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let action: TeardownAction = Box::new(move || -> TeardownFuture { Box::pin(action()) });
        lock(&self.callbacks).push((name.to_string(), action));
    }

    pub async fn wait_for_shutdown(&self) {
        self.signal.wait().await;
    }

    /// Sleep for `duration` unless shutdown fires first.
    /// Returns true if shutdown was requested.
    pub async fn wait_timeout(&self, duration: Duration) -> bool {
        tokio::time::timeout(duration, self.signal.wait()).await.is_ok()
    }

    /// Run `fut` against the shutdown wait and an optional timeout.
    ///
    /// Whichever resolves first wins; the losers are dropped before returning.
    /// Shutdown wins ties.
    pub async fn race<F>(&self, fut: F, timeout: Option<Duration>) -> Result<F::Output, ActivityError>
    where
        F: Future,
    {
        let deadline = async {
            match timeout {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.signal.wait() => Err(ActivityError::Shutdown),
            output = fut => Ok(output),
            _ = deadline => Err(ActivityError::TimedOut),
        }
    }

    /// Race a registered activity against shutdown. If the activity loses it
    /// is cancelled and awaited before returning.
    pub async fn race_activity<T>(
        &self,
        mut activity: ActivityHandle<T>,
        timeout: Option<Duration>,
    ) -> Result<T, ActivityError> {
        match self.race(&mut activity, timeout).await {
            Ok(result) => result,
            Err(interrupted) => {
                activity.cancel().await;
                Err(interrupted)
            }
        }
    }

    /// Cancel all registered activities and wait for them to finish
    pub async fn cancel_all_activities(&self) {
        let live = self.registry.len();
        if live == 0 {
            return;
        }

        info!("Cancelling {} tasks...", live);
        self.registry.cancel_all().await;
    }

    /// Full shutdown sequence: drain activities, then run teardown callbacks.
    /// Runs once; later calls return immediately.
    pub async fn shutdown(&self) {
        let entered = self.phase.send_if_modified(|phase| match phase {
            ShutdownPhase::Draining | ShutdownPhase::Terminated => false,
            _ => {
                *phase = ShutdownPhase::Draining;
                true
            }
        });
        if !entered {
            debug!("Shutdown already in progress");
            return;
        }

        self.signal.trigger();
        info!("Starting graceful shutdown...");

        self.cancel_all_activities().await;
        self.run_shutdown_callbacks().await;

        if let Some(listener) = lock(&self.signal_listener).take() {
            listener.abort();
        }

        self.phase.send_replace(ShutdownPhase::Terminated);
        info!("Shutdown complete");
    }

    async fn run_shutdown_callbacks(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.callbacks));

        for (name, action) in callbacks {
            // Own task per callback so a panic is contained like an error
            match tokio::spawn(async move { action().await }).await {
                Ok(Ok(())) => debug!("Shutdown callback '{}' completed", name),
                Ok(Err(e)) => error!("Error running shutdown callback '{}': {:#}", name, e),
                Err(e) => error!("Shutdown callback '{}' panicked: {}", name, e),
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(ShutdownSignal::new())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
