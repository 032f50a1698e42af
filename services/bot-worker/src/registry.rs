//! Task Registry - Tracks in-flight cancellable activities
//!
//! Every activity is spawned through the registry and carries a guard that
//! removes its entry when the task's future completes or is dropped by
//! cancellation. An empty registry therefore means nothing is still executing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{debug, warn};

/// Why an activity did not produce its output
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("shutdown requested")]
    Shutdown,

    #[error("timed out")]
    TimedOut,

    #[error("activity cancelled")]
    Cancelled,

    #[error("activity panicked: {0}")]
    Panicked(String),
}

impl From<JoinError> for ActivityError {
    fn from(e: JoinError) -> Self {
        if e.is_cancelled() {
            ActivityError::Cancelled
        } else {
            ActivityError::Panicked(e.to_string())
        }
    }
}

/// Registry of live activities
#[derive(Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    entries: Mutex<HashMap<u64, Entry>>,
    next_id: AtomicU64,
    live: watch::Sender<usize>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            live,
        }
    }
}

struct Entry {
    name: String,
    // None until the spawn call has returned
    abort: Option<AbortHandle>,
}

impl RegistryInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the registry entry when the owning task's future goes away
struct Deregister {
    id: u64,
    inner: Arc<RegistryInner>,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        let mut entries = self.inner.entries();
        if let Some(entry) = entries.remove(&self.id) {
            debug!("Activity '{}' ({}) finished", entry.name, self.id);
        }
        self.inner.live.send_replace(entries.len());
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` as a tracked activity
    pub fn spawn<F>(&self, name: &str, fut: F) -> ActivityHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut entries = self.inner.entries();
            entries.insert(
                id,
                Entry {
                    name: name.to_string(),
                    abort: None,
                },
            );
            self.inner.live.send_replace(entries.len());
        }

        let guard = Deregister {
            id,
            inner: Arc::clone(&self.inner),
        };
        let join = tokio::spawn(async move {
            let _guard = guard;
            fut.await
        });

        {
            let mut entries = self.inner.entries();
            if let Some(entry) = entries.get_mut(&id) {
                entry.abort = Some(join.abort_handle());
                // Wake any cancel_all sweep waiting on this entry
                self.inner.live.send_replace(entries.len());
            }
        }

        debug!("Registered activity '{}' ({})", name, id);
        ActivityHandle {
            id,
            name: name.to_string(),
            join,
        }
    }

    /// Number of activities still executing
    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the live activities
    pub fn names(&self) -> Vec<String> {
        self.inner.entries().values().map(|e| e.name.clone()).collect()
    }

    /// Cancel every live activity and wait until all of them have finished
    pub async fn cancel_all(&self) {
        let mut live = self.inner.live.subscribe();
        loop {
            let remaining = {
                let entries = self.inner.entries();
                for entry in entries.values() {
                    if let Some(abort) = &entry.abort {
                        abort.abort();
                    }
                }
                entries.len()
            };
            if remaining == 0 {
                break;
            }
            // Sender lives in `inner`, so this only fails if the registry is gone
            if live.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Owner-side handle of a registered activity.
///
/// Awaiting the handle yields the activity's output.
pub struct ActivityHandle<T> {
    id: u64,
    name: String,
    join: JoinHandle<T>,
}

impl<T> ActivityHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the activity and wait for it to finish. Cancellation is absorbed.
    pub async fn cancel(self) {
        self.join.abort();
        match self.join.await {
            Ok(_) => debug!("Activity '{}' completed before cancellation", self.name),
            Err(e) if e.is_cancelled() => debug!("Activity '{}' cancelled", self.name),
            Err(e) => warn!("Activity '{}' failed: {}", self.name, e),
        }
    }
}

impl<T> Future for ActivityHandle<T> {
    type Output = Result<T, ActivityError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.join)
            .poll(cx)
            .map(|res| res.map_err(ActivityError::from))
    }
}
