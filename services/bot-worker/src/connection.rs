//! Connection Manager - Store connection lifecycle with capped exponential backoff

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::shutdown::ShutdownSignal;
use crate::store::{ConnectionHandle, StoreConnector, StoreError};

/// Connection lifecycle as seen by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Last attempt failed, waiting to retry
    Failed,
}

/// Retry policy for connection attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial_backoff, self.max_backoff)
    }
}

/// Doubling delay sequence capped at a maximum: 1, 2, 4, ... 30, 30, ...
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_delay())
    }
}

/// Owns the store connection.
///
/// Establishment runs under a lock so concurrent callers that find the
/// connection dead never open duplicates.
pub struct ConnectionManager {
    connector: Arc<dyn StoreConnector>,
    policy: RetryPolicy,
    shutdown: ShutdownSignal,
    current: Mutex<Option<ConnectionHandle>>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn StoreConnector>, policy: RetryPolicy, shutdown: ShutdownSignal) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            shutdown,
            current: Mutex::new(None),
            state,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Establish and health-check a connection, retrying up to `max_retries`
    /// attempts. Failure is non-fatal: the manager is left disconnected.
    pub async fn connect(&self, max_retries: u32) {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return;
        }
        self.establish(&mut current, max_retries).await;
    }

    /// Current connection after a liveness probe, reconnecting if the probe fails
    pub async fn get_connection(&self) -> Option<ConnectionHandle> {
        let mut current = self.current.lock().await;

        if let Some(conn) = current.clone() {
            match conn.ping().await {
                Ok(()) => return Some(conn),
                Err(e) => {
                    warn!("Store connection lost ({}), attempting to reconnect...", e);
                    if let Some(stale) = current.take() {
                        stale.close().await;
                    }
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }
        }

        self.establish(&mut current, self.policy.max_retries).await;
        current.clone()
    }

    /// Discard `failed` after a caller saw it break, so the next
    /// `get_connection` reconnects even if its health probe still passes.
    /// A connection that has already replaced it is left alone.
    pub async fn invalidate(&self, failed: &ConnectionHandle) {
        let mut current = self.current.lock().await;
        if !current.as_ref().is_some_and(|conn| Arc::ptr_eq(conn, failed)) {
            return;
        }
        if let Some(conn) = current.take() {
            warn!("Discarding failed store connection");
            conn.close().await;
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Release the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut current = self.current.lock().await;
        if let Some(conn) = current.take() {
            conn.close().await;
            info!("Store connection closed");
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn establish(&self, slot: &mut Option<ConnectionHandle>, max_retries: u32) {
        let endpoint = self.connector.endpoint();
        let mut backoff = self.policy.backoff();
        let _reset = AttemptReset { state: &self.state };

        for attempt in 1..=max_retries {
            if self.shutdown.is_triggered() {
                info!("Shutdown requested, stopping store connection attempts");
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);
            let result = tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    info!("Shutdown requested, abandoning store connection attempt");
                    break;
                }
                result = self.open_checked() => result,
            };

            match result {
                Ok(conn) => {
                    info!("Connected to store at {}", endpoint);
                    *slot = Some(conn);
                    self.state.send_replace(ConnectionState::Connected);
                    return;
                }
                Err(e) if attempt < max_retries => {
                    self.state.send_replace(ConnectionState::Failed);
                    let delay = backoff.next_delay();
                    warn!(
                        "Failed to connect to store (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt, max_retries, e, delay
                    );
                    if tokio::time::timeout(delay, self.shutdown.wait()).await.is_ok() {
                        info!("Shutdown requested, stopping store connection attempts");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to connect to store after {} attempts: {}", max_retries, e);
                }
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }

    async fn open_checked(&self) -> Result<ConnectionHandle, StoreError> {
        let conn = self.connector.open().await?;
        if let Err(e) = conn.ping().await {
            debug!("Health check failed on new connection: {}", e);
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }
}

/// Settles a `Connecting`/`Failed` state back to `Disconnected` when an
/// establish sequence is dropped mid-attempt
struct AttemptReset<'a> {
    state: &'a watch::Sender<ConnectionState>,
}

impl Drop for AttemptReset<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Connecting | ConnectionState::Failed => {
                *state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence_is_capped() {
        let delays: Vec<u64> = RetryPolicy::default()
            .backoff()
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_backoff_initial_above_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
    }
}
