//! In-memory store for testing without Redis

#![allow(dead_code)]

use async_trait::async_trait;
use bot_worker::store::{ConnectionHandle, StoreConnection, StoreConnector, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Shared in-memory state behind every mock connection
#[derive(Clone)]
pub struct MockStore {
    inner: Arc<Inner>,
}

struct Inner {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    status_writes: Mutex<Vec<HashMap<String, String>>>,
    pushed: Notify,
    reachable: AtomicBool,
    failing_opens: AtomicU32,
    failing_pops: AtomicU32,
    broken_pops: AtomicU32,
    failing_writes: AtomicU32,
    open_attempts: Mutex<Vec<Instant>>,
    open_delay: Mutex<Duration>,
    // Connections opened before the current generation are dead
    generation: AtomicU64,
    closed: AtomicU32,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                hashes: Mutex::new(HashMap::new()),
                status_writes: Mutex::new(Vec::new()),
                pushed: Notify::new(),
                reachable: AtomicBool::new(true),
                failing_opens: AtomicU32::new(0),
                failing_pops: AtomicU32::new(0),
                broken_pops: AtomicU32::new(0),
                failing_writes: AtomicU32::new(0),
                open_attempts: Mutex::new(Vec::new()),
                open_delay: Mutex::new(Duration::ZERO),
                generation: AtomicU64::new(0),
                closed: AtomicU32::new(0),
            }),
        }
    }

    pub fn connector(&self) -> Arc<MockConnector> {
        Arc::new(MockConnector { store: self.clone() })
    }

    /// A live connection outside any manager, e.g. for a `BotControl`
    pub fn connection(&self) -> ConnectionHandle {
        Arc::new(self.new_connection())
    }

    fn new_connection(&self) -> MockConnection {
        MockConnection {
            store: self.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }
    }

    /// Producer-side push (LPUSH)
    pub fn push(&self, queue: &str, command: &str) {
        self.inner
            .queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_front(command.to_string());
        self.inner.pushed.notify_one();
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.inner.queues.lock().unwrap().get(queue).map(|q| q.len()).unwrap_or(0)
    }

    pub fn status(&self, key: &str) -> HashMap<String, String> {
        self.inner.hashes.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    /// Every status write in order
    pub fn status_writes(&self) -> Vec<HashMap<String, String>> {
        self.inner.status_writes.lock().unwrap().clone()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn fail_next_opens(&self, n: u32) {
        self.inner.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_pops(&self, n: u32) {
        self.inner.failing_pops.store(n, Ordering::SeqCst);
    }

    /// Next `n` pops fail with a connection error while ping keeps passing,
    /// like a reaped socket dedicated to blocking pops
    pub fn break_next_pops(&self, n: u32) {
        self.inner.broken_pops.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.inner.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.inner.open_delay.lock().unwrap() = delay;
    }

    /// Kill every connection opened so far
    pub fn drop_connections(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn open_attempts(&self) -> Vec<Instant> {
        self.inner.open_attempts.lock().unwrap().clone()
    }

    pub fn closed_connections(&self) -> u32 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct MockConnector {
    store: MockStore,
}

#[async_trait]
impl StoreConnector for MockConnector {
    async fn open(&self) -> Result<ConnectionHandle, StoreError> {
        let inner = &self.store.inner;
        inner.open_attempts.lock().unwrap().push(Instant::now());

        let delay = *inner.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !inner.reachable.load(Ordering::SeqCst) || MockStore::take_failure(&inner.failing_opens) {
            return Err(StoreError::Connection("connection refused".to_string()));
        }
        Ok(Arc::new(self.store.new_connection()))
    }

    fn endpoint(&self) -> String {
        "mock://store".to_string()
    }
}

pub struct MockConnection {
    store: MockStore,
    generation: u64,
}

impl MockConnection {
    fn check_alive(&self) -> Result<(), StoreError> {
        let inner = &self.store.inner;
        if !inner.reachable.load(Ordering::SeqCst) || inner.generation.load(Ordering::SeqCst) != self.generation {
            return Err(StoreError::Connection("connection dropped".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for MockConnection {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_alive()
    }

    async fn pop_command(&self, queue: &str) -> Result<Option<String>, StoreError> {
        self.check_alive()?;
        if MockStore::take_failure(&self.store.inner.failing_pops) {
            return Err(StoreError::Command("simulated pop failure".to_string()));
        }
        if MockStore::take_failure(&self.store.inner.broken_pops) {
            return Err(StoreError::Connection("broken pipe".to_string()));
        }

        loop {
            let popped = self
                .store
                .inner
                .queues
                .lock()
                .unwrap()
                .get_mut(queue)
                .and_then(|q| q.pop_back());
            if let Some(command) = popped {
                return Ok(Some(command));
            }
            // notify_one stores a permit, so a push between the check and here is not lost
            self.store.inner.pushed.notified().await;
        }
    }

    async fn push_command(&self, queue: &str, command: &str) -> Result<(), StoreError> {
        self.check_alive()?;
        self.store.push(queue, command);
        Ok(())
    }

    async fn write_status(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.check_alive()?;
        if MockStore::take_failure(&self.store.inner.failing_writes) {
            return Err(StoreError::Command("simulated write failure".to_string()));
        }

        let inner = &self.store.inner;
        let mut hashes = inner.hashes.lock().unwrap();
        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        inner
            .status_writes
            .lock()
            .unwrap()
            .push(fields.iter().cloned().collect());
        Ok(())
    }

    async fn read_status(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check_alive()?;
        Ok(self.store.status(key))
    }

    async fn close(&self) {
        self.store.inner.closed.fetch_add(1, Ordering::SeqCst);
    }
}
