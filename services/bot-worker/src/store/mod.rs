//! Shared store boundary - command queue and status blackboard

pub mod redis_store;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use self::redis_store::{RedisConnection, RedisConnector};

/// Live connection shared read-mostly; borrowed per call, never held across waits
pub type ConnectionHandle = Arc<dyn StoreConnection>;

impl std::fmt::Debug for dyn StoreConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreConnection")
    }
}

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Connection(String),

    #[error("Store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// Whether the error means the connection itself is unusable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// Operations the worker needs from the shared store
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Lightweight liveness probe
    async fn ping(&self) -> Result<(), StoreError>;

    /// Block until a command can be popped from the consuming end of `queue`.
    /// No client-side timeout.
    async fn pop_command(&self, queue: &str) -> Result<Option<String>, StoreError>;

    /// Push a command onto the producing end of `queue`
    async fn push_command(&self, queue: &str, command: &str) -> Result<(), StoreError>;

    /// Upsert all `fields` of the hash at `key`
    async fn write_status(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Read every field of the hash at `key`; empty when absent
    async fn read_status(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Release the connection
    async fn close(&self);
}

/// Opens new store connections
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self) -> Result<ConnectionHandle, StoreError>;

    /// Endpoint description for logs
    fn endpoint(&self) -> String;
}
