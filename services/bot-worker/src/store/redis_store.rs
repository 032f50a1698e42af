// Redis store implementation
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::{ConnectionHandle, StoreConnection, StoreConnector, StoreError};

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Command(e.to_string())
        }
    }
}

/// Opens Redis connections for a URL
pub struct RedisConnector {
    url: String,
}

impl RedisConnector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn open(&self) -> Result<ConnectionHandle, StoreError> {
        let client = redis::Client::open(self.url.as_str())?;
        let commands = client.get_multiplexed_async_connection().await?;
        let blocking = client.get_multiplexed_async_connection().await?;

        Ok(Arc::new(RedisConnection { commands, blocking }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

/// Redis connection pair.
///
/// `BRPOP` gets its own connection: on a multiplexed connection a pending
/// blocking pop would stall every pipelined command behind it.
pub struct RedisConnection {
    commands: MultiplexedConnection,
    blocking: MultiplexedConnection,
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.commands.clone())
            .await?;
        Ok(())
    }

    async fn pop_command(&self, queue: &str) -> Result<Option<String>, StoreError> {
        // Timeout 0 blocks indefinitely
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(0)
            .query_async(&mut self.blocking.clone())
            .await?;
        Ok(popped.map(|(_, command)| command))
    }

    async fn push_command(&self, queue: &str, command: &str) -> Result<(), StoreError> {
        let _: i64 = self.commands.clone().lpush(queue, command).await?;
        Ok(())
    }

    async fn write_status(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let _: i64 = redis::cmd("HSET")
            .arg(key)
            .arg(fields)
            .query_async(&mut self.commands.clone())
            .await?;
        Ok(())
    }

    async fn read_status(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let fields: HashMap<String, String> = self.commands.clone().hgetall(key).await?;
        Ok(fields)
    }

    async fn close(&self) {
        // Multiplexed connections close once the last clone is dropped
        debug!("Releasing Redis connection pair");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(StoreError::from(redis::RedisError::from(refused)).is_connectivity());

        let wrong_type = redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE"));
        assert!(!StoreError::from(wrong_type).is_connectivity());
    }

    #[test]
    fn test_connector_endpoint() {
        let connector = RedisConnector::new("redis://localhost:6379");
        assert_eq!(connector.endpoint(), "redis://localhost:6379");
    }
}
