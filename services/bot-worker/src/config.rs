//! Worker Configuration

use serde::Deserialize;
use std::time::Duration;

use crate::connection::RetryPolicy;
use crate::runner::LoopTimings;
use crate::simulator::SimulatorConfig;

/// Worker configuration, read from environment variables
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Store URL (REDIS_URL)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Log filter directive (LOG_LEVEL)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Connection attempts per connect (MAX_RETRIES)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Command queue key (COMMAND_QUEUE)
    #[serde(default = "default_command_queue")]
    pub command_queue: String,
    /// Status hash key (STATUS_KEY)
    #[serde(default = "default_status_key")]
    pub status_key: String,
    /// Simulator tick in milliseconds (TICK_INTERVAL_MS)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            log_level: default_log_level(),
            max_retries: default_max_retries(),
            command_queue: default_command_queue(),
            status_key: default_status_key(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    /// Load configuration from any `config` source
    pub fn from_source<S>(source: S) -> anyhow::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Self = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        if config.max_retries == 0 {
            anyhow::bail!("MAX_RETRIES must be at least 1");
        }
        if config.tick_interval_ms == 0 {
            anyhow::bail!("TICK_INTERVAL_MS must be positive");
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    pub fn loop_timings(&self) -> LoopTimings {
        LoopTimings::default()
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            tick: Duration::from_millis(self.tick_interval_ms),
            ..SimulatorConfig::default()
        }
    }
}

fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_max_retries() -> u32 { 5 }
fn default_command_queue() -> String { "bot_commands".to_string() }
fn default_status_key() -> String { "bot_status".to_string() }
fn default_tick_interval_ms() -> u64 { 1000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        config::Environment::default()
            .try_parsing(true)
            .source(Some(source))
    }

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::from_source(env(&[])).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.command_queue, "bot_commands");
        assert_eq!(config.status_key, "bot_status");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.simulator_config(), SimulatorConfig::default());
    }

    #[test]
    fn test_config_from_environment() {
        let config = WorkerConfig::from_source(env(&[
            ("REDIS_URL", "redis://cache:6380/2"),
            ("LOG_LEVEL", "debug"),
            ("MAX_RETRIES", "8"),
            ("TICK_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.redis_url, "redis://cache:6380/2");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.retry_policy().max_retries, 8);
        assert_eq!(config.simulator_config().tick, Duration::from_millis(250));
    }

    #[test]
    fn test_config_rejects_zero_retries() {
        assert!(WorkerConfig::from_source(env(&[("MAX_RETRIES", "0")])).is_err());
    }
}
