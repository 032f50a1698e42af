//! Bot Worker - Long-lived trading bot process
//!
//! 1. Loads configuration from the environment
//! 2. Connects to the shared store (Redis)
//! 3. Consumes START/STOP commands from the command queue
//! 4. Runs the market activity while started and publishes status
//! 5. Shuts down cleanly on SIGTERM, SIGINT or SIGHUP

use std::sync::Arc;
use tracing::info;

use bot_worker::store::RedisConnector;
use bot_worker::{logging, Orchestrator, WorkerConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    logging::init(&config.log_level);

    info!(
        "Starting Bot Worker... store: {}, queue: {}, status: {}",
        config.redis_url, config.command_queue, config.status_key
    );

    let connector = Arc::new(RedisConnector::new(&config.redis_url));
    Orchestrator::new(config, connector).start().await;

    Ok(())
}
