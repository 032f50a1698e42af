//! Market Simulator - Stand-in market activity while the bot is running
//!
//! Each tick perturbs PnL by a bounded random amount and publishes the new
//! status. The command loop only relies on [`MarketActivity`], so real market
//! data processing can replace the simulator without touching control flow.

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::shutdown::ShutdownSignal;
use crate::state::{SharedBotState, StatusRecord};
use crate::store::StoreError;

/// Destination for status snapshots
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn publish(&self, status: StatusRecord) -> Result<(), StoreError>;
}

/// Background activity run while the bot is active
#[async_trait]
pub trait MarketActivity: Send + Sync {
    /// Run until the bot stops, shutdown fires, or the task is cancelled
    async fn run(&self, bot: SharedBotState, sink: Arc<dyn StatusSink>);
}

/// Simulator timing and perturbation bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    pub tick: Duration,
    /// PnL moves uniformly within [-max_step, +max_step] per tick
    pub max_step: f64,
    /// Pause after an unexpected error before resuming
    pub error_backoff: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            max_step: 10.0,
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Simulated market activity
pub struct MarketSimulator {
    shutdown: ShutdownSignal,
    config: SimulatorConfig,
}

impl MarketSimulator {
    pub fn new(shutdown: ShutdownSignal, config: SimulatorConfig) -> Self {
        Self { shutdown, config }
    }

    /// Returns true if shutdown fired during the wait
    async fn pause(&self, duration: Duration) -> bool {
        tokio::time::timeout(duration, self.shutdown.wait()).await.is_ok()
    }

    async fn should_continue(&self, bot: &SharedBotState) -> bool {
        bot.lock().await.is_running() && !self.shutdown.is_triggered()
    }

    fn perturbation(&self) -> f64 {
        let step = self.config.max_step.abs();
        rand::thread_rng().gen_range(-step..=step)
    }

    async fn simulate_trading_activity(&self, bot: &SharedBotState, sink: &dyn StatusSink) -> anyhow::Result<()> {
        let status = {
            let mut state = bot.lock().await;
            if !state.is_running() {
                return Ok(());
            }
            state.update_pnl(self.perturbation());
            state.status()
        };

        sink.publish(status).await?;
        Ok(())
    }
}

#[async_trait]
impl MarketActivity for MarketSimulator {
    async fn run(&self, bot: SharedBotState, sink: Arc<dyn StatusSink>) {
        info!("Starting market data handler (simulated)");

        while self.should_continue(&bot).await {
            if self.pause(self.config.tick).await {
                break;
            }
            if self.shutdown.is_triggered() {
                break;
            }

            if let Err(e) = self.simulate_trading_activity(&bot, sink.as_ref()).await {
                error!("Market data error: {}", e);
                if self.pause(self.config.error_backoff).await {
                    break;
                }
            }
        }

        info!("Market data handler stopped");
    }
}
