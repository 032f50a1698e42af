//! Command Loop - Main state machine consuming the command queue

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::registry::{ActivityError, ActivityHandle};
use crate::shutdown::ShutdownCoordinator;
use crate::simulator::{MarketActivity, StatusSink};
use crate::state::{Command, SharedBotState, StatusRecord};
use crate::store::StoreError;

/// Waits applied by the command loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopTimings {
    /// Wait before retrying when no connection is available
    pub idle_wait: Duration,
    /// Cooldown after an unexpected error
    pub error_cooldown: Duration,
    /// Cooldown after a store error during the pop
    pub store_error_cooldown: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_secs(1),
            error_cooldown: Duration::from_secs(1),
            store_error_cooldown: Duration::from_secs(5),
        }
    }
}

/// Whether a market activity is live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Active,
}

/// Writes status records to the store's status hash
pub struct StatusPublisher {
    connections: Arc<ConnectionManager>,
    key: String,
}

impl StatusPublisher {
    pub fn new(connections: Arc<ConnectionManager>, key: &str) -> Self {
        Self {
            connections,
            key: key.to_string(),
        }
    }

    /// Publish the current bot state, logging failures
    pub async fn publish_state(&self, bot: &SharedBotState) {
        let status = bot.lock().await.status();
        if let Err(e) = self.publish(status).await {
            error!("Failed to update status: {}", e);
        }
    }
}

#[async_trait]
impl StatusSink for StatusPublisher {
    async fn publish(&self, status: StatusRecord) -> Result<(), StoreError> {
        let Some(conn) = self.connections.get_connection().await else {
            debug!("No store connection, skipping status update");
            return Ok(());
        };

        let fields = status.to_fields();
        conn.write_status(&self.key, &fields).await?;
        debug!("Status updated: {:?}", fields);
        Ok(())
    }
}

/// Central state machine: pops commands, toggles the market activity and
/// republishes status after every transition
pub struct CommandLoop {
    connections: Arc<ConnectionManager>,
    coordinator: Arc<ShutdownCoordinator>,
    publisher: Arc<StatusPublisher>,
    activity: Arc<dyn MarketActivity>,
    queue: String,
    timings: LoopTimings,
    market_task: Option<ActivityHandle<()>>,
}

impl CommandLoop {
    pub fn new(
        connections: Arc<ConnectionManager>,
        coordinator: Arc<ShutdownCoordinator>,
        publisher: Arc<StatusPublisher>,
        activity: Arc<dyn MarketActivity>,
        queue: &str,
        timings: LoopTimings,
    ) -> Self {
        Self {
            connections,
            coordinator,
            publisher,
            activity,
            queue: queue.to_string(),
            timings,
            market_task: None,
        }
    }

    pub fn state(&self) -> LoopState {
        match &self.market_task {
            Some(task) if !task.is_finished() => LoopState::Active,
            _ => LoopState::Idle,
        }
    }

    /// Process commands until shutdown. Commands are handled one at a time,
    /// each fully dispatched before the next pop.
    pub async fn run(&mut self, bot: &SharedBotState) {
        info!("Command loop started, waiting on '{}'", self.queue);

        while !self.coordinator.is_shutdown_requested() {
            let Some(conn) = self.connections.get_connection().await else {
                if self.coordinator.wait_timeout(self.timings.idle_wait).await {
                    break;
                }
                continue;
            };

            let queue = self.queue.clone();
            let popping = Arc::clone(&conn);
            let pop = self
                .coordinator
                .register_activity("command-pop", async move { popping.pop_command(&queue).await });

            match self.coordinator.race_activity(pop, None).await {
                Ok(Ok(Some(raw))) => {
                    info!("Received command: {}", raw);
                    self.handle_command(&raw, bot).await;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    if e.is_connectivity() {
                        warn!("Store connection error while waiting for commands: {}", e);
                        self.connections.invalidate(&conn).await;
                    } else {
                        error!("Store command error: {}", e);
                    }
                    if self.coordinator.wait_timeout(self.timings.store_error_cooldown).await {
                        break;
                    }
                }
                Err(ActivityError::Shutdown) => {
                    info!("Command processing cancelled due to shutdown");
                    break;
                }
                Err(e) => {
                    error!("Unexpected command error: {}", e);
                    if self.coordinator.wait_timeout(self.timings.error_cooldown).await {
                        break;
                    }
                }
            }
        }

        self.stop_market_task().await;
        info!("Command loop stopped");
    }

    /// Parse and dispatch a raw queue payload. Unknown payloads are ignored.
    pub async fn handle_command(&mut self, raw: &str, bot: &SharedBotState) {
        match Command::parse(raw) {
            Some(command) => self.dispatch(command, bot).await,
            None => debug!("Ignoring unknown command: {:?}", raw),
        }
    }

    pub async fn dispatch(&mut self, command: Command, bot: &SharedBotState) {
        match command {
            Command::Start => {
                {
                    let mut state = bot.lock().await;
                    if !state.is_running() {
                        state.start_trading();
                        info!("Bot started");
                    }
                }

                if self.state() == LoopState::Idle {
                    self.start_market_task(bot);
                }

                self.publisher.publish_state(bot).await;
            }
            Command::Stop => {
                info!("Bot stopping...");
                bot.lock().await.stop_trading();
                self.stop_market_task().await;
                self.publisher.publish_state(bot).await;
            }
        }
    }

    fn start_market_task(&mut self, bot: &SharedBotState) {
        let activity = Arc::clone(&self.activity);
        let bot = Arc::clone(bot);
        let sink: Arc<dyn StatusSink> = self.publisher.clone();

        self.market_task = Some(
            self.coordinator
                .register_activity("market-data", async move { activity.run(bot, sink).await }),
        );
    }

    async fn stop_market_task(&mut self) {
        if let Some(task) = self.market_task.take() {
            if !task.is_finished() {
                info!("Cancelling market data handler...");
            }
            task.cancel().await;
        }
    }
}
