//! Orchestrator - Wires the worker components and owns the process lifecycle

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::connection::ConnectionManager;
use crate::runner::{CommandLoop, StatusPublisher};
use crate::shutdown::{ShutdownCoordinator, ShutdownSignal};
use crate::simulator::{MarketActivity, MarketSimulator};
use crate::state::{BotState, SharedBotState};
use crate::store::StoreConnector;

/// Top-level worker: connect, publish initial status, run the command loop,
/// and always finish with the shutdown sequence
pub struct Orchestrator {
    config: WorkerConfig,
    coordinator: Arc<ShutdownCoordinator>,
    connections: Arc<ConnectionManager>,
    publisher: Arc<StatusPublisher>,
    bot: SharedBotState,
    command_loop: CommandLoop,
}

impl Orchestrator {
    /// Create an orchestrator running the market simulator
    pub fn new(config: WorkerConfig, connector: Arc<dyn StoreConnector>) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownSignal::new()));
        let activity = Arc::new(MarketSimulator::new(
            coordinator.signal().clone(),
            config.simulator_config(),
        ));
        Self::with_activity(config, connector, coordinator, activity)
    }

    /// Create an orchestrator with a custom market activity
    pub fn with_activity(
        config: WorkerConfig,
        connector: Arc<dyn StoreConnector>,
        coordinator: Arc<ShutdownCoordinator>,
        activity: Arc<dyn MarketActivity>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            connector,
            config.retry_policy(),
            coordinator.signal().clone(),
        ));
        let publisher = Arc::new(StatusPublisher::new(Arc::clone(&connections), &config.status_key));
        let command_loop = CommandLoop::new(
            Arc::clone(&connections),
            Arc::clone(&coordinator),
            Arc::clone(&publisher),
            activity,
            &config.command_queue,
            config.loop_timings(),
        );

        Self {
            config,
            coordinator,
            connections,
            publisher,
            bot: BotState::shared(),
            command_loop,
        }
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connections)
    }

    pub fn bot(&self) -> SharedBotState {
        Arc::clone(&self.bot)
    }

    /// Install signal traps, then run until shutdown
    pub async fn start(self) {
        if let Err(e) = self.coordinator.install_signal_traps() {
            warn!("Failed to install signal handlers: {:#}", e);
        }
        self.run().await;
    }

    /// Run the worker without touching process signals
    pub async fn run(self) {
        info!("Starting trading bot system...");

        let connections = Arc::clone(&self.connections);
        self.coordinator
            .add_shutdown_callback("close store connection", move || async move {
                connections.close().await;
                Ok(())
            });

        self.connections.connect(self.config.max_retries).await;
        self.publisher.publish_state(&self.bot).await;

        let Self {
            coordinator,
            mut command_loop,
            bot,
            ..
        } = self;

        // Own task so a panic in the loop still reaches the shutdown path
        let command_task = tokio::spawn(async move { command_loop.run(&bot).await });
        if let Err(e) = command_task.await {
            error!("Command loop terminated unexpectedly: {}", e);
        }

        coordinator.shutdown().await;
        info!("Bot system stopped");
    }
}
