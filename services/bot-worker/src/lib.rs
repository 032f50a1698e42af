//! Bot Worker Library
//!
//! Orchestration core for the trading bot worker: consumes START/STOP commands
//! from a shared store, runs the market activity while the bot is running and
//! shuts down cooperatively on process signals.

pub mod config;
pub mod connection;
pub mod control;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod shutdown;
pub mod simulator;
pub mod state;
pub mod store;

// Re-export main types for convenience
pub use config::WorkerConfig;
pub use connection::{Backoff, ConnectionManager, ConnectionState, RetryPolicy};
pub use control::{BotControl, BotStatusReport, ControlError};
pub use orchestrator::Orchestrator;
pub use registry::{ActivityError, ActivityHandle, TaskRegistry};
pub use runner::{CommandLoop, LoopState, LoopTimings, StatusPublisher};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase, ShutdownSignal};
pub use simulator::{MarketActivity, MarketSimulator, SimulatorConfig, StatusSink};
pub use state::{BotState, Command, SharedBotState, StatusRecord};
pub use store::{ConnectionHandle, StoreConnection, StoreConnector, StoreError};
