//! Bot Control - Producer side of the command queue
//!
//! Thin pass-throughs for whatever fronts the worker (an API layer, a CLI):
//! push START/STOP onto the command queue and read back the status record.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

use crate::state::Command;
use crate::store::{ConnectionHandle, StoreConnector, StoreError};

/// Control errors
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Store connection not available")]
    NotConnected,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Status as reported to readers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BotStatusReport {
    /// Raw fields of the latest status record
    Reported(HashMap<String, String>),
    /// Nothing published yet
    Unavailable { running: bool, message: String },
}

impl BotStatusReport {
    pub fn unavailable() -> Self {
        BotStatusReport::Unavailable {
            running: false,
            message: "No status available".to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            BotStatusReport::Reported(fields) => fields.get("running").map(|v| v == "true").unwrap_or(false),
            BotStatusReport::Unavailable { running, .. } => *running,
        }
    }
}

/// Client for sending commands to the worker and reading its status
pub struct BotControl {
    connection: Option<ConnectionHandle>,
    command_queue: String,
    status_key: String,
}

impl BotControl {
    pub fn new(connection: Option<ConnectionHandle>, command_queue: &str, status_key: &str) -> Self {
        Self {
            connection,
            command_queue: command_queue.to_string(),
            status_key: status_key.to_string(),
        }
    }

    /// Open a single connection; a failure leaves the control disconnected
    pub async fn connect(connector: &dyn StoreConnector, command_queue: &str, status_key: &str) -> Self {
        let connection = match connector.open().await {
            Ok(conn) => match conn.ping().await {
                Ok(()) => {
                    info!("Bot control connected to store at {}", connector.endpoint());
                    Some(conn)
                }
                Err(e) => {
                    error!("Bot control health check failed at {}: {}", connector.endpoint(), e);
                    None
                }
            },
            Err(e) => {
                error!("Bot control failed to connect to store at {}: {}", connector.endpoint(), e);
                None
            }
        };

        Self::new(connection, command_queue, status_key)
    }

    fn connection(&self) -> Result<&ConnectionHandle, ControlError> {
        self.connection.as_ref().ok_or(ControlError::NotConnected)
    }

    /// Push a command onto the queue
    pub async fn send_command(&self, command: Command) -> Result<(), ControlError> {
        let conn = self.connection()?;
        if let Err(e) = conn.push_command(&self.command_queue, command.as_str()).await {
            error!("Store error sending command {}: {}", command.as_str(), e);
            return Err(e.into());
        }
        info!("{} command sent to bot", command.as_str());
        Ok(())
    }

    pub async fn start_bot(&self) -> Result<(), ControlError> {
        self.send_command(Command::Start).await
    }

    pub async fn stop_bot(&self) -> Result<(), ControlError> {
        self.send_command(Command::Stop).await
    }

    /// Latest status record, or the "no status" placeholder when none exists
    pub async fn get_bot_status(&self) -> Result<BotStatusReport, ControlError> {
        let conn = self.connection()?;
        let fields = conn.read_status(&self.status_key).await.map_err(|e| {
            warn!("Store error getting bot status: {}", e);
            e
        })?;

        if fields.is_empty() {
            return Ok(BotStatusReport::unavailable());
        }
        Ok(BotStatusReport::Reported(fields))
    }

    /// "connected" or "disconnected"
    pub fn health(&self) -> &'static str {
        if self.connection.is_some() {
            "connected"
        } else {
            "disconnected"
        }
    }
}
