//! Bot State - Trading state record, status snapshots and queue commands

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Bot state shared between the command loop and the market activity.
///
/// Only one logical writer touches it at a time; the lock is never held
/// across store I/O.
pub type SharedBotState = Arc<Mutex<BotState>>;

/// Commands accepted from the command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// Parse a raw queue payload. Only the exact texts are accepted; anything
    /// else yields `None` and is ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "START" => Some(Command::Start),
            "STOP" => Some(Command::Stop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
        }
    }
}

/// Mutable trading state of the bot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BotState {
    pub running: bool,
    pub pnl: f64,
    pub position_count: usize,
}

impl BotState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh state for sharing between tasks
    pub fn shared() -> SharedBotState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn start_trading(&mut self) {
        self.running = true;
    }

    pub fn stop_trading(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Apply a PnL change
    pub fn update_pnl(&mut self, change: f64) {
        self.pnl += change;
    }

    /// Snapshot the state as a status record stamped with the current time
    pub fn status(&self) -> StatusRecord {
        StatusRecord {
            running: self.running,
            pnl: self.pnl,
            positions: self.position_count,
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time status published to the store (latest write wins)
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub running: bool,
    pub pnl: f64,
    pub positions: usize,
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    pub const RUNNING: &'static str = "running";
    pub const PNL: &'static str = "pnl";
    pub const POSITIONS: &'static str = "positions";
    pub const TIMESTAMP: &'static str = "timestamp";

    /// Encode as string fields for the store hash
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (Self::RUNNING.to_string(), self.running.to_string()),
            (Self::PNL.to_string(), format_pnl(self.pnl)),
            (Self::POSITIONS.to_string(), self.positions.to_string()),
            (
                Self::TIMESTAMP.to_string(),
                self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, false),
            ),
        ]
    }

    /// Decode from store fields. Returns `None` if any field is missing or malformed.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let running = fields.get(Self::RUNNING)?.parse().ok()?;
        let pnl = fields.get(Self::PNL)?.parse().ok()?;
        let positions = fields.get(Self::POSITIONS)?.parse().ok()?;
        let timestamp = DateTime::parse_from_rfc3339(fields.get(Self::TIMESTAMP)?)
            .ok()?
            .with_timezone(&Utc);

        Some(Self {
            running,
            pnl,
            positions,
            timestamp,
        })
    }
}

// Debug formatting keeps the decimal point (0.0 rather than 0)
fn format_pnl(pnl: f64) -> String {
    format!("{:?}", pnl)
}
